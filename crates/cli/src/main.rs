//! Ink story runner.
//!
//! Loads a script from a file or standard input, executes it, and drives
//! the interactive choice loop: print lines until the story pauses, list
//! the numbered options, read a selection, repeat.

mod config;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::RunConfig;
use ink_core::{Flags, SourceBuffer};
use ink_runtime::{Story, StoryError};

#[derive(Parser)]
#[command(name = "inkc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load and execute an Ink story", long_about = None)]
struct Cli {
    /// Input .ink script; reads standard input when omitted
    file: Option<PathBuf>,

    /// Enable color output
    #[arg(long)]
    colors: bool,

    /// Compile the story without executing it
    #[arg(long)]
    compile_only: bool,

    /// Dump the source file's syntax tree
    #[arg(long)]
    dump_ast: bool,

    /// Dump the lowered intermediate representation
    #[arg(long)]
    dump_ir: bool,

    /// Dump the story's bytecode
    #[arg(long)]
    dump_story: bool,

    /// Enable execution tracing
    #[arg(long)]
    trace: bool,

    /// Enable garbage collector tracing
    #[arg(long)]
    trace_gc: bool,

    /// Collect on every allocation
    #[arg(long)]
    stress_gc: bool,

    /// Configuration file (defaults to ./ink.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn flags(&self, base: Flags) -> Flags {
        let mut flags = base;

        if self.colors {
            flags |= Flags::COLOR;
        }
        if self.dump_ast {
            flags |= Flags::DUMP_AST;
        }
        if self.dump_ir {
            flags |= Flags::DUMP_IR;
        }
        if self.dump_story {
            flags |= Flags::DUMP_CODE;
        }
        if self.trace {
            flags |= Flags::VM_TRACING;
        }
        if self.trace_gc {
            flags |= Flags::GC_TRACING;
        }
        if self.stress_gc {
            flags |= Flags::GC_STRESS | Flags::GC_ENABLE;
        }
        flags
    }
}

fn install_tracing(flags: Flags) {
    let filter = if flags.contains(Flags::VM_TRACING) || flags.contains(Flags::GC_TRACING) {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let config = match RunConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("inkc: {}", message);
            process::exit(1);
        }
    };

    let flags = cli.flags(config.flags());
    install_tracing(flags);

    let source = match &cli.file {
        Some(path) => SourceBuffer::from_path(path),
        None => SourceBuffer::from_stdin(),
    };
    let source = match source {
        Ok(source) => source,
        Err(err) => {
            eprintln!("inkc: {}", err);
            process::exit(1);
        }
    };

    let mut story = Story::open();

    if let Err(err) = story.load_source(&source, flags) {
        // Compile failures carry the fully rendered diagnostics.
        eprintln!("{}", err);
        process::exit(1);
    }

    if cli.compile_only {
        return;
    }

    if let Err(err) = run_interactive(&mut story) {
        eprintln!("inkc: {}", err);
        process::exit(1);
    }
}

fn run_interactive(story: &mut Story) -> Result<(), StoryError> {
    let stdin = io::stdin();

    loop {
        while story.can_continue() {
            if let Some(line) = story.continue_story()? {
                if !line.is_empty() {
                    println!("{}", line);
                }
            }
        }

        if story.choice_count() == 0 {
            return Ok(());
        }

        for choice in story.choices() {
            println!("{}: {}", choice.index + 1, choice.text);
        }

        let index = loop {
            print!("> ");
            let _ = io::stdout().flush();

            let mut input = String::new();
            if stdin.lock().read_line(&mut input).unwrap_or(0) == 0 {
                // End of input: stop cleanly mid-story.
                return Ok(());
            }

            match input.trim().parse::<usize>() {
                Ok(number) if number >= 1 && number <= story.choice_count() => {
                    break number - 1;
                }
                _ => eprintln!("enter a number between 1 and {}", story.choice_count()),
            }
        };

        story.choose(index)?;
    }
}
