//! Story context: the embedder-facing API.
//!
//! A story owns its heap, evaluation stack, call stack, output stream,
//! and choice list. `load` compiles source and interns the compiled
//! program into the heap; `continue_story` advances execution and hands
//! back one line at a time; `choose` resumes from a decision point.
//!
//! One story is owned by one embedder; there is no internal locking.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::trace;

use ink_core::{ContentStream, Flags, Program, SourceBuffer};
use ink_core::program::Const;

use crate::error::StoryError;
use crate::gc::Heap;
use crate::object::{Obj, ObjRef, PathObj, StrObj};

/// Evaluation stack limit.
pub const STACK_MAX: usize = 128;

/// Call stack limit.
pub const CALL_STACK_MAX: usize = 128;

/// One activation record. The top frame is the executing one.
#[derive(Debug)]
pub(crate) struct Frame {
    pub path: ObjRef,
    pub pc: usize,
    /// Evaluation stack height at entry; restored on return.
    pub stack_base: usize,
    pub locals: Vec<Option<ObjRef>>,
}

/// A pending option presented to the reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingChoice {
    pub id: ObjRef,
    pub text: ObjRef,
    /// Absolute byte offset of the option's branch body.
    pub target: usize,
    /// Code offset of the emitting instruction, used for once-only
    /// suppression.
    pub offset: usize,
    pub sticky: bool,
}

/// Read-only view of a pending choice.
#[derive(Debug, Clone, Copy)]
pub struct ChoiceView<'a> {
    pub index: usize,
    pub text: &'a str,
}

/// Options for `load_opts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOpts<'a> {
    pub filename: Option<&'a str>,
    pub source: &'a [u8],
    pub flags: Flags,
}

/// An Ink story: compiler front door plus virtual machine state.
pub struct Story {
    pub(crate) flags: Flags,
    pub(crate) heap: Heap,
    pub(crate) globals: Option<ObjRef>,
    pub(crate) paths: Option<ObjRef>,
    /// Content path objects by program index.
    pub(crate) path_objs: Vec<ObjRef>,
    pub(crate) true_ref: Option<ObjRef>,
    pub(crate) false_ref: Option<ObjRef>,
    pub(crate) current_choice_id: Option<ObjRef>,
    pub(crate) choices: Vec<PendingChoice>,
    pub(crate) stack: Vec<ObjRef>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) output: ContentStream,
    pub(crate) glue: bool,
    pub(crate) line_open: bool,
    pub(crate) ended: bool,
    pub(crate) awaiting_choice: bool,
    pub(crate) loaded: bool,
    /// Once-only options already taken, keyed by emitting site.
    pub(crate) seen_choices: HashSet<(ObjRef, usize)>,
    /// Sequence visit counters, keyed by emitting site.
    pub(crate) seq_counters: HashMap<(ObjRef, usize), u32>,
    pub(crate) next_choice_id: f64,
}

impl Default for Story {
    fn default() -> Story {
        Story::open()
    }
}

impl Story {
    /// Create an empty story context.
    pub fn open() -> Story {
        Story {
            flags: Flags::empty(),
            heap: Heap::new(false, false, false),
            globals: None,
            paths: None,
            path_objs: Vec::new(),
            true_ref: None,
            false_ref: None,
            current_choice_id: None,
            choices: Vec::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            output: ContentStream::new(),
            glue: false,
            line_open: false,
            ended: false,
            awaiting_choice: false,
            loaded: false,
            seen_choices: HashSet::new(),
            seq_counters: HashMap::new(),
            next_choice_id: 0.0,
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load a story from raw bytes with extended options.
    pub fn load_opts(&mut self, opts: &LoadOpts<'_>) -> Result<(), StoryError> {
        let filename = opts.filename.unwrap_or("<memory>");
        let source = SourceBuffer::from_bytes(filename, opts.source.to_vec());

        self.load_source(&source, opts.flags)
    }

    /// Load a story from a string.
    pub fn load(&mut self, text: &str, flags: Flags) -> Result<(), StoryError> {
        self.load_opts(&LoadOpts {
            filename: None,
            source: text.as_bytes(),
            flags,
        })
    }

    /// Compile and intern a source buffer.
    pub fn load_source(
        &mut self,
        source: &SourceBuffer,
        flags: Flags,
    ) -> Result<(), StoryError> {
        // A reload starts from a clean context.
        *self = Story::open();

        self.flags = flags;
        self.heap = Heap::new(
            flags.contains(Flags::GC_ENABLE),
            flags.contains(Flags::GC_STRESS),
            flags.contains(Flags::GC_TRACING),
        );

        let program = inkc::compile(source, flags)?;

        if flags.contains(Flags::DUMP_CODE) {
            print!("{}", crate::disasm::render_program(&program));
        }

        self.intern_program(&program)?;
        self.loaded = true;
        Ok(())
    }

    fn intern_program(&mut self, program: &Program) -> Result<(), StoryError> {
        let globals = self.heap.alloc_table();
        self.globals = Some(globals);
        let paths = self.heap.alloc_table();
        self.paths = Some(paths);

        // First pass: path objects with empty pools, immediately rooted
        // through the paths table.
        for path in &program.paths {
            let name = self.alloc(Obj::Str(StrObj::new(path.name.as_bytes().to_vec())));

            self.heap.own(name);
            let path_obj = self.alloc(Obj::Path(PathObj {
                name,
                arity: path.arity,
                locals: path.locals,
                is_function: path.is_function,
                code: path.code.clone(),
                consts: Vec::new(),
            }));
            self.heap.disown(name);

            self.path_objs.push(path_obj);
            self.heap.table_insert(paths, name, path_obj);
        }

        // Second pass: constant pools, which may reference other paths.
        for (index, path) in program.paths.iter().enumerate() {
            for constant in &path.consts {
                let value = match constant {
                    Const::Number(value) => self.alloc(Obj::Number(*value)),
                    Const::Str(text) => {
                        self.alloc(Obj::Str(StrObj::new(text.as_bytes().to_vec())))
                    }
                    Const::Path(target) => self.path_objs[*target],
                };

                match self.heap.get_mut(self.path_objs[index]) {
                    Obj::Path(p) => p.consts.push(value),
                    _ => unreachable!("path object replaced"),
                }
            }
        }

        self.true_ref = Some(self.alloc(Obj::Bool(true)));
        self.false_ref = Some(self.alloc(Obj::Bool(false)));

        let root = self.path_objs[program.root];
        let locals = match self.heap.get(root) {
            Obj::Path(p) => p.locals as usize,
            _ => 0,
        };

        self.frames.push(Frame {
            path: root,
            pc: 0,
            stack_base: 0,
            locals: vec![None; locals],
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Advancing
    // ------------------------------------------------------------------

    /// True when `continue_story` can produce another line.
    pub fn can_continue(&self) -> bool {
        self.loaded && (!self.output.is_empty() || (!self.ended && !self.awaiting_choice))
    }

    /// Advance the story and return the next output line, without its
    /// trailing newline. The slice borrows the output stream and is valid
    /// until the story runs again.
    pub fn continue_story(&mut self) -> Result<Option<&str>, StoryError> {
        if !self.loaded {
            return Err(StoryError::NotLoaded);
        }

        if !self.output.has_full_line() && !self.ended && !self.awaiting_choice {
            self.run()?;
        }

        match self.output.read_line() {
            Some(line) => {
                let line = match line.last() {
                    Some(b'\n') => &line[..line.len() - 1],
                    _ => line,
                };
                Ok(Some(std::str::from_utf8(line).unwrap_or("")))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Choices
    // ------------------------------------------------------------------

    pub fn choice_count(&self) -> usize {
        self.choices.len()
    }

    pub fn choice_text(&self, index: usize) -> Option<&str> {
        self.choices
            .get(index)
            .map(|choice| self.heap.str_text(choice.text))
    }

    /// Iterate the pending choices in presentation order.
    pub fn choices(&self) -> impl Iterator<Item = ChoiceView<'_>> {
        self.choices.iter().enumerate().map(|(index, choice)| ChoiceView {
            index,
            text: self.heap.str_text(choice.text),
        })
    }

    /// Select a choice by 0-based index and resume at its branch.
    pub fn choose(&mut self, index: usize) -> Result<(), StoryError> {
        if !self.loaded {
            return Err(StoryError::NotLoaded);
        }

        let Some(choice) = self.choices.get(index).copied() else {
            return Err(StoryError::Runtime(ink_core::InkError::InvalidChoice(
                index,
            )));
        };

        let frame = self.frames.last_mut().expect("choices imply a live frame");

        if !choice.sticky {
            self.seen_choices.insert((frame.path, choice.offset));
        }
        frame.pc = choice.target;
        self.current_choice_id = Some(choice.id);
        self.choices.clear();
        self.awaiting_choice = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Allocation and collection
    // ------------------------------------------------------------------

    /// Allocate through the collector, collecting first when the policy
    /// asks for it. New objects must be rooted before the next call.
    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.wants_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    /// Run a full mark-and-sweep cycle over the story's roots.
    pub fn collect_garbage(&mut self) {
        let tracing = self.heap.tracing;
        let started = Instant::now();
        let before = self.heap.allocated;

        if tracing {
            trace!(target: "ink_gc", "beginning collection");
        }

        self.heap.begin_collect();

        let stack: Vec<ObjRef> = self.stack.clone();
        for r in stack {
            self.heap.mark(r);
        }

        let mut frame_roots: Vec<ObjRef> = Vec::new();
        for frame in &self.frames {
            frame_roots.push(frame.path);
            frame_roots.extend(frame.locals.iter().flatten().copied());
        }
        for r in frame_roots {
            self.heap.mark(r);
        }

        let field_roots: Vec<ObjRef> = self
            .globals
            .into_iter()
            .chain(self.paths)
            .chain(self.path_objs.iter().copied())
            .chain(self.true_ref)
            .chain(self.false_ref)
            .chain(self.current_choice_id)
            .chain(self.choices.iter().flat_map(|c| [c.id, c.text]))
            .collect();
        for r in field_roots {
            self.heap.mark(r);
        }

        self.heap.mark_owned();
        self.heap.trace_refs();
        let freed = self.heap.sweep();

        if tracing {
            trace!(
                target: "ink_gc",
                elapsed_us = started.elapsed().as_micros() as u64,
                before,
                after = self.heap.allocated,
                freed,
                next_at = self.heap.threshold,
                "collection completed"
            );
        }
    }

    /// Number of live heap objects; exposed for tests and traces.
    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }
}
