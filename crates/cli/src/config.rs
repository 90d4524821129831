//! Runner configuration.
//!
//! An optional `ink.toml` next to the working directory supplies default
//! switches; command-line flags override it.
//!
//! ```toml
//! colors = true
//! trace-gc = false
//! stress-gc = false
//! gc = true
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use ink_core::Flags;

pub const CONFIG_FILE: &str = "ink.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunConfig {
    pub colors: bool,
    pub trace: bool,
    pub trace_gc: bool,
    pub stress_gc: bool,
    /// Garbage collection is on unless explicitly disabled.
    pub gc: bool,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig {
            colors: false,
            trace: false,
            trace_gc: false,
            stress_gc: false,
            gc: true,
        }
    }
}

impl RunConfig {
    /// Load from an explicit path, or from `ink.toml` in the current
    /// directory when present. A missing implicit file yields defaults;
    /// a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<RunConfig, String> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let implicit = Path::new(CONFIG_FILE);

                if !implicit.exists() {
                    return Ok(RunConfig::default());
                }
                implicit.to_path_buf()
            }
        };

        let text = fs::read_to_string(&path)
            .map_err(|err| format!("failed to read {}: {}", path.display(), err))?;

        toml::from_str(&text)
            .map_err(|err| format!("failed to parse {}: {}", path.display(), err))
    }

    /// Base flags derived from the configuration.
    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();

        if self.colors {
            flags |= Flags::COLOR;
        }
        if self.trace {
            flags |= Flags::VM_TRACING;
        }
        if self.trace_gc {
            flags |= Flags::GC_TRACING;
        }
        if self.stress_gc {
            flags |= Flags::GC_STRESS;
        }
        if self.gc {
            flags |= Flags::GC_ENABLE;
        }
        flags
    }
}
