//! Ink Runtime
//!
//! Executes compiled Ink stories: a tagged object heap managed by a
//! tracing mark-and-sweep collector, an open-addressed table type for
//! globals and content paths, and a stack virtual machine that streams
//! narrative content line by line and pauses at decision points.
//!
//! The embedder surface is [`Story`]: `open`, `load`, `can_continue`,
//! `continue_story`, `choices`/`choose`, and `dump`. Dropping the story
//! releases everything it owns.

pub mod disasm;
pub mod error;
pub mod gc;
pub mod object;
pub mod story;
pub mod table;
pub mod vm;

pub use error::StoryError;
pub use gc::Heap;
pub use object::{Obj, ObjRef};
pub use story::{ChoiceView, LoadOpts, Story, CALL_STACK_MAX, STACK_MAX};
pub use table::Insert;

// Re-exported so embedders need only this crate.
pub use ink_core::{Flags, InkError, SourceBuffer};
pub use inkc::CompileError;
