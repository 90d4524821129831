//! Ink Core: shared foundation for the Ink compiler and runtime
//!
//! This crate holds the pieces both halves of the engine agree on:
//! - `flags`: the public feature bitmask accepted by `load`
//! - `error`: the engine-wide error taxonomy
//! - `opcode`: the bytecode instruction set
//! - `program`: the compiled story artifact the compiler hands the runtime
//! - `source`: immutable source buffers with line/column bookkeeping
//! - `stream`: the append-only content stream read line-by-line by embedders

pub mod error;
pub mod flags;
pub mod opcode;
pub mod program;
pub mod source;
pub mod stream;

pub use error::InkError;
pub use flags::Flags;
pub use opcode::{Opcode, OperandKind};
pub use program::{Const, PathCode, Program};
pub use source::SourceBuffer;
pub use stream::ContentStream;
