//! Runtime error type.

use ink_core::InkError;
use inkc::CompileError;

/// Failure while loading or running a story.
#[derive(Debug)]
pub enum StoryError {
    /// The source failed to compile; diagnostics were rendered.
    Compile(CompileError),
    /// The virtual machine hit a fault; the story is left in a terminal
    /// state.
    Runtime(InkError),
    /// An operation that needs a loaded story ran before `load`.
    NotLoaded,
}

impl std::fmt::Display for StoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoryError::Compile(err) => write!(f, "{}", err),
            StoryError::Runtime(err) => write!(f, "{}", err),
            StoryError::NotLoaded => write!(f, "no story loaded"),
        }
    }
}

impl std::error::Error for StoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoryError::Compile(err) => Some(err),
            StoryError::Runtime(err) => Some(err),
            StoryError::NotLoaded => None,
        }
    }
}

impl From<CompileError> for StoryError {
    fn from(err: CompileError) -> StoryError {
        StoryError::Compile(err)
    }
}

impl From<InkError> for StoryError {
    fn from(err: InkError) -> StoryError {
        StoryError::Runtime(err)
    }
}
