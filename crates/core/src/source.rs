//! Immutable source buffers.
//!
//! A `SourceBuffer` is a byte view of the input plus a filename tag used in
//! diagnostics. Buffers never change after construction; token and syntax
//! node positions index into them for the lifetime of a compilation.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::InkError;

pub const SOURCE_EXTENSION: &str = "ink";

/// Immutable story source with a filename tag.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    filename: String,
    bytes: Vec<u8>,
}

impl SourceBuffer {
    /// Wrap an in-memory byte buffer. Interior NUL bytes are truncated at,
    /// matching the NUL-terminated contract of the embedder API.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> SourceBuffer {
        let mut bytes = bytes.into();

        if let Some(nul) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(nul);
        }
        SourceBuffer {
            filename: filename.into(),
            bytes,
        }
    }

    /// Load a script from disk. The file must carry the `.ink` extension.
    pub fn from_path(path: &Path) -> Result<SourceBuffer, InkError> {
        let is_ink = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION))
            .unwrap_or(false);

        if !is_ink {
            return Err(InkError::File(path.to_path_buf()));
        }

        let bytes = fs::read(path)?;
        Ok(SourceBuffer::from_bytes(
            path.display().to_string(),
            bytes,
        ))
    }

    /// Read a script from standard input until end-of-file.
    pub fn from_stdin() -> Result<SourceBuffer, InkError> {
        let mut bytes = Vec::new();

        std::io::stdin().read_to_end(&mut bytes)?;
        Ok(SourceBuffer::from_bytes("<STDIN>", bytes))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `offset`, or NUL past the end. The scanner relies on the NUL
    /// sentinel to terminate without bounds branches at every state.
    pub fn byte_at(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }

    /// Text of the byte range, lossily decoded for display.
    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.bytes[start.min(self.bytes.len())..end.min(self.bytes.len())]
    }

    /// Zero-based line and column of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 0;
        let mut col = 0;

        for &byte in self.bytes.iter().take(offset.min(self.bytes.len())) {
            if byte == b'\n' {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Byte range of the line containing `offset`, newline excluded.
    pub fn line_span(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.bytes.len());
        let start = self.bytes[..offset]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = self.bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| offset + i)
            .unwrap_or(self.bytes.len());

        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_ink_extension() {
        let err = SourceBuffer::from_path(Path::new("story.txt")).unwrap_err();
        assert!(matches!(err, InkError::File(_)));
    }

    #[test]
    fn truncates_at_interior_nul() {
        let source = SourceBuffer::from_bytes("t", b"abc\0def".to_vec());
        assert_eq!(source.bytes(), b"abc");
        assert_eq!(source.byte_at(3), 0);
    }

    #[test]
    fn line_col_is_zero_based() {
        let source = SourceBuffer::from_bytes("t", "ab\ncd\nef");
        assert_eq!(source.line_col(0), (0, 0));
        assert_eq!(source.line_col(4), (1, 1));
        assert_eq!(source.line_col(6), (2, 0));
    }

    #[test]
    fn line_span_excludes_newline() {
        let source = SourceBuffer::from_bytes("t", "ab\ncd\nef");
        assert_eq!(source.line_span(4), (3, 5));
        assert_eq!(source.line_span(7), (6, 8));
    }
}
