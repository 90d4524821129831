//! Bytecode disassembler.
//!
//! Backs the `--dump-story` surface and `Story::dump`: one section per
//! content path with its header, instruction listing, and constant pool.

use std::fmt::Write as _;

use ink_core::program::Const;
use ink_core::{Opcode, OperandKind, Program};

use crate::object::Obj;
use crate::story::Story;

fn render_code(out: &mut String, code: &[u8], const_text: &dyn Fn(usize) -> String) {
    let mut offset = 0;

    while offset + 1 < code.len() {
        let operand = code[offset + 1];

        match Opcode::try_from(code[offset]) {
            Ok(opcode) => {
                let _ = write!(out, "{:04} {:<14}", offset, opcode.name());

                match opcode.operand_kind() {
                    OperandKind::None => {}
                    OperandKind::Const => {
                        let _ = write!(
                            out,
                            " #{:<3} ; {}",
                            operand,
                            const_text(operand as usize)
                        );
                    }
                    OperandKind::Offset => {
                        let _ = write!(out, " -> {:04}", offset + 2 + operand as usize);
                    }
                    OperandKind::Slot => {
                        let _ = write!(out, " ${}", operand);
                    }
                    OperandKind::Count => {
                        let _ = write!(out, " x{}", operand);
                    }
                }
                out.push('\n');
            }
            Err(byte) => {
                let _ = writeln!(out, "{:04} ???            0x{:02x}", offset, byte);
            }
        }
        offset += 2;
    }
}

/// Render a compiled program before interning.
pub fn render_program(program: &Program) -> String {
    let mut out = String::new();

    for path in &program.paths {
        let _ = writeln!(
            out,
            "== {}{} (arity {}, locals {}) ==",
            path.name,
            if path.is_function { " [function]" } else { "" },
            path.arity,
            path.locals
        );

        render_code(&mut out, &path.code, &|index| match path.consts.get(index) {
            Some(Const::Number(value)) => crate::object::format_number(*value),
            Some(Const::Str(text)) => format!("{:?}", text),
            Some(Const::Path(target)) => format!(
                "path {}",
                program
                    .paths
                    .get(*target)
                    .map(|p| p.name.as_str())
                    .unwrap_or("?")
            ),
            None => "<missing>".to_string(),
        });

        let _ = writeln!(out, "constants: {}", path.consts.len());
        out.push('\n');
    }
    out
}

impl Story {
    /// Render a disassembly of the interned story.
    pub fn render_dump(&self) -> String {
        let mut out = String::new();

        for &path_ref in &self.path_objs {
            let Obj::Path(path) = self.heap.get(path_ref) else {
                continue;
            };

            let _ = writeln!(
                out,
                "== {}{} (arity {}, locals {}) ==",
                self.heap.str_text(path.name),
                if path.is_function { " [function]" } else { "" },
                path.arity,
                path.locals
            );

            render_code(&mut out, &path.code, &|index| match path.consts.get(index) {
                Some(&r) => self.heap.display_value(r),
                None => "<missing>".to_string(),
            });

            let _ = writeln!(out, "constants: {}", path.consts.len());
            out.push('\n');
        }
        out
    }

    /// Write the disassembly to standard output.
    pub fn dump(&self) {
        print!("{}", self.render_dump());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ink_core::{Flags, SourceBuffer};

    #[test]
    fn disassembly_lists_paths_and_opcodes() {
        let source = SourceBuffer::from_bytes("t.ink", "Hello!\n-> cave\n== cave ==\nDark.\n");
        let program = inkc::compile(&source, Flags::empty()).unwrap();
        let text = render_program(&program);

        assert!(text.contains("== @root"));
        assert!(text.contains("== cave"));
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("CONTENT_PUSH"));
        assert!(text.contains("DIVERT"));
        assert!(text.contains("\"Hello!\""));
    }

    #[test]
    fn story_dump_matches_interned_paths() {
        let mut story = Story::open();
        story.load("One\n", Flags::empty()).unwrap();

        let text = story.render_dump();
        assert!(text.contains("== @root"));
        assert!(text.contains("RET"));
    }
}
