//! Compiler pipeline integration tests.

use ink_core::{Flags, SourceBuffer};
use inkc::{compile, parse, CompileError, DiagnosticKind};

#[test]
fn tokenize_parse_compile_round() {
    let text = "\
VAR health = 10
The cellar smells of damp stone.
* Light a match [] -> lit
* Feel along the wall [] -> wall
== lit ==
A small circle of light.
-> END
== wall ==
Cold bricks, then a door handle.
-> END
";
    let source = SourceBuffer::from_bytes("cellar.ink", text);
    let program = compile(&source, Flags::empty()).expect("compiles");

    assert_eq!(program.paths.len(), 3);
    assert_eq!(program.paths[0].name, "@root");
    assert_eq!(program.paths[1].name, "lit");
    assert_eq!(program.paths[2].name, "wall");
}

#[test]
fn ast_dump_renders_tree_markers() {
    let source = SourceBuffer::from_bytes("t.ink", "Hello\n== cave ==\nDark.\n");
    let ast = parse(&source);
    let rendered = ast.render(&source, false);

    assert!(rendered.contains("File \"t.ink\""));
    assert!(rendered.contains("|--"));
    assert!(rendered.contains("`--"));
    assert!(rendered.contains("KnotDecl"));
    assert!(rendered.contains("ContentStmt"));
}

#[test]
fn ast_dump_colors_use_ansi_escapes() {
    let source = SourceBuffer::from_bytes("t.ink", "Hello\n");
    let ast = parse(&source);
    let rendered = ast.render(&source, true);

    assert!(rendered.contains("\x1b[34m"));
    assert!(rendered.contains("\x1b[0m"));
}

#[test]
fn unknown_divert_target_reports_position() {
    let source = SourceBuffer::from_bytes("story.ink", "-> nowhere\n");
    let err = compile(&source, Flags::empty()).unwrap_err();

    match err {
        CompileError::Parse {
            diagnostics,
            rendered,
        } => {
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].kind, DiagnosticKind::UnknownIdentifier);
            assert!(rendered
                .contains("story.ink:1:4: error: use of undeclared identifier 'nowhere'"));
            assert!(rendered.contains("   1 | -> nowhere"));
        }
        CompileError::Gen(err) => panic!("unexpected codegen error: {}", err),
    }
}

#[test]
fn multiple_diagnostics_render_in_order() {
    let source = SourceBuffer::from_bytes("story.ink", "~ a = 1\n~ b = 2\n");
    let err = compile(&source, Flags::empty()).unwrap_err();

    match err {
        CompileError::Parse { rendered, .. } => {
            let first = rendered.find("'a'").expect("first diagnostic");
            let second = rendered.find("'b'").expect("second diagnostic");
            assert!(first < second);
        }
        CompileError::Gen(err) => panic!("unexpected codegen error: {}", err),
    }
}

#[test]
fn empty_source_compiles_to_an_empty_root() {
    let source = SourceBuffer::from_bytes("empty.ink", "");
    let program = compile(&source, Flags::empty()).expect("compiles");

    assert_eq!(program.paths.len(), 1);
    // Just the final return.
    assert_eq!(program.paths[0].code.len(), 2);
}
