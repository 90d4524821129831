//! Abstract syntax tree.
//!
//! Nodes live in a vector owned by the `Ast` and reference each other by
//! index, so the whole tree is released at once when compilation ends.
//! Nodes do not store token text; they reference source positions and the
//! lexeme is recovered from the source buffer when needed.

use ink_core::SourceBuffer;

use crate::diagnostic::Diagnostic;

/// Syntax node kind. One entry per concrete syntactic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    AddExpr,
    AndExpr,
    ArgList,
    AssignStmt,
    Block,
    CallExpr,
    ChoicePlusStmt,
    ChoiceStarStmt,
    ChoiceStmt,
    ChoiceExpr,
    ChoiceStartExpr,
    ChoiceOptionExpr,
    ChoiceInnerExpr,
    MultiIfStmt,
    IfBranch,
    IfStmt,
    ElseBranch,
    SwitchStmt,
    SwitchCase,
    ConstDecl,
    Content,
    ContentStmt,
    DivExpr,
    DivertStmt,
    EmptyContent,
    EqualExpr,
    ExprStmt,
    False,
    FuncDecl,
    FuncProto,
    GatherStmt,
    GatheredChoiceStmt,
    Glue,
    GreaterExpr,
    GreaterEqualExpr,
    Identifier,
    InlineLogic,
    KnotDecl,
    KnotProto,
    LessEqualExpr,
    LessExpr,
    ListDecl,
    MulExpr,
    ModExpr,
    NegateExpr,
    NotEqualExpr,
    NotExpr,
    Number,
    OrExpr,
    ParamDecl,
    ParamList,
    RefParamDecl,
    ReturnStmt,
    SequenceExpr,
    StitchDecl,
    StitchProto,
    StringExpr,
    SubExpr,
    TempDecl,
    ThreadStmt,
    True,
    TunnelStmt,
    TunnelOnwards,
    VarDecl,
    Invalid,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::AddExpr => "AddExpr",
            NodeKind::AndExpr => "AndExpr",
            NodeKind::ArgList => "ArgumentList",
            NodeKind::AssignStmt => "AssignStmt",
            NodeKind::Block => "BlockStmt",
            NodeKind::CallExpr => "CallExpr",
            NodeKind::ChoicePlusStmt => "ChoicePlusStmt",
            NodeKind::ChoiceStarStmt => "ChoiceStarStmt",
            NodeKind::ChoiceStmt => "ChoiceStmt",
            NodeKind::ChoiceExpr => "ChoiceContentExpr",
            NodeKind::ChoiceStartExpr => "ChoiceStartContentExpr",
            NodeKind::ChoiceOptionExpr => "ChoiceOptionOnlyContentExpr",
            NodeKind::ChoiceInnerExpr => "ChoiceInnerContentExpr",
            NodeKind::MultiIfStmt => "MultiIfStmt",
            NodeKind::IfBranch => "IfBranch",
            NodeKind::IfStmt => "IfStmt",
            NodeKind::ElseBranch => "ElseBranch",
            NodeKind::SwitchStmt => "SwitchStmt",
            NodeKind::SwitchCase => "SwitchCase",
            NodeKind::ConstDecl => "ConstDecl",
            NodeKind::Content => "Content",
            NodeKind::ContentStmt => "ContentStmt",
            NodeKind::DivExpr => "DivideExpr",
            NodeKind::DivertStmt => "DivertStmt",
            NodeKind::EmptyContent => "EmptyContent",
            NodeKind::EqualExpr => "LogicalEqualityExpr",
            NodeKind::ExprStmt => "ExprStmt",
            NodeKind::False => "False",
            NodeKind::FuncDecl => "FunctionDecl",
            NodeKind::FuncProto => "FunctionProto",
            NodeKind::GatherStmt => "GatherStmt",
            NodeKind::GatheredChoiceStmt => "GatheredChoiceStmt",
            NodeKind::Glue => "GlueExpr",
            NodeKind::GreaterExpr => "LogicalGreaterExpr",
            NodeKind::GreaterEqualExpr => "LogicalGreaterOrEqualExpr",
            NodeKind::Identifier => "Identifier",
            NodeKind::InlineLogic => "InlineLogicExpr",
            NodeKind::KnotDecl => "KnotDecl",
            NodeKind::KnotProto => "KnotProto",
            NodeKind::LessEqualExpr => "LogicalLesserOrEqualExpr",
            NodeKind::LessExpr => "LogicalLesserExpr",
            NodeKind::ListDecl => "ListDecl",
            NodeKind::MulExpr => "MultiplyExpr",
            NodeKind::ModExpr => "ModExpr",
            NodeKind::NegateExpr => "NegateExpr",
            NodeKind::NotEqualExpr => "LogicalInequalityExpr",
            NodeKind::NotExpr => "NotExpr",
            NodeKind::Number => "NumberLiteral",
            NodeKind::OrExpr => "OrExpr",
            NodeKind::ParamDecl => "ParamDecl",
            NodeKind::ParamList => "ParamList",
            NodeKind::RefParamDecl => "ParamRefDecl",
            NodeKind::ReturnStmt => "ReturnStmt",
            NodeKind::SequenceExpr => "SequenceExpr",
            NodeKind::StitchDecl => "StitchDecl",
            NodeKind::StitchProto => "StitchProto",
            NodeKind::StringExpr => "StringExpr",
            NodeKind::SubExpr => "SubtractExpr",
            NodeKind::TempDecl => "TempDecl",
            NodeKind::ThreadStmt => "ThreadStmt",
            NodeKind::True => "True",
            NodeKind::TunnelStmt => "TunnelStmt",
            NodeKind::TunnelOnwards => "TunnelOnwards",
            NodeKind::VarDecl => "VarDecl",
            NodeKind::Invalid => "Invalid",
        }
    }
}

/// Node flag bits.
pub mod flags {
    pub const ERROR: u8 = 1 << 0;
    pub const FUNCTION: u8 = 1 << 1;
    pub const SEQ_STOPPING: u8 = 1 << 2;
    pub const SEQ_CYCLE: u8 = 1 << 3;
    pub const SEQ_SHUFFLE: u8 = 1 << 4;
    pub const SEQ_ONCE: u8 = 1 << 5;
    /// Conditional written in single-line content form.
    pub const INLINE: u8 = 1 << 6;
}

/// Index of a node within its `Ast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// A syntax tree node: two optional operand slots plus an ordered child
/// sequence for variadic productions.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: NodeKind,
    pub flags: u8,
    pub start: usize,
    pub end: usize,
    pub lhs: Option<NodeId>,
    pub rhs: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Abstract syntax tree plus the diagnostics recorded while building it.
#[derive(Debug)]
pub struct Ast {
    pub filename: String,
    nodes: Vec<AstNode>,
    pub root: Option<NodeId>,
    pub errors: Vec<Diagnostic>,
}

impl Ast {
    pub fn new(filename: impl Into<String>) -> Ast {
        Ast {
            filename: filename.into(),
            nodes: Vec::new(),
            root: None,
            errors: Vec::new(),
        }
    }

    pub fn add(&mut self, node: AstNode) -> NodeId {
        debug_assert!(node.start <= node.end);

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Render the tree in the familiar `|--`/`` `-- `` box layout.
    pub fn render(&self, source: &SourceBuffer, colors: bool) -> String {
        let mut out = String::new();

        if let Some(root) = self.root {
            self.render_node(source, root, "", Pointers::Empty, colors, &mut out);
            self.render_walk(source, root, "", colors, &mut out);
        }
        out
    }

    /// Print the tree to standard output (the `--dump-ast` surface).
    pub fn print(&self, source: &SourceBuffer, colors: bool) {
        print!("{}", self.render(source, colors));
    }

    fn render_walk(
        &self,
        source: &SourceBuffer,
        id: NodeId,
        prefix: &str,
        colors: bool,
        out: &mut String,
    ) {
        let node = self.node(id);
        let mut kids: Vec<NodeId> = Vec::new();

        if let Some(lhs) = node.lhs {
            kids.push(lhs);
        }
        if let Some(rhs) = node.rhs {
            kids.push(rhs);
        }
        kids.extend(node.children.iter().copied());

        for (i, kid) in kids.iter().enumerate() {
            let pointers = if i == kids.len() - 1 {
                Pointers::Final
            } else {
                Pointers::Inner
            };
            let new_prefix = format!("{}{}", prefix, pointers.descent());

            self.render_node(source, *kid, prefix, pointers, colors, out);
            self.render_walk(source, *kid, &new_prefix, colors, out);
        }
    }

    fn render_node(
        &self,
        source: &SourceBuffer,
        id: NodeId,
        prefix: &str,
        pointers: Pointers,
        colors: bool,
        out: &mut String,
    ) {
        const BLUE_BOLD: &str = "\x1b[34m\x1b[1m";
        const GREEN: &str = "\x1b[32m";
        const YELLOW: &str = "\x1b[33m";
        const RESET: &str = "\x1b[0m";

        let node = self.node(id);
        let (line_start, col_start) = source.line_col(node.start);
        let (line_end, col_end) = source.line_col(node.end);
        let (kind_on, loc_on, lex_on, off) = if colors {
            (BLUE_BOLD, YELLOW, GREEN, RESET)
        } else {
            ("", "", "", "")
        };

        out.push_str(prefix);
        out.push_str(pointers.marker());

        match node.kind {
            NodeKind::File => {
                out.push_str(&format!(
                    "{}{}{} \"{}\"\n",
                    kind_on,
                    node.kind.name(),
                    off,
                    self.filename
                ));
            }
            NodeKind::Block
            | NodeKind::ChoiceStmt
            | NodeKind::KnotDecl
            | NodeKind::StitchDecl
            | NodeKind::FuncDecl
            | NodeKind::GatheredChoiceStmt => {
                out.push_str(&format!(
                    "{}{}{} <{}line:{}, line:{}{}>\n",
                    kind_on,
                    node.kind.name(),
                    off,
                    loc_on,
                    line_start + 1,
                    line_end + 1,
                    off
                ));
            }
            NodeKind::Identifier
            | NodeKind::Number
            | NodeKind::Content
            | NodeKind::ChoiceStartExpr
            | NodeKind::ChoiceOptionExpr
            | NodeKind::ChoiceInnerExpr
            | NodeKind::ParamDecl
            | NodeKind::RefParamDecl => {
                let lexeme = String::from_utf8_lossy(source.slice(node.start, node.end))
                    .into_owned();
                out.push_str(&format!(
                    "{}{}{} `{}{}{}` <{}col:{}, col:{}{}>\n",
                    kind_on,
                    node.kind.name(),
                    off,
                    lex_on,
                    lexeme,
                    off,
                    loc_on,
                    col_start + 1,
                    col_end + 1,
                    off
                ));
            }
            _ => {
                out.push_str(&format!(
                    "{}{}{} <{}line:{}, col:{}:{}{}>\n",
                    kind_on,
                    node.kind.name(),
                    off,
                    loc_on,
                    line_start + 1,
                    col_start + 1,
                    col_end + 1,
                    off
                ));
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Pointers {
    Empty,
    Inner,
    Final,
}

impl Pointers {
    fn marker(self) -> &'static str {
        match self {
            Pointers::Empty => "",
            Pointers::Inner => "|--",
            Pointers::Final => "`--",
        }
    }

    fn descent(self) -> &'static str {
        match self {
            Pointers::Empty => "",
            Pointers::Inner => "|  ",
            Pointers::Final => "   ",
        }
    }
}
