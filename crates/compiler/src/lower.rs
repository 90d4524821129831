//! AST-to-IR lowering.
//!
//! Two phases per story. The first collects every content path prototype
//! (root block, knots, stitches, functions) and every global declaration,
//! so forward references resolve. The second lowers each path body to IR,
//! resolving names through the scope stack and recording diagnostics for
//! unknown identifiers, redefinitions, and argument-count mismatches.
//!
//! Expressions lower to the index of their last emitted instruction;
//! statements append to the sequence of the enclosing block.

use std::collections::HashMap;

use ink_core::SourceBuffer;

use crate::ast::{flags, Ast, NodeId, NodeKind};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::ir::{CallMode, Ir, IrOp, SeqId, SeqPolicy};
use crate::symtab::{ScopeStack, Symbol, SymbolKind, Symtab};

/// Name of the implicit content path for top-level story content.
pub const ROOT_PATH_NAME: &str = "@root";

/// Lower a parsed story. Diagnostics are returned alongside the IR; the
/// caller aborts before code generation when any are present.
pub fn lower(ast: &Ast, source: &SourceBuffer) -> (Ir, Vec<Diagnostic>) {
    let mut lowerer = Lowerer::new(ast, source);

    lowerer.collect();
    lowerer.lower_paths();
    (lowerer.ir, lowerer.errors)
}

struct PathProto {
    name: String,
    /// Block node holding the path's statements.
    body: NodeId,
    /// Parameter name nodes, in order.
    params: Vec<NodeId>,
    is_function: bool,
    /// Stitch short name to path index, for knots.
    members: HashMap<String, usize>,
    /// Owning knot's path index, for stitches.
    owner: Option<usize>,
}

struct Lowerer<'a> {
    ast: &'a Ast,
    source: &'a SourceBuffer,
    ir: Ir,
    errors: Vec<Diagnostic>,
    scopes: ScopeStack,
    paths: Vec<PathProto>,
    seq_stack: Vec<Vec<u32>>,
    next_slot: u32,
    max_slots: u32,
}

impl<'a> Lowerer<'a> {
    fn new(ast: &'a Ast, source: &'a SourceBuffer) -> Lowerer<'a> {
        Lowerer {
            ast,
            source,
            ir: Ir::new(),
            errors: Vec::new(),
            scopes: ScopeStack::new(),
            paths: Vec::new(),
            seq_stack: Vec::new(),
            next_slot: 0,
            max_slots: 0,
        }
    }

    fn text(&self, id: NodeId) -> &str {
        let node = self.ast.node(id);

        std::str::from_utf8(self.source.slice(node.start, node.end)).unwrap_or("")
    }

    fn error_at(&mut self, kind: DiagnosticKind, id: NodeId) {
        let node = self.ast.node(id);

        self.errors.push(Diagnostic::new(kind, node.start, node.end));
    }

    // ------------------------------------------------------------------
    // Sequence plumbing
    // ------------------------------------------------------------------

    fn begin_seq(&mut self) {
        self.seq_stack.push(Vec::new());
    }

    fn end_seq(&mut self) -> SeqId {
        let insts = self.seq_stack.pop().expect("unbalanced sequence stack");

        self.ir.add_seq(insts)
    }

    fn emit(&mut self, op: IrOp) -> u32 {
        let index = self.ir.insts.len() as u32;

        self.ir.insts.push(op);
        self.seq_stack
            .last_mut()
            .expect("no open sequence")
            .push(index);
        index
    }

    // ------------------------------------------------------------------
    // Phase 1: prototype and global collection
    // ------------------------------------------------------------------

    fn collect(&mut self) {
        let Some(root) = self.ast.root else {
            return;
        };
        let file_children = self.ast.node(root).children.clone();
        let Some(&root_block) = file_children.first() else {
            return;
        };

        self.paths.push(PathProto {
            name: ROOT_PATH_NAME.to_string(),
            body: root_block,
            params: Vec::new(),
            is_function: false,
            members: HashMap::new(),
            owner: None,
        });

        for &decl in &file_children[1..] {
            self.collect_declaration(decl);
        }

        self.collect_globals();
    }

    fn collect_declaration(&mut self, decl: NodeId) {
        let (decl_kind, proto, decl_children) = {
            let node = self.ast.node(decl);
            (node.kind, node.lhs, node.children.clone())
        };

        if !matches!(
            decl_kind,
            NodeKind::KnotDecl | NodeKind::FuncDecl | NodeKind::StitchDecl
        ) {
            return;
        }

        let Some(proto) = proto else {
            return;
        };
        let (proto_name, proto_params) = {
            let node = self.ast.node(proto);
            (node.lhs, node.rhs)
        };
        let Some(name_node) = proto_name else {
            return;
        };
        let name = self.text(name_node).to_string();
        let params = proto_params
            .map(|list| self.param_names(list))
            .unwrap_or_default();
        let is_function = decl_kind == NodeKind::FuncDecl;
        let body = decl_children.first().copied().unwrap_or(name_node);
        let path_index = self.paths.len();

        let kind = if is_function {
            SymbolKind::Function
        } else {
            SymbolKind::Knot
        };
        let symbol = Symbol::path(kind, name_node, path_index, params.len() as u32);

        if let Err(_original) = self.scopes.global_mut().define(&name, symbol) {
            self.error_at(DiagnosticKind::Redefinition, name_node);
        }

        self.paths.push(PathProto {
            name: name.clone(),
            body,
            params,
            is_function,
            members: HashMap::new(),
            owner: None,
        });

        // Nested stitches.
        for &child in decl_children.iter().skip(1) {
            let (child_kind, stitch_proto, child_children) = {
                let node = self.ast.node(child);
                (node.kind, node.lhs, node.children.clone())
            };

            if child_kind != NodeKind::StitchDecl {
                continue;
            }

            let Some(stitch_proto) = stitch_proto else {
                continue;
            };
            let (stitch_name_node, stitch_param_list) = {
                let node = self.ast.node(stitch_proto);
                (node.lhs, node.rhs)
            };
            let Some(stitch_name_node) = stitch_name_node else {
                continue;
            };
            let stitch_name = self.text(stitch_name_node).to_string();
            let stitch_params = stitch_param_list
                .map(|list| self.param_names(list))
                .unwrap_or_default();
            let stitch_body = child_children.first().copied().unwrap_or(stitch_name_node);
            let stitch_index = self.paths.len();
            let qualified = format!("{}.{}", name, stitch_name);

            if self.paths[path_index]
                .members
                .insert(stitch_name.clone(), stitch_index)
                .is_some()
            {
                self.error_at(DiagnosticKind::Redefinition, stitch_name_node);
            }

            self.paths.push(PathProto {
                name: qualified,
                body: stitch_body,
                params: stitch_params,
                is_function: false,
                members: HashMap::new(),
                owner: Some(path_index),
            });
        }
    }

    fn param_names(&self, list: NodeId) -> Vec<NodeId> {
        self.ast
            .node(list)
            .children
            .iter()
            .filter_map(|&param| self.ast.node(param).lhs)
            .collect()
    }

    /// Register every global variable, constant, and list element. The
    /// node arena is in creation order, which tracks source order closely
    /// enough for first-declaration-wins redefinition reporting.
    fn collect_globals(&mut self) {
        for index in 0..self.ast.len() {
            let id = NodeId(index as u32);
            let (kind, name_node, elements) = {
                let node = self.ast.node(id);
                (node.kind, node.lhs, node.children.clone())
            };

            match kind {
                NodeKind::VarDecl | NodeKind::ConstDecl => {
                    let Some(name_node) = name_node else {
                        continue;
                    };
                    let name = self.text(name_node).to_string();
                    let is_const = kind == NodeKind::ConstDecl;

                    if self
                        .scopes
                        .global_mut()
                        .define(&name, Symbol::global(name_node, is_const))
                        .is_err()
                    {
                        self.error_at(DiagnosticKind::Redefinition, name_node);
                    }
                }
                NodeKind::ListDecl => {
                    let Some(name_node) = name_node else {
                        continue;
                    };
                    let name = self.text(name_node).to_string();

                    if self
                        .scopes
                        .global_mut()
                        .define(&name, Symbol::global(name_node, true))
                        .is_err()
                    {
                        self.error_at(DiagnosticKind::Redefinition, name_node);
                    }

                    for element in elements {
                        let element_name = self.text(element).to_string();

                        if self
                            .scopes
                            .global_mut()
                            .define(&element_name, Symbol::global(element, true))
                            .is_err()
                        {
                            self.error_at(DiagnosticKind::Redefinition, element);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 2: path lowering
    // ------------------------------------------------------------------

    fn lower_paths(&mut self) {
        for index in 0..self.paths.len() {
            self.lower_path(index);
        }
    }

    fn member_scope(&self, index: usize) -> Option<Symtab> {
        let owner = self.paths[index].owner.unwrap_or(index);
        let members = &self.paths[owner].members;

        if members.is_empty() {
            return None;
        }

        let mut scope = Symtab::new();
        for (name, &path) in members {
            let node = self.paths[path].body;
            let arity = self.paths[path].params.len() as u32;
            let _ = scope.define(name, Symbol::path(SymbolKind::Knot, node, path, arity));
        }
        Some(scope)
    }

    fn lower_path(&mut self, index: usize) {
        let body = self.paths[index].body;
        let params = self.paths[index].params.clone();
        let is_function = self.paths[index].is_function;
        let member_scope = self.member_scope(index);
        let has_members = member_scope.is_some();

        if let Some(scope) = member_scope {
            self.scopes.push_table(scope);
        }
        self.scopes.push();
        self.next_slot = 0;
        self.max_slots = 0;

        for (slot, &param) in params.iter().enumerate() {
            let name = self.text(param).to_string();

            if self
                .scopes
                .define(&name, Symbol::param(param, slot as u32))
                .is_err()
            {
                self.error_at(DiagnosticKind::Redefinition, param);
            }
        }
        self.next_slot = params.len() as u32;
        self.max_slots = self.next_slot;

        self.begin_seq();
        self.lower_block(body);
        let body_seq = self.end_seq();

        self.scopes.pop();
        if has_members {
            self.scopes.pop();
        }

        let name = self.ir.intern_string(&self.paths[index].name.clone());
        let decl = {
            // Declarations live outside any sequence; append directly.
            let inst = IrOp::Declaration {
                name,
                body: body_seq,
                arity: params.len() as u32,
                locals: self.max_slots,
                is_function,
                path: index,
            };
            let idx = self.ir.insts.len() as u32;
            self.ir.insts.push(inst);
            idx
        };
        self.ir.decls.push(decl);
    }

    fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_slot;

        self.next_slot += 1;
        if self.next_slot > self.max_slots {
            self.max_slots = self.next_slot;
        }
        slot
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn lower_block(&mut self, block: NodeId) {
        let children = self.ast.node(block).children.clone();

        for stmt in children {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, id: NodeId) {
        let node = self.ast.node(id);

        match node.kind {
            NodeKind::ContentStmt => self.lower_content_stmt(id),
            NodeKind::VarDecl | NodeKind::ConstDecl => self.lower_global_decl(id),
            NodeKind::ListDecl => self.lower_list_decl(id),
            NodeKind::TempDecl => self.lower_temp_decl(id),
            NodeKind::AssignStmt => self.lower_assign(id),
            NodeKind::ExprStmt => {
                if let Some(expr) = node.lhs {
                    let value = self.lower_expr(expr);
                    self.emit(IrOp::Pop { value });
                }
            }
            NodeKind::ReturnStmt => {
                let value = node.lhs.map(|expr| self.lower_expr(expr));
                self.emit(IrOp::Ret { value });
            }
            NodeKind::DivertStmt => self.lower_transfer(id, CallMode::Divert),
            NodeKind::TunnelStmt => self.lower_transfer(id, CallMode::Tunnel),
            NodeKind::ThreadStmt => self.lower_transfer(id, CallMode::Thread),
            NodeKind::TunnelOnwards => {
                self.emit(IrOp::Ret { value: None });
            }
            NodeKind::ChoiceStmt => self.lower_choice_list(id, None),
            NodeKind::GatheredChoiceStmt => {
                let choices = node.lhs.expect("gathered choices have a choice list");
                let gather = node.rhs;
                self.lower_choice_list(choices, gather);
            }
            NodeKind::GatherStmt => {
                if let Some(inner) = node.lhs {
                    self.lower_stmt(inner);
                }
            }
            NodeKind::Block => self.lower_block(id),
            NodeKind::IfStmt => self.lower_if(id),
            NodeKind::MultiIfStmt => self.lower_multi_if(id),
            NodeKind::SwitchStmt => self.lower_switch(id),
            NodeKind::Invalid | NodeKind::EmptyContent => {}
            _ => {}
        }
    }

    fn lower_content_stmt(&mut self, id: NodeId) {
        let pieces = self.ast.node(id).children.clone();
        let mut line_open = false;

        for piece in pieces {
            let kind = self.ast.node(piece).kind;

            match kind {
                NodeKind::DivertStmt | NodeKind::TunnelStmt | NodeKind::ThreadStmt => {
                    // A divert ending a content line joins it with the
                    // target's first line.
                    if line_open {
                        self.emit(IrOp::Glue);
                        self.emit(IrOp::Done);
                        line_open = false;
                    }
                    self.lower_stmt(piece);
                }
                NodeKind::TunnelOnwards => {
                    if line_open {
                        self.emit(IrOp::Done);
                        line_open = false;
                    }
                    self.emit(IrOp::Ret { value: None });
                }
                NodeKind::IfStmt
                    if self.ast.node(piece).flags & flags::INLINE == 0 =>
                {
                    self.lower_if(piece);
                }
                NodeKind::MultiIfStmt => self.lower_multi_if(piece),
                NodeKind::SwitchStmt => self.lower_switch(piece),
                _ => {
                    if self.lower_content_piece(piece) {
                        line_open = true;
                    }
                }
            }
        }

        if line_open {
            self.emit(IrOp::Done);
        }
    }

    /// Lower a single in-line content piece. Returns true when the piece
    /// contributes to the current output line.
    fn lower_content_piece(&mut self, piece: NodeId) -> bool {
        let node = self.ast.node(piece);

        match node.kind {
            NodeKind::Content => {
                let offset = {
                    let text = self.text(piece).to_string();
                    self.ir.intern_string(&text)
                };
                let value = self.emit(IrOp::Str { offset });
                self.emit(IrOp::ContentPush { value });
                true
            }
            NodeKind::InlineLogic => {
                let Some(expr) = node.lhs else {
                    return false;
                };
                let value = self.lower_expr(expr);
                self.emit(IrOp::ContentPush { value });
                true
            }
            NodeKind::Glue => {
                self.emit(IrOp::Glue);
                true
            }
            NodeKind::SequenceExpr => {
                self.lower_sequence(piece);
                true
            }
            NodeKind::IfStmt => {
                self.lower_if(piece);
                true
            }
            NodeKind::DivertStmt => {
                self.lower_transfer(piece, CallMode::Divert);
                false
            }
            NodeKind::TunnelStmt => {
                self.lower_transfer(piece, CallMode::Tunnel);
                false
            }
            NodeKind::ThreadStmt => {
                self.lower_transfer(piece, CallMode::Thread);
                false
            }
            NodeKind::EmptyContent | NodeKind::Invalid => false,
            _ => {
                // Statement-shaped pieces inside multiline bodies.
                self.lower_stmt(piece);
                false
            }
        }
    }

    fn lower_pieces_into_seq(&mut self, pieces: &[NodeId]) -> SeqId {
        self.begin_seq();
        for &piece in pieces {
            self.lower_content_piece(piece);
        }
        self.end_seq()
    }

    fn lower_stmts_into_seq(&mut self, stmts: &[NodeId]) -> SeqId {
        self.begin_seq();
        for &stmt in stmts {
            self.lower_stmt(stmt);
        }
        self.end_seq()
    }

    fn lower_global_decl(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let Some(name_node) = node.lhs else {
            return;
        };
        let name = {
            let text = self.text(name_node).to_string();
            self.ir.intern_string(&text)
        };
        let value = match node.rhs {
            Some(expr) => self.lower_expr(expr),
            None => self.emit(IrOp::Number { value: 0.0 }),
        };

        self.emit(IrOp::StoreGlobal { name, value });
    }

    /// List elements become named constants with 1-based ordinals.
    fn lower_list_decl(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let elements = node.children.clone();
        let Some(name_node) = node.lhs else {
            return;
        };

        for (ordinal, element) in elements.iter().enumerate() {
            let name = {
                let text = self.text(*element).to_string();
                self.ir.intern_string(&text)
            };
            let value = self.emit(IrOp::Number {
                value: (ordinal + 1) as f64,
            });

            self.emit(IrOp::StoreGlobal { name, value });
        }

        let name = {
            let text = self.text(name_node).to_string();
            self.ir.intern_string(&text)
        };
        let value = self.emit(IrOp::Number { value: 0.0 });
        self.emit(IrOp::StoreGlobal { name, value });
    }

    fn lower_temp_decl(&mut self, id: NodeId) {
        let (name_node, init) = {
            let node = self.ast.node(id);
            (node.lhs, node.rhs)
        };
        let Some(name_node) = name_node else {
            return;
        };
        let name = self.text(name_node).to_string();
        let slot = self.alloc_slot();

        if self
            .scopes
            .define(&name, Symbol::local(name_node, slot))
            .is_err()
        {
            self.error_at(DiagnosticKind::Redefinition, name_node);
        }

        self.emit(IrOp::Alloc { slot });
        let value = match init {
            Some(expr) => self.lower_expr(expr),
            None => self.emit(IrOp::Number { value: 0.0 }),
        };
        self.emit(IrOp::StoreLocal { slot, value });
    }

    fn lower_assign(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let (Some(target), Some(value_expr)) = (node.lhs, node.rhs) else {
            return;
        };

        if self.ast.node(target).kind != NodeKind::Identifier {
            self.error_at(DiagnosticKind::UnexpectedToken, target);
            return;
        }

        let name = self.text(target).to_string();
        let symbol = self.scopes.lookup(&name).cloned();

        match symbol {
            Some(symbol) if matches!(symbol.kind, SymbolKind::Local | SymbolKind::Param) => {
                let value = self.lower_expr(value_expr);
                self.emit(IrOp::StoreLocal {
                    slot: symbol.slot,
                    value,
                });
            }
            Some(symbol) if symbol.kind == SymbolKind::Global => {
                let value = self.lower_expr(value_expr);
                let name = self.ir.intern_string(&name);
                self.emit(IrOp::StoreGlobal { name, value });
            }
            _ => {
                self.error_at(DiagnosticKind::UnknownIdentifier, target);
            }
        }
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn lower_if(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let inline = node.flags & flags::INLINE != 0;
        let then_children = node.children.clone();
        let else_node = node.rhs;
        let Some(cond_expr) = node.lhs else {
            return;
        };

        let cond = self.lower_expr(cond_expr);
        let then_seq = if inline {
            self.lower_pieces_into_seq(&then_children)
        } else {
            self.lower_stmts_into_seq(&then_children)
        };
        let else_seq = else_node.map(|branch| {
            let children = self.ast.node(branch).children.clone();
            let else_inline = self.ast.node(branch).flags & flags::INLINE != 0;

            if else_inline {
                self.lower_pieces_into_seq(&children)
            } else {
                self.lower_stmts_into_seq(&children)
            }
        });

        self.emit(IrOp::CondBr {
            cond,
            then_seq,
            else_seq,
        });
    }

    /// A case list with no scrutinee lowers to a chain of conditionals.
    fn lower_multi_if(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let cases = node.children.clone();
        let else_node = node.rhs;

        self.lower_multi_if_chain(&cases, else_node);
    }

    fn lower_multi_if_chain(&mut self, cases: &[NodeId], else_node: Option<NodeId>) {
        let Some((&first, rest)) = cases.split_first() else {
            if let Some(branch) = else_node {
                let children = self.ast.node(branch).children.clone();
                for stmt in children {
                    self.lower_stmt(stmt);
                }
            }
            return;
        };

        let case = self.ast.node(first);
        let body = case.children.clone();
        let Some(cond_expr) = case.lhs else {
            return;
        };

        let cond = self.lower_expr(cond_expr);
        let then_seq = self.lower_stmts_into_seq(&body);
        let else_seq = if rest.is_empty() && else_node.is_none() {
            None
        } else {
            self.begin_seq();
            self.lower_multi_if_chain(rest, else_node);
            Some(self.end_seq())
        };

        self.emit(IrOp::CondBr {
            cond,
            then_seq,
            else_seq,
        });
    }

    fn lower_switch(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let cases = node.children.clone();
        let else_node = node.rhs;
        let Some(arg_expr) = node.lhs else {
            return;
        };

        let arg = self.lower_expr(arg_expr);

        self.begin_seq();
        for case_id in cases {
            let case = self.ast.node(case_id);
            let body = case.children.clone();
            let value_expr = case.lhs;

            self.begin_seq();
            if let Some(value_expr) = value_expr {
                self.lower_expr(value_expr);
            } else {
                self.emit(IrOp::Number { value: 0.0 });
            }
            let value_seq = self.end_seq();

            let body_seq = self.lower_stmts_into_seq(&body);
            self.emit(IrOp::SwitchCase {
                value_seq,
                body: body_seq,
            });
        }
        let cases_seq = self.end_seq();

        let default = else_node.map(|branch| {
            let children = self.ast.node(branch).children.clone();
            self.lower_stmts_into_seq(&children)
        });

        self.emit(IrOp::Switch {
            arg,
            cases: cases_seq,
            default,
        });
    }

    fn lower_sequence(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let alternatives = node.children.clone();
        let policy = if node.flags & flags::SEQ_CYCLE != 0 {
            SeqPolicy::Cycle
        } else if node.flags & flags::SEQ_SHUFFLE != 0 {
            SeqPolicy::Shuffle
        } else if node.flags & flags::SEQ_ONCE != 0 {
            SeqPolicy::Once
        } else {
            SeqPolicy::Stopping
        };

        self.begin_seq();
        for alt in alternatives {
            let pieces = self.ast.node(alt).children.clone();
            let body = self.lower_pieces_into_seq(&pieces);
            self.emit(IrOp::Block { seq: body });
        }
        let alts = self.end_seq();

        self.emit(IrOp::Sequence { policy, alts });
    }

    // ------------------------------------------------------------------
    // Choices
    // ------------------------------------------------------------------

    fn lower_choice_list(&mut self, choices_id: NodeId, gather: Option<NodeId>) {
        let choice_nodes = self.ast.node(choices_id).children.clone();

        self.begin_seq();
        for choice in choice_nodes {
            self.lower_choice(choice);
        }
        let choices_seq = self.end_seq();

        let gather_seq = gather.map(|gather_id| {
            self.begin_seq();
            if let Some(inner) = self.ast.node(gather_id).lhs {
                self.lower_stmt(inner);
            }
            self.end_seq()
        });

        self.emit(IrOp::ChoiceList {
            choices: choices_seq,
            gather: gather_seq,
        });
    }

    fn lower_choice(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        let sticky = node.kind == NodeKind::ChoicePlusStmt;
        let body_stmts = node.children.clone();
        let content = node.lhs;

        let mut start_text = String::new();
        let mut option_text = String::new();
        let mut inner_text = String::new();
        let mut divert: Option<NodeId> = None;

        if let Some(content_id) = content {
            for &part in &self.ast.node(content_id).children.clone() {
                let part_node = self.ast.node(part);

                match part_node.kind {
                    NodeKind::ChoiceStartExpr => {
                        start_text = self.text(part).trim().to_string();
                    }
                    NodeKind::ChoiceOptionExpr => {
                        option_text = self.text(part).trim().to_string();
                    }
                    NodeKind::ChoiceInnerExpr => {
                        inner_text = self.text(part).trim().to_string();
                    }
                    NodeKind::DivertStmt | NodeKind::TunnelStmt => divert = Some(part),
                    _ => {}
                }
            }
        }

        let menu = join_choice_text(&start_text, &option_text);
        let echo = join_choice_text(&start_text, &inner_text);
        let text = self.ir.intern_string(&menu);

        self.begin_seq();
        if !echo.is_empty() {
            let offset = self.ir.intern_string(&echo);
            let value = self.emit(IrOp::Str { offset });
            self.emit(IrOp::ContentPush { value });
            self.emit(IrOp::Done);
        }
        if let Some(divert) = divert {
            self.lower_stmt(divert);
        }
        for stmt in body_stmts {
            self.lower_stmt(stmt);
        }
        let body = self.end_seq();

        self.emit(IrOp::Choice { text, sticky, body });
    }

    // ------------------------------------------------------------------
    // Diverts, tunnels, threads
    // ------------------------------------------------------------------

    fn lower_transfer(&mut self, id: NodeId, mode: CallMode) {
        let Some(target) = self.ast.node(id).lhs else {
            return;
        };

        self.lower_transfer_target(target, mode);
    }

    fn lower_transfer_target(&mut self, target: NodeId, mode: CallMode) {
        let target_node = self.ast.node(target);

        match target_node.kind {
            NodeKind::Identifier => {
                let name = self.text(target).to_string();

                // Special divert targets.
                if name == "END" {
                    self.emit(IrOp::End);
                    return;
                }
                if name == "DONE" {
                    self.emit(IrOp::Ret { value: None });
                    return;
                }

                match self.resolve_path(&name) {
                    Some((path, arity)) => {
                        if arity > 0 {
                            self.error_at(DiagnosticKind::TooFewArguments, target);
                        }
                        let args = self.ir.add_seq(Vec::new());
                        self.emit(IrOp::Call { mode, path, args });
                    }
                    None => self.error_at(DiagnosticKind::UnknownIdentifier, target),
                }
            }
            NodeKind::CallExpr => {
                self.lower_call(target, mode);
            }
            _ => self.error_at(DiagnosticKind::UnexpectedToken, target),
        }
    }

    /// Resolve a (possibly dotted) content path name to its index and
    /// arity.
    fn resolve_path(&self, name: &str) -> Option<(usize, u32)> {
        if let Some((knot, stitch)) = name.split_once('.') {
            let symbol = self.scopes.global().lookup(knot)?;

            if !matches!(symbol.kind, SymbolKind::Knot | SymbolKind::Function) {
                return None;
            }

            let owner = symbol.path;
            let &path = self.paths[owner].members.get(stitch)?;
            return Some((path, self.paths[path].params.len() as u32));
        }

        let symbol = self.scopes.lookup(name)?;
        if !matches!(symbol.kind, SymbolKind::Knot | SymbolKind::Function) {
            return None;
        }
        Some((symbol.path, self.paths[symbol.path].params.len() as u32))
    }

    fn lower_call(&mut self, id: NodeId, mode: CallMode) -> u32 {
        let node = self.ast.node(id);
        let callee = node.lhs.expect("call expressions have a callee");
        let arg_list = node.rhs;
        let args = arg_list
            .map(|list| self.ast.node(list).children.clone())
            .unwrap_or_default();
        let name = self.text(callee).to_string();

        match self.resolve_path(&name) {
            Some((path, arity)) => {
                if (args.len() as u32) < arity {
                    self.error_at(DiagnosticKind::TooFewArguments, callee);
                } else if (args.len() as u32) > arity {
                    self.error_at(DiagnosticKind::TooManyArguments, callee);
                }

                let mut arg_indices = Vec::new();
                for arg in args {
                    arg_indices.push(self.lower_expr(arg));
                }
                let args = self.ir.add_seq(arg_indices);

                self.emit(IrOp::Call { mode, path, args })
            }
            None => {
                self.error_at(DiagnosticKind::UnknownIdentifier, callee);
                self.emit(IrOp::Number { value: 0.0 })
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn lower_expr(&mut self, id: NodeId) -> u32 {
        let node = self.ast.node(id);

        match node.kind {
            NodeKind::Number => {
                let value = self.text(id).parse::<f64>().unwrap_or(0.0);
                self.emit(IrOp::Number { value })
            }
            NodeKind::True => self.emit(IrOp::True),
            NodeKind::False => self.emit(IrOp::False),
            NodeKind::StringExpr => {
                // Interior of the quotes, taken verbatim.
                let (start, end) = (node.start + 1, node.end.saturating_sub(1));
                let text =
                    String::from_utf8_lossy(self.source.slice(start, end.max(start)))
                        .into_owned();
                let offset = self.ir.intern_string(&text);
                self.emit(IrOp::Str { offset })
            }
            NodeKind::Identifier => self.lower_identifier_load(id),
            NodeKind::CallExpr => self.lower_call(id, CallMode::Call),
            NodeKind::NegateExpr => {
                let lhs = self.lower_expr(node.lhs.expect("unary operand"));
                self.emit(IrOp::Neg { lhs })
            }
            NodeKind::NotExpr => {
                let lhs = self.lower_expr(node.lhs.expect("unary operand"));
                self.emit(IrOp::BoolNot { lhs })
            }
            NodeKind::AddExpr
            | NodeKind::SubExpr
            | NodeKind::MulExpr
            | NodeKind::DivExpr
            | NodeKind::ModExpr
            | NodeKind::EqualExpr
            | NodeKind::NotEqualExpr
            | NodeKind::LessExpr
            | NodeKind::LessEqualExpr
            | NodeKind::GreaterExpr
            | NodeKind::GreaterEqualExpr
            | NodeKind::AndExpr
            | NodeKind::OrExpr => self.lower_binary(id),
            NodeKind::Invalid => self.emit(IrOp::Number { value: 0.0 }),
            _ => {
                self.error_at(DiagnosticKind::UnexpectedToken, id);
                self.emit(IrOp::Number { value: 0.0 })
            }
        }
    }

    fn lower_binary(&mut self, id: NodeId) -> u32 {
        let node = self.ast.node(id);
        let kind = node.kind;
        let lhs_id = node.lhs.expect("binary lhs");
        let rhs_id = node.rhs.expect("binary rhs");

        // Both sides always evaluate; `and`/`or` combine truthiness
        // without short-circuiting.
        let lhs = self.lower_expr(lhs_id);
        let rhs = self.lower_expr(rhs_id);

        let op = match kind {
            NodeKind::AddExpr => IrOp::Add { lhs, rhs },
            NodeKind::SubExpr => IrOp::Sub { lhs, rhs },
            NodeKind::MulExpr => IrOp::Mul { lhs, rhs },
            NodeKind::DivExpr => IrOp::Div { lhs, rhs },
            NodeKind::ModExpr => IrOp::Mod { lhs, rhs },
            NodeKind::EqualExpr => IrOp::CmpEq { lhs, rhs },
            NodeKind::NotEqualExpr => IrOp::CmpNeq { lhs, rhs },
            NodeKind::LessExpr => IrOp::CmpLt { lhs, rhs },
            NodeKind::LessEqualExpr => IrOp::CmpLte { lhs, rhs },
            NodeKind::GreaterExpr => IrOp::CmpGt { lhs, rhs },
            NodeKind::GreaterEqualExpr => IrOp::CmpGte { lhs, rhs },
            NodeKind::AndExpr => IrOp::And { lhs, rhs },
            NodeKind::OrExpr => IrOp::Or { lhs, rhs },
            _ => unreachable!("not a binary operator"),
        };
        self.emit(op)
    }

    fn lower_identifier_load(&mut self, id: NodeId) -> u32 {
        let name = self.text(id).to_string();

        if name == "true" {
            return self.emit(IrOp::True);
        }
        if name == "false" {
            return self.emit(IrOp::False);
        }

        let symbol = self.scopes.lookup(&name).cloned();
        match symbol {
            Some(symbol) if matches!(symbol.kind, SymbolKind::Local | SymbolKind::Param) => {
                self.emit(IrOp::LoadLocal { slot: symbol.slot })
            }
            Some(symbol) if symbol.kind == SymbolKind::Global => {
                let name = self.ir.intern_string(&name);
                self.emit(IrOp::LoadGlobal { name })
            }
            _ => {
                self.error_at(DiagnosticKind::UnknownIdentifier, id);
                self.emit(IrOp::Number { value: 0.0 })
            }
        }
    }
}

/// Join two trimmed choice text fragments with a single space.
fn join_choice_text(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        (false, false) => format!("{} {}", left, right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn lower_text(text: &str) -> (Ir, Vec<Diagnostic>) {
        let source = SourceBuffer::from_bytes("test.ink", text);
        let ast = parser::parse(&source);
        assert!(!ast.has_errors(), "parse errors: {:?}", ast.errors);
        lower(&ast, &source)
    }

    fn ops(ir: &Ir) -> Vec<&'static str> {
        ir.insts.iter().map(|op| op.name()).collect()
    }

    #[test]
    fn hello_world_lowering() {
        let (ir, errors) = lower_text("Hello, world!\n");
        assert!(errors.is_empty());
        assert_eq!(ir.decls.len(), 1);
        assert_eq!(
            ops(&ir),
            vec!["str", "content_push", "done", "decl"]
        );
    }

    #[test]
    fn arithmetic_expression_statement() {
        let (ir, errors) = lower_text("~ 1 + 2 * 3\n");
        assert!(errors.is_empty());
        assert_eq!(
            ops(&ir),
            vec!["num", "num", "num", "mul", "add", "pop", "decl"]
        );
    }

    #[test]
    fn var_reference_resolves() {
        let (ir, errors) = lower_text("VAR x = 2\n~ x = x + 1\n{x}\n");
        assert!(errors.is_empty());

        let names = ops(&ir);
        assert!(names.contains(&"store_global"));
        assert!(names.contains(&"load_global"));
        assert!(names.contains(&"content_push"));
    }

    #[test]
    fn unknown_identifier_diagnosed() {
        let source = SourceBuffer::from_bytes("test.ink", "~ y = 1\n");
        let ast = parser::parse(&source);
        let (_ir, errors) = lower(&ast, &source);

        assert!(errors
            .iter()
            .any(|e| e.kind == DiagnosticKind::UnknownIdentifier));
    }

    #[test]
    fn redefinition_diagnosed_at_second_site() {
        let source = SourceBuffer::from_bytes("test.ink", "VAR x\nVAR x\n");
        let ast = parser::parse(&source);
        let (_ir, errors) = lower(&ast, &source);

        let error = errors
            .iter()
            .find(|e| e.kind == DiagnosticKind::Redefinition)
            .expect("redefinition diagnostic");
        let (line, col) = source.line_col(error.start);
        assert_eq!((line, col), (1, 4));
    }

    #[test]
    fn knot_and_divert_resolve_forward() {
        let (ir, errors) = lower_text("-> cave\n== cave ==\nDark.\n-> END\n");
        assert!(errors.is_empty());
        assert_eq!(ir.decls.len(), 2);

        let names = ops(&ir);
        assert!(names.contains(&"call"));
        assert!(names.contains(&"end"));
    }

    #[test]
    fn stitch_short_name_resolves_inside_knot() {
        let (ir, errors) =
            lower_text("== cave ==\n-> entrance\n= entrance\nA door.\n");
        assert!(errors.is_empty());
        assert_eq!(ir.decls.len(), 3);
    }

    #[test]
    fn dotted_stitch_resolves_globally() {
        let (_ir, errors) = lower_text("-> cave.entrance\n== cave ==\nx\n= entrance\nDoor.\n");
        assert!(errors.is_empty());
    }

    #[test]
    fn function_arity_mismatch_diagnosed() {
        let source = SourceBuffer::from_bytes(
            "test.ink",
            "~ add(1)\n== function add(a, b)\n~ return a + b\n",
        );
        let ast = parser::parse(&source);
        let (_ir, errors) = lower(&ast, &source);

        assert!(errors
            .iter()
            .any(|e| e.kind == DiagnosticKind::TooFewArguments));
    }

    #[test]
    fn choices_lower_to_choice_list() {
        let (ir, errors) = lower_text("* Go north\n* Go south\n");
        assert!(errors.is_empty());

        let names = ops(&ir);
        assert_eq!(names.iter().filter(|n| **n == "choice").count(), 2);
        assert!(names.contains(&"choice_list"));
    }

    #[test]
    fn sequence_policies_lower() {
        let (ir, errors) = lower_text("{&one|two}\n");
        assert!(errors.is_empty());

        let sequence = ir
            .insts
            .iter()
            .find_map(|op| match op {
                IrOp::Sequence { policy, .. } => Some(*policy),
                _ => None,
            })
            .expect("sequence instruction");
        assert_eq!(sequence, SeqPolicy::Cycle);
    }

    #[test]
    fn temp_allocates_slots() {
        let (ir, errors) = lower_text("== function f(a)\n~ temp b = a + 1\n~ return b\n");
        assert!(errors.is_empty());

        let decl = ir
            .insts
            .iter()
            .find_map(|op| match op {
                IrOp::Declaration {
                    arity,
                    locals,
                    is_function: true,
                    ..
                } => Some((*arity, *locals)),
                _ => None,
            })
            .expect("function declaration");
        assert_eq!(decl, (1, 2));
    }

    #[test]
    fn payload_indices_precede_their_instruction() {
        let (ir, _errors) =
            lower_text("VAR x = 1\n{x > 0: yes|no}\n~ x = x * 2 + 1\n");

        for (index, inst) in ir.insts.iter().enumerate() {
            let check = |operand: u32| assert!((operand as usize) < index);

            match inst {
                IrOp::Add { lhs, rhs }
                | IrOp::Sub { lhs, rhs }
                | IrOp::Mul { lhs, rhs }
                | IrOp::CmpGt { lhs, rhs } => {
                    check(*lhs);
                    check(*rhs);
                }
                IrOp::Neg { lhs } | IrOp::BoolNot { lhs } => check(*lhs),
                IrOp::CondBr { cond, .. } => check(*cond),
                IrOp::ContentPush { value } | IrOp::Pop { value } => check(*value),
                IrOp::StoreGlobal { value, .. } | IrOp::StoreLocal { value, .. } => {
                    check(*value)
                }
                _ => {}
            }
        }
    }
}
