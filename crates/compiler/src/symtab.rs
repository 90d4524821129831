//! Lexical symbol tables.
//!
//! Scopes nest: the global table holds variables, constants, knots, and
//! functions; each knot contributes a member table for its stitches; each
//! content path gets a locals scope for parameters and `temp` slots.
//! Lookup walks innermost-first.

use std::collections::HashMap;

use crate::ast::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Local,
    Global,
    Param,
    Knot,
    Function,
}

/// A named entity with its declaration site and kind-specific payload.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Declaring node, for diagnostics.
    pub node: NodeId,
    /// Globals: declared with `CONST`.
    pub is_const: bool,
    /// Locals and parameters: frame slot.
    pub slot: u32,
    /// Knots and functions: content path index and parameter count.
    pub path: usize,
    pub arity: u32,
    /// Knots: stitch name to content path index.
    pub members: HashMap<String, usize>,
}

impl Symbol {
    pub fn global(node: NodeId, is_const: bool) -> Symbol {
        Symbol {
            kind: SymbolKind::Global,
            node,
            is_const,
            slot: 0,
            path: 0,
            arity: 0,
            members: HashMap::new(),
        }
    }

    pub fn local(node: NodeId, slot: u32) -> Symbol {
        Symbol {
            kind: SymbolKind::Local,
            node,
            is_const: false,
            slot,
            path: 0,
            arity: 0,
            members: HashMap::new(),
        }
    }

    pub fn param(node: NodeId, slot: u32) -> Symbol {
        Symbol {
            kind: SymbolKind::Param,
            node,
            is_const: false,
            slot,
            path: 0,
            arity: 0,
            members: HashMap::new(),
        }
    }

    pub fn path(kind: SymbolKind, node: NodeId, path: usize, arity: u32) -> Symbol {
        Symbol {
            kind,
            node,
            is_const: false,
            slot: 0,
            path,
            arity,
            members: HashMap::new(),
        }
    }
}

/// One lexical scope.
#[derive(Debug, Default)]
pub struct Symtab {
    symbols: HashMap<String, Symbol>,
}

impl Symtab {
    pub fn new() -> Symtab {
        Symtab::default()
    }

    /// Insert a symbol. Returns the existing symbol's declaration node on
    /// redefinition, leaving the original in place.
    pub fn define(&mut self, name: &str, symbol: Symbol) -> Result<(), NodeId> {
        if let Some(existing) = self.symbols.get(name) {
            return Err(existing.node);
        }

        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }
}

/// Stack of nested scopes.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Symtab>,
}

impl ScopeStack {
    pub fn new() -> ScopeStack {
        ScopeStack {
            scopes: vec![Symtab::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(Symtab::new());
    }

    /// Push a pre-populated scope (knot member tables).
    pub fn push_table(&mut self, table: Symtab) {
        self.scopes.push(table);
    }

    pub fn pop(&mut self) {
        debug_assert!(self.scopes.len() > 1);
        self.scopes.pop();
    }

    /// Global (outermost) scope.
    pub fn global_mut(&mut self) -> &mut Symtab {
        &mut self.scopes[0]
    }

    pub fn global(&self) -> &Symtab {
        &self.scopes[0]
    }

    /// Define in the innermost scope.
    pub fn define(&mut self, name: &str, symbol: Symbol) -> Result<(), NodeId> {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .define(name, symbol)
    }

    /// Innermost-first lookup.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.lookup(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redefinition_reports_original_node() {
        let mut table = Symtab::new();
        assert!(table.define("x", Symbol::global(NodeId(1), false)).is_ok());

        let err = table.define("x", Symbol::global(NodeId(2), false));
        assert_eq!(err, Err(NodeId(1)));
    }

    #[test]
    fn inner_scopes_shadow_outer() {
        let mut scopes = ScopeStack::new();
        scopes.define("x", Symbol::global(NodeId(1), false)).unwrap();
        scopes.push();
        scopes.define("x", Symbol::local(NodeId(2), 3)).unwrap();

        let found = scopes.lookup("x").unwrap();
        assert_eq!(found.kind, SymbolKind::Local);
        assert_eq!(found.slot, 3);

        scopes.pop();
        assert_eq!(scopes.lookup("x").unwrap().kind, SymbolKind::Global);
    }
}
