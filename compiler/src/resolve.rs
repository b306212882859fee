// resolve.rs — Declaration collection
//
// Walks a tree once before code generation and registers every top-level
// name it binds: `fn` definitions, closures assigned to names, pattern
// literals, array literals and plain variables. The walk descends into every
// subtree, so assignments inside function bodies are registered too.
//
// Preconditions: `table` is positioned at the global scope.
// Postconditions: each binding site has a symbol; variables start out bound
//   to `BufferIndex::UNUSED` and are rebound during code generation.
// Failure modes: a name bound twice in the same scope yields `W010`; the
//   first definition is kept.
// Side effects: mutates `table`.

use std::collections::HashMap;

use tracing::trace;

use crate::ast::{Ast, NodeIndex, NodeKind, Span};
use crate::diag::{codes, Diagnostic};
use crate::id::BufferIndex;
use crate::symbols::{ArrayInfo, FunctionRef, PatternInfo, Symbol, SymbolKind, SymbolTable};

/// Register every binding in `ast` with `table`.
pub fn collect_definitions(ast: &Ast, table: &mut SymbolTable) -> Vec<Diagnostic> {
    let mut collector = Collector {
        ast,
        first_seen: HashMap::new(),
        diagnostics: Vec::new(),
    };
    if let Some(root) = ast.root {
        collector.collect(root, table);
    }
    collector.diagnostics
}

struct Collector<'a> {
    ast: &'a Ast,
    /// Span of the first definition of each name.
    first_seen: HashMap<&'a str, Span>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Collector<'a> {
    fn collect(&mut self, node: NodeIndex, table: &mut SymbolTable) {
        let ast = self.ast;
        let n = &ast[node];
        let binding = match &n.kind {
            NodeKind::Assignment { name } => Some((name.as_str(), assignment_kind(ast, node))),
            NodeKind::FunctionDef { name, .. } => Some((
                name.as_str(),
                SymbolKind::UserFunction(FunctionRef::from_node(ast, node)),
            )),
            _ => None,
        };

        if let Some((name, kind)) = binding {
            trace!(name, kind = kind.describe(), "collect definition");
            if table.define(Symbol::new(name, kind)) {
                self.first_seen.insert(name, n.span);
            } else {
                let mut diag = Diagnostic::warning(
                    codes::W010,
                    n.span,
                    format!("'{name}' is already defined in this scope"),
                )
                .with_hint("the first definition is used");
                if let Some(&first) = self.first_seen.get(name) {
                    diag = diag.with_related(first, "first defined here");
                }
                self.diagnostics.push(diag);
            }
        }

        for child in ast.children(node) {
            self.collect(child, table);
        }
    }
}
fn assignment_kind(ast: &Ast, assign: NodeIndex) -> SymbolKind {
    let Some(rhs) = ast[assign].first_child else {
        return SymbolKind::Variable(BufferIndex::UNUSED);
    };
    match ast[rhs].kind {
        NodeKind::MiniLiteral(_) => SymbolKind::Pattern(PatternInfo {
            node: rhs,
            is_sample_pattern: false,
        }),
        NodeKind::ArrayLit => SymbolKind::Array(ArrayInfo {
            source: rhs,
            element_count: ast.child_count(rhs),
            buffers: Vec::new(),
        }),
        NodeKind::Closure => SymbolKind::FunctionValue(FunctionRef::from_node(ast, rhs)),
        _ => SymbolKind::Variable(BufferIndex::UNUSED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PatternType;

    fn kind_of<'a>(table: &'a SymbolTable, name: &str) -> &'a SymbolKind {
        &table.lookup(name).expect("symbol defined").kind
    }

    #[test]
    fn classifies_each_binding_form() {
        let mut ast = Ast::new();
        let one = ast.num(1.0);
        let x = ast.assign("x", one);
        let (lit, _) = ast.mini_literal(PatternType::Pat, "bd sd", 0, None);
        let p = ast.assign("drums", lit);
        let a1 = ast.num(1.0);
        let a2 = ast.num(2.0);
        let arr = ast.array(&[a1, a2]);
        let a = ast.assign("notes", arr);
        let v = ast.ident("v");
        let clo = ast.closure(&["v"], v);
        let f = ast.assign("id", clo);
        let body = ast.ident("y");
        let def = ast.func_def("twice", &[("y", None)], body);
        ast.program(&[x, p, a, f, def]);

        let mut table = SymbolTable::new();
        let diags = collect_definitions(&ast, &mut table);
        assert!(diags.is_empty());

        assert_eq!(kind_of(&table, "x"), &SymbolKind::Variable(BufferIndex::UNUSED));
        assert!(matches!(kind_of(&table, "drums"), SymbolKind::Pattern(info) if info.node == lit));
        assert!(matches!(
            kind_of(&table, "notes"),
            SymbolKind::Array(info) if info.element_count == 2 && info.source == arr
        ));
        assert!(matches!(
            kind_of(&table, "id"),
            SymbolKind::FunctionValue(f) if f.params.len() == 1 && f.name.is_none()
        ));
        assert!(matches!(
            kind_of(&table, "twice"),
            SymbolKind::UserFunction(f) if f.name.as_deref() == Some("twice")
        ));
    }

    #[test]
    fn duplicate_binding_warns_and_keeps_first() {
        let mut ast = Ast::new();
        let (lit, _) = ast.mini_literal(PatternType::Pat, "c4", 0, None);
        let first = ast.assign("x", lit);
        let two = ast.num(2.0);
        let second = ast.assign("x", two);
        ast.program(&[first, second]);

        let mut table = SymbolTable::new();
        let diags = collect_definitions(&ast, &mut table);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::W010));
        assert!(!diags[0].is_error());
        assert_eq!(diags[0].related_spans.len(), 1);
        assert_eq!(diags[0].related_spans[0].span, ast[first].span);
        assert!(matches!(kind_of(&table, "x"), SymbolKind::Pattern(_)));
    }

    #[test]
    fn nested_assignments_are_collected() {
        let mut ast = Ast::new();
        let n = ast.num(3.0);
        let inner = ast.assign("inner", n);
        let r = ast.ident("inner");
        let block = ast.block(&[inner, r]);
        let def = ast.func_def("f", &[], block);
        ast.program(&[def]);

        let mut table = SymbolTable::new();
        collect_definitions(&ast, &mut table);
        assert!(table.lookup("inner").is_some());
    }

    #[test]
    fn empty_tree_defines_nothing() {
        let ast = Ast::new();
        let mut table = SymbolTable::new();
        assert!(collect_definitions(&ast, &mut table).is_empty());
        assert!(table.lookup("x").is_none());
    }
}
