// symbols.rs — Lexically scoped symbol table
//
// Scope 0 holds the builtins (and their aliases); scope 1 is the program's
// global scope; inlined function bodies and closures push further scopes.
// Lookups search innermost-first by FNV-1a name hash.
//
// Preconditions: none.
// Postconditions: `pop_scope` never removes the builtin or global scope.
// Failure modes: `define*` returns false when the name already exists in the
//   current scope; the caller decides whether that is a diagnostic.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{Ast, NodeIndex, NodeKind};
use crate::id::{fnv1a, BufferIndex};
use crate::registry::Registry;

// ── Symbol payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParam {
    pub name: String,
    pub default: Option<f64>,
}

/// Read-only variable captured by a closure at the point it became a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: String,
    pub buffer: BufferIndex,
}

/// Anything callable that is not a builtin: a named `fn` or a closure literal.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRef {
    /// `FunctionDef` or `Closure` node; parameters and body are its children.
    pub node: NodeIndex,
    pub params: Vec<FunctionParam>,
    pub captures: Vec<Capture>,
    /// Set for named functions.
    pub name: Option<String>,
}

impl FunctionRef {
    /// Build from a `FunctionDef` or `Closure` node.
    pub fn from_node(ast: &Ast, node: NodeIndex) -> Self {
        let (params, _) = ast.params_and_body(node);
        let params = params
            .into_iter()
            .filter_map(|p| match &ast[p].kind {
                NodeKind::ClosureParam { name, default } => Some(FunctionParam {
                    name: name.clone(),
                    default: *default,
                }),
                _ => None,
            })
            .collect();
        let name = match &ast[node].kind {
            NodeKind::FunctionDef { name, .. } => Some(name.clone()),
            _ => None,
        };
        FunctionRef {
            node,
            params,
            captures: Vec::new(),
            name,
        }
    }

    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    /// Display name for diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<closure>")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternInfo {
    /// The `MiniLiteral` node.
    pub node: NodeIndex,
    pub is_sample_pattern: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInfo {
    /// The `ArrayLit` node.
    pub source: NodeIndex,
    pub element_count: usize,
    /// Filled in once the array has been generated.
    pub buffers: Vec<BufferIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Variable(BufferIndex),
    Parameter(BufferIndex),
    /// Canonical builtin name.
    Builtin(&'static str),
    UserFunction(FunctionRef),
    FunctionValue(FunctionRef),
    Pattern(PatternInfo),
    Array(ArrayInfo),
}

impl SymbolKind {
    pub fn describe(&self) -> &'static str {
        match self {
            SymbolKind::Variable(_) => "variable",
            SymbolKind::Parameter(_) => "parameter",
            SymbolKind::Builtin(_) => "builtin function",
            SymbolKind::UserFunction(_) => "function",
            SymbolKind::FunctionValue(_) => "function value",
            SymbolKind::Pattern(_) => "pattern",
            SymbolKind::Array(_) => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub name_hash: u32,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn new(name: &str, kind: SymbolKind) -> Self {
        Symbol {
            name: name.to_string(),
            name_hash: fnv1a(name),
            kind,
        }
    }

    /// Buffer bound to a variable or parameter.
    pub fn buffer(&self) -> Option<BufferIndex> {
        match self.kind {
            SymbolKind::Variable(b) | SymbolKind::Parameter(b) => Some(b),
            _ => None,
        }
    }
}

// ── Table ───────────────────────────────────────────────────────────────────

const BUILTIN_SCOPE: usize = 0;
const GLOBAL_SCOPE: usize = 1;

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<HashMap<u32, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Table with every builtin and alias of the default registry.
    pub fn new() -> Self {
        Self::with_registry(&Registry::new())
    }

    pub fn with_registry(registry: &Registry) -> Self {
        let mut builtins = HashMap::new();
        for info in registry.builtins() {
            let sym = Symbol::new(info.name, SymbolKind::Builtin(info.name));
            builtins.insert(sym.name_hash, sym);
        }
        for (alias, canonical) in registry.aliases() {
            let sym = Symbol::new(alias, SymbolKind::Builtin(canonical));
            builtins.insert(sym.name_hash, sym);
        }
        SymbolTable {
            scopes: vec![builtins, HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > GLOBAL_SCOPE + 1 {
            self.scopes.pop();
        }
    }

    /// Number of scopes above the global one.
    pub fn depth(&self) -> usize {
        self.scopes.len() - (GLOBAL_SCOPE + 1)
    }

    fn current(&mut self) -> &mut HashMap<u32, Symbol> {
        let top = self.scopes.len() - 1;
        &mut self.scopes[top]
    }

    /// Insert into the current scope. Returns false (and keeps the old entry)
    /// when the name is already defined there.
    pub fn define(&mut self, symbol: Symbol) -> bool {
        let scope = self.current();
        if scope.contains_key(&symbol.name_hash) {
            return false;
        }
        scope.insert(symbol.name_hash, symbol);
        true
    }

    /// Insert into the current scope, replacing any entry of the same name.
    pub fn bind(&mut self, symbol: Symbol) {
        self.current().insert(symbol.name_hash, symbol);
    }

    pub fn define_variable(&mut self, name: &str, buffer: BufferIndex) -> bool {
        self.define(Symbol::new(name, SymbolKind::Variable(buffer)))
    }

    pub fn define_parameter(&mut self, name: &str, buffer: BufferIndex) -> bool {
        self.define(Symbol::new(name, SymbolKind::Parameter(buffer)))
    }

    pub fn define_function(&mut self, func: FunctionRef) -> bool {
        let name = func.display_name().to_string();
        self.define(Symbol::new(&name, SymbolKind::UserFunction(func)))
    }

    pub fn define_function_value(&mut self, name: &str, func: FunctionRef) -> bool {
        self.define(Symbol::new(name, SymbolKind::FunctionValue(func)))
    }

    pub fn define_pattern(&mut self, name: &str, info: PatternInfo) -> bool {
        self.define(Symbol::new(name, SymbolKind::Pattern(info)))
    }

    pub fn define_array(&mut self, name: &str, info: ArrayInfo) -> bool {
        self.define(Symbol::new(name, SymbolKind::Array(info)))
    }

    /// Point an existing variable or parameter at a new buffer, in the
    /// innermost scope that defines it.
    pub fn rebind_buffer(&mut self, name: &str, buffer: BufferIndex) -> bool {
        let hash = fnv1a(name);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(sym) = scope.get_mut(&hash) {
                return match &mut sym.kind {
                    SymbolKind::Variable(b) | SymbolKind::Parameter(b) => {
                        *b = buffer;
                        true
                    }
                    _ => false,
                };
            }
        }
        false
    }

    /// Record the generated buffers of an array symbol.
    pub fn set_array_buffers(&mut self, name: &str, buffers: Vec<BufferIndex>) {
        let hash = fnv1a(name);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(sym) = scope.get_mut(&hash) {
                if let SymbolKind::Array(info) = &mut sym.kind {
                    info.buffers = buffers;
                }
                return;
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.lookup_hash(fnv1a(name))
    }

    pub fn lookup_hash(&self, hash: u32) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(&hash))
    }

    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|s| s.contains_key(&fnv1a(name)))
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.scopes[BUILTIN_SCOPE].contains_key(&fnv1a(name))
    }

    /// Variables and parameters visible from the current scope, innermost
    /// binding first per name. Used to snapshot closure captures.
    pub fn visible_buffers(&self) -> Vec<Capture> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for scope in self.scopes.iter().rev() {
            let mut names: Vec<_> = scope.values().collect();
            names.sort_by(|a, b| a.name.cmp(&b.name));
            for sym in names {
                if !seen.insert(sym.name_hash) {
                    continue;
                }
                if let Some(buffer) = sym.buffer() {
                    out.push(Capture {
                        name: sym.name.clone(),
                        buffer,
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_and_aliases_are_visible() {
        let table = SymbolTable::new();
        assert_eq!(
            table.lookup("sin").map(|s| &s.kind),
            Some(&SymbolKind::Builtin("sin"))
        );
        assert_eq!(
            table.lookup("lowpass").map(|s| &s.kind),
            Some(&SymbolKind::Builtin("lp"))
        );
        assert!(table.is_builtin("sine"));
        assert!(!table.is_defined_in_current_scope("sin"));
    }

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut table = SymbolTable::new();
        assert!(table.define_variable("x", BufferIndex(1)));
        table.push_scope();
        assert_eq!(table.depth(), 1);
        assert!(table.define_parameter("x", BufferIndex(7)));
        assert_eq!(table.lookup("x").and_then(Symbol::buffer), Some(BufferIndex(7)));
        table.pop_scope();
        assert_eq!(table.lookup("x").and_then(Symbol::buffer), Some(BufferIndex(1)));
    }

    #[test]
    fn global_scope_survives_extra_pops() {
        let mut table = SymbolTable::new();
        table.define_variable("g", BufferIndex(3));
        table.pop_scope();
        table.pop_scope();
        assert_eq!(table.depth(), 0);
        assert!(table.lookup("g").is_some());
        assert!(table.lookup("sin").is_some());
    }

    #[test]
    fn duplicate_in_same_scope_is_refused() {
        let mut table = SymbolTable::new();
        assert!(table.define_variable("x", BufferIndex(1)));
        assert!(!table.define_variable("x", BufferIndex(2)));
        assert_eq!(table.lookup("x").and_then(Symbol::buffer), Some(BufferIndex(1)));
        // User code may shadow a builtin: builtins live in their own scope.
        assert!(table.define_variable("sin", BufferIndex(4)));
    }

    #[test]
    fn rebind_updates_innermost_definition() {
        let mut table = SymbolTable::new();
        table.define_variable("x", BufferIndex::UNUSED);
        assert!(table.rebind_buffer("x", BufferIndex(9)));
        assert_eq!(table.lookup("x").and_then(Symbol::buffer), Some(BufferIndex(9)));
        assert!(!table.rebind_buffer("sin", BufferIndex(9)));
        assert!(!table.rebind_buffer("nope", BufferIndex(9)));
    }

    #[test]
    fn visible_buffers_prefers_inner_binding() {
        let mut table = SymbolTable::new();
        table.define_variable("a", BufferIndex(1));
        table.define_variable("b", BufferIndex(2));
        table.push_scope();
        table.define_parameter("a", BufferIndex(5));
        let caps = table.visible_buffers();
        assert_eq!(
            caps,
            vec![
                Capture {
                    name: "a".into(),
                    buffer: BufferIndex(5)
                },
                Capture {
                    name: "b".into(),
                    buffer: BufferIndex(2)
                },
            ]
        );
    }

    #[test]
    fn function_ref_reads_params_from_node() {
        let mut ast = Ast::new();
        let body = ast.ident("x");
        let f = ast.func_def("gain", &[("x", None), ("amt", Some(0.5))], body);
        let func = FunctionRef::from_node(&ast, f);
        assert_eq!(func.name.as_deref(), Some("gain"));
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.required_params(), 1);
        assert_eq!(func.params[1].default, Some(0.5));
    }
}
