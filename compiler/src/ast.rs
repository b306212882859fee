// ast.rs — Arena-indexed syntax tree consumed by the code generator
//
// Nodes live in one growable `Vec<Node>` and link to each other through
// `NodeIndex` values (first-child / next-sibling lists). The host-language
// front end is external: trees are built through the builder methods below,
// while mini-notation sub-trees are appended by `mini_parser::parse_into`.
//
// Preconditions: indices handed to builder methods were returned by the same arena.
// Postconditions: every allocated node is reachable through `Ast::node`.
// Failure modes: none (data-only module; out-of-range indices panic like slice indexing).
// Side effects: none.

use std::ops::Index;

use chumsky::span::SimpleSpan;
use serde_json::json;

use crate::diag::Diagnostic;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span used by builder helpers when the caller has no source position.
pub fn no_span() -> Span {
    (0..0).into()
}

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

// ── Node payloads ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    /// Builtin function the operator desugars to.
    pub fn function_name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Pow => "pow",
        }
    }
}

/// Keyword that introduced a mini-notation literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Pat,
    Seq,
    Timeline,
    Note,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MiniAtom {
    Pitch { midi: u8 },
    Sample { name: String, variant: u8 },
    Rest,
    Chord { root_midi: u8, intervals: Vec<i8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// `*n`
    Speed,
    /// `/n`
    Slow,
    /// `:n`
    Duration,
    /// `@n`
    Weight,
    /// `!n`
    Repeat,
    /// `?n`
    Chance,
}

impl Modifier {
    pub fn name(self) -> &'static str {
        match self {
            Modifier::Speed => "Speed",
            Modifier::Slow => "Slow",
            Modifier::Duration => "Duration",
            Modifier::Weight => "Weight",
            Modifier::Repeat => "Repeat",
            Modifier::Chance => "Chance",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Program,
    Block,

    // ── Literals ──
    NumberLit { value: f64, is_integer: bool },
    BoolLit(bool),
    StringLit(String),
    PitchLit { midi: u8 },
    ChordLit { root_midi: u8, intervals: Vec<i8> },

    // ── Names ──
    Identifier(String),
    /// `%` pipe placeholder; must be rewritten away before codegen.
    Hole,
    ClosureParam { name: String, default: Option<f64> },

    // ── Expressions ──
    BinaryOp(BinOp),
    Pipe,
    Argument { name: Option<String> },
    Call { name: String },
    /// Children: parameters (`ClosureParam`) then the body.
    Closure,
    ArrayLit,
    /// Children: array expression, index expression.
    Index,
    /// Children: optional scrutinee, then `MatchArm`s.
    MatchExpr { has_scrutinee: bool },
    /// First child is the arm body. Pattern and guard are detached nodes.
    MatchArm {
        pattern: Option<NodeIndex>,
        guard: Option<NodeIndex>,
        is_wildcard: bool,
    },
    /// Children: `MiniPattern`, optional `Closure`.
    MiniLiteral(PatternType),

    // ── Statements ──
    Assignment { name: String },
    /// Children: parameters (`ClosureParam`) then the body.
    FunctionDef { name: String, param_count: usize },

    // ── Mini-notation ──
    MiniPattern,
    MiniAtom(MiniAtom),
    MiniGroup,
    /// `<a b c>` alternation.
    MiniSequence,
    MiniPolyrhythm,
    MiniPolymeter { step_count: u8 },
    MiniChoice,
    MiniEuclidean { hits: u8, steps: u8, rotation: u8 },
    MiniModified { modifier: Modifier, value: f32 },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program => "Program",
            NodeKind::Block => "Block",
            NodeKind::NumberLit { .. } => "NumberLit",
            NodeKind::BoolLit(_) => "BoolLit",
            NodeKind::StringLit(_) => "StringLit",
            NodeKind::PitchLit { .. } => "PitchLit",
            NodeKind::ChordLit { .. } => "ChordLit",
            NodeKind::Identifier(_) => "Identifier",
            NodeKind::Hole => "Hole",
            NodeKind::ClosureParam { .. } => "ClosureParam",
            NodeKind::BinaryOp(_) => "BinaryOp",
            NodeKind::Pipe => "Pipe",
            NodeKind::Argument { .. } => "Argument",
            NodeKind::Call { .. } => "Call",
            NodeKind::Closure => "Closure",
            NodeKind::ArrayLit => "ArrayLit",
            NodeKind::Index => "Index",
            NodeKind::MatchExpr { .. } => "MatchExpr",
            NodeKind::MatchArm { .. } => "MatchArm",
            NodeKind::MiniLiteral(_) => "MiniLiteral",
            NodeKind::Assignment { .. } => "Assignment",
            NodeKind::FunctionDef { .. } => "FunctionDef",
            NodeKind::MiniPattern => "MiniPattern",
            NodeKind::MiniAtom(_) => "MiniAtom",
            NodeKind::MiniGroup => "MiniGroup",
            NodeKind::MiniSequence => "MiniSequence",
            NodeKind::MiniPolyrhythm => "MiniPolyrhythm",
            NodeKind::MiniPolymeter { .. } => "MiniPolymeter",
            NodeKind::MiniChoice => "MiniChoice",
            NodeKind::MiniEuclidean { .. } => "MiniEuclidean",
            NodeKind::MiniModified { .. } => "MiniModified",
        }
    }

    /// Number, bool or string literal (the kinds a match can compare).
    pub fn is_scalar_literal(&self) -> bool {
        matches!(
            self,
            NodeKind::NumberLit { .. } | NodeKind::BoolLit(_) | NodeKind::StringLit(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub first_child: Option<NodeIndex>,
    pub next_sibling: Option<NodeIndex>,
}

// ── Arena ──

#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    pub root: Option<NodeIndex>,
}

impl Index<NodeIndex> for Ast {
    type Output = Node;

    fn index(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx.as_usize()]
    }
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            first_child: None,
            next_sibling: None,
        });
        idx
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx.as_usize()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_valid(&self, idx: NodeIndex) -> bool {
        idx.as_usize() < self.nodes.len()
    }

    pub fn set_span(&mut self, idx: NodeIndex, span: Span) {
        self.node_mut(idx).span = span;
    }

    /// Append `child` to the end of `parent`'s child list.
    pub fn add_child(&mut self, parent: NodeIndex, child: NodeIndex) {
        match self[parent].first_child {
            None => self.node_mut(parent).first_child = Some(child),
            Some(first) => {
                let mut cur = first;
                while let Some(next) = self[cur].next_sibling {
                    cur = next;
                }
                self.node_mut(cur).next_sibling = Some(child);
            }
        }
    }

    pub fn children(&self, parent: NodeIndex) -> Children<'_> {
        Children {
            ast: self,
            next: self[parent].first_child,
        }
    }

    pub fn child_count(&self, parent: NodeIndex) -> usize {
        self.children(parent).count()
    }

    pub fn nth_child(&self, parent: NodeIndex, n: usize) -> Option<NodeIndex> {
        self.children(parent).nth(n)
    }

    /// Parameters and body of a closure or function definition.
    pub fn params_and_body(&self, func: NodeIndex) -> (Vec<NodeIndex>, Option<NodeIndex>) {
        let mut params = Vec::new();
        let mut body = None;
        for child in self.children(func) {
            if matches!(self[child].kind, NodeKind::ClosureParam { .. }) {
                params.push(child);
            } else {
                body = Some(child);
            }
        }
        (params, body)
    }

    /// Numeric value of a number or bool literal.
    pub fn literal_number(&self, idx: NodeIndex) -> Option<f64> {
        match self[self.unwrap_argument(idx)].kind {
            NodeKind::NumberLit { value, .. } => Some(value),
            NodeKind::BoolLit(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn literal_string(&self, idx: NodeIndex) -> Option<&str> {
        match &self[self.unwrap_argument(idx)].kind {
            NodeKind::StringLit(s) => Some(s),
            _ => None,
        }
    }

    /// Strip an `Argument` wrapper, returning the wrapped expression.
    pub fn unwrap_argument(&self, idx: NodeIndex) -> NodeIndex {
        match self[idx].kind {
            NodeKind::Argument { .. } => self[idx].first_child.unwrap_or(idx),
            _ => idx,
        }
    }
}

pub struct Children<'a> {
    ast: &'a Ast,
    next: Option<NodeIndex>,
}

impl Iterator for Children<'_> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let cur = self.next?;
        self.next = self.ast[cur].next_sibling;
        Some(cur)
    }
}

// ── Builder helpers ──
//
// Stand-ins for the host-language parser. Each helper allocates one node and
// links the supplied children in order.

impl Ast {
    fn with_children(&mut self, kind: NodeKind, children: &[NodeIndex]) -> NodeIndex {
        let idx = self.alloc(kind, no_span());
        for &c in children {
            self.add_child(idx, c);
        }
        idx
    }

    pub fn num(&mut self, value: f64) -> NodeIndex {
        let is_integer = value.fract() == 0.0;
        self.alloc(NodeKind::NumberLit { value, is_integer }, no_span())
    }

    pub fn int(&mut self, value: i64) -> NodeIndex {
        self.alloc(
            NodeKind::NumberLit {
                value: value as f64,
                is_integer: true,
            },
            no_span(),
        )
    }

    pub fn boolean(&mut self, value: bool) -> NodeIndex {
        self.alloc(NodeKind::BoolLit(value), no_span())
    }

    pub fn string(&mut self, value: &str) -> NodeIndex {
        self.alloc(NodeKind::StringLit(value.to_string()), no_span())
    }

    pub fn pitch(&mut self, midi: u8) -> NodeIndex {
        self.alloc(NodeKind::PitchLit { midi }, no_span())
    }

    pub fn chord_lit(&mut self, root_midi: u8, intervals: &[i8]) -> NodeIndex {
        self.alloc(
            NodeKind::ChordLit {
                root_midi,
                intervals: intervals.to_vec(),
            },
            no_span(),
        )
    }

    pub fn ident(&mut self, name: &str) -> NodeIndex {
        self.alloc(NodeKind::Identifier(name.to_string()), no_span())
    }

    pub fn hole(&mut self) -> NodeIndex {
        self.alloc(NodeKind::Hole, no_span())
    }

    /// Call with positional arguments (each wrapped in an `Argument`).
    pub fn call(&mut self, name: &str, args: &[NodeIndex]) -> NodeIndex {
        let wrapped: Vec<NodeIndex> = args
            .iter()
            .map(|&a| self.with_children(NodeKind::Argument { name: None }, &[a]))
            .collect();
        self.with_children(
            NodeKind::Call {
                name: name.to_string(),
            },
            &wrapped,
        )
    }

    pub fn named_arg(&mut self, name: &str, value: NodeIndex) -> NodeIndex {
        self.with_children(
            NodeKind::Argument {
                name: Some(name.to_string()),
            },
            &[value],
        )
    }

    /// Call whose arguments are already `Argument` nodes.
    pub fn call_with_args(&mut self, name: &str, args: &[NodeIndex]) -> NodeIndex {
        self.with_children(
            NodeKind::Call {
                name: name.to_string(),
            },
            args,
        )
    }

    pub fn binary(&mut self, op: BinOp, lhs: NodeIndex, rhs: NodeIndex) -> NodeIndex {
        self.with_children(NodeKind::BinaryOp(op), &[lhs, rhs])
    }

    pub fn param(&mut self, name: &str, default: Option<f64>) -> NodeIndex {
        self.alloc(
            NodeKind::ClosureParam {
                name: name.to_string(),
                default,
            },
            no_span(),
        )
    }

    /// Closure literal with required parameters.
    pub fn closure(&mut self, params: &[&str], body: NodeIndex) -> NodeIndex {
        let params: Vec<(&str, Option<f64>)> = params.iter().map(|&p| (p, None)).collect();
        self.closure_with_defaults(&params, body)
    }

    pub fn closure_with_defaults(
        &mut self,
        params: &[(&str, Option<f64>)],
        body: NodeIndex,
    ) -> NodeIndex {
        let mut children: Vec<NodeIndex> =
            params.iter().map(|&(p, d)| self.param(p, d)).collect();
        children.push(body);
        self.with_children(NodeKind::Closure, &children)
    }

    pub fn func_def(&mut self, name: &str, params: &[(&str, Option<f64>)], body: NodeIndex) -> NodeIndex {
        let mut children: Vec<NodeIndex> =
            params.iter().map(|&(p, d)| self.param(p, d)).collect();
        children.push(body);
        self.with_children(
            NodeKind::FunctionDef {
                name: name.to_string(),
                param_count: params.len(),
            },
            &children,
        )
    }

    pub fn array(&mut self, elems: &[NodeIndex]) -> NodeIndex {
        self.with_children(NodeKind::ArrayLit, elems)
    }

    pub fn index(&mut self, array: NodeIndex, index: NodeIndex) -> NodeIndex {
        self.with_children(NodeKind::Index, &[array, index])
    }

    pub fn assign(&mut self, name: &str, value: NodeIndex) -> NodeIndex {
        self.with_children(
            NodeKind::Assignment {
                name: name.to_string(),
            },
            &[value],
        )
    }

    pub fn block(&mut self, stmts: &[NodeIndex]) -> NodeIndex {
        self.with_children(NodeKind::Block, stmts)
    }

    /// Program node; also becomes the tree root.
    pub fn program(&mut self, stmts: &[NodeIndex]) -> NodeIndex {
        let idx = self.with_children(NodeKind::Program, stmts);
        self.root = Some(idx);
        idx
    }

    pub fn match_expr(&mut self, scrutinee: Option<NodeIndex>, arms: &[NodeIndex]) -> NodeIndex {
        let mut children = Vec::with_capacity(arms.len() + 1);
        children.extend(scrutinee);
        children.extend_from_slice(arms);
        self.with_children(
            NodeKind::MatchExpr {
                has_scrutinee: scrutinee.is_some(),
            },
            &children,
        )
    }

    pub fn arm(&mut self, pattern: Option<NodeIndex>, guard: Option<NodeIndex>, body: NodeIndex) -> NodeIndex {
        self.with_children(
            NodeKind::MatchArm {
                pattern,
                guard,
                is_wildcard: false,
            },
            &[body],
        )
    }

    pub fn wildcard(&mut self, body: NodeIndex) -> NodeIndex {
        self.with_children(
            NodeKind::MatchArm {
                pattern: None,
                guard: None,
                is_wildcard: true,
            },
            &[body],
        )
    }

    /// Mini-notation literal. `text` is parsed into the arena; `offset` is
    /// the byte position of `text` in the host source. Parse diagnostics are
    /// returned alongside the node.
    pub fn mini_literal(
        &mut self,
        pattern_type: PatternType,
        text: &str,
        offset: usize,
        closure: Option<NodeIndex>,
    ) -> (NodeIndex, Vec<Diagnostic>) {
        let parsed = crate::mini_parser::parse_into(self, text, offset, false);
        let lit = self.alloc(
            NodeKind::MiniLiteral(pattern_type),
            (offset..offset + text.len()).into(),
        );
        if let Some(root) = parsed.root {
            self.add_child(lit, root);
        }
        if let Some(c) = closure {
            self.add_child(lit, c);
        }
        (lit, parsed.diagnostics)
    }
}

// ── JSON dump ──

/// Structured dump of a mini-notation sub-tree (debug field of compiled
/// pattern programs, `--emit ast` in the CLI).
pub fn mini_tree_json(ast: &Ast, idx: NodeIndex) -> serde_json::Value {
    use chumsky::span::Span as _;

    let node = &ast[idx];
    let mut obj = json!({
        "type": node.kind.name(),
        "location": {
            "offset": node.span.start(),
            "length": node.span.end() - node.span.start(),
        },
    });
    let extra = match &node.kind {
        NodeKind::MiniAtom(atom) => match atom {
            MiniAtom::Pitch { midi } => json!({ "kind": "Pitch", "midi": midi }),
            MiniAtom::Sample { name, variant } if *variant > 0 => {
                json!({ "kind": "Sample", "sampleName": name, "variant": variant })
            }
            MiniAtom::Sample { name, .. } => json!({ "kind": "Sample", "sampleName": name }),
            MiniAtom::Rest => json!({ "kind": "Rest" }),
            MiniAtom::Chord {
                root_midi,
                intervals,
            } => json!({ "kind": "Chord", "rootMidi": root_midi, "intervals": intervals }),
        },
        NodeKind::MiniEuclidean {
            hits,
            steps,
            rotation,
        } => json!({ "hits": hits, "steps": steps, "rotation": rotation }),
        NodeKind::MiniModified { modifier, value } => {
            json!({ "modifier": modifier.name(), "value": value })
        }
        NodeKind::MiniPolymeter { step_count } => json!({ "stepCount": step_count }),
        _ => json!({}),
    };
    if let (Some(dst), serde_json::Value::Object(src)) = (obj.as_object_mut(), extra) {
        dst.extend(src);
        let children: Vec<serde_json::Value> = ast
            .children(idx)
            .map(|c| mini_tree_json(ast, c))
            .collect();
        if !children.is_empty() {
            dst.insert("children".to_string(), serde_json::Value::Array(children));
        }
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_preserve_insertion_order() {
        let mut ast = Ast::new();
        let a = ast.int(1);
        let b = ast.int(2);
        let c = ast.int(3);
        let arr = ast.array(&[a, b, c]);
        assert_eq!(ast.children(arr).collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(ast.child_count(arr), 3);
        assert_eq!(ast.nth_child(arr, 1), Some(b));
        assert_eq!(ast.nth_child(arr, 3), None);
    }

    #[test]
    fn closure_splits_params_and_body() {
        let mut ast = Ast::new();
        let body = ast.ident("x");
        let f = ast.closure(&["x", "y"], body);
        let (params, b) = ast.params_and_body(f);
        assert_eq!(params.len(), 2);
        assert_eq!(b, Some(body));
    }

    #[test]
    fn call_wraps_arguments() {
        let mut ast = Ast::new();
        let x = ast.num(440.0);
        let call = ast.call("sin", &[x]);
        let arg = ast.nth_child(call, 0).unwrap();
        assert!(matches!(ast[arg].kind, NodeKind::Argument { name: None }));
        assert_eq!(ast.unwrap_argument(arg), x);
        assert_eq!(ast.literal_number(arg), Some(440.0));
    }

    #[test]
    fn program_sets_root() {
        let mut ast = Ast::new();
        let one = ast.int(1);
        let p = ast.program(&[one]);
        assert_eq!(ast.root, Some(p));
    }

    #[test]
    fn mini_tree_json_has_type_and_children() {
        let mut ast = Ast::new();
        let (lit, diags) = ast.mini_literal(PatternType::Pat, "bd sd", 0, None);
        assert!(diags.is_empty());
        let root = ast.nth_child(lit, 0).unwrap();
        let v = mini_tree_json(&ast, root);
        assert_eq!(v["type"], "MiniPattern");
        assert_eq!(v["children"].as_array().map(Vec::len), Some(2));
        assert_eq!(v["children"][0]["sampleName"], "bd");
    }
}
