// codegen.rs — Bytecode generation for pulse programs
//
// Walks the arena tree once and emits flat VM instructions into a shared
// list. Every node's result lives in a buffer; results are memoized per node
// so shared subtrees are emitted once. User functions are inlined at call
// sites (inline.rs), arrays fan out into multi-buffers (arrays.rs), match
// expressions fold or lower to SELECT chains (matching.rs), UI parameters
// become ENV_GET reads (params.rs) and mini-notation literals compile into
// sequence programs (patterns.rs).
//
// Preconditions: `symbols` was populated by `resolve::collect_definitions`
//   and sits at the global scope.
// Postconditions: returns `CodeGenResult`; `success` is false iff any
//   error-level diagnostic was produced.
// Failure modes: errors are reported as diagnostics and the failing node
//   yields `BufferIndex::UNUSED`; the walk always runs to completion.
// Side effects: rebinds variable symbols in `symbols` to their buffers.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, trace};

use crate::ast::{Ast, BinOp, NodeIndex, NodeKind, Span};
use crate::bytecode::{Instruction, Opcode};
use crate::diag::{codes, has_errors, DiagCode, Diagnostic};
use crate::id::{BufferAllocator, BufferIndex, StatePath, MAX_BUFFERS};
use crate::registry::Registry;
use crate::samples::SampleRegistry;
use crate::sequence::{SampleMapping, Sequence};
use crate::symbols::{FunctionRef, Symbol, SymbolKind, SymbolTable};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Upgrade oscillators with audio-rate frequency inputs to their
    /// oversampled variants.
    pub fm_detection: bool,
    /// Buffer pool capacity.
    pub max_buffers: u16,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            fm_detection: true,
            max_buffers: MAX_BUFFERS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Continuous,
    Button,
    Toggle,
    Select,
}

/// A UI control declared by `param`, `button`, `toggle` or `dropdown`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDecl {
    pub name: String,
    pub name_hash: u32,
    pub kind: ParamKind,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub options: Vec<String>,
    pub source_offset: u32,
    pub source_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternLocation {
    pub offset: u32,
    pub length: u32,
}

/// Initial state a host loads into the VM before running the program.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateInitData {
    /// Eagerly evaluated step sequencer.
    SeqStep {
        state_id: u32,
        cycle_length: f32,
        times: Vec<f32>,
        values: Vec<f32>,
        velocities: Vec<f32>,
    },
    /// Lazily queried sequence program.
    SequenceProgram {
        state_id: u32,
        cycle_length: f32,
        sequences: Vec<Sequence>,
        total_events: u32,
        is_sample_pattern: bool,
        location: PatternLocation,
        sample_mappings: Vec<SampleMapping>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ast_json: Option<serde_json::Value>,
    },
}

impl StateInitData {
    pub fn state_id(&self) -> u32 {
        match self {
            StateInitData::SeqStep { state_id, .. }
            | StateInitData::SequenceProgram { state_id, .. } => *state_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeGenResult {
    pub instructions: Vec<Instruction>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
    pub state_inits: Vec<StateInitData>,
    /// Sorted, deduplicated.
    pub required_samples: Vec<String>,
    pub param_decls: Vec<ParamDecl>,
    pub success: bool,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Generate bytecode for `ast` with default options.
pub fn generate(
    ast: &Ast,
    symbols: &mut SymbolTable,
    samples: Option<&SampleRegistry>,
) -> CodeGenResult {
    CodeGenerator::new().generate(ast, symbols, samples)
}

/// Reusable generator. Every `generate` call starts from fresh session state.
#[derive(Debug, Clone, Default)]
pub struct CodeGenerator {
    options: CodegenOptions,
    builtins: Registry,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CodegenOptions) -> Self {
        CodeGenerator {
            options,
            builtins: Registry::new(),
        }
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    pub fn generate(
        &self,
        ast: &Ast,
        symbols: &mut SymbolTable,
        samples: Option<&SampleRegistry>,
    ) -> CodeGenResult {
        let mut ctx = CodegenCtx::new(ast, symbols, samples, &self.builtins, &self.options);
        match ast.root {
            Some(root) if !ast.is_empty() => {
                debug!(nodes = ast.len(), "generate start");
                ctx.visit(root);
            }
            _ => ctx.error(
                codes::E100,
                crate::ast::no_span(),
                "nothing to compile: the program is empty",
            ),
        }
        ctx.build_result()
    }
}

// ── Internal context ────────────────────────────────────────────────────────

/// Node → buffer memo table with one overlay per inlined body.
///
/// Lookups only see the top layer. Popping an overlay merges its entries into
/// the layer below, keeping entries that layer already has.
#[derive(Debug, Default)]
pub(crate) struct MemoCache {
    layers: Vec<HashMap<NodeIndex, BufferIndex>>,
}

impl MemoCache {
    fn new() -> Self {
        MemoCache {
            layers: vec![HashMap::new()],
        }
    }

    pub(crate) fn get(&self, node: NodeIndex) -> Option<BufferIndex> {
        self.layers.last().and_then(|l| l.get(&node).copied())
    }

    pub(crate) fn insert(&mut self, node: NodeIndex, buffer: BufferIndex) {
        if let Some(top) = self.layers.last_mut() {
            top.insert(node, buffer);
        }
    }

    pub(crate) fn push_overlay(&mut self) {
        self.layers.push(HashMap::new());
    }

    pub(crate) fn pop_overlay(&mut self) {
        if self.layers.len() < 2 {
            return;
        }
        if let Some(popped) = self.layers.pop() {
            if let Some(parent) = self.layers.last_mut() {
                for (node, buffer) in popped {
                    parent.entry(node).or_insert(buffer);
                }
            }
        }
    }
}

pub(crate) struct CodegenCtx<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) symbols: &'a mut SymbolTable,
    pub(crate) samples: Option<&'a SampleRegistry>,
    pub(crate) builtins: &'a Registry,
    pub(crate) options: &'a CodegenOptions,
    pub(crate) buffers: BufferAllocator,
    pub(crate) instructions: Vec<Instruction>,
    /// Index of the latest instruction writing each buffer.
    producers: HashMap<BufferIndex, usize>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) state_inits: Vec<StateInitData>,
    pub(crate) param_decls: Vec<ParamDecl>,
    pub(crate) path: StatePath,
    /// Per-name call counters for state path segments (`lp#0`, `pat#2`, ...).
    pub(crate) call_counters: HashMap<String, u32>,
    pub(crate) required_samples: BTreeSet<String>,
    pub(crate) memo: MemoCache,
    pub(crate) multi_buffers: HashMap<NodeIndex, Vec<BufferIndex>>,
    /// Literal arguments of the function being inlined, by parameter name hash.
    pub(crate) param_literals: HashMap<u32, NodeIndex>,
}

impl<'a> CodegenCtx<'a> {
    fn new(
        ast: &'a Ast,
        symbols: &'a mut SymbolTable,
        samples: Option<&'a SampleRegistry>,
        builtins: &'a Registry,
        options: &'a CodegenOptions,
    ) -> Self {
        CodegenCtx {
            ast,
            symbols,
            samples,
            builtins,
            options,
            buffers: BufferAllocator::with_capacity(options.max_buffers),
            instructions: Vec::new(),
            producers: HashMap::new(),
            diagnostics: Vec::new(),
            state_inits: Vec::new(),
            param_decls: Vec::new(),
            path: StatePath::new(),
            call_counters: HashMap::new(),
            required_samples: BTreeSet::new(),
            memo: MemoCache::new(),
            multi_buffers: HashMap::new(),
            param_literals: HashMap::new(),
        }
    }

    fn build_result(self) -> CodeGenResult {
        let success = !has_errors(&self.diagnostics);
        debug!(
            instructions = self.instructions.len(),
            buffers = self.buffers.count(),
            state_inits = self.state_inits.len(),
            success,
            "generate finish"
        );
        CodeGenResult {
            instructions: self.instructions,
            diagnostics: self.diagnostics,
            state_inits: self.state_inits,
            required_samples: self.required_samples.into_iter().collect(),
            param_decls: self.param_decls,
            success,
        }
    }

    // ── Emission helpers ────────────────────────────────────────────────────

    /// Next free buffer, or `None` after reporting exhaustion.
    pub(crate) fn alloc(&mut self, span: Span) -> Option<BufferIndex> {
        let buffer = self.buffers.allocate();
        if buffer.is_none() {
            self.error(
                codes::E101,
                span,
                format!(
                    "buffer pool exhausted (at most {} buffers)",
                    self.options.max_buffers
                ),
            );
        }
        buffer
    }

    pub(crate) fn emit(&mut self, inst: Instruction) {
        if !inst.out().is_unused() {
            self.producers.insert(inst.out(), self.instructions.len());
        }
        self.instructions.push(inst);
    }

    pub(crate) fn push_const(&mut self, value: f32, span: Span) -> BufferIndex {
        match self.alloc(span) {
            Some(out) => {
                self.emit(Instruction::push_const(out, value));
                out
            }
            None => BufferIndex::UNUSED,
        }
    }

    pub(crate) fn error(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    pub(crate) fn warn(&mut self, code: DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::warning(code, span, message));
    }

    /// Post-increment the counter for `name`.
    pub(crate) fn next_count(&mut self, name: &str) -> u32 {
        let counter = self.call_counters.entry(name.to_string()).or_insert(0);
        let n = *counter;
        *counter += 1;
        n
    }

    pub(crate) fn memoize(&mut self, node: NodeIndex, buffer: BufferIndex) -> BufferIndex {
        self.memo.insert(node, buffer);
        buffer
    }

    // ── Multi-buffers ───────────────────────────────────────────────────────

    /// Record `buffers` as the value of `node`. One element collapses to a
    /// scalar and registers nothing.
    pub(crate) fn register_multi_buffer(&mut self, node: NodeIndex, buffers: Vec<BufferIndex>) {
        if buffers.len() > 1 {
            self.multi_buffers.insert(node, buffers);
        }
    }

    pub(crate) fn is_multi_buffer(&self, node: NodeIndex) -> bool {
        self.multi_buffers.contains_key(&node)
    }

    /// Element buffers of an already-visited node.
    pub(crate) fn buffers_of(&self, node: NodeIndex, scalar: BufferIndex) -> Vec<BufferIndex> {
        match self.multi_buffers.get(&node) {
            Some(bufs) => bufs.clone(),
            None if scalar.is_unused() => Vec::new(),
            None => vec![scalar],
        }
    }

    /// Visit `node` and return its element buffers.
    pub(crate) fn visit_elements(&mut self, node: NodeIndex) -> Vec<BufferIndex> {
        let buffer = self.visit(node);
        self.buffers_of(node, buffer)
    }

    /// Call arguments with their `Argument` wrappers removed.
    pub(crate) fn call_args(&self, call: NodeIndex) -> Vec<NodeIndex> {
        self.ast
            .children(call)
            .map(|a| self.ast.unwrap_argument(a))
            .collect()
    }

    /// Arguments as `(name, value)` pairs; positional arguments have no name.
    fn named_call_args(&self, call: NodeIndex) -> Vec<(Option<&'a str>, NodeIndex)> {
        let ast = self.ast;
        ast.children(call)
            .map(|a| match &ast[a].kind {
                NodeKind::Argument { name } => (name.as_deref(), ast.unwrap_argument(a)),
                _ => (None, a),
            })
            .collect()
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    pub(crate) fn visit(&mut self, node: NodeIndex) -> BufferIndex {
        if let Some(buffer) = self.memo.get(node) {
            return buffer;
        }
        let ast = self.ast;
        let n = &ast[node];
        let result = match &n.kind {
            NodeKind::Program | NodeKind::Block => {
                let mut last = BufferIndex::UNUSED;
                for child in ast.children(node) {
                    last = self.visit(child);
                }
                last
            }
            NodeKind::NumberLit { value, .. } => self.push_const(*value as f32, n.span),
            NodeKind::BoolLit(b) => self.push_const(if *b { 1.0 } else { 0.0 }, n.span),
            NodeKind::StringLit(_) | NodeKind::FunctionDef { .. } => BufferIndex::UNUSED,
            NodeKind::PitchLit { midi } => self.emit_note(*midi, n.span),
            NodeKind::ChordLit {
                root_midi,
                intervals,
            } => self.visit_chord_literal(node, *root_midi, intervals),
            NodeKind::Identifier(name) => return self.visit_identifier(node, name),
            NodeKind::Assignment { name } => self.visit_assignment(node, name),
            NodeKind::Call { name } => return self.visit_call(node, name),
            NodeKind::BinaryOp(op) => self.visit_binary(node, *op),
            NodeKind::Closure => self.visit_closure_value(node),
            NodeKind::ArrayLit => self.visit_array_literal(node),
            NodeKind::Index => self.visit_index(node),
            NodeKind::MatchExpr { has_scrutinee } => self.visit_match(node, *has_scrutinee),
            NodeKind::MiniLiteral(pattern_type) => self.visit_mini_literal(node, *pattern_type),
            NodeKind::Argument { .. } => match n.first_child {
                Some(child) => self.visit(child),
                None => BufferIndex::UNUSED,
            },
            NodeKind::Hole => {
                self.error(
                    codes::E110,
                    n.span,
                    "'%' hole used outside a pipe expression",
                );
                BufferIndex::UNUSED
            }
            NodeKind::Pipe => {
                self.error(
                    codes::E111,
                    n.span,
                    "pipe expression reached code generation without being rewritten",
                );
                BufferIndex::UNUSED
            }
            other => {
                self.error(
                    codes::E199,
                    n.span,
                    format!("cannot generate code for {} node", other.name()),
                );
                BufferIndex::UNUSED
            }
        };
        self.memoize(node, result)
    }

    // ── Literals ────────────────────────────────────────────────────────────

    /// `PUSH_CONST midi` then `MTOF`.
    fn emit_note(&mut self, midi: u8, span: Span) -> BufferIndex {
        let note = self.push_const(f32::from(midi), span);
        let Some(out) = self.alloc(span) else {
            return BufferIndex::UNUSED;
        };
        self.emit(Instruction::make_unary(Opcode::Mtof, out, note, 0));
        out
    }

    fn visit_chord_literal(&mut self, node: NodeIndex, root: u8, intervals: &[i8]) -> BufferIndex {
        let span = self.ast[node].span;
        let notes: Vec<u8> = if intervals.is_empty() {
            vec![root]
        } else {
            intervals
                .iter()
                .map(|&i| (i16::from(root) + i16::from(i)).clamp(0, 127) as u8)
                .collect()
        };
        let buffers: Vec<BufferIndex> = notes.iter().map(|&m| self.emit_note(m, span)).collect();
        let first = buffers.first().copied().unwrap_or(BufferIndex::UNUSED);
        self.register_multi_buffer(node, buffers);
        first
    }

    // ── Identifiers and assignment ──────────────────────────────────────────

    fn visit_identifier(&mut self, node: NodeIndex, name: &str) -> BufferIndex {
        let span = self.ast[node].span;
        let Some(symbol) = self.symbols.lookup(name) else {
            self.error(codes::E102, span, format!("undefined identifier '{name}'"));
            return BufferIndex::UNUSED;
        };
        match symbol.kind.clone() {
            SymbolKind::Variable(b) | SymbolKind::Parameter(b) => b,
            SymbolKind::Pattern(info) => {
                let buffer = self.visit_pattern_reference(node, name, info.node);
                self.memoize(node, buffer)
            }
            SymbolKind::Array(info) => {
                let buffers = if info.buffers.is_empty() {
                    self.visit_elements(info.source)
                } else {
                    info.buffers
                };
                let first = buffers.first().copied().unwrap_or(BufferIndex::UNUSED);
                self.register_multi_buffer(node, buffers);
                first
            }
            kind @ (SymbolKind::Builtin(_)
            | SymbolKind::UserFunction(_)
            | SymbolKind::FunctionValue(_)) => {
                self.error(
                    codes::E103,
                    span,
                    format!("{} '{name}' cannot be used as a value", kind.describe()),
                );
                BufferIndex::UNUSED
            }
        }
    }

    fn visit_assignment(&mut self, node: NodeIndex, name: &str) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        let Some(value) = ast[node].first_child else {
            self.error(codes::E104, span, format!("assignment to '{name}' has no value"));
            return BufferIndex::UNUSED;
        };

        // A closure bound to a name is a function value: nothing is emitted
        // here, only the buffers it can see are snapshotted.
        let is_function_value = matches!(
            self.symbols.lookup(name).map(|s| &s.kind),
            Some(SymbolKind::FunctionValue(_))
        );
        if matches!(ast[value].kind, NodeKind::Closure) && is_function_value {
            let mut func = FunctionRef::from_node(ast, value);
            func.captures = self
                .symbols
                .visible_buffers()
                .into_iter()
                .filter(|c| !c.buffer.is_unused())
                .collect();
            trace!(name, captures = func.captures.len(), "bind function value");
            self.symbols
                .bind(Symbol::new(name, SymbolKind::FunctionValue(func)));
            return BufferIndex::UNUSED;
        }

        self.path.push(name);
        let buffer = self.visit(value);
        self.path.pop();

        let existing = self.symbols.lookup(name).map(|s| s.kind.clone());
        match existing {
            Some(SymbolKind::Variable(_) | SymbolKind::Parameter(_)) => {
                if self.symbols.depth() > 0 && !self.symbols.is_defined_in_current_scope(name) {
                    self.symbols.define_variable(name, buffer);
                } else {
                    self.symbols.rebind_buffer(name, buffer);
                }
            }
            Some(SymbolKind::Array(_)) => {
                let buffers = self.buffers_of(value, buffer);
                self.symbols.set_array_buffers(name, buffers);
            }
            Some(_) => {}
            None => {
                self.symbols.define_variable(name, buffer);
            }
        }
        buffer
    }

    // ── Calls ───────────────────────────────────────────────────────────────

    fn visit_call(&mut self, node: NodeIndex, name: &str) -> BufferIndex {
        let callee = self.symbols.lookup(name).map(|s| s.kind.clone());
        let result = match callee {
            Some(SymbolKind::UserFunction(func) | SymbolKind::FunctionValue(func)) => {
                return self.inline_call(node, &func);
            }
            _ => match name {
                "len" => self.visit_len(node),
                "chord" => self.visit_chord_call(node),
                "map" => self.visit_map(node),
                "sum" => self.visit_sum(node),
                "fold" => self.visit_fold(node),
                "zipWith" => self.visit_zip_with(node),
                "zip" => self.visit_zip(node),
                "take" => self.visit_take(node),
                "drop" => self.visit_drop(node),
                "reverse" => self.visit_reverse(node),
                "range" => self.visit_range(node),
                "repeat" => self.visit_repeat(node),
                "param" => self.visit_param(node),
                "button" => self.visit_button(node),
                "toggle" => self.visit_toggle(node),
                "dropdown" => self.visit_dropdown(node),
                _ => self.visit_builtin_call(node, name),
            },
        };
        self.memoize(node, result)
    }

    fn visit_builtin_call(&mut self, node: NodeIndex, name: &str) -> BufferIndex {
        let span = self.ast[node].span;
        let builtins = self.builtins;
        let canonical = builtins.canonical_name(name);
        let Some(info) = builtins.lookup(canonical) else {
            self.error(codes::E107, span, format!("unknown function '{name}'"));
            return BufferIndex::UNUSED;
        };

        let args = self.named_call_args(node);
        // `out` names two channels but requires one.
        let arity = info.total_params().max(info.param_names.len());
        let mut slots: Vec<Option<NodeIndex>> = vec![None; arity.max(args.len())];
        let mut next_positional = 0;
        for &(arg_name, value) in &args {
            let index = match arg_name {
                Some(param) => match info.find_param(param) {
                    Some(i) => i,
                    None => {
                        self.error(
                            codes::E105,
                            self.ast[value].span,
                            format!("'{}' has no parameter named '{param}'", info.name),
                        );
                        continue;
                    }
                },
                None => {
                    while next_positional < slots.len() && slots[next_positional].is_some() {
                        next_positional += 1;
                    }
                    next_positional
                }
            };
            if index < slots.len() {
                slots[index] = Some(value);
            }
        }

        // `adsr` also reads sustain as a fourth input and packs a literal
        // release into `rate`.
        let is_adsr = info.opcode == Opcode::EnvAdsr;
        let input_count = if is_adsr && slots.get(arity).is_some_and(Option::is_some) {
            arity + 1
        } else {
            arity
        };
        let accepted = if is_adsr { (arity + 2).min(slots.len()) } else { arity };
        for &extra in slots[accepted..].iter().flatten() {
            let extra_span = self.ast[extra].span;
            self.warn(
                codes::W003,
                extra_span,
                format!("'{}' takes {accepted} arguments; this one is ignored", info.name),
            );
        }

        if info.requires_state {
            let count = self.next_count(info.name);
            self.path.push(format!("{}#{count}", info.name));
        }

        let mut inputs = Vec::with_capacity(input_count);
        let mut missing = false;
        for (i, slot) in slots.iter().take(input_count).enumerate() {
            match (slot, info.default_value(i)) {
                (Some(arg), _) => inputs.push(self.visit(*arg)),
                (None, Some(default)) => inputs.push(self.push_const(default, span)),
                (None, None) if info.opcode == Opcode::Output && i == 1 => {
                    let left = inputs.first().copied().unwrap_or(BufferIndex::UNUSED);
                    inputs.push(left);
                }
                (None, None) => {
                    missing = true;
                    let param = info.param_names.get(i).copied().unwrap_or("?");
                    self.error(
                        codes::E105,
                        span,
                        format!("'{}' is missing required argument '{param}'", info.name),
                    );
                }
            }
        }

        let state_id = if info.requires_state {
            let id = self.path.compute_id();
            self.path.pop();
            id
        } else {
            0
        };
        if missing {
            return BufferIndex::UNUSED;
        }

        let Some(out) = self.alloc(span) else {
            return BufferIndex::UNUSED;
        };

        let mut opcode = info.opcode;
        if self.options.fm_detection {
            if let Some(upgraded) = opcode.oversampled() {
                if inputs.first().is_some_and(|&f| self.is_fm_modulated(f)) {
                    debug!(from = opcode.name(), to = upgraded.name(), "fm upgrade");
                    opcode = upgraded;
                }
            }
        }

        let mut inst = Instruction::new(opcode, out, &inputs, state_id);
        if is_adsr {
            if let Some(release) = slots
                .get(4)
                .copied()
                .flatten()
                .and_then(|r| self.ast.literal_number(r))
            {
                inst = inst.with_rate((release / 0.1).round().clamp(0.0, 255.0) as u8);
            }
        }
        self.emit(inst);
        out
    }

    // ── Operators and closures ──────────────────────────────────────────────

    fn visit_binary(&mut self, node: NodeIndex, op: BinOp) -> BufferIndex {
        let span = self.ast[node].span;
        let (Some(lhs), Some(rhs)) = (self.ast.nth_child(node, 0), self.ast.nth_child(node, 1))
        else {
            self.error(
                codes::E108,
                span,
                format!("'{}' needs two operands", op.function_name()),
            );
            return BufferIndex::UNUSED;
        };
        let a = self.visit(lhs);
        let b = self.visit(rhs);
        let Some(out) = self.alloc(span) else {
            return BufferIndex::UNUSED;
        };
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Pow => Opcode::Pow,
        };
        self.emit(Instruction::make_binary(opcode, out, a, b, 0));
        out
    }

    /// Closure evaluated in place: parameters get fresh buffers.
    fn visit_closure_value(&mut self, node: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        let (params, body) = ast.params_and_body(node);
        let Some(body) = body else {
            self.error(codes::E112, span, "closure has no body");
            return BufferIndex::UNUSED;
        };
        self.symbols.push_scope();
        for p in params {
            if let NodeKind::ClosureParam { name, .. } = &ast[p].kind {
                let buffer = self.alloc(ast[p].span).unwrap_or(BufferIndex::UNUSED);
                self.symbols.define_parameter(name, buffer);
            }
        }
        let result = self.visit(body);
        self.symbols.pop_scope();
        result
    }

    // ── FM detection ────────────────────────────────────────────────────────

    /// True when `buffer` carries an audio-rate signal: its producer is an
    /// oscillator or noise, or arithmetic over such a signal. Each buffer is
    /// inspected at most once, so shared subexpressions stay linear.
    pub(crate) fn is_fm_modulated(&self, buffer: BufferIndex) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![buffer];
        while let Some(buf) = pending.pop() {
            if buf.is_unused() || !seen.insert(buf) {
                continue;
            }
            let Some(producer) = self.producers.get(&buf).map(|&i| self.instructions[i]) else {
                continue;
            };
            if producer.opcode.is_audio_rate_producer() {
                return true;
            }
            if producer.opcode.is_arithmetic() {
                pending.push(producer.input(0));
                pending.push(producer.input(1));
            }
        }
        false
    }
}
