// inline.rs — Function inlining
//
// User functions and closures have no runtime representation: every call
// site expands the body in place with the arguments' buffers bound to the
// parameters. The same expansion serves direct calls and the higher-order
// array builtins (`map`, `fold`, `zipWith`).
//
// Preconditions: the callee's `FunctionRef` came from the symbol table or
//   from `resolve_function_arg`.
// Postconditions: the body is visited inside its own scope and memo overlay;
//   scope depth, memo depth and `param_literals` are restored on return.
// Failure modes: missing required arguments (E105), functions without a
//   body (E131), unary application of a parameterless function (E132).
// Side effects: emits the body's instructions; memoizes the call node.

use std::collections::HashMap;

use tracing::trace;

use crate::ast::{NodeIndex, NodeKind, Span};
use crate::codegen::CodegenCtx;
use crate::diag::codes;
use crate::id::{fnv1a, BufferIndex};
use crate::symbols::{FunctionRef, Symbol, SymbolKind};

impl CodegenCtx<'_> {
    /// Expand `func` at the call node `call`.
    pub(crate) fn inline_call(&mut self, call: NodeIndex, func: &FunctionRef) -> BufferIndex {
        let ast = self.ast;
        let span = ast[call].span;

        // Positional arguments fill parameters in order; named ones by name.
        let mut slots: Vec<Option<NodeIndex>> = vec![None; func.params.len()];
        let mut next_positional = 0;
        for arg in ast.children(call) {
            let (name, value) = match &ast[arg].kind {
                NodeKind::Argument { name } => (name.as_deref(), ast.unwrap_argument(arg)),
                _ => (None, arg),
            };
            let index = match name {
                Some(name) => func.params.iter().position(|p| p.name == name),
                None => {
                    while next_positional < slots.len() && slots[next_positional].is_some() {
                        next_positional += 1;
                    }
                    Some(next_positional)
                }
            };
            match index {
                Some(i) if i < slots.len() => slots[i] = Some(value),
                Some(_) => {}
                None => self.error(
                    codes::E105,
                    ast[value].span,
                    format!(
                        "'{}' has no parameter named '{}'",
                        func.display_name(),
                        name.unwrap_or_default()
                    ),
                ),
            }
        }

        // Arguments are generated in the caller's context, so literal
        // forwarding still sees the caller's literals here.
        let mut literals = HashMap::new();
        let mut bindings = Vec::with_capacity(func.params.len());
        for (param, slot) in func.params.iter().zip(&slots) {
            match (slot, param.default) {
                (Some(arg), _) => {
                    if let Some(lit) = self.literal_of(*arg) {
                        literals.insert(fnv1a(&param.name), lit);
                    }
                    bindings.push(self.visit(*arg));
                }
                (None, Some(default)) => bindings.push(self.push_const(default as f32, span)),
                (None, None) => {
                    self.error(
                        codes::E105,
                        span,
                        format!(
                            "'{}' is missing required argument '{}'",
                            func.display_name(),
                            param.name
                        ),
                    );
                    return BufferIndex::UNUSED;
                }
            }
        }

        trace!(
            function = func.display_name(),
            args = bindings.len(),
            literals = literals.len(),
            "inline call"
        );
        let saved = std::mem::replace(&mut self.param_literals, literals);
        let result = self.expand_body(func, &bindings, span);
        self.param_literals = saved;

        if let (_, Some(body)) = ast.params_and_body(func.node) {
            if let Some(elements) = self.multi_buffers.get(&body).cloned() {
                self.multi_buffers.insert(call, elements);
            }
        }
        self.memoize(call, result)
    }

    /// Visit the body of `func` with `bindings[i]` bound to parameter `i`.
    pub(crate) fn expand_body(
        &mut self,
        func: &FunctionRef,
        bindings: &[BufferIndex],
        span: Span,
    ) -> BufferIndex {
        let (_, body) = self.ast.params_and_body(func.node);
        let Some(body) = body else {
            self.error(
                codes::E131,
                span,
                format!("function '{}' has no body", func.display_name()),
            );
            return BufferIndex::UNUSED;
        };

        self.symbols.push_scope();
        for capture in &func.captures {
            self.symbols.define_variable(&capture.name, capture.buffer);
        }
        for (param, &buffer) in func.params.iter().zip(bindings) {
            self.symbols
                .bind(Symbol::new(&param.name, SymbolKind::Parameter(buffer)));
        }
        self.memo.push_overlay();
        let result = self.visit(body);
        self.memo.pop_overlay();
        self.symbols.pop_scope();
        result
    }

    /// Apply `func` to already-generated argument buffers (higher-order
    /// builtins). Literal forwarding does not cross this boundary.
    pub(crate) fn apply_function(
        &mut self,
        func: &FunctionRef,
        args: &[BufferIndex],
        span: Span,
    ) -> BufferIndex {
        if func.params.len() < args.len() {
            let (code, what) = if args.len() >= 2 {
                (codes::E140, "a binary function needs at least two parameters")
            } else {
                (codes::E132, "function passed here needs at least one parameter")
            };
            self.error(code, span, format!("'{}': {what}", func.display_name()));
            return BufferIndex::UNUSED;
        }
        let saved = std::mem::take(&mut self.param_literals);
        let result = self.expand_body(func, args, span);
        self.param_literals = saved;
        result
    }

    /// A function passed as an argument: a closure literal or a name bound
    /// to a function.
    pub(crate) fn resolve_function_arg(&self, node: NodeIndex) -> Option<FunctionRef> {
        let ast = self.ast;
        let node = ast.unwrap_argument(node);
        match &ast[node].kind {
            NodeKind::Closure => Some(FunctionRef::from_node(ast, node)),
            NodeKind::Identifier(name) => match self.symbols.lookup(name).map(|s| &s.kind) {
                Some(SymbolKind::FunctionValue(f) | SymbolKind::UserFunction(f)) => Some(f.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Scalar literal `node` stands for: itself, or the literal forwarded to
    /// the parameter it names.
    pub(crate) fn literal_of(&self, node: NodeIndex) -> Option<NodeIndex> {
        let ast = self.ast;
        let node = ast.unwrap_argument(node);
        match &ast[node].kind {
            kind if kind.is_scalar_literal() => Some(node),
            NodeKind::Identifier(name) => self.param_literals.get(&fnv1a(name)).copied(),
            _ => None,
        }
    }
}
