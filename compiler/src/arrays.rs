// arrays.rs — Array literals, indexing and higher-order array builtins
//
// Arrays exist only at compile time: an array value is a multi-buffer, the
// list of element buffers recorded against the node that produced it.
// Every operation here rearranges or maps those lists; only `sum`, `range`
// and the applied functions emit instructions.
//
// Preconditions: called from `CodegenCtx::visit` / `visit_call`.
// Postconditions: results with more than one element are registered as
//   multi-buffers; one element collapses to a scalar; an empty result is a
//   `PUSH_CONST 0`.
// Failure modes: arity and literal-argument errors (E133..E162).
// Side effects: emits instructions through the shared context.

use crate::ast::{NodeIndex, NodeKind};
use crate::bytecode::{Instruction, Opcode};
use crate::codegen::CodegenCtx;
use crate::diag::{codes, DiagCode};
use crate::id::BufferIndex;
use crate::symbols::SymbolKind;

impl CodegenCtx<'_> {
    /// Register `buffers` as the value of `node` and return its scalar face.
    fn finish_array(&mut self, node: NodeIndex, buffers: Vec<BufferIndex>) -> BufferIndex {
        match buffers.len() {
            0 => {
                let span = self.ast[node].span;
                self.push_const(0.0, span)
            }
            1 => buffers[0],
            _ => {
                let first = buffers[0];
                self.register_multi_buffer(node, buffers);
                first
            }
        }
    }

    /// Unwrapped arguments, or `None` after reporting `code` when the count
    /// is not exactly `arity`.
    fn exact_args(
        &mut self,
        call: NodeIndex,
        arity: usize,
        code: DiagCode,
        usage: &str,
    ) -> Option<Vec<NodeIndex>> {
        let args = self.call_args(call);
        if args.len() == arity {
            return Some(args);
        }
        let span = self.ast[call].span;
        self.error(
            code,
            span,
            format!("expected {arity} argument(s): {usage}, found {}", args.len()),
        );
        None
    }

    /// Integer value of a number literal argument.
    fn literal_count(&mut self, node: NodeIndex, code: DiagCode, what: &str) -> Option<i64> {
        let ast = self.ast;
        match ast[node].kind {
            NodeKind::NumberLit { value, .. } => Some(value as i64),
            _ => {
                self.error(code, ast[node].span, format!("{what} must be a number literal"));
                None
            }
        }
    }

    // ── Literals and indexing ───────────────────────────────────────────────

    pub(crate) fn visit_array_literal(&mut self, node: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let mut buffers = Vec::with_capacity(ast.child_count(node));
        for elem in ast.children(node) {
            buffers.extend(self.visit_elements(elem));
        }
        self.finish_array(node, buffers)
    }

    pub(crate) fn visit_index(&mut self, node: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        let (Some(array), Some(index)) = (ast.nth_child(node, 0), ast.nth_child(node, 1)) else {
            self.error(codes::E161, span, "index expression needs an array and an index");
            return BufferIndex::UNUSED;
        };
        let Some(i) = self.literal_of(index).and_then(|lit| ast.literal_number(lit)) else {
            self.error(
                codes::E161,
                ast[index].span,
                "array index must be a number literal",
            );
            return BufferIndex::UNUSED;
        };
        let elements = self.visit_elements(array);
        if i < 0.0 || i.fract() != 0.0 || i as usize >= elements.len() {
            self.error(
                codes::E160,
                ast[index].span,
                format!(
                    "index {i} is out of range for an array of {} element(s)",
                    elements.len()
                ),
            );
            return BufferIndex::UNUSED;
        }
        elements[i as usize]
    }

    pub(crate) fn visit_len(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 1, codes::E162, "len(array)") else {
            return BufferIndex::UNUSED;
        };
        let ast = self.ast;
        let arg = args[0];
        let static_count = match &ast[arg].kind {
            NodeKind::ArrayLit => Some(ast.child_count(arg)),
            NodeKind::Identifier(name) => match self.symbols.lookup(name).map(|s| &s.kind) {
                Some(SymbolKind::Array(info)) => Some(info.element_count),
                _ => None,
            },
            _ => None,
        };
        let count = match static_count {
            Some(n) => n,
            None => self.visit_elements(arg).len(),
        };
        self.push_const(count as f32, ast[call].span)
    }

    // ── Higher-order functions ──────────────────────────────────────────────

    pub(crate) fn visit_map(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E133, "map(array, fn)") else {
            return BufferIndex::UNUSED;
        };
        let span = self.ast[call].span;
        let Some(func) = self.resolve_function_arg(args[1]) else {
            self.error(codes::E130, span, "map() second argument must be a function");
            return BufferIndex::UNUSED;
        };
        let elements = self.visit_elements(args[0]);
        let n = self.next_count("map");
        self.path.push(format!("map#{n}"));
        let mut results = Vec::with_capacity(elements.len());
        for (i, &elem) in elements.iter().enumerate() {
            self.path.push(format!("elem{i}"));
            results.push(self.apply_function(&func, &[elem], span));
            self.path.pop();
        }
        self.path.pop();
        self.finish_array(call, results)
    }

    pub(crate) fn visit_sum(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 1, codes::E134, "sum(array)") else {
            return BufferIndex::UNUSED;
        };
        let span = self.ast[call].span;
        let elements = self.visit_elements(args[0]);
        let Some((&first, rest)) = elements.split_first() else {
            return self.push_const(0.0, span);
        };
        let mut acc = first;
        for &elem in rest {
            let Some(out) = self.alloc(span) else {
                return BufferIndex::UNUSED;
            };
            self.emit(Instruction::make_binary(Opcode::Add, out, acc, elem, 0));
            acc = out;
        }
        acc
    }

    pub(crate) fn visit_fold(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 3, codes::E142, "fold(array, fn, init)") else {
            return BufferIndex::UNUSED;
        };
        let span = self.ast[call].span;
        let Some(func) = self.resolve_function_arg(args[1]) else {
            self.error(
                codes::E143,
                span,
                "fold() second argument must be a binary function",
            );
            return BufferIndex::UNUSED;
        };
        let elements = self.visit_elements(args[0]);
        let init = self.visit(args[2]);
        if elements.is_empty() {
            return init;
        }
        let n = self.next_count("fold");
        self.path.push(format!("fold#{n}"));
        let mut acc = init;
        for (i, &elem) in elements.iter().enumerate() {
            self.path.push(format!("step{i}"));
            acc = self.apply_function(&func, &[acc, elem], span);
            self.path.pop();
        }
        self.path.pop();
        acc
    }

    pub(crate) fn visit_zip_with(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 3, codes::E144, "zipWith(a, b, fn)") else {
            return BufferIndex::UNUSED;
        };
        let span = self.ast[call].span;
        let Some(func) = self.resolve_function_arg(args[2]) else {
            self.error(
                codes::E145,
                span,
                "zipWith() third argument must be a binary function",
            );
            return BufferIndex::UNUSED;
        };
        let a = self.visit_elements(args[0]);
        let b = self.visit_elements(args[1]);
        let len = a.len().min(b.len());
        if len == 0 {
            return self.push_const(0.0, span);
        }
        let n = self.next_count("zipWith");
        self.path.push(format!("zipWith#{n}"));
        let mut results = Vec::with_capacity(len);
        for (i, (&x, &y)) in a.iter().zip(&b).enumerate() {
            self.path.push(format!("elem{i}"));
            results.push(self.apply_function(&func, &[x, y], span));
            self.path.pop();
        }
        self.path.pop();
        self.finish_array(call, results)
    }

    pub(crate) fn visit_zip(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E146, "zip(a, b)") else {
            return BufferIndex::UNUSED;
        };
        let a = self.visit_elements(args[0]);
        let b = self.visit_elements(args[1]);
        let interleaved: Vec<BufferIndex> = a.iter().zip(&b).flat_map(|(&x, &y)| [x, y]).collect();
        self.finish_array(call, interleaved)
    }

    // ── Slicing and construction ────────────────────────────────────────────

    pub(crate) fn visit_take(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E147, "take(n, array)") else {
            return BufferIndex::UNUSED;
        };
        let Some(count) = self.literal_count(args[0], codes::E148, "take() count") else {
            return BufferIndex::UNUSED;
        };
        let mut elements = self.visit_elements(args[1]);
        elements.truncate(count.max(0) as usize);
        self.finish_array(call, elements)
    }

    pub(crate) fn visit_drop(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E149, "drop(n, array)") else {
            return BufferIndex::UNUSED;
        };
        let Some(count) = self.literal_count(args[0], codes::E150, "drop() count") else {
            return BufferIndex::UNUSED;
        };
        let elements = self.visit_elements(args[1]);
        let skip = (count.max(0) as usize).min(elements.len());
        self.finish_array(call, elements[skip..].to_vec())
    }

    pub(crate) fn visit_reverse(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 1, codes::E151, "reverse(array)") else {
            return BufferIndex::UNUSED;
        };
        let mut elements = self.visit_elements(args[0]);
        elements.reverse();
        self.finish_array(call, elements)
    }

    pub(crate) fn visit_range(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E152, "range(start, end)") else {
            return BufferIndex::UNUSED;
        };
        let ast = self.ast;
        let span = ast[call].span;
        let bounds = match (&ast[args[0]].kind, &ast[args[1]].kind) {
            (NodeKind::NumberLit { value: s, .. }, NodeKind::NumberLit { value: e, .. }) => {
                Some((*s as i64, *e as i64))
            }
            _ => None,
        };
        let Some((start, end)) = bounds else {
            self.error(codes::E153, span, "range() arguments must be number literals");
            return BufferIndex::UNUSED;
        };
        let values: Vec<i64> = if start <= end {
            (start..end).collect()
        } else {
            (end + 1..=start).rev().collect()
        };
        let mut buffers = Vec::with_capacity(values.len());
        for v in values {
            let Some(out) = self.alloc(span) else {
                return BufferIndex::UNUSED;
            };
            self.emit(Instruction::push_const(out, v as f32));
            buffers.push(out);
        }
        self.finish_array(call, buffers)
    }

    pub(crate) fn visit_repeat(&mut self, call: NodeIndex) -> BufferIndex {
        let Some(args) = self.exact_args(call, 2, codes::E154, "repeat(value, n)") else {
            return BufferIndex::UNUSED;
        };
        let Some(count) = self.literal_count(args[1], codes::E155, "repeat() count") else {
            return BufferIndex::UNUSED;
        };
        let value = self.visit(args[0]);
        self.finish_array(call, vec![value; count.max(0) as usize])
    }
}
