// matching.rs — Match expression lowering
//
// A match whose scrutinee and guards are known at compile time (directly or
// through a literal argument of the function being inlined) keeps only the
// winning arm. Anything else is lowered to a runtime SELECT chain where all
// arm bodies are computed and the conditions pick one.
//
// Preconditions: `param_literals` holds the literals of the enclosing inlined
//   call, if any.
// Postconditions: compile-time matches emit exactly one arm body.
// Failure modes: E120 (scrutinee form without scrutinee), E121 (no arm
//   matches a constant scrutinee), E122 (no arms); W001 for runtime matches
//   without a wildcard arm.
// Side effects: emits instructions through the shared context.

use crate::ast::{NodeIndex, NodeKind};
use crate::bytecode::{Instruction, Opcode};
use crate::codegen::CodegenCtx;
use crate::diag::codes;
use crate::id::BufferIndex;

/// One arm, unpacked from its node.
#[derive(Debug, Clone, Copy)]
struct Arm {
    body: Option<NodeIndex>,
    pattern: Option<NodeIndex>,
    guard: Option<NodeIndex>,
    is_wildcard: bool,
}

impl CodegenCtx<'_> {
    pub(crate) fn visit_match(&mut self, node: NodeIndex, has_scrutinee: bool) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;

        let mut children = ast.children(node).peekable();
        let scrutinee = if has_scrutinee {
            match children.next_if(|&c| !matches!(ast[c].kind, NodeKind::MatchArm { .. })) {
                Some(s) => Some(s),
                None => {
                    self.error(codes::E120, span, "match expression is missing its scrutinee");
                    return BufferIndex::UNUSED;
                }
            }
        } else {
            None
        };
        let arms: Vec<Arm> = children
            .filter_map(|c| match &ast[c].kind {
                NodeKind::MatchArm {
                    pattern,
                    guard,
                    is_wildcard,
                } => Some(Arm {
                    body: ast[c].first_child,
                    pattern: *pattern,
                    guard: *guard,
                    is_wildcard: *is_wildcard,
                }),
                _ => None,
            })
            .collect();

        if self.is_compile_time_match(scrutinee, &arms) {
            self.compile_time_match(node, scrutinee, &arms)
        } else {
            self.runtime_match(node, scrutinee, &arms)
        }
    }

    fn is_compile_time_match(&self, scrutinee: Option<NodeIndex>, arms: &[Arm]) -> bool {
        if let Some(s) = scrutinee {
            if self.literal_of(s).is_none() {
                return false;
            }
        }
        arms.iter()
            .filter_map(|a| a.guard)
            .all(|g| self.literal_guard(g).is_some())
    }

    /// Truth value of a number or bool literal guard.
    fn literal_guard(&self, guard: NodeIndex) -> Option<bool> {
        let lit = self.literal_of(guard)?;
        self.ast.literal_number(lit).map(|v| v != 0.0)
    }

    /// Comparison key of a literal: `s:text`, `n:1.000000` or `b:1`.
    fn literal_key(&self, node: NodeIndex) -> Option<String> {
        match &self.ast[node].kind {
            NodeKind::StringLit(s) => Some(format!("s:{s}")),
            NodeKind::NumberLit { value, .. } => Some(format!("n:{value:.6}")),
            NodeKind::BoolLit(b) => Some(format!("b:{}", u8::from(*b))),
            _ => None,
        }
    }

    fn compile_time_match(
        &mut self,
        node: NodeIndex,
        scrutinee: Option<NodeIndex>,
        arms: &[Arm],
    ) -> BufferIndex {
        let scrutinee_key = scrutinee
            .and_then(|s| self.literal_of(s))
            .and_then(|lit| self.literal_key(lit));

        let mut default = None;
        for arm in arms {
            if arm.is_wildcard {
                default = default.or(arm.body);
                continue;
            }
            let selected = match &scrutinee_key {
                Some(key) => {
                    let pattern_key = arm.pattern.and_then(|p| self.literal_key(p));
                    pattern_key.as_ref() == Some(key)
                        && arm.guard.map_or(true, |g| self.literal_guard(g) == Some(true))
                }
                None => arm.guard.is_some_and(|g| self.literal_guard(g) == Some(true)),
            };
            if let (true, Some(body)) = (selected, arm.body) {
                return self.visit(body);
            }
        }

        match default {
            Some(body) => self.visit(body),
            None => {
                let span = self.ast[node].span;
                self.error(codes::E121, span, "no arm of this match expression matches");
                BufferIndex::UNUSED
            }
        }
    }

    fn runtime_match(
        &mut self,
        node: NodeIndex,
        scrutinee: Option<NodeIndex>,
        arms: &[Arm],
    ) -> BufferIndex {
        let span = self.ast[node].span;
        if !arms.iter().any(|a| a.is_wildcard) {
            self.warn(
                codes::W001,
                span,
                "match expression has no '_' arm; unmatched input yields 0.0",
            );
        }
        let scrutinee_buf = scrutinee.map(|s| self.visit(s));

        // (condition, body); the wildcard arm has no condition.
        let mut lowered: Vec<(Option<BufferIndex>, BufferIndex)> = Vec::with_capacity(arms.len());
        for arm in arms {
            let body = match arm.body {
                Some(b) => self.visit(b),
                None => self.push_const(0.0, span),
            };
            if arm.is_wildcard {
                lowered.push((None, body));
                continue;
            }
            let mut cond = match (scrutinee_buf, arm.pattern) {
                (Some(s), Some(p)) => {
                    let pattern = self.visit(p);
                    self.emit_binary(Opcode::CmpEq, s, pattern, span)
                }
                (Some(_), None) => BufferIndex::UNUSED,
                (None, _) => match arm.guard {
                    Some(g) => self.visit(g),
                    None => BufferIndex::UNUSED,
                },
            };
            if let (Some(_), Some(g)) = (scrutinee_buf, arm.guard) {
                let guard = self.visit(g);
                cond = self.emit_binary(Opcode::LogicAnd, cond, guard, span);
            }
            lowered.push((Some(cond), body));
        }

        if lowered.is_empty() {
            self.error(codes::E122, span, "match expression has no arms");
            return BufferIndex::UNUSED;
        }

        let mut result = match lowered.iter().find(|(cond, _)| cond.is_none()) {
            Some(&(_, body)) => body,
            None => self.push_const(0.0, span),
        };
        for &(cond, body) in lowered.iter().rev() {
            let Some(cond) = cond.filter(|c| !c.is_unused()) else {
                continue;
            };
            let Some(out) = self.alloc(span) else {
                return BufferIndex::UNUSED;
            };
            self.emit(Instruction::make_ternary(Opcode::Select, out, cond, body, result, 0));
            result = out;
        }
        result
    }

    fn emit_binary(
        &mut self,
        opcode: Opcode,
        a: BufferIndex,
        b: BufferIndex,
        span: crate::ast::Span,
    ) -> BufferIndex {
        match self.alloc(span) {
            Some(out) => {
                self.emit(Instruction::make_binary(opcode, out, a, b, 0));
                out
            }
            None => BufferIndex::UNUSED,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Ast, NodeIndex};
    use crate::bytecode::Opcode;
    use crate::codegen::tests::{codes_of, compile, opcodes};
    use crate::id::fnv1a;

    fn string_match(ast: &mut Ast, scrutinee: NodeIndex) -> NodeIndex {
        let pa = ast.string("saw");
        let ba = ast.num(1.0);
        let a = ast.arm(Some(pa), None, ba);
        let pb = ast.string("sqr");
        let bb = ast.num(2.0);
        let b = ast.arm(Some(pb), None, bb);
        let bw = ast.num(3.0);
        let w = ast.wildcard(bw);
        ast.match_expr(Some(scrutinee), &[a, b, w])
    }

    #[test]
    fn literal_scrutinee_prunes_other_arms() {
        let mut ast = Ast::new();
        let s = ast.string("sqr");
        let m = string_match(&mut ast, s);
        ast.program(&[m]);
        let result = compile(&ast);
        assert!(result.success);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].const_value(), Some(2.0));
    }

    /// `match <scrutinee> { "a" => 1, "b" => sin(3) }; sin(5)`
    fn stateful_arm_program(scrutinee: impl FnOnce(&mut Ast) -> Vec<NodeIndex>) -> Ast {
        let mut ast = Ast::new();
        let mut stmts = scrutinee(&mut ast);
        let s = stmts.pop().expect("scrutinee");
        let pa = ast.string("a");
        let ba = ast.num(1.0);
        let a = ast.arm(Some(pa), None, ba);
        let pb = ast.string("b");
        let f = ast.num(3.0);
        let bb = ast.call("sin", &[f]);
        let b = ast.arm(Some(pb), None, bb);
        let m = ast.match_expr(Some(s), &[a, b]);
        let later_f = ast.num(5.0);
        let later = ast.call("sin", &[later_f]);
        stmts.extend([m, later]);
        ast.program(&stmts);
        ast
    }

    #[test]
    fn pruned_stateful_arm_emits_nothing_and_keeps_counters() {
        let ast = stateful_arm_program(|ast| vec![ast.string("a")]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        let sins: Vec<_> = result
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::OscSin)
            .collect();
        assert_eq!(sins.len(), 1);
        assert_eq!(sins[0].state_id, fnv1a("main/sin#0"));
        assert!(!opcodes(&result).contains(&Opcode::Select));
    }

    #[test]
    fn runtime_scrutinee_emits_every_arm() {
        let ast = stateful_arm_program(|ast| {
            let f = ast.num(1.0);
            let ph = ast.call("phasor", &[f]);
            let bind = ast.assign("s", ph);
            let s = ast.ident("s");
            vec![bind, s]
        });
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        let ops = opcodes(&result);
        assert_eq!(ops.iter().filter(|&&o| o == Opcode::OscSin).count(), 2);
        assert!(ops.contains(&Opcode::Select));
        assert!(result
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::OscSin && i.state_id == fnv1a("main/sin#1")));
    }

    #[test]
    fn unmatched_literal_falls_back_to_wildcard() {
        let mut ast = Ast::new();
        let s = ast.string("tri");
        let m = string_match(&mut ast, s);
        ast.program(&[m]);
        let result = compile(&ast);
        assert_eq!(result.instructions[0].const_value(), Some(3.0));
    }

    #[test]
    fn forwarded_parameter_literal_is_compile_time() {
        let mut ast = Ast::new();
        let shape = ast.ident("shape");
        let m = string_match(&mut ast, shape);
        let def = ast.func_def("osc", &[("shape", None)], m);
        let arg = ast.string("saw");
        let call = ast.call("osc", &[arg]);
        ast.program(&[def, call]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(!opcodes(&result).contains(&Opcode::Select));
        assert_eq!(
            result.instructions.iter().filter_map(|i| i.const_value()).collect::<Vec<_>>(),
            vec![1.0]
        );
    }

    #[test]
    fn no_match_without_wildcard_is_e121() {
        let mut ast = Ast::new();
        let s = ast.num(5.0);
        let p = ast.num(1.0);
        let body = ast.num(10.0);
        let a = ast.arm(Some(p), None, body);
        let m = ast.match_expr(Some(s), &[a]);
        ast.program(&[m]);
        assert_eq!(codes_of(&compile(&ast)), vec!["E121"]);
    }

    #[test]
    fn false_guard_skips_matching_arm() {
        let mut ast = Ast::new();
        let s = ast.num(1.0);
        let p1 = ast.num(1.0);
        let g = ast.boolean(false);
        let b1 = ast.num(10.0);
        let a1 = ast.arm(Some(p1), Some(g), b1);
        let p2 = ast.num(1.0);
        let b2 = ast.num(20.0);
        let a2 = ast.arm(Some(p2), None, b2);
        let m = ast.match_expr(Some(s), &[a1, a2]);
        ast.program(&[m]);
        let result = compile(&ast);
        assert_eq!(result.instructions[0].const_value(), Some(20.0));
    }

    #[test]
    fn runtime_scrutinee_builds_select_chain() {
        let mut ast = Ast::new();
        let f = ast.num(1.0);
        let s = ast.call("phasor", &[f]);
        let m = string_match(&mut ast, s);
        ast.program(&[m]);
        let result = compile(&ast);
        assert!(result.success);
        let ops = opcodes(&result);
        assert_eq!(ops.iter().filter(|&&o| o == Opcode::CmpEq).count(), 2);
        assert_eq!(ops.iter().filter(|&&o| o == Opcode::Select).count(), 2);
        let last = result.instructions.last().copied().expect("instructions");
        assert_eq!(last.opcode, Opcode::Select);
        // The outermost select tests the first arm.
        let first_body = result
            .instructions
            .iter()
            .find(|i| i.const_value() == Some(1.0) && i.out() != result.instructions[0].out())
            .map(|i| i.out());
        assert_eq!(Some(last.input(1)), first_body);
    }

    #[test]
    fn runtime_match_without_wildcard_warns_and_defaults_to_zero() {
        let mut ast = Ast::new();
        let f = ast.num(1.0);
        let s = ast.call("phasor", &[f]);
        let p = ast.num(0.0);
        let body = ast.num(5.0);
        let a = ast.arm(Some(p), None, body);
        let m = ast.match_expr(Some(s), &[a]);
        ast.program(&[m]);
        let result = compile(&ast);
        assert!(result.success);
        assert_eq!(codes_of(&result), vec!["W001"]);
        let select = result.instructions.last().copied().expect("select");
        let default = result
            .instructions
            .iter()
            .find(|i| i.out() == select.input(2))
            .and_then(|i| i.const_value());
        assert_eq!(default, Some(0.0));
    }

    #[test]
    fn guard_with_scrutinee_is_anded() {
        let mut ast = Ast::new();
        let f = ast.num(1.0);
        let s = ast.call("phasor", &[f]);
        let p = ast.num(0.0);
        let gf = ast.num(2.0);
        let g = ast.call("sqr", &[gf]);
        let body = ast.num(5.0);
        let a = ast.arm(Some(p), Some(g), body);
        let wb = ast.num(0.5);
        let w = ast.wildcard(wb);
        let m = ast.match_expr(Some(s), &[a, w]);
        ast.program(&[m]);
        let ops = opcodes(&compile(&ast));
        assert!(ops.contains(&Opcode::LogicAnd));
    }

    #[test]
    fn guard_only_form() {
        let mut ast = Ast::new();
        let g1 = ast.boolean(false);
        let b1 = ast.num(1.0);
        let a1 = ast.arm(None, Some(g1), b1);
        let g2 = ast.boolean(true);
        let b2 = ast.num(2.0);
        let a2 = ast.arm(None, Some(g2), b2);
        let m = ast.match_expr(None, &[a1, a2]);
        ast.program(&[m]);
        let result = compile(&ast);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].const_value(), Some(2.0));
    }

    #[test]
    fn runtime_match_without_arms_is_e122() {
        let mut ast = Ast::new();
        let f = ast.num(1.0);
        let s = ast.call("phasor", &[f]);
        let m = ast.match_expr(Some(s), &[]);
        ast.program(&[m]);
        let result = compile(&ast);
        assert_eq!(codes_of(&result), vec!["W001", "E122"]);
    }

    #[test]
    fn scrutinee_form_without_scrutinee_is_e120() {
        let mut ast = Ast::new();
        let body = ast.num(1.0);
        let w = ast.wildcard(body);
        let m = ast.match_expr(None, &[w]);
        // Flip the flag to claim a scrutinee that is not there.
        if let crate::ast::NodeKind::MatchExpr { has_scrutinee } = &mut ast.node_mut(m).kind {
            *has_scrutinee = true;
        }
        ast.program(&[m]);
        assert_eq!(codes_of(&compile(&ast)), vec!["E120"]);
    }
}
