// Property-based tests for compiler invariants.
//
// Four categories:
// 1. Determinism: generated patterns compile to byte-identical programs
// 2. Buffer pool: allocation succeeds up to capacity and fails past it
// 3. Array laws: sum/map/range and zip agree with their definitions
// 4. Pattern agreement: sequence programs and the evaluator place events at
//    the same times; Euclidean rhythms keep their hit count
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::HashMap;

use proptest::prelude::*;
use pulsec::ast::{Ast, BinOp, PatternType};
use pulsec::bytecode::{fingerprint, Instruction, Opcode};
use pulsec::codegen::{generate, CodeGenResult};
use pulsec::euclid;
use pulsec::mini_parser::parse_into;
use pulsec::pattern_eval::PatternEvaluator;
use pulsec::resolve::collect_definitions;
use pulsec::sequence::{CompiledPattern, EventKind, SequenceCompiler};
use pulsec::symbols::SymbolTable;

// ── Test helpers ────────────────────────────────────────────────────────────

fn compile(ast: &Ast) -> CodeGenResult {
    let mut symbols = SymbolTable::new();
    collect_definitions(ast, &mut symbols);
    generate(ast, &mut symbols, None)
}

/// Run the arithmetic subset of the VM over one sample frame.
fn eval_arithmetic(instructions: &[Instruction]) -> HashMap<u16, f32> {
    let mut buffers = HashMap::new();
    for inst in instructions {
        let read = |slot: usize| buffers.get(&inst.input(slot).0).copied().unwrap_or(0.0);
        let value = match inst.opcode {
            Opcode::PushConst => inst.const_value().unwrap_or(0.0),
            Opcode::Add => read(0) + read(1),
            Opcode::Sub => read(0) - read(1),
            Opcode::Mul => read(0) * read(1),
            other => panic!("unexpected opcode {other}"),
        };
        buffers.insert(inst.out().0, value);
    }
    buffers
}

// ── Pattern generator ───────────────────────────────────────────────────────

fn arb_atom() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("c4"),
        Just("e4"),
        Just("g3"),
        Just("a"),
        Just("bd"),
        Just("sd"),
        Just("hh"),
        Just("~"),
    ]
    .prop_map(str::to_string)
}

/// Mini-notation with groups, alternations and modifiers.
fn arb_pattern() -> impl Strategy<Value = String> {
    let element = arb_atom().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|v| format!("[{}]", v.join(" "))),
            prop::collection::vec(inner.clone(), 1..4).prop_map(|v| format!("<{}>", v.join(" "))),
            (inner, prop_oneof![Just("*2"), Just("!2"), Just("@3"), Just("?0.5")])
                .prop_map(|(e, m)| format!("{e}{m}")),
            (arb_atom(), 1u8..8, 8u8..12).prop_map(|(e, h, s)| format!("{e}({h},{s})")),
        ]
    });
    prop::collection::vec(element, 1..6).prop_map(|v| v.join(" "))
}

/// Alternation-free patterns: atoms, plain groups and `*n`. `/n` only
/// lengthens atoms; on a group it moves children into later cycles.
fn arb_flat_pattern() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![arb_atom(), arb_atom().prop_map(|a| format!("{a}/2"))];
    let element = leaf.prop_recursive(2, 12, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(|v| format!("[{}]", v.join(" "))),
            (inner, prop_oneof![Just("*2"), Just("*3")]).prop_map(|(e, m)| format!("{e}{m}")),
        ]
    });
    prop::collection::vec(element, 1..6).prop_map(|v| v.join(" "))
}

/// Absolute start times of every data event under `seq`.
fn flatten_times(program: &CompiledPattern, seq: usize, offset: f32, span: f32, out: &mut Vec<f32>) {
    for event in &program.sequences[seq].events {
        let time = offset + event.time * span;
        match event.kind {
            EventKind::Data { .. } => out.push(time),
            EventKind::SubSeq { seq_id } => {
                flatten_times(program, usize::from(seq_id), time, event.duration * span, out)
            }
        }
    }
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn compilation_is_deterministic(pattern in arb_pattern()) {
        let a = pulsec::compile_pattern(&pattern);
        let b = pulsec::compile_pattern(&pattern);
        prop_assert!(a.result.success, "{pattern:?}: {:?}", a.result.diagnostics);
        prop_assert_eq!(
            fingerprint(&a.result.instructions),
            fingerprint(&b.result.instructions)
        );
        prop_assert_eq!(
            serde_json::to_string(&a.result.state_inits).unwrap(),
            serde_json::to_string(&b.result.state_inits).unwrap()
        );
    }

    #[test]
    fn eager_sequences_are_deterministic(pattern in arb_pattern()) {
        let compile_seq = || {
            pulsec::compile_pattern_with(
                &pattern,
                PatternType::Seq,
                None,
                Default::default(),
            )
        };
        let a = compile_seq();
        let b = compile_seq();
        prop_assert_eq!(
            serde_json::to_string(&a.result.state_inits).unwrap(),
            serde_json::to_string(&b.result.state_inits).unwrap()
        );
    }

    #[test]
    fn buffer_pool_exhausts_after_capacity(n in 250usize..262) {
        let mut ast = Ast::new();
        let consts: Vec<_> = (0..n).map(|i| ast.num(i as f64)).collect();
        ast.program(&consts);
        let result = compile(&ast);
        let exhausted = result
            .diagnostics
            .iter()
            .any(|d| d.code.map(|c| c.0) == Some("E101"));
        prop_assert_eq!(exhausted, n > 256);
        prop_assert_eq!(result.instructions.len(), n.min(256));
    }

    #[test]
    fn sum_of_doubled_range(n in 1i64..40) {
        let mut ast = Ast::new();
        let lo = ast.int(0);
        let hi = ast.int(n);
        let range = ast.call("range", &[lo, hi]);
        let x = ast.ident("x");
        let two = ast.num(2.0);
        let body = ast.binary(BinOp::Mul, x, two);
        let double = ast.closure(&["x"], body);
        let mapped = ast.call("map", &[range, double]);
        let total = ast.call("sum", &[mapped]);
        ast.program(&[total]);

        let result = compile(&ast);
        prop_assert!(result.success, "{:?}", result.diagnostics);
        let buffers = eval_arithmetic(&result.instructions);
        let last = result.instructions.last().unwrap().out().0;
        prop_assert_eq!(buffers[&last], (n * (n - 1)) as f32);
    }

    #[test]
    fn zip_interleaves_up_to_shorter(a in 1usize..8, b in 1usize..8) {
        let mut ast = Ast::new();
        let xs: Vec<_> = (0..a).map(|i| ast.num(i as f64)).collect();
        let ys: Vec<_> = (0..b).map(|i| ast.num(100.0 + i as f64)).collect();
        let xa = ast.array(&xs);
        let ya = ast.array(&ys);
        let zipped = ast.call("zip", &[xa, ya]);
        let count = ast.call("len", &[zipped]);
        ast.program(&[count]);

        let result = compile(&ast);
        prop_assert!(result.success, "{:?}", result.diagnostics);
        let len = result.instructions.last().unwrap().const_value();
        prop_assert_eq!(len, Some((2 * a.min(b)) as f32));
    }

    #[test]
    fn sequence_and_evaluator_agree_on_times(pattern in arb_flat_pattern()) {
        let mut ast = Ast::new();
        let parsed = parse_into(&mut ast, &pattern, 0, false);
        prop_assert!(parsed.diagnostics.is_empty());
        let root = parsed.root.unwrap();

        let mut compiled_times = Vec::new();
        if let Some(program) = SequenceCompiler::new(&ast, None).compile(root) {
            flatten_times(&program, 0, 0.0, 1.0, &mut compiled_times);
        }
        compiled_times.sort_by(f32::total_cmp);
        let evaluated_times: Vec<f32> = PatternEvaluator::new(&ast)
            .evaluate(root, 0)
            .events
            .iter()
            .filter(|e| !e.is_rest())
            .map(|e| e.time)
            .collect();

        prop_assert_eq!(compiled_times.len(), evaluated_times.len());
        for (c, e) in compiled_times.iter().zip(&evaluated_times) {
            prop_assert!((c - e).abs() < 1e-5, "{pattern:?}: {c} vs {e}");
        }
    }

    #[test]
    fn euclid_keeps_hit_count(hits in 0u32..20, steps in 1u32..20, rotation in 0u32..20) {
        let mask = euclid::pattern(hits, steps, rotation);
        prop_assert_eq!(mask.len(), steps as usize);
        prop_assert_eq!(mask.iter().filter(|&&h| h).count(), hits.min(steps) as usize);
    }
}
