// patterns.rs — Mini-notation literals in bytecode
//
// `pat`, `note` and `timeline` literals compile into sequence programs the
// VM queries lazily (SEQPAT_QUERY once per block, one SEQPAT_STEP per voice).
// `seq` literals are evaluated here instead and shipped as a flat step table
// for SEQ_STEP. Sample patterns drive SAMPLE_PLAY directly; other patterns
// hand trigger, velocity and value to an optional closure.
//
// Preconditions: the literal's children are the `MiniPattern` root and an
//   optional `Closure`.
// Postconditions: every emitted sequence program has a matching
//   `StateInitData` entry under the same state id.
// Failure modes: literals without a pattern (E114), bad pattern references
//   (E123, E124), malformed `chord()` calls (E125, E126, E127). A pattern
//   without events compiles to a constant 0.
// Side effects: collects sample names into `required_samples`.

use tracing::debug;

use crate::ast::{Ast, NodeIndex, NodeKind, PatternType, Span};
use crate::bytecode::{Instruction, Opcode};
use crate::codegen::{CodegenCtx, PatternLocation, StateInitData};
use crate::diag::codes;
use crate::id::BufferIndex;
use crate::mini_parser;
use crate::pattern_eval::{PatternEvaluator, PatternEventKind};
use crate::sequence::{CompiledPattern, SequenceCompiler};
use crate::symbols::FunctionRef;

/// Beats per cycle in `SeqStep` tables.
const BEATS_PER_CYCLE: f32 = 4.0;

/// Buffers produced by one sequence program.
struct SeqpatOutputs {
    value: BufferIndex,
    velocity: BufferIndex,
    trigger: BufferIndex,
    /// Value buffer of each voice; `voices[0] == value`.
    voices: Vec<BufferIndex>,
}

fn location_of(span: Span) -> PatternLocation {
    PatternLocation {
        offset: span.start as u32,
        length: (span.end - span.start) as u32,
    }
}

fn sequence_program(
    state_id: u32,
    compiled: CompiledPattern,
    location: PatternLocation,
    ast_json: Option<serde_json::Value>,
) -> StateInitData {
    StateInitData::SequenceProgram {
        state_id,
        cycle_length: compiled.cycle_length,
        sequences: compiled.sequences,
        total_events: compiled.total_events,
        is_sample_pattern: compiled.is_sample_pattern,
        location,
        sample_mappings: compiled.sample_mappings,
        ast_json,
    }
}

impl CodegenCtx<'_> {
    /// Children of a `MiniLiteral`: the pattern root and the closure.
    fn literal_parts(&self, node: NodeIndex) -> (Option<NodeIndex>, Option<NodeIndex>) {
        let ast = self.ast;
        let pattern = ast
            .children(node)
            .find(|&c| matches!(ast[c].kind, NodeKind::MiniPattern));
        let closure = ast
            .children(node)
            .find(|&c| matches!(ast[c].kind, NodeKind::Closure));
        (pattern, closure)
    }

    /// Emit SEQPAT_QUERY and one SEQPAT_STEP per voice. Voice 0 also
    /// writes the velocity and trigger buffers.
    fn emit_seqpat(&mut self, state_id: u32, voices: u8, span: Span) -> Option<SeqpatOutputs> {
        let value = self.alloc(span)?;
        let velocity = self.alloc(span)?;
        let trigger = self.alloc(span)?;

        self.emit(Instruction::make_nullary(
            Opcode::SeqpatQuery,
            BufferIndex::UNUSED,
            state_id,
        ));
        let mut outputs = SeqpatOutputs {
            value,
            velocity,
            trigger,
            voices: Vec::with_capacity(usize::from(voices.max(1))),
        };
        for voice in 0..voices.max(1) {
            let (out, vel, trig) = if voice == 0 {
                (value, velocity, trigger)
            } else {
                (self.alloc(span)?, BufferIndex::UNUSED, BufferIndex::UNUSED)
            };
            self.emit(Instruction::make_ternary(
                Opcode::SeqpatStep,
                out,
                vel,
                trig,
                BufferIndex(u16::from(voice)),
                state_id,
            ));
            outputs.voices.push(out);
        }
        Some(outputs)
    }

    /// `SAMPLE_PLAY(trigger, pitch = 1, sample id)` on the next state slot.
    fn emit_sample_play(
        &mut self,
        trigger: BufferIndex,
        sample_id: BufferIndex,
        state_id: u32,
        span: Span,
    ) -> BufferIndex {
        let pitch = self.push_const(1.0, span);
        let Some(out) = self.alloc(span) else {
            return BufferIndex::UNUSED;
        };
        self.emit(Instruction::make_ternary(
            Opcode::SamplePlay,
            out,
            trigger,
            pitch,
            sample_id,
            state_id.wrapping_add(1),
        ));
        out
    }

    /// Bind `(trigger, velocity, value)` to the closure's parameters and
    /// visit its body.
    fn apply_pattern_closure(&mut self, closure: NodeIndex, outputs: &SeqpatOutputs) -> BufferIndex {
        let func = FunctionRef::from_node(self.ast, closure);
        let span = self.ast[closure].span;
        self.expand_body(
            &func,
            &[outputs.trigger, outputs.velocity, outputs.value],
            span,
        )
    }

    fn collect_samples(&mut self, names: impl IntoIterator<Item = String>, span: Span) {
        for name in names {
            if self.samples.is_some_and(|reg| !reg.contains(&name)) {
                self.warn(codes::W002, span, format!("unknown sample '{name}'"));
            }
            self.required_samples.insert(name);
        }
    }

    // ── Literals ────────────────────────────────────────────────────────────

    pub(crate) fn visit_mini_literal(
        &mut self,
        node: NodeIndex,
        pattern_type: PatternType,
    ) -> BufferIndex {
        match pattern_type {
            PatternType::Seq => self.visit_eager_sequence(node),
            PatternType::Pat | PatternType::Note | PatternType::Timeline => {
                self.visit_lazy_pattern(node)
            }
        }
    }

    fn visit_lazy_pattern(&mut self, node: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        let (Some(pattern), closure) = self.literal_parts(node) else {
            self.error(codes::E114, span, "pattern literal has no pattern");
            return BufferIndex::UNUSED;
        };

        let count = self.next_count("pat");
        self.path.push(format!("pat#{count}"));
        let state_id = self.path.compute_id();

        let Some(compiled) = SequenceCompiler::new(ast, self.samples).compile(pattern) else {
            debug!(state_id, "pattern has no events");
            let zero = self.push_const(0.0, span);
            self.path.pop();
            return zero;
        };
        debug!(
            state_id,
            events = compiled.total_events,
            voices = compiled.max_voices,
            samples = compiled.is_sample_pattern,
            "sequence program"
        );

        let is_sample = compiled.is_sample_pattern;
        let voices = compiled.max_voices;
        let sample_names = compiled.sample_names.clone();
        self.collect_samples(sample_names, ast[pattern].span);

        let Some(outputs) = self.emit_seqpat(state_id, voices, span) else {
            self.path.pop();
            return BufferIndex::UNUSED;
        };
        self.state_inits.push(sequence_program(
            state_id,
            compiled,
            location_of(ast[pattern].span),
            Some(crate::ast::mini_tree_json(ast, pattern)),
        ));

        let result = if is_sample {
            self.emit_sample_play(outputs.trigger, outputs.value, state_id, span)
        } else if let Some(closure) = closure {
            self.apply_pattern_closure(closure, &outputs)
        } else {
            outputs.value
        };
        self.path.pop();

        if voices > 1 && !is_sample && closure.is_none() {
            self.register_multi_buffer(node, outputs.voices);
        }
        result
    }

    /// `seq` literal: evaluate every cycle now and emit a SEQ_STEP table.
    fn visit_eager_sequence(&mut self, node: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        let (Some(pattern), closure) = self.literal_parts(node) else {
            self.error(codes::E114, span, "pattern literal has no pattern");
            return BufferIndex::UNUSED;
        };

        let count = self.next_count("pat");
        self.path.push(format!("pat#{count}"));
        let state_id = self.path.compute_id();

        let stream = PatternEvaluator::new(ast).evaluate_multi_cycle(pattern);
        if stream.is_empty() {
            let zero = self.push_const(0.0, span);
            self.path.pop();
            return zero;
        }
        let is_sample = stream.has_samples();

        let (Some(value), Some(velocity), Some(trigger)) =
            (self.alloc(span), self.alloc(span), self.alloc(span))
        else {
            self.path.pop();
            return BufferIndex::UNUSED;
        };
        self.emit(Instruction::make_binary(
            Opcode::SeqStep,
            value,
            velocity,
            trigger,
            state_id,
        ));

        let mut times = Vec::with_capacity(stream.len());
        let mut values = Vec::with_capacity(stream.len());
        let mut velocities = Vec::with_capacity(stream.len());
        let mut names = Vec::new();
        for event in &stream.events {
            times.push(event.time * BEATS_PER_CYCLE);
            velocities.push(event.velocity);
            values.push(match &event.kind {
                PatternEventKind::Sample { name, .. } => {
                    names.push(name.clone());
                    self.samples.map_or(0.0, |reg| reg.id(name) as f32)
                }
                _ => event.frequency(),
            });
        }
        debug!(state_id, steps = times.len(), samples = is_sample, "step table");
        self.collect_samples(names, ast[pattern].span);
        self.state_inits.push(StateInitData::SeqStep {
            state_id,
            cycle_length: stream.cycle_span * BEATS_PER_CYCLE,
            times,
            values,
            velocities,
        });

        let outputs = SeqpatOutputs {
            value,
            velocity,
            trigger,
            voices: vec![value],
        };
        let result = if is_sample {
            self.emit_sample_play(trigger, value, state_id, span)
        } else if let Some(closure) = closure {
            self.apply_pattern_closure(closure, &outputs)
        } else {
            value
        };
        self.path.pop();
        result
    }

    // ── References ──────────────────────────────────────────────────────────

    /// A variable bound to a pattern literal: a fresh sequence program keyed
    /// by the variable name.
    pub(crate) fn visit_pattern_reference(
        &mut self,
        node: NodeIndex,
        name: &str,
        pattern_node: NodeIndex,
    ) -> BufferIndex {
        let ast = self.ast;
        let span = ast[node].span;
        if pattern_node.0 as usize >= ast.len() {
            self.error(codes::E123, span, format!("pattern '{name}' has no definition"));
            return BufferIndex::UNUSED;
        }
        if !matches!(ast[pattern_node].kind, NodeKind::MiniLiteral(_)) {
            self.error(
                codes::E124,
                span,
                format!("'{name}' is not bound to a pattern literal"),
            );
            return BufferIndex::UNUSED;
        }

        self.path.push(name);
        let state_id = self.path.compute_id();
        let (Some(pattern), _) = self.literal_parts(pattern_node) else {
            self.error(codes::E114, span, format!("pattern '{name}' has no pattern"));
            self.path.pop();
            return BufferIndex::UNUSED;
        };
        let Some(compiled) = SequenceCompiler::new(ast, self.samples).compile(pattern) else {
            let zero = self.push_const(0.0, span);
            self.path.pop();
            return zero;
        };
        let sample_names = compiled.sample_names.clone();
        self.collect_samples(sample_names, ast[pattern].span);

        let result = match self.emit_seqpat(state_id, 1, span) {
            Some(outputs) => {
                self.state_inits.push(sequence_program(
                    state_id,
                    compiled,
                    location_of(ast[pattern].span),
                    None,
                ));
                outputs.value
            }
            None => BufferIndex::UNUSED,
        };
        self.path.pop();
        result
    }

    // ── chord() ─────────────────────────────────────────────────────────────

    /// `chord("Am C7")`: a polyphonic sequence program over chord symbols.
    pub(crate) fn visit_chord_call(&mut self, call: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[call].span;
        let args = self.call_args(call);
        let Some(&arg) = args.first() else {
            self.error(codes::E125, span, "chord() requires a pattern string");
            return BufferIndex::UNUSED;
        };
        let Some(text) = ast.literal_string(arg) else {
            self.error(
                codes::E126,
                ast[arg].span,
                "chord() argument must be a string literal",
            );
            return BufferIndex::UNUSED;
        };
        let str_span = ast[arg].span;

        // Parsed into a scratch arena; the program tree stays read-only.
        let mut scratch = Ast::new();
        let parsed = mini_parser::parse_into(&mut scratch, text, str_span.start, false);
        self.diagnostics.extend(parsed.diagnostics);
        let Some(root) = parsed.root else {
            self.error(codes::E127, str_span, "chord pattern failed to parse");
            return BufferIndex::UNUSED;
        };

        let count = self.next_count("chord");
        self.path.push(format!("chord#{count}"));
        let state_id = self.path.compute_id();

        let Some(mut compiled) = SequenceCompiler::new(&scratch, None).compile(root) else {
            self.error(codes::E127, str_span, "chord pattern has no events");
            self.path.pop();
            return BufferIndex::UNUSED;
        };
        compiled.is_sample_pattern = false;
        let voices = compiled.max_voices;

        let Some(outputs) = self.emit_seqpat(state_id, voices, span) else {
            self.path.pop();
            return BufferIndex::UNUSED;
        };
        self.state_inits.push(sequence_program(
            state_id,
            compiled,
            location_of(str_span),
            Some(crate::ast::mini_tree_json(&scratch, root)),
        ));
        self.path.pop();

        let first = outputs.value;
        self.register_multi_buffer(call, outputs.voices);
        first
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Ast, PatternType};
    use crate::bytecode::Opcode;
    use crate::codegen::tests::{codes_of, compile, opcodes};
    use crate::codegen::{generate, StateInitData};
    use crate::id::{fnv1a, BufferIndex};
    use crate::samples::SampleRegistry;
    use crate::symbols::SymbolTable;

    fn literal(ast: &mut Ast, pt: PatternType, text: &str) -> crate::ast::NodeIndex {
        let (lit, diags) = ast.mini_literal(pt, text, 0, None);
        assert!(diags.is_empty(), "{diags:?}");
        lit
    }

    #[test]
    fn pitch_pattern_emits_query_and_step() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Pat, "c4 e4 g4");
        ast.program(&[lit]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(opcodes(&result), vec![Opcode::SeqpatQuery, Opcode::SeqpatStep]);

        let step = result.instructions[1];
        assert_eq!(step.state_id, fnv1a("main/pat#0"));
        assert_eq!(step.input(0), BufferIndex(1));
        assert_eq!(step.input(1), BufferIndex(2));
        assert_eq!(step.input(2), BufferIndex(0));

        match &result.state_inits[0] {
            StateInitData::SequenceProgram {
                state_id,
                total_events,
                is_sample_pattern,
                ast_json,
                ..
            } => {
                assert_eq!(*state_id, fnv1a("main/pat#0"));
                assert_eq!(*total_events, 3);
                assert!(!is_sample_pattern);
                assert!(ast_json.is_some());
            }
            other => panic!("unexpected init {other:?}"),
        }
    }

    #[test]
    fn sample_pattern_plays_samples() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Pat, "bd sd");
        ast.program(&[lit]);
        let reg = SampleRegistry::with_defaults();
        let mut symbols = SymbolTable::new();
        let result = generate(&ast, &mut symbols, Some(&reg));
        assert!(result.success, "{:?}", result.diagnostics);
        let play = result
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::SamplePlay)
            .copied()
            .expect("sample play");
        assert_eq!(play.state_id, fnv1a("main/pat#0").wrapping_add(1));
        assert_eq!(result.required_samples, vec!["bd", "sd"]);
    }

    #[test]
    fn unknown_sample_warns() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Pat, "bd zzz");
        ast.program(&[lit]);
        let reg = SampleRegistry::with_defaults();
        let mut symbols = SymbolTable::new();
        let result = generate(&ast, &mut symbols, Some(&reg));
        assert!(result.success);
        assert_eq!(codes_of(&result), vec!["W002"]);
    }

    #[test]
    fn closure_receives_trigger_velocity_value() {
        let mut ast = Ast::new();
        let t = ast.ident("t");
        let f = ast.ident("f");
        let body = ast.call("sin", &[f]);
        let amp = ast.binary(crate::ast::BinOp::Mul, body, t);
        let clo = ast.closure(&["t", "v", "f"], amp);
        let (lit, _) = ast.mini_literal(PatternType::Pat, "a3 c4", 0, Some(clo));
        ast.program(&[lit]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        let osc = result
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::OscSin)
            .copied()
            .expect("oscillator");
        assert_eq!(osc.input(0), BufferIndex(0));
        let mul = result
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::Mul)
            .copied()
            .expect("mul");
        assert_eq!(mul.input(1), BufferIndex(2));
        assert_eq!(osc.state_id, fnv1a("main/pat#0/sin#0"));
    }

    #[test]
    fn empty_pattern_is_constant_zero() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Pat, "~ ~");
        ast.program(&[lit]);
        let result = compile(&ast);
        assert!(result.success);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].const_value(), Some(0.0));
        assert!(result.state_inits.is_empty());
    }

    #[test]
    fn seq_literal_builds_step_table() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Seq, "a4 ~ a5 ~");
        ast.program(&[lit]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(opcodes(&result), vec![Opcode::SeqStep]);
        match &result.state_inits[0] {
            StateInitData::SeqStep {
                cycle_length,
                times,
                values,
                ..
            } => {
                assert_eq!(*cycle_length, 4.0);
                assert_eq!(times.len(), values.len());
                assert!(values.iter().any(|&v| (v - 440.0).abs() < 0.01));
                assert!(values.iter().any(|&v| (v - 880.0).abs() < 0.01));
            }
            other => panic!("unexpected init {other:?}"),
        }
    }

    #[test]
    fn pattern_reference_uses_variable_path() {
        let mut ast = Ast::new();
        let lit = literal(&mut ast, PatternType::Pat, "c4 d4");
        let bind = ast.assign("mel", lit);
        let r = ast.ident("mel");
        let osc = ast.call("saw", &[r]);
        ast.program(&[bind, osc]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::SeqpatStep && i.state_id == fnv1a("main/saw#0/mel")));
    }

    #[test]
    fn chord_call_fans_out_voices() {
        let mut ast = Ast::new();
        let s = ast.string("Am C7");
        let c = ast.call("chord", &[s]);
        ast.program(&[c]);
        let result = compile(&ast);
        assert!(result.success, "{:?}", result.diagnostics);
        let steps = opcodes(&result)
            .into_iter()
            .filter(|&o| o == Opcode::SeqpatStep)
            .count();
        assert_eq!(steps, 4);
        assert!(result
            .instructions
            .iter()
            .all(|i| i.opcode != Opcode::SeqpatStep || i.state_id == fnv1a("main/chord#0")));
    }

    #[test]
    fn chord_call_errors() {
        let mut ast = Ast::new();
        let empty = ast.call("chord", &[]);
        let n = ast.num(1.0);
        let not_string = ast.call("chord", &[n]);
        let s = ast.string("~");
        let silent = ast.call("chord", &[s]);
        ast.program(&[empty, not_string, silent]);
        assert_eq!(codes_of(&compile(&ast)), vec!["E125", "E126", "E127"]);
    }
}
