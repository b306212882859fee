// pattern_eval.rs — Eager mini-notation evaluation
//
// Walks a mini-notation tree for one concrete cycle and produces a flat,
// time-sorted event list. Used by the `seq` literal path, which bakes the
// events into a `SeqStep` table, and by `pulsec --emit events`.
//
// Preconditions: `root` is a mini node of `ast` (normally a `MiniPattern`).
// Postconditions: events are sorted by start time; `cycle_span >= 1`.
// Failure modes: none; unknown or empty nodes contribute no events.
// Side effects: advances the evaluator's random generator on `|` choices.

use serde::Serialize;

use crate::ast::{Ast, MiniAtom, Modifier, NodeIndex, NodeKind};
use crate::chord;
use crate::euclid;

/// Seed used by `PatternEvaluator::new`; recompiling the same source picks
/// the same `|` branches.
pub const DEFAULT_SEED: u64 = 0x5eed_1e55;

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternEventKind {
    Pitch { midi: u8 },
    Sample { name: String, variant: u8 },
    Chord { root_midi: u8, intervals: Vec<i8> },
    Rest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternEvent {
    #[serde(flatten)]
    pub kind: PatternEventKind,
    /// Start time in cycles.
    pub time: f32,
    pub duration: f32,
    pub velocity: f32,
    pub chance: f32,
}

impl PatternEvent {
    pub fn is_rest(&self) -> bool {
        matches!(self.kind, PatternEventKind::Rest)
    }

    /// Frequency carried by this event in a `SeqStep` table; 0 for rests
    /// and samples. Chords contribute their root.
    pub fn frequency(&self) -> f32 {
        match &self.kind {
            PatternEventKind::Pitch { midi } => chord::mtof(f32::from(*midi)),
            PatternEventKind::Chord { root_midi, .. } => chord::mtof(f32::from(*root_midi)),
            PatternEventKind::Sample { .. } | PatternEventKind::Rest => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PatternEventStream {
    pub events: Vec<PatternEvent>,
    /// Cycles covered by the stream (at least 1).
    pub cycle_span: f32,
}

impl PatternEventStream {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn has_samples(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.kind, PatternEventKind::Sample { .. }))
    }

    /// Events whose start falls in `[start, end)`.
    pub fn in_range(&self, start: f32, end: f32) -> impl Iterator<Item = &PatternEvent> + '_ {
        self.events
            .iter()
            .filter(move |e| e.time >= start && e.time < end)
    }

    fn sort_by_time(&mut self) {
        self.events.sort_by(|a, b| a.time.total_cmp(&b.time));
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct EvalContext {
    start: f32,
    duration: f32,
    velocity: f32,
    chance: f32,
}

impl EvalContext {
    const CYCLE: EvalContext = EvalContext {
        start: 0.0,
        duration: 1.0,
        velocity: 1.0,
        chance: 1.0,
    };

    /// Slot starting `offset` weight units in, `weight` wide, out of `total`.
    fn subdivide(self, offset: f32, weight: f32, total: f32) -> Self {
        let unit = self.duration / total;
        EvalContext {
            start: self.start + offset * unit,
            duration: weight * unit,
            ..self
        }
    }

    fn step(self, index: usize, steps: usize) -> Self {
        let step = self.duration / steps as f32;
        EvalContext {
            start: self.start + step * index as f32,
            duration: step,
            ..self
        }
    }
}

// ── Evaluator ───────────────────────────────────────────────────────────────

pub struct PatternEvaluator<'a> {
    ast: &'a Ast,
    rng: fastrand::Rng,
    cycle: u32,
    chord_mode: bool,
}

impl<'a> PatternEvaluator<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        Self::with_seed(ast, DEFAULT_SEED)
    }

    pub fn with_seed(ast: &'a Ast, seed: u64) -> Self {
        PatternEvaluator {
            ast,
            rng: fastrand::Rng::with_seed(seed),
            cycle: 0,
            chord_mode: false,
        }
    }

    /// Read sample atoms as chord symbols (`Am`, `C7`). Unparseable symbols
    /// become rests.
    pub fn chord_mode(mut self, enabled: bool) -> Self {
        self.chord_mode = enabled;
        self
    }

    /// Events of one cycle, with times relative to that cycle.
    pub fn evaluate(&mut self, root: NodeIndex, cycle: u32) -> PatternEventStream {
        self.cycle = cycle;
        let mut stream = PatternEventStream::default();
        self.eval_node(root, EvalContext::CYCLE, &mut stream);
        stream.sort_by_time();

        let end = stream
            .events
            .iter()
            .map(|e| e.time + e.duration)
            .fold(0.0f32, f32::max);
        stream.cycle_span = end.max(1.0);
        stream
    }

    /// Cycles needed before the pattern repeats. Alternations multiply,
    /// everything else takes the maximum of its children.
    pub fn count_cycles(&self, node: NodeIndex) -> u32 {
        let ast = self.ast;
        let children_max = || {
            ast.children(node)
                .map(|c| self.count_cycles(c))
                .fold(1, u32::max)
        };
        match &ast[node].kind {
            NodeKind::MiniSequence => {
                let n = ast.child_count(node) as u32;
                if n == 0 {
                    1
                } else {
                    n.saturating_mul(children_max())
                }
            }
            NodeKind::MiniPattern
            | NodeKind::MiniGroup
            | NodeKind::MiniPolyrhythm
            | NodeKind::MiniPolymeter { .. }
            | NodeKind::MiniChoice => children_max(),
            // `/n` stretches time inside one evaluation instead of adding cycles.
            NodeKind::MiniModified { .. } | NodeKind::MiniEuclidean { .. } => ast[node]
                .first_child
                .map_or(1, |c| self.count_cycles(c)),
            _ => 1,
        }
    }

    /// Every cycle up to `count_cycles(root)`, concatenated on one timeline.
    pub fn evaluate_multi_cycle(&mut self, root: NodeIndex) -> PatternEventStream {
        let cycles = self.count_cycles(root);
        if cycles <= 1 {
            return self.evaluate(root, 0);
        }

        let mut combined = PatternEventStream::default();
        for cycle in 0..cycles {
            let stream = self.evaluate(root, cycle);
            combined.events.extend(stream.events.into_iter().map(|mut e| {
                e.time += cycle as f32;
                e
            }));
        }
        combined.cycle_span = cycles as f32;
        combined.sort_by_time();
        combined
    }

    fn eval_node(&mut self, node: NodeIndex, ctx: EvalContext, out: &mut PatternEventStream) {
        let ast = self.ast;
        match &ast[node].kind {
            NodeKind::MiniPattern | NodeKind::MiniGroup => self.eval_subdivided(node, ctx, out),
            NodeKind::MiniAtom(atom) => out.events.push(self.atom_event(atom, ctx)),
            NodeKind::MiniSequence => {
                let n = ast.child_count(node);
                if n > 0 {
                    if let Some(child) = ast.nth_child(node, self.cycle as usize % n) {
                        self.eval_node(child, ctx, out);
                    }
                }
            }
            NodeKind::MiniPolyrhythm => {
                for child in ast.children(node) {
                    self.eval_node(child, ctx, out);
                }
            }
            NodeKind::MiniPolymeter { step_count } => {
                let n = ast.child_count(node);
                if n == 0 {
                    return;
                }
                let steps = if *step_count > 0 { usize::from(*step_count) } else { n };
                for i in 0..steps {
                    if let Some(child) = ast.nth_child(node, i % n) {
                        self.eval_node(child, ctx.step(i, steps), out);
                    }
                }
            }
            NodeKind::MiniChoice => {
                let n = ast.child_count(node);
                if n > 0 {
                    let pick = self.rng.usize(..n);
                    if let Some(child) = ast.nth_child(node, pick) {
                        self.eval_node(child, ctx, out);
                    }
                }
            }
            NodeKind::MiniEuclidean {
                hits,
                steps,
                rotation,
            } => {
                let Some(atom) = ast[node].first_child else {
                    return;
                };
                let mask = euclid::pattern(u32::from(*hits), u32::from(*steps), u32::from(*rotation));
                for (i, _) in mask.iter().enumerate().filter(|(_, hit)| **hit) {
                    self.eval_node(atom, ctx.step(i, mask.len()), out);
                }
            }
            NodeKind::MiniModified { modifier, value } => {
                let Some(child) = ast[node].first_child else {
                    return;
                };
                let mut inner = ctx;
                match modifier {
                    Modifier::Speed => return self.eval_fast(child, *value, ctx, out),
                    Modifier::Slow | Modifier::Duration => inner.duration = ctx.duration * value,
                    Modifier::Chance => inner.chance = ctx.chance * value,
                    // Weight and repeat are consumed by the enclosing sequence.
                    _ => {}
                }
                self.eval_node(child, inner, out);
            }
            _ => {}
        }
    }

    /// `*n`: the child plays `n` times inside the slot. An alternation child
    /// advances once per repetition, so `<a b>*2` plays both every cycle.
    fn eval_fast(&mut self, child: NodeIndex, value: f32, ctx: EvalContext, out: &mut PatternEventStream) {
        let ast = self.ast;
        let count = (value as i32).max(1) as usize;
        for i in 0..count {
            let slot = ctx.step(i, count);
            match ast[child].kind {
                NodeKind::MiniSequence => {
                    let n = ast.child_count(child);
                    if n == 0 {
                        return;
                    }
                    let pick = (self.cycle as usize * count + i) % n;
                    if let Some(branch) = ast.nth_child(child, pick) {
                        self.eval_node(branch, slot, out);
                    }
                }
                _ => self.eval_node(child, slot, out),
            }
        }
    }

    /// Weighted subdivision shared by the root and `[...]` groups. `!n`
    /// repeats a child into `n` consecutive slots.
    fn eval_subdivided(&mut self, node: NodeIndex, ctx: EvalContext, out: &mut PatternEventStream) {
        let ast = self.ast;
        let slots: Vec<(NodeIndex, f32, u32)> = ast
            .children(node)
            .map(|c| {
                let (weight, repeat) = weight_and_repeat(ast, c);
                (c, weight, repeat)
            })
            .collect();
        let total: f32 = slots.iter().map(|&(_, w, r)| w * r as f32).sum();
        if total <= 0.0 {
            return;
        }

        let mut offset = 0.0;
        for (child, weight, repeat) in slots {
            let inner = unwrap_layout_modifiers(ast, child);
            for _ in 0..repeat {
                if let Some(inner) = inner {
                    self.eval_node(inner, ctx.subdivide(offset, weight, total), out);
                }
                offset += weight;
            }
        }
    }

    fn atom_event(&self, atom: &MiniAtom, ctx: EvalContext) -> PatternEvent {
        let kind = match atom {
            MiniAtom::Pitch { midi } => PatternEventKind::Pitch { midi: *midi },
            MiniAtom::Rest => PatternEventKind::Rest,
            MiniAtom::Chord {
                root_midi,
                intervals,
            } => PatternEventKind::Chord {
                root_midi: *root_midi,
                intervals: intervals.clone(),
            },
            MiniAtom::Sample { name, .. } if self.chord_mode => match chord::parse_symbol(name) {
                Some(info) => PatternEventKind::Chord {
                    root_midi: info.root_midi,
                    intervals: info.intervals,
                },
                None => PatternEventKind::Rest,
            },
            MiniAtom::Sample { name, variant } => PatternEventKind::Sample {
                name: name.clone(),
                variant: *variant,
            },
        };
        PatternEvent {
            kind,
            time: ctx.start,
            duration: ctx.duration,
            velocity: ctx.velocity,
            chance: ctx.chance,
        }
    }
}

/// Weight (`@`) and repeat count (`!`) from the modifier chain around a child.
fn weight_and_repeat(ast: &Ast, child: NodeIndex) -> (f32, u32) {
    let mut weight = 1.0;
    let mut repeat = 1;
    let mut current = Some(child);
    while let Some(idx) = current {
        let NodeKind::MiniModified { modifier, value } = ast[idx].kind else {
            break;
        };
        match modifier {
            Modifier::Weight => weight = value,
            Modifier::Repeat => repeat = value.max(0.0) as u32,
            _ => {}
        }
        current = ast[idx].first_child;
    }
    (weight, repeat)
}

/// Skip leading `@`/`!` wrappers; the caller already applied them.
fn unwrap_layout_modifiers(ast: &Ast, node: NodeIndex) -> Option<NodeIndex> {
    let mut current = node;
    while let NodeKind::MiniModified {
        modifier: Modifier::Weight | Modifier::Repeat,
        ..
    } = ast[current].kind
    {
        current = ast[current].first_child?;
    }
    Some(current)
}

// ── Convenience ─────────────────────────────────────────────────────────────

/// One cycle with the default seed.
pub fn evaluate(ast: &Ast, root: NodeIndex, cycle: u32) -> PatternEventStream {
    PatternEvaluator::new(ast).evaluate(root, cycle)
}

pub fn evaluate_multi_cycle(ast: &Ast, root: NodeIndex) -> PatternEventStream {
    PatternEvaluator::new(ast).evaluate_multi_cycle(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_parser::parse_into;

    fn parse(src: &str) -> (Ast, NodeIndex) {
        let mut ast = Ast::new();
        let parsed = parse_into(&mut ast, src, 0, false);
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let root = parsed.root.expect("pattern root");
        (ast, root)
    }

    fn times(stream: &PatternEventStream) -> Vec<f32> {
        stream.events.iter().map(|e| e.time).collect()
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn flat_sequence_divides_the_cycle() {
        let (ast, root) = parse("c4 e4 g4 c5");
        let s = evaluate(&ast, root, 0);
        assert_eq!(times(&s), vec![0.0, 0.25, 0.5, 0.75]);
        assert!(s.events.iter().all(|e| approx(e.duration, 0.25)));
        assert_eq!(s.events[0].kind, PatternEventKind::Pitch { midi: 60 });
        assert_eq!(s.cycle_span, 1.0);
    }

    #[test]
    fn weights_and_repeats_share_the_span() {
        let (ast, root) = parse("bd@3 sd");
        let s = evaluate(&ast, root, 0);
        assert_eq!(times(&s), vec![0.0, 0.75]);
        assert!(approx(s.events[0].duration, 0.75));

        let (ast, root) = parse("bd!3 sd");
        let s = evaluate(&ast, root, 0);
        assert_eq!(times(&s), vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn alternation_picks_by_cycle() {
        let (ast, root) = parse("<bd sd hh>");
        let names: Vec<_> = (0..4)
            .map(|c| match &evaluate(&ast, root, c).events[0].kind {
                PatternEventKind::Sample { name, .. } => name.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(names, ["bd", "sd", "hh", "bd"]);
    }

    #[test]
    fn multi_cycle_offsets_each_cycle() {
        let (ast, root) = parse("c4 <e4 g4>");
        let mut eval = PatternEvaluator::new(&ast);
        assert_eq!(eval.count_cycles(root), 2);
        let s = eval.evaluate_multi_cycle(root);
        assert_eq!(times(&s), vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(s.cycle_span, 2.0);
        assert_eq!(s.events[3].kind, PatternEventKind::Pitch { midi: 67 });
    }

    #[test]
    fn nested_alternations_multiply_cycles() {
        let (ast, root) = parse("<a <b c>>");
        assert_eq!(PatternEvaluator::new(&ast).count_cycles(root), 4);
    }

    #[test]
    fn euclid_places_hits_on_the_bucket_grid() {
        let (ast, root) = parse("bd(3,8)");
        let s = evaluate(&ast, root, 0);
        let expected: Vec<f32> = euclid::pattern(3, 8, 0)
            .iter()
            .enumerate()
            .filter(|(_, h)| **h)
            .map(|(i, _)| i as f32 / 8.0)
            .collect();
        assert_eq!(times(&s), expected);
    }

    #[test]
    fn polymeter_cycles_children_over_steps() {
        let (ast, root) = parse("{a b c}%4");
        let s = evaluate(&ast, root, 0);
        assert_eq!(s.len(), 4);
        assert_eq!(s.events[3].kind, PatternEventKind::Pitch { midi: 69 });
    }

    #[test]
    fn modifiers_scale_duration_and_chance() {
        let (ast, root) = parse("bd*2 sd?0.25");
        let s = evaluate(&ast, root, 0);
        assert!(approx(s.events[0].duration, 0.25));
        assert!(approx(s.events[2].chance, 0.25));

        let (ast, root) = parse("bd/2");
        let s = evaluate(&ast, root, 0);
        assert!(approx(s.events[0].duration, 2.0));
        assert!(approx(s.cycle_span, 2.0));
    }

    #[test]
    fn fast_repeats_the_child_across_its_slot() {
        let (ast, root) = parse("bd*2 sd");
        let s = evaluate(&ast, root, 0);
        assert_eq!(s.len(), 3);
        assert_eq!(times(&s), vec![0.0, 0.25, 0.5]);
        let durations: Vec<f32> = s.events.iter().map(|e| e.duration).collect();
        assert_eq!(durations, vec![0.25, 0.25, 0.5]);

        let (ast, root) = parse("[c4 e4]*2");
        let s = evaluate(&ast, root, 0);
        assert_eq!(times(&s), vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn fast_alternation_advances_per_repetition() {
        let (ast, root) = parse("<bd sd hh>*2");
        let names = |cycle| -> Vec<String> {
            evaluate(&ast, root, cycle)
                .events
                .iter()
                .map(|e| match &e.kind {
                    PatternEventKind::Sample { name, .. } => name.clone(),
                    other => panic!("unexpected {other:?}"),
                })
                .collect()
        };
        assert_eq!(names(0), ["bd", "sd"]);
        assert_eq!(names(1), ["hh", "bd"]);
    }

    #[test]
    fn polyrhythm_stacks_layers() {
        let (ast, root) = parse("[c4 e4, g4]");
        let s = evaluate(&ast, root, 0);
        assert_eq!(s.len(), 3);
        assert_eq!(s.in_range(0.0, 0.5).count(), 2);
    }

    #[test]
    fn choice_is_deterministic_per_seed() {
        let (ast, root) = parse("bd | sd | hh");
        let a = PatternEvaluator::with_seed(&ast, 7).evaluate_multi_cycle(root);
        let b = PatternEvaluator::with_seed(&ast, 7).evaluate_multi_cycle(root);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn chord_mode_reads_symbols() {
        let mut ast = Ast::new();
        let parsed = parse_into(&mut ast, "am xyz", 0, true);
        let root = parsed.root.expect("root");
        let s = PatternEvaluator::new(&ast).chord_mode(true).evaluate(root, 0);
        assert!(matches!(s.events[0].kind, PatternEventKind::Chord { root_midi: 69, .. }));
        assert!(s.events[1].is_rest());
    }

    #[test]
    fn rests_and_samples() {
        let (ast, root) = parse("bd ~ sd:2");
        let s = evaluate(&ast, root, 0);
        assert!(s.events[1].is_rest());
        assert!(s.has_samples());
        assert_eq!(
            s.events[2].kind,
            PatternEventKind::Sample {
                name: "sd".into(),
                variant: 2
            }
        );
        assert_eq!(s.events[1].frequency(), 0.0);
    }
}
