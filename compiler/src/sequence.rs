// sequence.rs — Mini-notation to lazy sequence programs
//
// Compiles a parsed mini-notation tree into a forest of `Sequence`s for the
// VM's `SEQPAT_*` opcodes. Sequence 0 is the root (NORMAL, duration 1.0).
// Alternation (`<a b>`) and random choice (`a | b`) become ALTERNATE/RANDOM
// sub-sequences referenced by `SubSeq` events, so the runtime picks a branch
// per query instead of the compiler pre-expanding cycles.
//
// Preconditions: `root` is a `MiniPattern` (or any mini node) in `ast`.
// Postconditions: every `SubSeq` event points at an existing sequence index;
//   data events carry at most `MAX_VALUES_PER_EVENT` values.
// Failure modes: a pattern that produces no events at the root yields `None`.
// Side effects: none.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::ast::{Ast, MiniAtom, Modifier, NodeIndex, NodeKind};
use crate::chord::mtof;
use crate::euclid;
use crate::samples::SampleRegistry;

/// Voices a single data event can carry.
pub const MAX_VALUES_PER_EVENT: usize = 4;

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceMode {
    /// Every event plays at its time.
    Normal,
    /// One event per query, advancing each cycle.
    Alternate,
    /// One event per query, picked at random.
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Data { values: Vec<f32> },
    SubSeq { seq_id: u16 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    /// Start within the parent span, 0.0..1.0.
    pub time: f32,
    pub duration: f32,
    pub chance: f32,
    /// Atom position relative to the start of the pattern text.
    pub source_offset: u16,
    pub source_length: u16,
}

impl Event {
    fn sub_seq(seq_id: u16, time: f32, duration: f32) -> Self {
        Event {
            kind: EventKind::SubSeq { seq_id },
            time,
            duration,
            chance: 1.0,
            source_offset: 0,
            source_length: 0,
        }
    }

    pub fn values(&self) -> &[f32] {
        match &self.kind {
            EventKind::Data { values } => values,
            EventKind::SubSeq { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sequence {
    pub mode: SequenceMode,
    pub duration: f32,
    pub events: Vec<Event>,
}

impl Sequence {
    fn new(mode: SequenceMode) -> Self {
        Sequence {
            mode,
            duration: 1.0,
            events: Vec::new(),
        }
    }
}

/// Where a sample name landed, so a host can patch IDs after loading samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleMapping {
    pub seq_idx: u16,
    pub event_idx: u16,
    pub name: String,
}

/// A compiled pattern ready to become a `SequenceProgram` state init.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPattern {
    pub sequences: Vec<Sequence>,
    /// Beats per cycle: one per top-level element (after `!n` expansion).
    pub cycle_length: f32,
    pub total_events: u32,
    pub is_sample_pattern: bool,
    pub sample_names: BTreeSet<String>,
    pub sample_mappings: Vec<SampleMapping>,
    /// Largest value count of any data event (1 unless chords are present).
    pub max_voices: u8,
}

// ── Compiler ────────────────────────────────────────────────────────────────

pub struct SequenceCompiler<'a> {
    ast: &'a Ast,
    samples: Option<&'a SampleRegistry>,
    sequences: Vec<Sequence>,
    sample_names: BTreeSet<String>,
    sample_mappings: Vec<SampleMapping>,
    is_sample_pattern: bool,
    base_offset: usize,
}

impl<'a> SequenceCompiler<'a> {
    pub fn new(ast: &'a Ast, samples: Option<&'a SampleRegistry>) -> Self {
        SequenceCompiler {
            ast,
            samples,
            sequences: Vec::new(),
            sample_names: BTreeSet::new(),
            sample_mappings: Vec::new(),
            is_sample_pattern: false,
            base_offset: 0,
        }
    }

    /// Compile the tree rooted at `root`. Returns `None` when the root
    /// sequence ends up without events (empty or all-rest pattern).
    pub fn compile(mut self, root: NodeIndex) -> Option<CompiledPattern> {
        use chumsky::span::Span as _;

        self.base_offset = self.ast[root].span.start();
        self.sequences.push(Sequence::new(SequenceMode::Normal));
        self.compile_node(root, 0, 0.0, 1.0);

        if self.sequences[0].events.is_empty() {
            return None;
        }

        let total_events = self.sequences.iter().map(|s| s.events.len() as u32).sum();
        let max_voices = self
            .sequences
            .iter()
            .flat_map(|s| &s.events)
            .map(|e| e.values().len() as u8)
            .fold(1, u8::max);

        Some(CompiledPattern {
            cycle_length: top_level_elements(self.ast, root) as f32,
            sequences: self.sequences,
            total_events,
            is_sample_pattern: self.is_sample_pattern,
            sample_names: self.sample_names,
            sample_mappings: self.sample_mappings,
            max_voices,
        })
    }

    fn new_sequence(&mut self, mode: SequenceMode) -> u16 {
        self.sequences.push(Sequence::new(mode));
        (self.sequences.len() - 1) as u16
    }

    fn push_event(&mut self, seq: u16, event: Event) {
        self.sequences[usize::from(seq)].events.push(event);
    }

    fn is_empty(&self, seq: u16) -> bool {
        self.sequences[usize::from(seq)].events.is_empty()
    }

    fn compile_node(&mut self, node: NodeIndex, seq: u16, offset: f32, span: f32) {
        let ast = self.ast;
        match &ast[node].kind {
            NodeKind::MiniPattern | NodeKind::MiniGroup | NodeKind::MiniPolymeter { .. } => {
                self.compile_subdivided(node, seq, offset, span)
            }
            NodeKind::MiniAtom(atom) => self.compile_atom(node, atom, seq, offset, span),
            NodeKind::MiniSequence => {
                self.compile_branching(node, SequenceMode::Alternate, seq, offset, span)
            }
            NodeKind::MiniChoice => {
                self.compile_branching(node, SequenceMode::Random, seq, offset, span)
            }
            NodeKind::MiniPolyrhythm => {
                for child in ast.children(node) {
                    self.compile_node(child, seq, offset, span);
                }
            }
            &NodeKind::MiniEuclidean {
                hits,
                steps,
                rotation,
            } => self.compile_euclid(node, hits, steps, rotation, seq, offset, span),
            &NodeKind::MiniModified { modifier, value } => {
                self.compile_modified(node, modifier, value, seq, offset, span)
            }
            _ => {}
        }
    }

    /// Children share the span by weight, each repeated `!n` times.
    fn compile_subdivided(&mut self, node: NodeIndex, seq: u16, offset: f32, span: f32) {
        let ast = self.ast;
        let mut slots = Vec::new();
        for child in ast.children(node) {
            let weight = node_weight(ast, child);
            for _ in 0..node_repeat(ast, child) {
                slots.push((child, weight));
            }
        }
        if slots.is_empty() {
            return;
        }
        let mut total: f32 = slots.iter().map(|&(_, w)| w).sum();
        if total <= 0.0 {
            total = slots.len() as f32;
        }

        let mut elapsed = 0.0;
        for (child, weight) in slots {
            let child_span = weight / total * span;
            self.compile_node(child, seq, offset + elapsed, child_span);
            elapsed += child_span;
        }
    }

    fn compile_atom(&mut self, node: NodeIndex, atom: &MiniAtom, seq: u16, offset: f32, span: f32) {
        use chumsky::span::Span as _;

        let values = match atom {
            MiniAtom::Rest => return,
            MiniAtom::Pitch { midi } => vec![mtof(f32::from(*midi))],
            MiniAtom::Chord {
                root_midi,
                intervals,
            } => intervals
                .iter()
                .take(MAX_VALUES_PER_EVENT)
                .map(|&iv| mtof((i32::from(*root_midi) + i32::from(iv)) as f32))
                .collect(),
            MiniAtom::Sample { name, .. } => {
                self.is_sample_pattern = true;
                let event_idx = self.sequences[usize::from(seq)].events.len() as u16;
                self.sample_names.insert(name.clone());
                self.sample_mappings.push(SampleMapping {
                    seq_idx: seq,
                    event_idx,
                    name: name.clone(),
                });
                let id = self.samples.map_or(0, |reg| reg.id(name));
                vec![id as f32]
            }
        };

        let atom_span = self.ast[node].span;
        self.push_event(
            seq,
            Event {
                kind: EventKind::Data { values },
                time: offset,
                duration: span,
                chance: 1.0,
                source_offset: saturating_u16(atom_span.start().saturating_sub(self.base_offset)),
                source_length: saturating_u16(atom_span.end() - atom_span.start()),
            },
        );
    }

    /// Build an ALTERNATE or RANDOM sub-sequence from `node`'s children.
    /// Returns its index, or `None` if it ended up empty.
    fn build_branches(&mut self, node: NodeIndex, mode: SequenceMode) -> Option<u16> {
        let branch_seq = self.new_sequence(mode);
        let children: Vec<_> = self.ast.children(node).collect();
        for child in children {
            for _ in 0..node_repeat(self.ast, child) {
                self.compile_branch(child, branch_seq);
            }
        }
        (!self.is_empty(branch_seq)).then_some(branch_seq)
    }

    fn compile_branching(
        &mut self,
        node: NodeIndex,
        mode: SequenceMode,
        seq: u16,
        offset: f32,
        span: f32,
    ) {
        if let Some(branch_seq) = self.build_branches(node, mode) {
            self.push_event(seq, Event::sub_seq(branch_seq, offset, span));
        }
    }

    /// One branch of an alternation or choice. Compound children get their
    /// own NORMAL sub-sequence so the branch stays a single unit.
    fn compile_branch(&mut self, child: NodeIndex, branch_seq: u16) {
        if !is_compound(self.ast, child) {
            self.compile_node(child, branch_seq, 0.0, 1.0);
            return;
        }
        let wrapper = self.new_sequence(SequenceMode::Normal);
        self.compile_node(child, wrapper, 0.0, 1.0);
        if !self.is_empty(wrapper) {
            self.push_event(branch_seq, Event::sub_seq(wrapper, 0.0, 1.0));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_euclid(
        &mut self,
        node: NodeIndex,
        hits: u8,
        steps: u8,
        rotation: u8,
        seq: u16,
        offset: f32,
        span: f32,
    ) {
        let Some(child) = self.ast[node].first_child else {
            return;
        };
        let mask = euclid::pattern(u32::from(hits), u32::from(steps), u32::from(rotation));
        let step_span = span / f32::from(steps.max(1));
        for (i, hit) in mask.into_iter().enumerate() {
            if hit {
                self.compile_node(child, seq, offset + i as f32 * step_span, step_span);
            }
        }
    }

    fn compile_modified(
        &mut self,
        node: NodeIndex,
        modifier: Modifier,
        value: f32,
        seq: u16,
        offset: f32,
        span: f32,
    ) {
        let Some(child) = self.ast[node].first_child else {
            return;
        };
        match modifier {
            Modifier::Speed => {
                let count = (value as i32).max(1);
                if matches!(self.ast[child].kind, NodeKind::MiniSequence) {
                    // Each slot advances the one shared alternation.
                    if let Some(alt) = self.build_branches(child, SequenceMode::Alternate) {
                        let slot = span / count as f32;
                        for i in 0..count {
                            self.push_event(seq, Event::sub_seq(alt, offset + i as f32 * slot, slot));
                        }
                    }
                } else {
                    let inner = self.new_sequence(SequenceMode::Normal);
                    let slot = 1.0 / count as f32;
                    for i in 0..count {
                        self.compile_node(child, inner, i as f32 * slot, slot);
                    }
                    if !self.is_empty(inner) {
                        self.push_event(seq, Event::sub_seq(inner, offset, span));
                    }
                }
            }
            Modifier::Chance => {
                let before = self.sequences[usize::from(seq)].events.len();
                self.compile_node(child, seq, offset, span);
                for event in &mut self.sequences[usize::from(seq)].events[before..] {
                    event.chance = value;
                }
            }
            // Repeat and weight are consumed by the parent's subdivision;
            // slow and duration do not change the compiled layout.
            Modifier::Repeat | Modifier::Weight | Modifier::Slow | Modifier::Duration => {
                self.compile_node(child, seq, offset, span)
            }
        }
    }
}

/// Source positions past `u16::MAX` clamp instead of wrapping.
fn saturating_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

// ── Node helpers ────────────────────────────────────────────────────────────

/// `@n` weight of a node, 1.0 when absent.
pub fn node_weight(ast: &Ast, node: NodeIndex) -> f32 {
    match ast[node].kind {
        NodeKind::MiniModified {
            modifier: Modifier::Weight,
            value,
        } => value,
        _ => 1.0,
    }
}

/// `!n` repeat count of a node, 1 when absent.
pub fn node_repeat(ast: &Ast, node: NodeIndex) -> usize {
    match ast[node].kind {
        NodeKind::MiniModified {
            modifier: Modifier::Repeat,
            value,
        } => value.max(0.0) as usize,
        _ => 1,
    }
}

fn is_compound(ast: &Ast, node: NodeIndex) -> bool {
    match ast[node].kind {
        NodeKind::MiniModified { .. } => ast[node]
            .first_child
            .is_some_and(|c| is_compound(ast, c)),
        NodeKind::MiniGroup
        | NodeKind::MiniPattern
        | NodeKind::MiniPolyrhythm
        | NodeKind::MiniPolymeter { .. }
        | NodeKind::MiniEuclidean { .. } => true,
        _ => false,
    }
}

/// Top-level slot count of a pattern (each slot is one beat), at least 1.
pub fn top_level_elements(ast: &Ast, root: NodeIndex) -> usize {
    if !matches!(ast[root].kind, NodeKind::MiniPattern) {
        return 1;
    }
    ast.children(root)
        .map(|c| node_repeat(ast, c))
        .sum::<usize>()
        .max(1)
}
