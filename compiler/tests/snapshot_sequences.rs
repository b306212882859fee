// Snapshot tests: lock compiled sequence programs.
//
// Each pattern goes through `SequenceCompiler` and the result is rendered as
// a compact text listing (one line per event) so the baselines stay readable
// and independent of state-id hashes.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use std::fmt::Write as _;

use pulsec::ast::Ast;
use pulsec::mini_parser::parse_into;
use pulsec::samples::SampleRegistry;
use pulsec::sequence::{CompiledPattern, EventKind, SequenceCompiler};

fn compile(pattern: &str, samples: Option<&SampleRegistry>) -> CompiledPattern {
    let mut ast = Ast::new();
    let parsed = parse_into(&mut ast, pattern, 0, false);
    assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
    let root = parsed.root.expect("pattern root");
    SequenceCompiler::new(&ast, samples)
        .compile(root)
        .unwrap_or_else(|| panic!("no events in {pattern:?}"))
}

fn render(p: &CompiledPattern) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "cycle_length={} events={} voices={} samples={}",
        p.cycle_length, p.total_events, p.max_voices, p.is_sample_pattern
    );
    for (i, seq) in p.sequences.iter().enumerate() {
        let _ = writeln!(out, "seq {i} {:?}", seq.mode);
        for e in &seq.events {
            let body = match &e.kind {
                EventKind::Data { values } => {
                    let vals: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
                    format!("data [{}]", vals.join(", "))
                }
                EventKind::SubSeq { seq_id } => format!("sub {seq_id}"),
            };
            let _ = writeln!(
                out,
                "  t={:.4} d={:.4} p={:.2} {body} @{}+{}",
                e.time, e.duration, e.chance, e.source_offset, e.source_length
            );
        }
    }
    for m in &p.sample_mappings {
        let _ = writeln!(out, "map seq={} event={} {}", m.seq_idx, m.event_idx, m.name);
    }
    out
}

fn snapshot_sequence(name: &str, pattern: &str, samples: Option<&SampleRegistry>) {
    let output = render(&compile(pattern, samples));
    insta::assert_snapshot!(format!("seq_{name}"), output);
}

#[test]
fn snapshot_seq_flat() {
    snapshot_sequence("flat", "c4 e4 g4 c5", None);
}

#[test]
fn snapshot_seq_alternation() {
    snapshot_sequence("alternation", "a <b [c d]>", None);
}

#[test]
fn snapshot_seq_euclid_samples() {
    let reg = SampleRegistry::with_defaults();
    snapshot_sequence("euclid_samples", "bd(3,8) ~", Some(&reg));
}

#[test]
fn snapshot_seq_weight_chance() {
    snapshot_sequence("weight_chance", "c4?0.5 e4@3", None);
}
