// registry.rs — Builtin function registry
//
// Maps DSL function names to VM opcodes together with their arity, default
// values for optional inputs, named parameters and whether the emitted
// instruction carries persistent state. Aliases (`sine`, `lowpass`, ...)
// resolve to a canonical entry before lookup.

use std::collections::HashMap;

use crate::bytecode::Opcode;

// ── Data types ──────────────────────────────────────────────────────────────

/// Metadata for one builtin.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinInfo {
    pub name: &'static str,
    pub opcode: Opcode,
    /// Number of required inputs.
    pub input_count: usize,
    /// Default values for the optional inputs that follow the required ones.
    pub defaults: Vec<f32>,
    /// Emitted instruction needs a state ID (oscillator phase, filter memory, ...).
    pub requires_state: bool,
    pub param_names: Vec<&'static str>,
}

impl BuiltinInfo {
    pub fn total_params(&self) -> usize {
        self.input_count + self.defaults.len()
    }

    pub fn has_default(&self, index: usize) -> bool {
        index >= self.input_count && index - self.input_count < self.defaults.len()
    }

    pub fn default_value(&self, index: usize) -> Option<f32> {
        index
            .checked_sub(self.input_count)
            .and_then(|i| self.defaults.get(i).copied())
    }

    pub fn find_param(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|&p| p == name)
    }
}

const ALIASES: &[(&str, &str)] = &[
    ("sine", "sin"),
    ("triangle", "tri"),
    ("sawtooth", "saw"),
    ("square", "sqr"),
    ("lowpass", "lp"),
    ("highpass", "hp"),
    ("bandpass", "bp"),
    ("output", "out"),
    ("moogladder", "moog"),
    ("envelope", "adsr"),
    ("svflp", "lp"),
    ("svfhp", "hp"),
    ("svfbp", "bp"),
];

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Registry {
    builtins: HashMap<&'static str, BuiltinInfo>,
    aliases: HashMap<&'static str, &'static str>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry populated with every builtin the VM understands.
    pub fn new() -> Self {
        let mut reg = Registry {
            builtins: HashMap::new(),
            aliases: ALIASES.iter().copied().collect(),
        };
        reg.load_defaults();
        reg
    }

    fn add(
        &mut self,
        name: &'static str,
        opcode: Opcode,
        params: &[&'static str],
        required: usize,
        defaults: &[f32],
        requires_state: bool,
    ) {
        self.builtins.insert(
            name,
            BuiltinInfo {
                name,
                opcode,
                input_count: required,
                defaults: defaults.to_vec(),
                requires_state,
                param_names: params.to_vec(),
            },
        );
    }

    fn load_defaults(&mut self) {
        use Opcode::*;

        // Oscillators: frequency in, phase state.
        self.add("sin", OscSin, &["freq"], 1, &[], true);
        self.add("tri", OscTri, &["freq"], 1, &[], true);
        self.add("saw", OscSaw, &["freq"], 1, &[], true);
        self.add("sqr", OscSqr, &["freq"], 1, &[], true);
        self.add("ramp", OscRamp, &["freq"], 1, &[], true);
        self.add("phasor", OscPhasor, &["freq"], 1, &[], true);
        self.add("sqr_minblep", OscSqrMinblep, &["freq"], 1, &[], true);
        self.add("sqr_pwm", OscSqrPwm, &["freq", "pwm"], 1, &[0.5], true);
        self.add("saw_pwm", OscSawPwm, &["freq", "pwm"], 1, &[0.5], true);
        self.add("sqr_pwm_minblep", OscSqrPwmMinblep, &["freq", "pwm"], 1, &[0.5], true);

        // Filters
        self.add("lp", FilterSvfLp, &["in", "cut", "q"], 2, &[0.707], true);
        self.add("hp", FilterSvfHp, &["in", "cut", "q"], 2, &[0.707], true);
        self.add("bp", FilterSvfBp, &["in", "cut", "q"], 2, &[0.707], true);
        self.add("moog", FilterMoog, &["in", "cut", "res"], 2, &[1.0], true);

        // Envelopes
        self.add("adsr", EnvAdsr, &["gate", "attack", "decay"], 1, &[0.01, 0.1], true);
        self.add("ar", EnvAr, &["trig", "attack", "release"], 1, &[0.01, 0.3], true);

        self.add("delay", Delay, &["in", "time", "fb"], 3, &[], true);

        // Arithmetic
        self.add("add", Add, &["a", "b"], 2, &[], false);
        self.add("sub", Sub, &["a", "b"], 2, &[], false);
        self.add("mul", Mul, &["a", "b"], 2, &[], false);
        self.add("div", Div, &["a", "b"], 2, &[], false);
        self.add("pow", Pow, &["base", "exp"], 2, &[], false);

        // Math
        self.add("neg", Neg, &["x"], 1, &[], false);
        self.add("abs", Abs, &["x"], 1, &[], false);
        self.add("sqrt", Sqrt, &["x"], 1, &[], false);
        self.add("log", Log, &["x"], 1, &[], false);
        self.add("exp", Exp, &["x"], 1, &[], false);
        self.add("floor", Floor, &["x"], 1, &[], false);
        self.add("ceil", Ceil, &["x"], 1, &[], false);
        self.add("min", Min, &["a", "b"], 2, &[], false);
        self.add("max", Max, &["a", "b"], 2, &[], false);
        self.add("clamp", Clamp, &["x", "lo", "hi"], 3, &[], false);
        self.add("wrap", Wrap, &["x", "lo", "hi"], 3, &[], false);

        // Utility
        self.add("noise", Noise, &[], 0, &[], true);
        self.add("mtof", Mtof, &["note"], 1, &[], false);
        self.add("dc", Dc, &["offset"], 1, &[], false);
        self.add("slew", Slew, &["target", "rate"], 2, &[], true);
        self.add("sah", Sah, &["in", "trig"], 2, &[], true);

        // `out(x)` duplicates its input to both channels in codegen.
        self.add("out", Output, &["L", "R"], 1, &[], false);

        // Timing / sequencing
        self.add("clock", Clock, &[], 0, &[], false);
        self.add("lfo", Lfo, &["rate", "duty"], 1, &[0.5], true);
        self.add("trigger", Trigger, &["div"], 1, &[], true);
        self.add("euclid", Euclid, &["hits", "steps", "rot"], 2, &[0.0], true);
        self.add("seq_step", SeqStep, &["speed"], 1, &[], true);
        self.add("timeline", Timeline, &[], 0, &[], true);
    }

    /// Canonical name for `name` (resolves aliases).
    pub fn canonical_name<'a>(&self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(&target) => target,
            None => name,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&BuiltinInfo> {
        self.builtins.get(self.canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn builtins(&self) -> impl Iterator<Item = &BuiltinInfo> {
        self.builtins.values()
    }

    /// `(alias, canonical)` pairs.
    pub fn aliases(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.aliases.iter().map(|(&alias, &canonical)| (alias, canonical))
    }

    pub fn len(&self) -> usize {
        self.builtins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty()
    }
}
