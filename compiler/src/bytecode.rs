// bytecode.rs — VM instruction set and instruction encoding
//
// The VM executes a flat list of instructions; each reads up to five input
// buffers and writes one output buffer. Constants are carried bit-for-bit
// in the 32-bit `state_id` slot of a PUSH_CONST instruction.
//
// Preconditions: none.
// Postconditions: `serialize` output is a pure function of the instruction list.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::id::BufferIndex;

/// Unused input slot marker.
pub const UNUSED_INPUT: u16 = 0xFFFF;

/// Number of input slots per instruction.
pub const MAX_INPUTS: usize = 5;

/// Size of one encoded instruction in bytes.
pub const INSTRUCTION_BYTES: usize = 20;

// ── Opcodes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    PushConst = 1,
    Copy = 2,

    Add = 10,
    Sub = 11,
    Mul = 12,
    Div = 13,
    Pow = 14,
    Neg = 15,

    OscSin = 20,
    OscTri = 21,
    OscSaw = 22,
    OscSqr = 23,
    OscRamp = 24,
    OscPhasor = 25,
    OscSqrMinblep = 26,
    OscSqrPwm = 27,
    OscSawPwm = 28,
    OscSqrPwmMinblep = 29,

    FilterSvfLp = 33,
    FilterSvfHp = 34,
    FilterSvfBp = 35,
    FilterMoog = 36,

    Abs = 40,
    Sqrt = 41,
    Log = 42,
    Exp = 43,
    Min = 44,
    Max = 45,
    Clamp = 46,
    Wrap = 47,
    Floor = 48,
    Ceil = 49,

    Output = 50,
    Noise = 51,
    Mtof = 52,
    Dc = 53,
    Slew = 54,
    Sah = 55,
    EnvGet = 56,

    EnvAdsr = 60,
    EnvAr = 61,

    Delay = 70,

    OscSin2x = 80,
    OscTri2x = 81,
    OscSaw2x = 82,
    OscSqr2x = 83,
    OscSin4x = 84,
    OscTri4x = 85,
    OscSaw4x = 86,
    OscSqr4x = 87,
    OscSqrPwm4x = 88,
    OscSawPwm4x = 89,

    Clock = 90,
    Lfo = 91,
    SeqStep = 92,
    Euclid = 93,
    Trigger = 94,
    Timeline = 95,
    SeqpatQuery = 96,
    SeqpatStep = 97,

    SamplePlay = 100,

    CmpEq = 110,
    LogicAnd = 111,
    Select = 112,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            PushConst => "PUSH_CONST",
            Copy => "COPY",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Pow => "POW",
            Neg => "NEG",
            OscSin => "OSC_SIN",
            OscTri => "OSC_TRI",
            OscSaw => "OSC_SAW",
            OscSqr => "OSC_SQR",
            OscRamp => "OSC_RAMP",
            OscPhasor => "OSC_PHASOR",
            OscSqrMinblep => "OSC_SQR_MINBLEP",
            OscSqrPwm => "OSC_SQR_PWM",
            OscSawPwm => "OSC_SAW_PWM",
            OscSqrPwmMinblep => "OSC_SQR_PWM_MINBLEP",
            FilterSvfLp => "FILTER_SVF_LP",
            FilterSvfHp => "FILTER_SVF_HP",
            FilterSvfBp => "FILTER_SVF_BP",
            FilterMoog => "FILTER_MOOG",
            Abs => "ABS",
            Sqrt => "SQRT",
            Log => "LOG",
            Exp => "EXP",
            Min => "MIN",
            Max => "MAX",
            Clamp => "CLAMP",
            Wrap => "WRAP",
            Floor => "FLOOR",
            Ceil => "CEIL",
            Output => "OUTPUT",
            Noise => "NOISE",
            Mtof => "MTOF",
            Dc => "DC",
            Slew => "SLEW",
            Sah => "SAH",
            EnvGet => "ENV_GET",
            EnvAdsr => "ENV_ADSR",
            EnvAr => "ENV_AR",
            Delay => "DELAY",
            OscSin2x => "OSC_SIN_2X",
            OscTri2x => "OSC_TRI_2X",
            OscSaw2x => "OSC_SAW_2X",
            OscSqr2x => "OSC_SQR_2X",
            OscSin4x => "OSC_SIN_4X",
            OscTri4x => "OSC_TRI_4X",
            OscSaw4x => "OSC_SAW_4X",
            OscSqr4x => "OSC_SQR_4X",
            OscSqrPwm4x => "OSC_SQR_PWM_4X",
            OscSawPwm4x => "OSC_SAW_PWM_4X",
            Clock => "CLOCK",
            Lfo => "LFO",
            SeqStep => "SEQ_STEP",
            Euclid => "EUCLID",
            Trigger => "TRIGGER",
            Timeline => "TIMELINE",
            SeqpatQuery => "SEQPAT_QUERY",
            SeqpatStep => "SEQPAT_STEP",
            SamplePlay => "SAMPLE_PLAY",
            CmpEq => "CMP_EQ",
            LogicAnd => "LOGIC_AND",
            Select => "SELECT",
        }
    }

    /// Oscillators (any oversampling or band-limiting variant) and noise.
    pub fn is_audio_rate_producer(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            OscSin
                | OscSin2x
                | OscSin4x
                | OscTri
                | OscTri2x
                | OscTri4x
                | OscSaw
                | OscSaw2x
                | OscSaw4x
                | OscSqr
                | OscSqr2x
                | OscSqr4x
                | OscRamp
                | OscPhasor
                | OscSqrMinblep
                | OscSqrPwm
                | OscSawPwm
                | OscSqrPwmMinblep
                | OscSqrPwm4x
                | OscSawPwm4x
                | Noise
        )
    }

    /// Arithmetic that propagates audio rate from its operands.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pow | Opcode::Neg
        )
    }

    /// 4× oversampled replacement for a basic oscillator, if one exists.
    pub fn oversampled(self) -> Option<Opcode> {
        use Opcode::*;
        match self {
            OscSin => Some(OscSin4x),
            OscTri => Some(OscTri4x),
            OscSaw => Some(OscSaw4x),
            OscSqr => Some(OscSqr4x),
            OscSqrPwm => Some(OscSqrPwm4x),
            OscSawPwm => Some(OscSawPwm4x),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl serde::Serialize for Opcode {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

// ── Instruction ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Auxiliary 8-bit field (control rate, packed release time, ...).
    pub rate: u8,
    pub out_buffer: u16,
    pub inputs: [u16; MAX_INPUTS],
    pub state_id: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, out: BufferIndex, inputs: &[BufferIndex], state_id: u32) -> Self {
        let mut slots = [UNUSED_INPUT; MAX_INPUTS];
        for (slot, input) in slots.iter_mut().zip(inputs) {
            *slot = input.0;
        }
        Self {
            opcode,
            rate: 0,
            out_buffer: out.0,
            inputs: slots,
            state_id,
        }
    }

    pub fn make_nullary(opcode: Opcode, out: BufferIndex, state_id: u32) -> Self {
        Self::new(opcode, out, &[], state_id)
    }

    pub fn make_unary(opcode: Opcode, out: BufferIndex, a: BufferIndex, state_id: u32) -> Self {
        Self::new(opcode, out, &[a], state_id)
    }

    pub fn make_binary(
        opcode: Opcode,
        out: BufferIndex,
        a: BufferIndex,
        b: BufferIndex,
        state_id: u32,
    ) -> Self {
        Self::new(opcode, out, &[a, b], state_id)
    }

    pub fn make_ternary(
        opcode: Opcode,
        out: BufferIndex,
        a: BufferIndex,
        b: BufferIndex,
        c: BufferIndex,
        state_id: u32,
    ) -> Self {
        Self::new(opcode, out, &[a, b, c], state_id)
    }

    /// PUSH_CONST carrying `value`'s exact bit pattern.
    pub fn push_const(out: BufferIndex, value: f32) -> Self {
        Self::make_nullary(Opcode::PushConst, out, value.to_bits())
    }

    /// Decoded constant of a PUSH_CONST instruction.
    pub fn const_value(&self) -> Option<f32> {
        (self.opcode == Opcode::PushConst).then(|| f32::from_bits(self.state_id))
    }

    pub fn with_rate(mut self, rate: u8) -> Self {
        self.rate = rate;
        self
    }

    pub fn out(&self) -> BufferIndex {
        BufferIndex(self.out_buffer)
    }

    pub fn input(&self, slot: usize) -> BufferIndex {
        BufferIndex(self.inputs[slot])
    }

    /// Little-endian packed encoding:
    /// `opcode rate out in0..in4 pad(2) state_id`.
    pub fn to_bytes(&self) -> [u8; INSTRUCTION_BYTES] {
        let mut bytes = [0u8; INSTRUCTION_BYTES];
        bytes[0] = self.opcode as u8;
        bytes[1] = self.rate;
        bytes[2..4].copy_from_slice(&self.out_buffer.to_le_bytes());
        for (i, input) in self.inputs.iter().enumerate() {
            let at = 4 + i * 2;
            bytes[at..at + 2].copy_from_slice(&input.to_le_bytes());
        }
        bytes[16..20].copy_from_slice(&self.state_id.to_le_bytes());
        bytes
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {}", self.opcode.name(), self.out())?;
        if let Some(v) = self.const_value() {
            return write!(f, " = {v}");
        }
        let used: Vec<String> = self
            .inputs
            .iter()
            .filter(|&&i| i != UNUSED_INPUT)
            .map(|&i| BufferIndex(i).to_string())
            .collect();
        if !used.is_empty() {
            write!(f, " <- {}", used.join(", "))?;
        }
        if self.rate != 0 {
            write!(f, " rate={}", self.rate)?;
        }
        if self.state_id != 0 {
            write!(f, " state={:08x}", self.state_id)?;
        }
        Ok(())
    }
}

// ── Program encoding ─────────────────────────────────────────────────────

/// Concatenated byte encoding of a program.
pub fn serialize(program: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(program.len() * INSTRUCTION_BYTES);
    for inst in program {
        out.extend_from_slice(&inst.to_bytes());
    }
    out
}

/// SHA-256 of the serialized program, lowercase hex.
pub fn fingerprint(program: &[Instruction]) -> String {
    let digest = Sha256::digest(serialize(program));
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
