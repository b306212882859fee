// chord.rs — Chord symbol parsing
//
// Parses symbols such as `Am`, `C7`, `Fmaj7`, `Bb+` into a root MIDI note and
// semitone intervals. Unknown qualities fall back to a major triad so that
// any `[A-G][#b]*` root yields a chord.

/// Parsed chord symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordInfo {
    /// Root name, uppercased, with accidentals (`C`, `F#`, `Bb`).
    pub root: String,
    /// Quality suffix as recognised (`""` for major or unknown).
    pub quality: String,
    /// Root note in octave 4.
    pub root_midi: u8,
    pub intervals: Vec<i8>,
}

const MAJOR: &[i8] = &[0, 4, 7];

const QUALITIES: &[(&str, &[i8])] = &[
    // Triads
    ("", MAJOR),
    ("maj", MAJOR),
    ("M", MAJOR),
    ("m", &[0, 3, 7]),
    ("min", &[0, 3, 7]),
    ("-", &[0, 3, 7]),
    ("dim", &[0, 3, 6]),
    ("o", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("+", &[0, 4, 8]),
    ("sus2", &[0, 2, 7]),
    ("sus4", &[0, 5, 7]),
    ("sus", &[0, 5, 7]),
    // Sevenths
    ("7", &[0, 4, 7, 10]),
    ("dom7", &[0, 4, 7, 10]),
    ("M7", &[0, 4, 7, 11]),
    ("maj7", &[0, 4, 7, 11]),
    ("^", &[0, 4, 7, 11]),
    ("^7", &[0, 4, 7, 11]),
    ("m7", &[0, 3, 7, 10]),
    ("min7", &[0, 3, 7, 10]),
    ("-7", &[0, 3, 7, 10]),
    ("dim7", &[0, 3, 6, 9]),
    ("o7", &[0, 3, 6, 9]),
    ("m7b5", &[0, 3, 6, 10]),
    ("0", &[0, 3, 6, 10]),
    ("aug7", &[0, 4, 8, 10]),
    ("+7", &[0, 4, 8, 10]),
    ("mM7", &[0, 3, 7, 11]),
    ("m^7", &[0, 3, 7, 11]),
    ("minmaj7", &[0, 3, 7, 11]),
    // Extended
    ("6", &[0, 4, 7, 9]),
    ("m6", &[0, 3, 7, 9]),
    ("min6", &[0, 3, 7, 9]),
    ("9", &[0, 4, 7, 10, 14]),
    ("M9", &[0, 4, 7, 11, 14]),
    ("maj9", &[0, 4, 7, 11, 14]),
    ("m9", &[0, 3, 7, 10, 14]),
    ("min9", &[0, 3, 7, 10, 14]),
    ("add9", &[0, 4, 7, 14]),
    ("add2", &[0, 2, 4, 7]),
    ("11", &[0, 4, 7, 10, 14, 17]),
    ("m11", &[0, 3, 7, 10, 14, 17]),
    ("13", &[0, 4, 7, 10, 14, 21]),
    // Power chord
    ("5", &[0, 7]),
];

/// Intervals for a quality suffix.
pub fn lookup_quality(quality: &str) -> Option<&'static [i8]> {
    QUALITIES
        .iter()
        .find(|(q, _)| *q == quality)
        .map(|&(_, iv)| iv)
}

fn letter_semitone(letter: char) -> Option<i32> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// MIDI note for a note letter with accidental offset and octave, clamped to 0..=127.
pub fn note_to_midi(letter: char, accidental: i32, octave: i32) -> Option<u8> {
    let semitone = letter_semitone(letter)?;
    let midi = (octave + 1) * 12 + semitone + accidental;
    Some(midi.clamp(0, 127) as u8)
}

/// MIDI note of a root name such as `F#` or `Bb` in `octave`.
pub fn root_to_midi(root: &str, octave: i32) -> Option<u8> {
    let mut chars = root.chars();
    let letter = chars.next()?;
    let mut accidental = 0;
    for c in chars {
        match c {
            '#' => accidental += 1,
            'b' => accidental -= 1,
            _ => return None,
        }
    }
    note_to_midi(letter, accidental, octave)
}

/// Parse one chord symbol.
pub fn parse_symbol(symbol: &str) -> Option<ChordInfo> {
    let mut chars = symbol.char_indices().peekable();
    let (_, first) = chars.next()?;
    letter_semitone(first)?;

    let mut root = first.to_ascii_uppercase().to_string();
    let mut quality_start = first.len_utf8();
    while let Some(&(i, c)) = chars.peek() {
        if c != '#' && c != 'b' {
            break;
        }
        root.push(c);
        quality_start = i + c.len_utf8();
        chars.next();
    }

    let quality = &symbol[quality_start..];
    let (quality, intervals) = match lookup_quality(quality) {
        Some(iv) => (quality.to_string(), iv.to_vec()),
        None => (String::new(), MAJOR.to_vec()),
    };
    let root_midi = root_to_midi(&root, 4)?;
    Some(ChordInfo {
        root,
        quality,
        root_midi,
        intervals,
    })
}

/// MIDI notes of `chord` with its root in `octave`; out-of-range notes are dropped.
pub fn expand(chord: &ChordInfo, octave: i32) -> Vec<u8> {
    let Some(base) = root_to_midi(&chord.root, octave) else {
        return Vec::new();
    };
    chord
        .intervals
        .iter()
        .map(|&iv| i32::from(base) + i32::from(iv))
        .filter(|n| (0..=127).contains(n))
        .map(|n| n as u8)
        .collect()
}

/// Whitespace-separated chord symbols; unparseable entries are skipped.
pub fn parse_progression(text: &str) -> Vec<ChordInfo> {
    text.split_whitespace().filter_map(parse_symbol).collect()
}

/// Equal-tempered frequency of a MIDI note (A4 = 440 Hz).
pub fn mtof(midi: f32) -> f32 {
    440.0 * 2f32.powf((midi - 69.0) / 12.0)
}
