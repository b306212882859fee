// Lexer for mini-notation pattern strings.
//
// Tokenizes the body of a `pat("...")`-style literal. Uses the `logos` crate
// for the raw scan, then classifies each word as a pitch (`c4`, `f#3`, `Bb5`),
// a chord symbol (`Am`, `C7`, `Fmaj7`) or a sample name (`bd`, `sd:2`).
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans shifted by the
//   caller's base offset, plus any lex errors.
// Failure modes: unrecognized characters produce `M001` diagnostics; lexing continues.
// Side effects: none.

use std::fmt;

use logos::Logos;

use crate::ast::Span;
use crate::chord;
use crate::diag::{codes, Diagnostic};

/// Raw scanner tokens. Words are classified afterwards.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum RawToken {
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token("|")]
    Pipe,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token(":")]
    Colon,
    #[token("@")]
    At,
    #[token("!")]
    Bang,
    #[token("?")]
    Question,
    #[token("%")]
    Percent,
    #[token("~")]
    #[token("_")]
    Rest,

    #[regex(r"[0-9]+(\.[0-9]+)?", parse_number)]
    #[regex(r"\.[0-9]+", parse_number)]
    Number(f64),

    /// Letter-initial word with an optional `:n` sample variant suffix.
    #[regex(r"[A-Za-z][A-Za-z0-9_#\^+\-]*(:[0-9]+)?")]
    Word,
}

fn parse_number(lex: &mut logos::Lexer<'_, RawToken>) -> Option<f64> {
    lex.slice().parse().ok()
}

/// Classified mini-notation token.
#[derive(Debug, Clone, PartialEq)]
pub enum MiniToken {
    LBracket,
    RBracket,
    LAngle,
    RAngle,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Pipe,
    Star,
    Slash,
    Colon,
    At,
    Bang,
    Question,
    Percent,
    Rest,
    Number(f64),
    Pitch { midi: u8 },
    Chord { root_midi: u8, intervals: Vec<i8> },
    Sample { name: String, variant: u8 },
}

impl fmt::Display for MiniToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiniToken::LBracket => write!(f, "["),
            MiniToken::RBracket => write!(f, "]"),
            MiniToken::LAngle => write!(f, "<"),
            MiniToken::RAngle => write!(f, ">"),
            MiniToken::LParen => write!(f, "("),
            MiniToken::RParen => write!(f, ")"),
            MiniToken::LBrace => write!(f, "{{"),
            MiniToken::RBrace => write!(f, "}}"),
            MiniToken::Comma => write!(f, ","),
            MiniToken::Pipe => write!(f, "|"),
            MiniToken::Star => write!(f, "*"),
            MiniToken::Slash => write!(f, "/"),
            MiniToken::Colon => write!(f, ":"),
            MiniToken::At => write!(f, "@"),
            MiniToken::Bang => write!(f, "!"),
            MiniToken::Question => write!(f, "?"),
            MiniToken::Percent => write!(f, "%"),
            MiniToken::Rest => write!(f, "~"),
            MiniToken::Number(v) => write!(f, "{v}"),
            MiniToken::Pitch { midi, .. } => write!(f, "<pitch {midi}>"),
            MiniToken::Chord { root_midi, .. } => write!(f, "<chord {root_midi}>"),
            MiniToken::Sample { name, variant: 0 } => write!(f, "{name}"),
            MiniToken::Sample { name, variant } => write!(f, "{name}:{variant}"),
        }
    }
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(MiniToken, Span)>,
    pub errors: Vec<Diagnostic>,
}

// ── Word classification ──

fn is_pitch_letter(c: char) -> bool {
    matches!(c, 'a'..='g' | 'A'..='G')
}

/// `[a-gA-G](#|b)?[0-9]{0,2}`; uppercase letters need an explicit octave,
/// and `b` only reads as a flat when no letter follows it.
fn classify_pitch(word: &str) -> Option<MiniToken> {
    let bytes = word.as_bytes();
    let letter = *bytes.first()? as char;
    if !is_pitch_letter(letter) {
        return None;
    }
    let mut pos = 1;
    let mut accidental = 0;
    match bytes.get(pos) {
        Some(b'#') => {
            accidental = 1;
            pos += 1;
        }
        Some(b'b') if !bytes.get(pos + 1).is_some_and(|c| c.is_ascii_alphabetic()) => {
            accidental = -1;
            pos += 1;
        }
        _ => {}
    }
    let digits = bytes[pos..].iter().take_while(|c| c.is_ascii_digit()).count();
    if digits > 2 || pos + digits != bytes.len() {
        return None;
    }
    if letter.is_ascii_uppercase() && digits == 0 {
        return None;
    }
    let octave = if digits == 0 {
        4
    } else {
        word[pos..].parse::<i32>().ok()?
    };
    let midi = chord::note_to_midi(letter, accidental, octave)?;
    Some(MiniToken::Pitch { midi })
}

/// Uppercase chord symbol. A single-digit suffix reads as an octave after an
/// accidental (`Bb5`) or for the digits 0-4 and 8 (`A4`); otherwise it is a
/// chord quality (`C7`).
fn classify_chord(word: &str) -> Option<MiniToken> {
    let bytes = word.as_bytes();
    if !matches!(bytes.first(), Some(b'A'..=b'G')) {
        return None;
    }
    let has_accidental = matches!(bytes.get(1), Some(b'#' | b'b'));
    let quality_start = if has_accidental { 2 } else { 1 };
    let quality = &word[quality_start..];
    if quality.contains('#') {
        return None;
    }
    if let [digit] = quality.as_bytes() {
        if digit.is_ascii_digit()
            && (has_accidental || matches!(digit, b'0'..=b'4' | b'8'))
        {
            return None;
        }
    }
    let info = chord::parse_symbol(word)?;
    Some(MiniToken::Chord {
        root_midi: info.root_midi,
        intervals: info.intervals,
    })
}

fn classify_word(word: &str, sample_only: bool) -> Option<MiniToken> {
    if sample_only {
        return None;
    }
    if word.starts_with(|c: char| c.is_ascii_uppercase()) {
        if let Some(tok) = classify_chord(word) {
            return Some(tok);
        }
    }
    classify_pitch(word)
}

/// Split a scanned word into classified tokens. A `:n` suffix is a sample
/// variant for sample words and a duration modifier otherwise.
fn push_word(text: &str, start: usize, sample_only: bool, out: &mut Vec<(MiniToken, Span)>) {
    let (base, suffix) = match text.find(':') {
        Some(i) => (&text[..i], Some(&text[i + 1..])),
        None => (text, None),
    };
    let base_span: Span = (start..start + base.len()).into();

    match classify_word(base, sample_only) {
        Some(tok) => {
            out.push((tok, base_span));
            if let Some(digits) = suffix {
                let colon_at = start + base.len();
                out.push((MiniToken::Colon, (colon_at..colon_at + 1).into()));
                let value = digits.parse().unwrap_or(0.0);
                out.push((
                    MiniToken::Number(value),
                    (colon_at + 1..colon_at + 1 + digits.len()).into(),
                ));
            }
        }
        None => {
            let variant = suffix
                .and_then(|d| d.parse::<u32>().ok())
                .map_or(0, |v| v.min(u32::from(u8::MAX)) as u8);
            out.push((
                MiniToken::Sample {
                    name: base.to_string(),
                    variant,
                },
                (start..start + text.len()).into(),
            ));
        }
    }
}

// ── Public API ──

/// Lex a mini-notation string. `base_offset` is added to every span so that
/// spans point into the enclosing source.
///
/// With `sample_only`, every word is a sample name (no pitch or chord detection).
pub fn lex(source: &str, base_offset: usize, sample_only: bool) -> LexResult {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in RawToken::lexer(source).spanned() {
        let span: Span = (base_offset + range.start..base_offset + range.end).into();
        let raw = match result {
            Ok(raw) => raw,
            Err(()) => {
                errors.push(Diagnostic::error(
                    codes::M001,
                    span,
                    format!(
                        "unexpected character in pattern: {:?}",
                        &source[range.start..range.end]
                    ),
                ));
                continue;
            }
        };
        let tok = match raw {
            RawToken::LBracket => MiniToken::LBracket,
            RawToken::RBracket => MiniToken::RBracket,
            RawToken::LAngle => MiniToken::LAngle,
            RawToken::RAngle => MiniToken::RAngle,
            RawToken::LParen => MiniToken::LParen,
            RawToken::RParen => MiniToken::RParen,
            RawToken::LBrace => MiniToken::LBrace,
            RawToken::RBrace => MiniToken::RBrace,
            RawToken::Comma => MiniToken::Comma,
            RawToken::Pipe => MiniToken::Pipe,
            RawToken::Star => MiniToken::Star,
            RawToken::Slash => MiniToken::Slash,
            RawToken::Colon => MiniToken::Colon,
            RawToken::At => MiniToken::At,
            RawToken::Bang => MiniToken::Bang,
            RawToken::Question => MiniToken::Question,
            RawToken::Percent => MiniToken::Percent,
            RawToken::Rest => MiniToken::Rest,
            RawToken::Number(v) => MiniToken::Number(v),
            RawToken::Word => {
                push_word(
                    &source[range.start..range.end],
                    base_offset + range.start,
                    sample_only,
                    &mut tokens,
                );
                continue;
            }
        };
        tokens.push((tok, span));
    }

    LexResult { tokens, errors }
}

// ── Tests ──
