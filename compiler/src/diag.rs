// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by the code generator, the
// pattern compiler and the mini-notation front end.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E102`, `W001`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning. Message wording is not a compatibility surface; codes and
/// severities are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable code table.
pub mod codes {
    use super::DiagCode;

    // ── Core walk ──
    pub const E100: DiagCode = DiagCode("E100");
    pub const E101: DiagCode = DiagCode("E101");
    pub const E102: DiagCode = DiagCode("E102");
    pub const E103: DiagCode = DiagCode("E103");
    pub const E104: DiagCode = DiagCode("E104");
    pub const E105: DiagCode = DiagCode("E105");
    pub const E107: DiagCode = DiagCode("E107");
    pub const E108: DiagCode = DiagCode("E108");
    pub const E110: DiagCode = DiagCode("E110");
    pub const E111: DiagCode = DiagCode("E111");
    pub const E112: DiagCode = DiagCode("E112");
    pub const E114: DiagCode = DiagCode("E114");

    // ── Match / patterns ──
    pub const E120: DiagCode = DiagCode("E120");
    pub const E121: DiagCode = DiagCode("E121");
    pub const E122: DiagCode = DiagCode("E122");
    pub const E123: DiagCode = DiagCode("E123");
    pub const E124: DiagCode = DiagCode("E124");
    pub const E125: DiagCode = DiagCode("E125");
    pub const E126: DiagCode = DiagCode("E126");
    pub const E127: DiagCode = DiagCode("E127");

    // ── Higher-order functions ──
    pub const E130: DiagCode = DiagCode("E130");
    pub const E131: DiagCode = DiagCode("E131");
    pub const E132: DiagCode = DiagCode("E132");
    pub const E133: DiagCode = DiagCode("E133");
    pub const E134: DiagCode = DiagCode("E134");
    pub const E140: DiagCode = DiagCode("E140");
    pub const E142: DiagCode = DiagCode("E142");
    pub const E143: DiagCode = DiagCode("E143");
    pub const E144: DiagCode = DiagCode("E144");
    pub const E145: DiagCode = DiagCode("E145");
    pub const E146: DiagCode = DiagCode("E146");
    pub const E147: DiagCode = DiagCode("E147");
    pub const E148: DiagCode = DiagCode("E148");
    pub const E149: DiagCode = DiagCode("E149");
    pub const E150: DiagCode = DiagCode("E150");
    pub const E151: DiagCode = DiagCode("E151");
    pub const E152: DiagCode = DiagCode("E152");
    pub const E153: DiagCode = DiagCode("E153");
    pub const E154: DiagCode = DiagCode("E154");
    pub const E155: DiagCode = DiagCode("E155");

    // ── Arrays ──
    pub const E160: DiagCode = DiagCode("E160");
    pub const E161: DiagCode = DiagCode("E161");
    pub const E162: DiagCode = DiagCode("E162");

    // ── UI parameters ──
    pub const E170: DiagCode = DiagCode("E170");
    pub const E171: DiagCode = DiagCode("E171");
    pub const E172: DiagCode = DiagCode("E172");
    pub const E173: DiagCode = DiagCode("E173");
    pub const E174: DiagCode = DiagCode("E174");
    pub const E175: DiagCode = DiagCode("E175");
    pub const E176: DiagCode = DiagCode("E176");
    pub const E177: DiagCode = DiagCode("E177");
    pub const E178: DiagCode = DiagCode("E178");
    pub const E179: DiagCode = DiagCode("E179");

    pub const E199: DiagCode = DiagCode("E199");

    // ── Warnings ──
    pub const W001: DiagCode = DiagCode("W001");
    pub const W002: DiagCode = DiagCode("W002");
    pub const W003: DiagCode = DiagCode("W003");
    pub const W010: DiagCode = DiagCode("W010");
    pub const W050: DiagCode = DiagCode("W050");
    pub const W051: DiagCode = DiagCode("W051");

    // ── Mini-notation front end ──
    pub const M001: DiagCode = DiagCode("M001");
    pub const M002: DiagCode = DiagCode("M002");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagLevel {
    Error,
    Warning,
}

impl fmt::Display for DiagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagLevel::Error => write!(f, "error"),
            DiagLevel::Warning => write!(f, "warning"),
        }
    }
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted anywhere in the compile.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

/// True when any diagnostic in `diags` has error severity.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", self.level, code, self.message)?;
        } else {
            write!(f, "{}: {}", self.level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
