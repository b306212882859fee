// params.rs — UI parameter declarations
//
// `param`, `button`, `toggle` and `dropdown` expose a named control to the
// host. Each call records a `ParamDecl` (once per name) and reads the live
// value with ENV_GET, keyed by the FNV-1a hash of the name, falling back to
// a PUSH_CONST of the default when the host has not set it.

use crate::ast::{NodeIndex, NodeKind, Span};
use crate::bytecode::{Instruction, Opcode};
use crate::codegen::{CodegenCtx, ParamDecl, ParamKind};
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::id::{fnv1a, BufferIndex};

impl CodegenCtx<'_> {
    /// String-literal name in the first argument.
    fn control_name(
        &mut self,
        call: NodeIndex,
        args: &[NodeIndex],
        missing: DiagCode,
        not_string: DiagCode,
        builtin: &str,
    ) -> Option<String> {
        let ast = self.ast;
        let Some(&first) = args.first() else {
            self.error(
                missing,
                ast[call].span,
                format!("{builtin}() requires a name argument"),
            );
            return None;
        };
        match ast.literal_string(first) {
            Some(name) => Some(name.to_string()),
            None => {
                self.error(
                    not_string,
                    ast[first].span,
                    format!("{builtin}() name must be a string literal"),
                );
                None
            }
        }
    }

    /// Number literal argument at `index`, or `fallback`.
    fn float_arg(&self, args: &[NodeIndex], index: usize, fallback: f32) -> f32 {
        args.get(index)
            .and_then(|&a| match self.ast[a].kind {
                NodeKind::NumberLit { value, .. } => Some(value as f32),
                _ => None,
            })
            .unwrap_or(fallback)
    }

    /// Record `decl` unless a control of the same name exists. Returns the
    /// previously recorded declaration, if any.
    fn declare(&mut self, decl: ParamDecl) -> Option<&ParamDecl> {
        match self.param_decls.iter().position(|p| p.name == decl.name) {
            Some(i) => Some(&self.param_decls[i]),
            None => {
                self.param_decls.push(decl);
                None
            }
        }
    }

    /// `PUSH_CONST default` then `ENV_GET name_hash`.
    fn emit_env_read(&mut self, name_hash: u32, default: f32, span: Span) -> BufferIndex {
        let fallback = self.push_const(default, span);
        if fallback.is_unused() {
            return BufferIndex::UNUSED;
        }
        let Some(out) = self.alloc(span) else {
            return BufferIndex::UNUSED;
        };
        self.emit(Instruction::make_unary(Opcode::EnvGet, out, fallback, name_hash));
        out
    }

    fn new_decl(&self, call: NodeIndex, name: String, kind: ParamKind) -> ParamDecl {
        let span = self.ast[call].span;
        ParamDecl {
            name_hash: fnv1a(&name),
            name,
            kind,
            default: 0.0,
            min: 0.0,
            max: 1.0,
            options: Vec::new(),
            source_offset: span.start as u32,
            source_length: (span.end - span.start) as u32,
        }
    }

    /// `param(name, default = 0, min = 0, max = 1)`: continuous slider.
    pub(crate) fn visit_param(&mut self, call: NodeIndex) -> BufferIndex {
        let span = self.ast[call].span;
        let args = self.call_args(call);
        let Some(name) = self.control_name(call, &args, codes::E170, codes::E171, "param") else {
            return BufferIndex::UNUSED;
        };
        let mut default = self.float_arg(&args, 1, 0.0);
        let mut min = self.float_arg(&args, 2, 0.0);
        let mut max = self.float_arg(&args, 3, 1.0);
        if min > max {
            self.warn(
                codes::W050,
                span,
                format!("param('{name}') has min > max; the bounds are swapped"),
            );
            std::mem::swap(&mut min, &mut max);
        }
        default = default.clamp(min, max);

        let mut decl = self.new_decl(call, name.clone(), ParamKind::Continuous);
        decl.default = default;
        decl.min = min;
        decl.max = max;
        let name_hash = decl.name_hash;
        let first = self
            .declare(decl)
            .filter(|prev| prev.min != min || prev.max != max)
            .map(|prev| {
                let start = prev.source_offset as usize;
                Span::from(start..start + prev.source_length as usize)
            });
        if let Some(first) = first {
            self.diagnostics.push(
                Diagnostic::warning(
                    codes::W051,
                    span,
                    format!("param('{name}') redeclared with a different range"),
                )
                .with_related(first, "first declared here"),
            );
        }
        self.emit_env_read(name_hash, default, span)
    }

    /// `button(name)`: 1 while pressed.
    pub(crate) fn visit_button(&mut self, call: NodeIndex) -> BufferIndex {
        let span = self.ast[call].span;
        let args = self.call_args(call);
        let Some(name) = self.control_name(call, &args, codes::E172, codes::E173, "button") else {
            return BufferIndex::UNUSED;
        };
        let decl = self.new_decl(call, name, ParamKind::Button);
        let name_hash = decl.name_hash;
        self.declare(decl);
        self.emit_env_read(name_hash, 0.0, span)
    }

    /// `toggle(name, default = 0)`: latched on/off.
    pub(crate) fn visit_toggle(&mut self, call: NodeIndex) -> BufferIndex {
        let span = self.ast[call].span;
        let args = self.call_args(call);
        let Some(name) = self.control_name(call, &args, codes::E174, codes::E175, "toggle") else {
            return BufferIndex::UNUSED;
        };
        let default = if self.float_arg(&args, 1, 0.0) > 0.5 { 1.0 } else { 0.0 };
        let mut decl = self.new_decl(call, name, ParamKind::Toggle);
        decl.default = default;
        let name_hash = decl.name_hash;
        self.declare(decl);
        self.emit_env_read(name_hash, default, span)
    }

    /// `dropdown(name, option...)`: index of the selected option.
    pub(crate) fn visit_dropdown(&mut self, call: NodeIndex) -> BufferIndex {
        let ast = self.ast;
        let span = ast[call].span;
        let args = self.call_args(call);
        let Some(name) = self.control_name(call, &args, codes::E176, codes::E177, "dropdown")
        else {
            return BufferIndex::UNUSED;
        };
        let mut options = Vec::with_capacity(args.len().saturating_sub(1));
        for &opt in &args[1..] {
            match ast.literal_string(opt) {
                Some(s) => options.push(s.to_string()),
                None => {
                    self.error(
                        codes::E178,
                        ast[opt].span,
                        "dropdown() options must be string literals",
                    );
                    return BufferIndex::UNUSED;
                }
            }
        }
        if options.is_empty() {
            self.error(
                codes::E179,
                span,
                format!("dropdown('{name}') requires at least one option"),
            );
            return BufferIndex::UNUSED;
        }
        let mut decl = self.new_decl(call, name, ParamKind::Select);
        decl.max = (options.len() - 1) as f32;
        decl.options = options;
        let name_hash = decl.name_hash;
        self.declare(decl);
        self.emit_env_read(name_hash, 0.0, span)
    }
}
