// pulsec — pulse DSL compiler
//
// Library root. `codegen::generate` turns a resolved arena tree into flat
// VM bytecode; `compile_pattern` wraps the whole path for one standalone
// mini-notation pattern.

pub mod ast;
pub mod bytecode;
pub mod chord;
pub mod codegen;
pub mod diag;
pub mod euclid;
pub mod id;
pub mod mini_lexer;
pub mod mini_parser;
pub mod pattern_eval;
pub mod registry;
pub mod resolve;
pub mod samples;
pub mod sequence;
pub mod symbols;

mod arrays;
mod inline;
mod matching;
mod params;
mod patterns;

use ast::{Ast, NodeIndex, PatternType};
use codegen::{CodeGenResult, CodeGenerator, CodegenOptions};
use diag::has_errors;
use samples::SampleRegistry;
use symbols::SymbolTable;

/// A standalone pattern together with the tree it was compiled from.
#[derive(Debug)]
pub struct PatternProgram {
    pub ast: Ast,
    /// The `MiniLiteral` node.
    pub literal: NodeIndex,
    /// Mini-notation diagnostics come first, then code generation's.
    pub result: CodeGenResult,
}

impl PatternProgram {
    /// Root of the parsed mini-notation, if parsing produced one.
    pub fn pattern_root(&self) -> Option<NodeIndex> {
        self.ast
            .children(self.literal)
            .find(|&c| matches!(self.ast[c].kind, ast::NodeKind::MiniPattern))
    }
}

/// Compile `src` as a `pat` literal with default options and no sample
/// registry.
pub fn compile_pattern(src: &str) -> PatternProgram {
    compile_pattern_with(src, PatternType::Pat, None, CodegenOptions::default())
}

pub fn compile_pattern_with(
    src: &str,
    pattern_type: PatternType,
    samples: Option<&SampleRegistry>,
    options: CodegenOptions,
) -> PatternProgram {
    let mut ast = Ast::new();
    let (literal, mut diagnostics) = ast.mini_literal(pattern_type, src, 0, None);
    ast.program(&[literal]);

    let mut symbols = SymbolTable::new();
    diagnostics.extend(resolve::collect_definitions(&ast, &mut symbols));
    let mut result = CodeGenerator::with_options(options).generate(&ast, &mut symbols, samples);

    diagnostics.append(&mut result.diagnostics);
    result.success = !has_errors(&diagnostics);
    result.diagnostics = diagnostics;
    PatternProgram {
        ast,
        literal,
        result,
    }
}
