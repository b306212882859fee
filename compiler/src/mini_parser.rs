// Parser for mini-notation pattern strings.
//
// Parses the token stream from `mini_lexer::lex()` with chumsky combinators
// into a small owned tree, then appends that tree to the caller's `Ast`
// arena. Grammar:
//
//   pattern  := choice*
//   choice   := element ('|' element)*
//   element  := atom euclid? modifier*
//   atom     := pitch | chord | sample | rest | group | alt | poly
//   group    := '[' choice* ']' | '[' choice (',' choice)+ ']'
//   alt      := '<' choice* '>'
//   poly     := '{' choice* '}' ('%' number)?
//   euclid   := '(' number ',' number (',' number)? ')'
//   modifier := ('*'|'/'|':'|'@'|'!'|'?') number?
//
// Preconditions: `offset` is the byte position of the pattern text in the host source.
// Postconditions: on success, returns the index of a `MiniPattern` root node.
// Failure modes: lex errors produce `M001`, syntax errors `M002`. A modifier
//   missing its number is reported but still yields a node (value 1.0).
// Side effects: allocates nodes in the supplied arena.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::{Ast, MiniAtom, Modifier, NodeIndex, NodeKind};
use crate::diag::{codes, Diagnostic};
use crate::mini_lexer::{self, MiniToken};

/// Result of parsing: root node (if any) plus lex and parse diagnostics.
#[derive(Debug)]
pub struct MiniParse {
    pub root: Option<NodeIndex>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Owned parse tree, lowered into the arena once parsing is done.
#[derive(Debug, Clone)]
struct MiniExpr {
    kind: NodeKind,
    span: SimpleSpan,
    children: Vec<MiniExpr>,
}

impl MiniExpr {
    fn new(kind: NodeKind, span: SimpleSpan, children: Vec<MiniExpr>) -> Self {
        MiniExpr {
            kind,
            span,
            children,
        }
    }

    fn lower(self, ast: &mut Ast) -> NodeIndex {
        let idx = ast.alloc(self.kind, self.span);
        for child in self.children {
            let c = child.lower(ast);
            ast.add_child(idx, c);
        }
        idx
    }
}

/// Parse `text` and append the resulting nodes to `ast`.
pub fn parse_into(ast: &mut Ast, text: &str, offset: usize, sample_only: bool) -> MiniParse {
    let lex_result = mini_lexer::lex(text, offset, sample_only);
    let mut diagnostics = lex_result.errors;

    let end = offset + text.len();
    let eoi: SimpleSpan = (end..end).into();
    let stream = Stream::from_iter(lex_result.tokens.into_iter()).map(eoi, |(t, s): (_, _)| (t, s));

    let (children, parse_errors) = pattern_parser().parse(stream).into_output_errors();
    diagnostics.extend(parse_errors.into_iter().map(|e| {
        Diagnostic::error(codes::M002, *e.span(), format!("pattern syntax: {e}"))
    }));

    let root = children.map(|children| {
        MiniExpr::new(NodeKind::MiniPattern, (offset..end).into(), children).lower(ast)
    });

    MiniParse { root, diagnostics }
}

// ── Grammar ──

fn pattern_parser<'tokens, I>(
) -> impl Parser<'tokens, I, Vec<MiniExpr>, extra::Err<Rich<'tokens, MiniToken, SimpleSpan>>>
where
    I: ValueInput<'tokens, Token = MiniToken, Span = SimpleSpan>,
{
    let choice = recursive(|choice| {
        let number = select! { MiniToken::Number(v) => v };

        let leaf = select! {
            MiniToken::Pitch { midi } => MiniAtom::Pitch { midi },
            MiniToken::Chord { root_midi, intervals } => MiniAtom::Chord { root_midi, intervals },
            MiniToken::Sample { name, variant } => MiniAtom::Sample { name, variant },
            MiniToken::Rest => MiniAtom::Rest,
        }
        .map_with(|atom, e| MiniExpr::new(NodeKind::MiniAtom(atom), e.span(), Vec::new()));

        // `[a, b]` needs a comma after the first entry; anything else is a group.
        let polyrhythm = choice
            .clone()
            .separated_by(just(MiniToken::Comma))
            .at_least(2)
            .collect::<Vec<_>>()
            .map(|c| (NodeKind::MiniPolyrhythm, c));
        let group = choice
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .map(|c| (NodeKind::MiniGroup, c));
        let bracket = polyrhythm
            .or(group)
            .delimited_by(just(MiniToken::LBracket), just(MiniToken::RBracket))
            .map_with(|(kind, children), e| MiniExpr::new(kind, e.span(), children));

        let alternation = choice
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(MiniToken::LAngle), just(MiniToken::RAngle))
            .map_with(|children, e| MiniExpr::new(NodeKind::MiniSequence, e.span(), children));

        // `%0` (or no `%`) means one step per child.
        let polymeter = choice
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(MiniToken::LBrace), just(MiniToken::RBrace))
            .then(just(MiniToken::Percent).ignore_then(number.clone()).or_not())
            .map_with(|(children, steps), e| {
                let step_count = steps.map_or(0, |n| n as u8);
                MiniExpr::new(NodeKind::MiniPolymeter { step_count }, e.span(), children)
            });

        let atom = leaf.or(bracket).or(alternation).or(polymeter);

        let euclid = number
            .clone()
            .then_ignore(just(MiniToken::Comma))
            .then(number.clone())
            .then(just(MiniToken::Comma).ignore_then(number.clone()).or_not())
            .delimited_by(just(MiniToken::LParen), just(MiniToken::RParen));

        let with_euclid = atom.then(euclid.or_not()).map_with(|(atom, euclid), e| match euclid {
            Some(((hits, steps), rotation)) => MiniExpr::new(
                NodeKind::MiniEuclidean {
                    hits: hits as u8,
                    steps: steps as u8,
                    rotation: rotation.unwrap_or(0.0) as u8,
                },
                e.span(),
                vec![atom],
            ),
            None => atom,
        });

        let modifier = select! {
            MiniToken::Star => Modifier::Speed,
            MiniToken::Slash => Modifier::Slow,
            MiniToken::Colon => Modifier::Duration,
            MiniToken::At => Modifier::Weight,
            MiniToken::Bang => Modifier::Repeat,
            MiniToken::Question => Modifier::Chance,
        }
        .then(number.or_not())
        .validate(|(modifier, value), e, emitter| {
            let value = match (value, modifier) {
                (Some(v), _) => v as f32,
                (None, Modifier::Repeat) => 2.0,
                (None, Modifier::Chance) => 0.5,
                (None, _) => {
                    emitter.emit(Rich::custom(
                        e.span(),
                        format!("expected number after {} modifier", modifier.name()),
                    ));
                    1.0
                }
            };
            (modifier, value, e.span())
        });

        let element = with_euclid.foldl(modifier.repeated(), |inner, (modifier, value, span)| {
            MiniExpr::new(NodeKind::MiniModified { modifier, value }, span, vec![inner])
        });

        element
            .separated_by(just(MiniToken::Pipe))
            .at_least(1)
            .collect::<Vec<_>>()
            .map_with(|mut elements, e| {
                if elements.len() == 1 {
                    elements.remove(0)
                } else {
                    MiniExpr::new(NodeKind::MiniChoice, e.span(), elements)
                }
            })
    });

    choice.repeated().collect::<Vec<_>>().then_ignore(end())
}

// ── Tests ──
