//! Custom infix operators.
//!
//! `a |> f |> g` becomes `__binop__(__binop__(a, "bar_gt", f), "bar_gt", g)`.
//! The operator travels as a spelled-out name so the lowered text never
//! contains the symbol itself. Chains
//! are collected per bracket depth and split by boundary tokens; each chain is
//! ordered by precedence and associativity with a shunting-yard pass and then
//! emitted as insertions around operands plus one replacement per operator.
//! Chains in type position are left alone.

use std::collections::HashMap;

use super::boundary::{is_boundary_token, matching_close, newline_between, STATEMENT_KEYWORDS};
use super::Replacement;
use crate::syntax::scanner::{Assoc, OperatorDef, ScanOptions};
use crate::syntax::{tokenize, Token, TokenKind};

/// Name of the call the operator extension lowers to.
pub const BINOP_CALLEE: &str = "__binop__";

const OPERATOR_CHAR_NAMES: &[(char, &str)] = &[
    ('!', "bang"),
    ('#', "hash"),
    ('$', "dollar"),
    ('%', "percent"),
    ('&', "amp"),
    ('*', "star"),
    ('+', "plus"),
    ('-', "minus"),
    ('.', "dot"),
    ('/', "slash"),
    (':', "colon"),
    ('<', "lt"),
    ('=', "eq"),
    ('>', "gt"),
    ('?', "question"),
    ('@', "at"),
    ('\\', "backslash"),
    ('^', "caret"),
    ('|', "bar"),
    ('~', "tilde"),
];

/// Spells an operator symbol as `_`-joined character names: `|>` is
/// `bar_gt`. Characters without a name are written `u` plus their hex code.
pub fn encode_operator(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            OPERATOR_CHAR_NAMES
                .iter()
                .find(|(ch, _)| *ch == c)
                .map_or_else(|| format!("u{:x}", c as u32), |(_, name)| name.to_string())
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Inverse of [`encode_operator`]. `None` when `name` is not an encoding.
pub fn decode_operator(name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    name.split('_')
        .map(|part| match OPERATOR_CHAR_NAMES.iter().find(|(_, n)| *n == part) {
            Some((c, _)) => Some(*c),
            None => part
                .strip_prefix('u')
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .and_then(char::from_u32),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Top,
    Paren,
    Bracket,
    Block,
    Object,
    Template,
}

#[derive(Debug, Default)]
struct Chain {
    operands: Vec<(usize, usize)>,
    ops: Vec<usize>,
    current: Option<(usize, usize)>,
}

impl Chain {
    fn extend(&mut self, idx: usize) {
        match &mut self.current {
            Some((_, end)) => *end = idx,
            None => self.current = Some((idx, idx)),
        }
    }
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    chain: Chain,
    pending_ternary: usize,
    type_position: bool,
    /// The whole frame is type text: interface bodies, type literals.
    sticky_type: bool,
    /// Statement keyword seen at this depth since the last `;`.
    keyword: Option<String>,
    class_body: bool,
}

impl Frame {
    fn new(kind: FrameKind, sticky_type: bool) -> Self {
        Self {
            kind,
            chain: Chain::default(),
            pending_ternary: 0,
            type_position: false,
            sticky_type,
            keyword: None,
            class_body: false,
        }
    }

    fn in_type(&self) -> bool {
        self.type_position || self.sticky_type
    }
}

enum Node {
    Leaf(usize),
    Bin(Box<Node>, usize, Box<Node>),
}

struct Collector<'a> {
    source: &'a str,
    tokens: &'a [Token],
    defs: HashMap<&'a str, &'a OperatorDef>,
    out: Vec<Replacement>,
}

/// Collects the replacements that lower every custom operator chain.
pub fn collect(source: &str, tokens: &[Token], operators: &[OperatorDef]) -> Vec<Replacement> {
    let defs = operators.iter().map(|d| (d.symbol.as_str(), d)).collect();
    let mut c = Collector {
        source,
        tokens,
        defs,
        out: Vec::new(),
    };
    c.run();
    c.out
}

impl<'a> Collector<'a> {
    fn is_operator(&self, t: &Token) -> bool {
        t.is_custom_operator && self.defs.contains_key(t.text.as_str())
    }

    fn prev_text(&self, i: usize) -> Option<&str> {
        i.checked_sub(1).map(|p| self.tokens[p].text.as_str())
    }

    fn run(&mut self) {
        let tokens = self.tokens;
        let mut stack = vec![Frame::new(FrameKind::Top, false)];
        for i in 0..tokens.len() {
            let tok = &tokens[i];
            let Some(frame) = stack.last_mut() else { break };

            // Opening brackets belong to the current operand of the outer frame.
            let opener = match tok.kind {
                TokenKind::TemplateHead => Some(FrameKind::Template),
                TokenKind::Punct => match tok.text.as_str() {
                    "(" => Some(FrameKind::Paren),
                    "[" => Some(FrameKind::Bracket),
                    "{" => Some(self.brace_kind(i)),
                    _ => None,
                },
                _ => None,
            };
            if let Some(kind) = opener {
                if kind != FrameKind::Object
                    && tok.is_punct("{")
                    && frame.type_position
                    && self.completes_type(i)
                {
                    // `function f(): T {` starts the body.
                    frame.type_position = false;
                }
                let sticky = kind != FrameKind::Template
                    && (frame.in_type() || frame.keyword.as_deref() == Some("interface"));
                let kind = if sticky && kind == FrameKind::Object { FrameKind::Block } else { kind };
                let class_body = kind == FrameKind::Block
                    && tok.is_punct("{")
                    && frame.keyword.as_deref() == Some("class");
                frame.chain.extend(i);
                let mut inner = Frame::new(kind, sticky);
                inner.class_body = class_body;
                stack.push(inner);
                continue;
            }

            let closes = tok.kind == TokenKind::TemplateTail
                || matches!(tok.text.as_str(), ")" | "]" | "}") && tok.kind == TokenKind::Punct;
            if closes {
                if stack.len() > 1 {
                    if let Some(mut inner) = stack.pop() {
                        self.finish(&mut inner);
                    }
                }
                if let Some(outer) = stack.last_mut() {
                    outer.chain.extend(i);
                }
                continue;
            }

            if tok.kind == TokenKind::TemplateMiddle {
                self.finish(frame);
                continue;
            }

            if self.is_operator(tok) {
                if frame.in_type() {
                    frame.chain.extend(i);
                } else if frame.chain.current.is_none() {
                    frame.chain = Chain::default();
                } else {
                    let chain = &mut frame.chain;
                    if let Some(operand) = chain.current.take() {
                        chain.operands.push(operand);
                    }
                    chain.ops.push(i);
                }
                continue;
            }

            if tok.kind == TokenKind::Ident {
                match tok.text.as_str() {
                    "type"
                        if tokens.get(i + 1).is_some_and(|n| n.kind == TokenKind::Ident)
                            && self.starts_statement(i) =>
                    {
                        self.finish(frame);
                        frame.keyword = Some("type".into());
                        continue;
                    }
                    "as" | "satisfies" => {
                        self.finish(frame);
                        frame.type_position = true;
                        continue;
                    }
                    _ => {}
                }
            }

            if !is_boundary_token(tok) {
                frame.chain.extend(i);
                continue;
            }

            self.finish(frame);
            match tok.text.as_str() {
                "?" => {
                    let optional_marker = tokens.get(i + 1).is_some_and(|n| n.is_punct(":"));
                    if !optional_marker {
                        frame.pending_ternary += 1;
                    }
                }
                ":" => {
                    if frame.pending_ternary > 0 && self.prev_text(i) != Some("?") {
                        frame.pending_ternary -= 1;
                    } else if self.is_annotation_colon(frame, i) {
                        frame.type_position = true;
                    }
                }
                "=" => {
                    frame.type_position = frame.keyword.as_deref() == Some("type");
                    frame.keyword = None;
                }
                ";" => {
                    frame.type_position = false;
                    frame.pending_ternary = 0;
                    frame.keyword = None;
                }
                "," | "=>" => frame.type_position = false,
                _ if tok.kind == TokenKind::Ident => {
                    frame.type_position = false;
                    frame.keyword = Some(tok.text.clone());
                }
                _ => frame.type_position = false,
            }
        }
        while let Some(mut frame) = stack.pop() {
            self.finish(&mut frame);
        }
    }

    /// Whether a `{` opens an object literal or a block-like body.
    fn brace_kind(&self, i: usize) -> FrameKind {
        let Some(prev) = i.checked_sub(1).map(|p| &self.tokens[p]) else {
            return FrameKind::Block;
        };
        if prev.is_custom_operator && self.is_operator(prev) {
            return FrameKind::Object;
        }
        match (prev.kind, prev.text.as_str()) {
            (
                TokenKind::Punct,
                "=" | "(" | "," | ":" | "?" | "[" | "||" | "&&" | "??" | "..." | "+=" | "-=",
            ) => FrameKind::Object,
            (TokenKind::Ident, "return" | "yield" | "await" | "typeof" | "in" | "of" | "case") => {
                FrameKind::Object
            }
            (TokenKind::TemplateHead | TokenKind::TemplateMiddle, _) => FrameKind::Object,
            _ => FrameKind::Block,
        }
    }

    /// True when the token before `i` ends a complete type.
    fn completes_type(&self, i: usize) -> bool {
        match i.checked_sub(1).map(|p| &self.tokens[p]) {
            Some(prev) => match prev.kind {
                TokenKind::Ident | TokenKind::String | TokenKind::Number => true,
                TokenKind::Punct => matches!(prev.text.as_str(), ">" | "]" | ")" | "}"),
                _ => false,
            },
            None => false,
        }
    }

    fn starts_statement(&self, i: usize) -> bool {
        match i.checked_sub(1).map(|p| &self.tokens[p]) {
            None => true,
            Some(prev) => {
                prev.is_punct(";")
                    || prev.is_punct("{")
                    || prev.is_punct("}")
                    || prev.is_ident("export")
                    || prev.is_ident("declare")
                    || newline_between(self.source, prev.end, self.tokens[i].start)
            }
        }
    }

    fn is_annotation_colon(&self, frame: &Frame, i: usize) -> bool {
        if matches!(frame.kind, FrameKind::Object | FrameKind::Template | FrameKind::Bracket) {
            return false;
        }
        if frame.class_body {
            return true;
        }
        if matches!(frame.keyword.as_deref(), Some("case") | Some("default")) {
            return false;
        }
        // `label: stmt`
        if let Some(p) = i.checked_sub(1) {
            if self.tokens[p].kind == TokenKind::Ident
                && !STATEMENT_KEYWORDS.contains(&self.tokens[p].text.as_str())
                && self.starts_statement(p)
            {
                return false;
            }
            if STATEMENT_KEYWORDS.contains(&self.tokens[p].text.as_str())
                && self.starts_statement(p)
            {
                return false;
            }
        }
        true
    }

    fn finish(&mut self, frame: &mut Frame) {
        let mut chain = std::mem::take(&mut frame.chain);
        if let Some(operand) = chain.current.take() {
            chain.operands.push(operand);
        }
        if chain.ops.is_empty() || chain.operands.len() != chain.ops.len() + 1 {
            return;
        }
        let tree = self.build_tree(&chain);
        self.emit(&tree, &chain);
    }

    fn precedence(&self, op_token: usize) -> (u8, Assoc) {
        let text = self.tokens[op_token].text.as_str();
        self.defs
            .get(text)
            .map(|d| (d.precedence, d.assoc))
            .unwrap_or((0, Assoc::Left))
    }

    fn build_tree(&self, chain: &Chain) -> Node {
        let mut output: Vec<Node> = vec![Node::Leaf(0)];
        let mut pending: Vec<usize> = Vec::new();
        let reduce = |output: &mut Vec<Node>, pending: &mut Vec<usize>| {
            if let (Some(op), Some(right), Some(left)) = (pending.pop(), output.pop(), output.pop()) {
                output.push(Node::Bin(Box::new(left), op, Box::new(right)));
            }
        };
        for k in 0..chain.ops.len() {
            let (prec, assoc) = self.precedence(chain.ops[k]);
            while let Some(&top) = pending.last() {
                let (top_prec, _) = self.precedence(chain.ops[top]);
                if top_prec > prec || (top_prec == prec && assoc == Assoc::Left) {
                    reduce(&mut output, &mut pending);
                } else {
                    break;
                }
            }
            pending.push(k);
            output.push(Node::Leaf(k + 1));
        }
        while !pending.is_empty() {
            reduce(&mut output, &mut pending);
        }
        output.pop().unwrap_or(Node::Leaf(0))
    }

    fn extent(node: &Node, chain: &Chain) -> (usize, usize) {
        match node {
            Node::Leaf(i) => chain.operands[*i],
            Node::Bin(l, _, r) => (Self::extent(l, chain).0, Self::extent(r, chain).1),
        }
    }

    fn emit(&mut self, node: &Node, chain: &Chain) {
        let Node::Bin(left, op, right) = node else { return };
        let (first, last) = Self::extent(node, chain);
        let (_, left_end) = Self::extent(left, chain);
        let (right_start, _) = Self::extent(right, chain);
        let op_text = self.tokens[chain.ops[*op]].text.clone();

        self.out.push(Replacement::insert(
            self.tokens[first].start,
            format!("{}(", BINOP_CALLEE),
        ));
        self.emit(left, chain);
        self.out.push(Replacement::new(
            self.tokens[left_end].end,
            self.tokens[right_start].start,
            format!(", \"{}\", ", encode_operator(&op_text)),
        ));
        self.emit(right, chain);
        self.out.push(Replacement::insert(self.tokens[last].end, ")"));
    }
}

// ============================================================================
// RESTORE
// ============================================================================

/// Turns `__binop__(l, "name", r)` calls back into infix form. Nested
/// right-hand operator calls are parenthesised.
pub fn restore_operators(code: &str) -> String {
    let tokens = tokenize(code, &ScanOptions::default());
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    let mut i = 0;
    while i < tokens.len() {
        if let Some((text, end_idx)) = restore_call(code, &tokens, i) {
            out.push_str(&code[cursor..tokens[i].start]);
            out.push_str(&text);
            cursor = tokens[end_idx].end;
            i = end_idx + 1;
        } else {
            i += 1;
        }
    }
    out.push_str(&code[cursor..]);
    out
}

/// Restores the call starting at `tokens[i]`, returning the text and the
/// index of its closing parenthesis.
fn restore_call(code: &str, tokens: &[Token], i: usize) -> Option<(String, usize)> {
    if !tokens[i].is_ident(BINOP_CALLEE) || !tokens.get(i + 1)?.is_punct("(") {
        return None;
    }
    let close = matching_close(tokens, i + 1)?;
    // Split the arguments at depth-0 commas.
    let mut args: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0i32;
    let mut start = i + 2;
    for j in i + 2..close {
        depth += super::boundary::bracket_delta(&tokens[j]);
        if depth == 0 && tokens[j].is_punct(",") {
            args.push((start, j));
            start = j + 1;
        }
    }
    args.push((start, close));
    if args.len() != 3 || args.iter().any(|(s, e)| s >= e) {
        return None;
    }
    let op_tok = &tokens[args[1].0];
    if op_tok.kind != TokenKind::String || args[1].1 - args[1].0 != 1 {
        return None;
    }
    let name = crate::syntax::parser::cook_string(&op_tok.text);
    let op = decode_operator(&name).unwrap_or(name);
    let render = |(s, e): (usize, usize)| {
        let slice = &code[tokens[s].start..tokens[e - 1].end];
        restore_operators(slice)
    };
    let left = render(args[0]);
    let right_is_call = tokens[args[2].0].is_ident(BINOP_CALLEE)
        && matching_close(tokens, args[2].0 + 1) == Some(args[2].1 - 1);
    let right = render(args[2]);
    let right = if right_is_call { format!("({})", right) } else { right };
    Some((format!("{} {} {}", left, op, right), close))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::apply_replacements;
    use crate::syntax::scanner::default_operators;

    fn lower(src: &str) -> String {
        let ops = default_operators();
        let tokens = tokenize(src, &ScanOptions::default());
        let mut reps = collect(src, &tokens, &ops);
        apply_replacements(src, &mut reps).unwrap()
    }

    #[test]
    fn test_left_associative_chain() {
        assert_eq!(
            lower("const r = a |> f |> g;"),
            "const r = __binop__(__binop__(a, \"bar_gt\", f), \"bar_gt\", g);"
        );
    }

    #[test]
    fn test_right_associative_cons() {
        assert_eq!(
            lower("xs = 1 :: 2 :: rest"),
            "xs = __binop__(1, \"colon_colon\", __binop__(2, \"colon_colon\", rest))"
        );
    }

    #[test]
    fn test_precedence_binds_tighter_operator_first() {
        assert_eq!(
            lower("h :: t |> f"),
            "__binop__(__binop__(h, \"colon_colon\", t), \"bar_gt\", f)"
        );
    }

    #[test]
    fn test_operands_include_calls_and_brackets() {
        assert_eq!(
            lower("run(x + 1 |> g(y), [a |> b])"),
            "run(__binop__(x + 1, \"bar_gt\", g(y)), [__binop__(a, \"bar_gt\", b)])"
        );
    }

    #[test]
    fn test_type_position_is_left_alone() {
        let src = "type T = A |> B;\nconst x: A |> B = a |> b;";
        let out = lower(src);
        assert!(out.starts_with("type T = A |> B;"));
        assert!(out.ends_with("const x: A |> B = __binop__(a, \"bar_gt\", b);"));
    }

    #[test]
    fn test_ternary_and_object_colons_are_not_types() {
        assert_eq!(
            lower("c ? a |> f : { k: b |> g }"),
            "c ? __binop__(a, \"bar_gt\", f) : { k: __binop__(b, \"bar_gt\", g) }"
        );
    }

    #[test]
    fn test_template_text_is_untouched() {
        let out = lower("`x |> y ${a |> f}`");
        assert_eq!(out, "`x |> y ${__binop__(a, \"bar_gt\", f)}`");
    }

    #[test]
    fn test_lowered_text_never_contains_the_symbol() {
        let out = lower("const r = a |> f;\nconst xs = 1 :: rest;");
        assert!(!out.contains("|>") && !out.contains("::"), "{}", out);
    }

    #[test]
    fn test_operator_names_decode() {
        assert_eq!(encode_operator("|>"), "bar_gt");
        assert_eq!(encode_operator("<$>"), "lt_dollar_gt");
        assert_eq!(decode_operator("lt_dollar_gt").as_deref(), Some("<$>"));
        assert_eq!(decode_operator(&encode_operator("\u{2218}")).as_deref(), Some("\u{2218}"));
        assert_eq!(decode_operator("pipe"), None);
        assert_eq!(decode_operator(""), None);
    }

    #[test]
    fn test_restore_roundtrip_counts() {
        let src = "const r = a |> f |> g;";
        let restored = restore_operators(&lower(src));
        assert_eq!(restored, src);
        let cons = restore_operators(&lower("xs = 1 :: 2 :: rest"));
        assert_eq!(cons, "xs = 1 :: (2 :: rest)");
    }
}
