//! Structural schema matching for decoded rencode documents.
//!
//! Schema strings are a small notation over the rencode kinds: `i` int, `s`
//! string, `b` bool, `f` float, `n` null, `*` any single item, `[...]` a
//! list, `{...}` a dict. An empty bracket pair (`[]` or `{}`) means "any
//! container of that kind" — arity and contents unconstrained — which is
//! what lets the envelope schema `[is[]{}]` accept an args list of whatever
//! length a given RPC method actually takes, while still rejecting a value
//! that isn't a list in that slot at all. A non-empty bracket pair fixes the
//! arity: every element must be present and match its term in order.

use super::token::{skip_item, Kind, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Int,
    Str,
    Bool,
    Float,
    Null,
    Any,
    List(Vec<Term>),
    Dict(Vec<Term>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaError;

/// Parses a schema string into a `Term` tree. Panics on malformed input —
/// schema strings are compile-time constants written by this crate's own
/// method table, never derived from network input.
pub fn parse(s: &str) -> Term {
    let mut chars = s.chars().peekable();
    let term = parse_term(&mut chars).expect("malformed schema string");
    assert!(chars.next().is_none(), "trailing characters in schema string");
    term
}

fn parse_term(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<Term, SchemaError> {
    match chars.next().ok_or(SchemaError)? {
        'i' => Ok(Term::Int),
        's' => Ok(Term::Str),
        'b' => Ok(Term::Bool),
        'f' => Ok(Term::Float),
        'n' => Ok(Term::Null),
        '*' => Ok(Term::Any),
        '[' => {
            let elems = parse_sequence(chars, ']')?;
            Ok(Term::List(elems))
        }
        '{' => {
            let elems = parse_sequence(chars, '}')?;
            Ok(Term::Dict(elems))
        }
        _ => Err(SchemaError),
    }
}

fn parse_sequence(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    close: char,
) -> Result<Vec<Term>, SchemaError> {
    let mut out = Vec::new();
    loop {
        match chars.peek() {
            Some(&c) if c == close => {
                chars.next();
                return Ok(out);
            }
            Some(_) => out.push(parse_term(chars)?),
            None => return Err(SchemaError),
        }
    }
}

/// Validates that the subtree rooted at `tokens[idx]` matches `term`,
/// returning the index just past the subtree on success.
pub fn validate(tokens: &[Token], idx: usize, term: &Term) -> Option<usize> {
    let tok = tokens.get(idx)?;
    match term {
        Term::Int => (tok.kind == Kind::Int).then(|| idx + 1),
        Term::Str => (tok.kind == Kind::Str).then(|| idx + 1),
        Term::Bool => (tok.kind == Kind::Bool).then(|| idx + 1),
        Term::Float => (tok.kind == Kind::Float).then(|| idx + 1),
        Term::Null => (tok.kind == Kind::Null).then(|| idx + 1),
        Term::Any => Some(skip_item(tokens, idx)),
        Term::List(elems) => {
            if tok.kind != Kind::List {
                return None;
            }
            if elems.is_empty() {
                return Some(skip_item(tokens, idx));
            }
            if tok.num_items != elems.len() {
                return None;
            }
            let mut next = idx + 1;
            for elem in elems {
                next = validate(tokens, next, elem)?;
            }
            Some(next)
        }
        Term::Dict(elems) => {
            if tok.kind != Kind::Dict {
                return None;
            }
            if elems.is_empty() {
                return Some(skip_item(tokens, idx));
            }
            if tok.num_items != elems.len() {
                return None;
            }
            let mut next = idx + 1;
            for elem in elems {
                next = validate(tokens, next, elem)?;
            }
            Some(next)
        }
    }
}

/// Validates that `tokens` (starting at index 0) is a single document
/// matching `term` in its entirety, with no trailing tokens left over.
pub fn validate_document(tokens: &[Token], term: &Term) -> bool {
    match validate(tokens, 0, term) {
        Some(next) => next == tokens.len(),
        None => false,
    }
}
