//! Tokens to Value trees.
//!
//! A program is either a single atom or a sequence of parenthesized forms.
//! Forms become `List` values whose elements are left unevaluated; atoms
//! become `Bool`, `Int`, `Float`, `Pattern` or `Symbol`.

use nom::{
    IResult, Parser,
    character::complete::{char, digit1},
    combinator::{all_consuming, opt, recognize},
    number::complete::recognize_float,
    sequence::pair,
};

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{FloatType, IntType, Value, intern};

/// The whole token is a float literal: `2.5`, `-1e3`, `1.5e-2`
fn float_literal(input: &str) -> IResult<&str, &str> {
    all_consuming(recognize_float::<&str, nom::error::Error<&str>>).parse(input)
}

/// The whole token is an optionally negative run of digits
fn int_literal(input: &str) -> IResult<&str, &str> {
    all_consuming(recognize(pair(opt(char('-')), digit1))).parse(input)
}

fn starts_number(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn parse_number(token: &str) -> Result<Value, Error> {
    let malformed = || Error::Syntax(format!("malformed number '{token}'"));
    if token.contains(['.', 'e']) {
        let (_, literal) = float_literal(token).map_err(|_| malformed())?;
        literal
            .parse::<FloatType>()
            .map(Value::Float)
            .map_err(|_| malformed())
    } else {
        let (_, literal) = int_literal(token).map_err(|_| malformed())?;
        literal
            .parse::<IntType>()
            .map(Value::Int)
            .map_err(|_| Error::Syntax(format!("integer literal '{token}' is out of range")))
    }
}

/// Convert one token to an atom
pub fn parse_atom(token: &str) -> Result<Value, Error> {
    match token {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        // A bare `@` is the single-space pattern
        "@" => Ok(Value::Pattern(intern(" "))),
        _ if starts_number(token) => parse_number(token),
        _ => match token.strip_prefix('@') {
            Some(name) => Ok(Value::Pattern(intern(name))),
            None => Ok(Value::Symbol(intern(token))),
        },
    }
}

/// Parse the form opening at `tokens[pos]`, which must be `(`.
///
/// Returns the form as a List and the index just past its closing `)`.
pub fn parse_tokens(tokens: &[String], pos: usize) -> Result<(Value, usize), Error> {
    parse_form(tokens, pos, 0)
}

fn parse_form(tokens: &[String], pos: usize, depth: usize) -> Result<(Value, usize), Error> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::Syntax(format!(
            "expression nested too deeply (max depth: {MAX_PARSE_DEPTH})"
        )));
    }
    match tokens.get(pos).map(String::as_str) {
        Some("(") => {}
        Some(token) => return Err(Error::Syntax(format!("expected '(' but found '{token}'"))),
        None => return Err(Error::Syntax("unexpected end of input".into())),
    }

    let mut items = Vec::new();
    let mut pos = pos + 1;
    loop {
        match tokens.get(pos).map(String::as_str) {
            None => return Err(Error::Syntax("unbalanced parentheses: missing ')'".into())),
            Some(")") => return Ok((Value::new_list(items), pos + 1)),
            Some("(") => {
                let (form, next) = parse_form(tokens, pos, depth + 1)?;
                items.push(form);
                pos = next;
            }
            Some(token) => {
                items.push(parse_atom(token)?);
                pos += 1;
            }
        }
    }
}

/// Parse a whole program into its top-level expressions.
///
/// No tokens is the empty program and a single token is a lone atom;
/// otherwise every top-level expression must be a parenthesized form.
pub fn parse_program(tokens: &[String]) -> Result<Vec<Value>, Error> {
    match tokens {
        [] => return Ok(Vec::new()),
        [token] if token != "(" && token != ")" => return Ok(vec![parse_atom(token)?]),
        _ => {}
    }

    let mut program = Vec::new();
    let mut pos = 0;
    while let Some(token) = tokens.get(pos) {
        match token.as_str() {
            "(" => {
                let (form, next) = parse_tokens(tokens, pos)?;
                program.push(form);
                pos = next;
            }
            ")" => {
                return Err(Error::Syntax(
                    "unbalanced parentheses: unexpected ')'".into(),
                ));
            }
            atom => {
                return Err(Error::Syntax(format!(
                    "unexpected atom '{atom}' outside of a form"
                )));
            }
        }
    }
    Ok(program)
}
