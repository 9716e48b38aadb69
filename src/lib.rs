//! TeaLang - a small S-expression language evaluated straight from its parse tree
//!
//! Source text goes through a fixed pipeline:
//!
//! ```text
//! text -> tokenizer -> parser -> Value trees -> evaluator -> Value | Trace
//! ```
//!
//! There is no compilation step: the evaluator walks the same [`ast::Value`]
//! trees the parser produced.
//!
//! ```
//! let env = tealang::new_environment();
//! assert_eq!(tealang::run("(+ 1 2 3)", &env), "6");
//! assert_eq!(tealang::run("(def m {@k 1}) (@k m)", &env), "1");
//! ```
//!
//! ## Syntax
//!
//! ```text
//! (op arg ...)     prefix application or special form
//! {@key expr ...}  sugar for (map @key expr ...)
//! [expr ...]       sugar for (list expr ...)
//! 42 -7 2.5 1e3    Int (64-bit) and Float (32-bit) literals
//! true false       booleans
//! @name            pattern: map key, and map accessor in call position
//! ```
//!
//! ## Strict typing
//!
//! - Conditions of `if`, `while`, `&&` and `||` must be booleans (no truthiness)
//! - Arithmetic operands must be all Int or all Float, never mixed
//! - Integer overflow and integer division by zero are reported, not wrapped
//!
//! ## Sharing
//!
//! Atoms are values. Lists and maps are shared handles, so every alias of a
//! list observes `push`, `pop`, `append`, and every alias of a map observes
//! `set` and `rm`.
//!
//! ## Modules
//!
//! - `ast`: the [`Value`] model
//! - `tokenizer`: source text to tokens
//! - `parser`: tokens to Value trees
//! - `evaluator`: evaluation, special forms and the [`Environment`]
//! - `builtinops`: registry of special forms and native functions

use std::fmt;

use tracing::debug;

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod parser;
pub mod tokenizer;

pub use ast::Value;
pub use evaluator::environment::Environment;
pub use evaluator::{
    EvalConfig, UnboundSymbols, eval, new_environment, new_environment_with_config,
};

/// Maximum nesting of parenthesized forms accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 256;

/// Nesting of lists and maps beyond which rendering prints `(...)` or `{...}`
pub const MAX_RENDER_DEPTH: usize = 256;

/// Longest rendering of an expression recorded in a trace entry
pub const MAX_TRACE_RENDER: usize = 100;

/// Evaluation depth the REPL imposes on every line it runs
pub const REPL_MAX_EVAL_DEPTH: usize = 1000;

/// Failure categories raised by the tokenizer, parser, evaluator and builtins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Unbalanced parentheses, malformed literals, bad arity or argument shape
    #[error("Syntax error: {0}")]
    Syntax(String),
    /// An operation applied to a variant it does not accept
    #[error("Type error: {0}")]
    Type(String),
    /// Missing map key, out of range index, or unbound symbol in strict mode
    #[error("Lookup error: {0}")]
    Lookup(String),
    /// Integer overflow or integer division by zero
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),
    /// The host-configured evaluation depth was reached
    #[error("Evaluation depth limit exceeded (max: {0})")]
    DepthLimit(usize),
    /// An evaluator invariant did not hold
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed evaluation: the innermost error plus the expressions it unwound
/// through, innermost first.
///
/// Entries are only ever appended; a trace never shrinks or resets.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    error: Error,
    frames: Vec<String>,
}

impl Trace {
    pub fn new(error: Error) -> Self {
        Trace {
            error,
            frames: Vec::new(),
        }
    }

    /// The error that started the unwind
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Renderings of the enclosing expressions, innermost first
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// The full trace as text lines: the error message, then every frame
    pub fn messages(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.error.to_string()).chain(self.frames.iter().cloned())
    }

    /// Record that the failure passed through `expr`
    pub(crate) fn within(mut self, expr: &Value) -> Self {
        self.frames.push(render_for_trace(expr));
        self
    }
}

impl From<Error> for Trace {
    fn from(error: Error) -> Self {
        Trace::new(error)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        for frame in &self.frames {
            write!(f, "\n  in: {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Trace {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of evaluating anything: a value, or the trace of a failure
pub type EvalResult = Result<Value, Trace>;

fn render_for_trace(expr: &Value) -> String {
    let rendered = expr.to_string();
    if rendered.chars().count() <= MAX_TRACE_RENDER {
        return rendered;
    }
    let mut truncated: String = rendered.chars().take(MAX_TRACE_RENDER).collect();
    truncated.push_str("[...]");
    truncated
}

/// Tokenize, parse and evaluate every top-level form of `source` in order.
///
/// Returns the value of the last form (`Null` for an empty program), or the
/// trace of the first failure. Forms before a failing one keep their effects
/// on `env`.
#[tracing::instrument(level = "debug", skip_all, fields(len = source.len()))]
pub fn eval_source(source: &str, env: &Environment) -> EvalResult {
    let mut text = source.to_owned();
    let tokens = tokenizer::tokenize(&mut text);
    let program = parser::parse_program(&tokens)?;
    debug!(tokens = tokens.len(), forms = program.len(), "parsed program");

    let mut last = Value::Null;
    for form in &program {
        last = eval(form, env).inspect_err(|trace| {
            debug!(error = %trace.error(), depth = trace.frames().len(), "evaluation failed");
        })?;
    }
    Ok(last)
}

/// Run `source` against `env` and render the outcome as text.
///
/// On failure only the innermost message is returned; use [`eval_source`]
/// for the whole trace.
pub fn run(source: &str, env: &Environment) -> String {
    match eval_source(source, env) {
        Ok(value) => value.to_string(),
        Err(trace) => trace.error().to_string(),
    }
}
