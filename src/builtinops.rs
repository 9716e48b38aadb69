//! Built-in operations registry.
//!
//! Every name the language knows without a `def` lives in one table: the
//! special forms and the native functions.
//!
//! ## Functions vs Special Forms
//!
//! - **Functions**: receive evaluated arguments (e.g. `+`, `size`, `push`).
//!   They are bound into the global frame of every new environment, so a
//!   program may shadow them with `def`.
//! - **Special Forms**: receive their operands unevaluated and decide what to
//!   evaluate (e.g. `if`, `while`, `fn`). The evaluator looks them up here
//!   before consulting the environment, so they cannot be shadowed.
//!
//! ## Error Handling
//!
//! - **Type Safety**: operations reject incorrect types (e.g. `(! 1)` errors)
//! - **No Coercion**: Int and Float never mix, no truthiness
//! - **Overflow Detection**: integer arithmetic reports overflow
//! - **Arity Checking**: argument counts are validated before every call
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with the signature
//!    `fn(args: &[Value], env: &Environment) -> Result<Value, Error>`
//! 2. **Add it to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::cell::RefMut;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::Error;
use crate::EvalResult;
use crate::ast::{FloatType, IntType, ListRef, MapRef, Name, Value};
use crate::evaluator::environment::Environment;
use crate::evaluator::{
    eval_and, eval_begin, eval_def, eval_eval, eval_fn, eval_if, eval_list_form, eval_map_form,
    eval_or, eval_quote, eval_while,
};

/// Number of arguments (operands, head excluded) an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    /// Fail with a syntax error naming `id` when `count` is not accepted
    pub fn check(&self, id: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::Syntax(format!("'{id}' expects {self}, got {count}")))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = |n: usize| if n == 1 { "argument" } else { "arguments" };
        match *self {
            Arity::Exact(n) => write!(f, "exactly {n} {}", plural(n)),
            Arity::AtLeast(n) => write!(f, "at least {n} {}", plural(n)),
            Arity::Range(min, max) => write!(f, "{min} to {max} arguments"),
            Arity::Any => write!(f, "any number of arguments"),
        }
    }
}

/// Signature of a special form: unevaluated operands, the current
/// environment and the current evaluation depth
pub type SpecialFormFn = fn(&[Value], &Environment, usize) -> EvalResult;

/// Signature of a registry function: evaluated arguments and the calling
/// environment
pub type BuiltinFn = fn(&[Value], &Environment) -> Result<Value, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Takes evaluated arguments
    Function(BuiltinFn),
    /// Takes unevaluated operands and controls their evaluation
    SpecialForm(SpecialFormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    /// Identifier as written in programs
    pub id: &'static str,
    /// The implementation of this operation (function or special form)
    pub op_kind: OpKind,
    /// Expected number of operands
    pub arity: Arity,
}

impl BuiltinOp {
    pub fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.check(self.id, arg_count)
    }
}

//
// Shared argument helpers
//

fn expect_list<'a>(op: &str, value: &'a Value) -> Result<&'a ListRef, Error> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(Error::Type(format!(
            "'{op}' requires a list, got {}",
            other.type_name()
        ))),
    }
}

fn expect_map<'a>(op: &str, value: &'a Value) -> Result<&'a MapRef, Error> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(Error::Type(format!(
            "'{op}' requires a map, got {}",
            other.type_name()
        ))),
    }
}

fn expect_pattern(op: &str, value: &Value) -> Result<Name, Error> {
    match value {
        Value::Pattern(key) => Ok(*key),
        other => Err(Error::Type(format!(
            "'{op}' requires a @pattern key, got {}",
            other.type_name()
        ))),
    }
}

fn list_mut<'a>(op: &str, items: &'a ListRef) -> Result<RefMut<'a, Vec<Value>>, Error> {
    items
        .try_borrow_mut()
        .map_err(|_| Error::Internal(format!("'{op}': list storage is already borrowed")))
}

fn map_mut<'a>(op: &str, entries: &'a MapRef) -> Result<RefMut<'a, HashMap<Name, Value>>, Error> {
    entries
        .try_borrow_mut()
        .map_err(|_| Error::Internal(format!("'{op}': map storage is already borrowed")))
}

/// Homogeneous numeric operands: the first argument decides the kind and all
/// others must match it
enum Numbers {
    Int(Vec<IntType>),
    Float(Vec<FloatType>),
}

fn numeric_operands(op: &str, args: &[Value]) -> Result<Numbers, Error> {
    let mismatch = || Error::Type(format!("'{op}' requires all Int or all Float operands"));
    match args.first() {
        Some(Value::Int(_)) => args
            .iter()
            .map(|arg| match arg {
                Value::Int(n) => Ok(*n),
                _ => Err(mismatch()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Numbers::Int),
        Some(Value::Float(_)) => args
            .iter()
            .map(|arg| match arg {
                Value::Float(n) => Ok(*n),
                _ => Err(mismatch()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Numbers::Float),
        _ => Err(mismatch()),
    }
}

//
// Builtin Function Implementations
//

// Folding arithmetic: any arity >= 1, checked integer ops
macro_rules! folding_arithmetic {
    ($name:ident, $op_str:literal, $checked:ident, $float_op:tt, $what:literal) => {
        fn $name(args: &[Value], _env: &Environment) -> Result<Value, Error> {
            match numeric_operands($op_str, args)? {
                Numbers::Int(nums) => {
                    let mut acc = nums[0];
                    for n in &nums[1..] {
                        acc = acc.$checked(*n).ok_or_else(|| {
                            Error::Arithmetic(concat!("integer overflow in ", $what).into())
                        })?;
                    }
                    Ok(Value::Int(acc))
                }
                Numbers::Float(nums) => {
                    let mut acc = nums[0];
                    for n in &nums[1..] {
                        acc = acc $float_op *n;
                    }
                    Ok(Value::Float(acc))
                }
            }
        }
    };
}

folding_arithmetic!(builtin_add, "+", checked_add, +, "addition");
folding_arithmetic!(builtin_mul, "*", checked_mul, *, "multiplication");

// Binary arithmetic: exactly two operands. Integer division and remainder
// reject a zero divisor; Float follows IEEE-754.
macro_rules! binary_arithmetic {
    ($name:ident, $op_str:literal, $checked:ident, $float_op:tt, $what:literal, zero_divisor) => {
        fn $name(args: &[Value], _env: &Environment) -> Result<Value, Error> {
            match numeric_operands($op_str, args)? {
                Numbers::Int(nums) if nums[1] == 0 => {
                    Err(Error::Arithmetic(concat!("integer ", $what, " by zero").into()))
                }
                Numbers::Int(nums) => nums[0].$checked(nums[1]).map(Value::Int).ok_or_else(|| {
                    Error::Arithmetic(concat!("integer overflow in ", $what).into())
                }),
                Numbers::Float(nums) => Ok(Value::Float(nums[0] $float_op nums[1])),
            }
        }
    };
    ($name:ident, $op_str:literal, $checked:ident, $float_op:tt, $what:literal) => {
        fn $name(args: &[Value], _env: &Environment) -> Result<Value, Error> {
            match numeric_operands($op_str, args)? {
                Numbers::Int(nums) => {
                    let (a, b) = (nums[0], nums[1]);
                    a.$checked(b).map(Value::Int).ok_or_else(|| {
                        Error::Arithmetic(concat!("integer overflow in ", $what).into())
                    })
                }
                Numbers::Float(nums) => Ok(Value::Float(nums[0] $float_op nums[1])),
            }
        }
    };
}

binary_arithmetic!(builtin_sub, "-", checked_sub, -, "subtraction");
binary_arithmetic!(builtin_div, "/", checked_div, /, "division", zero_divisor);
binary_arithmetic!(builtin_rem, "%", checked_rem, %, "remainder", zero_divisor);

// Numeric atoms are values: the binding passed in is left untouched and the
// stepped value is returned.
macro_rules! int_step {
    ($name:ident, $op_str:literal, $checked:ident) => {
        fn $name(args: &[Value], _env: &Environment) -> Result<Value, Error> {
            match &args[0] {
                Value::Int(n) => n.$checked(1).map(Value::Int).ok_or_else(|| {
                    Error::Arithmetic(concat!("integer overflow in '", $op_str, "'").into())
                }),
                other => Err(Error::Type(format!(
                    concat!("'", $op_str, "' requires an int, got {}"),
                    other.type_name()
                ))),
            }
        }
    };
}

int_step!(builtin_inc, "++", checked_add);
int_step!(builtin_dec, "--", checked_sub);

// Ordering comparisons over Int or Float pairs
macro_rules! ordering_comparison {
    ($name:ident, $op:tt, $op_str:literal) => {
        fn $name(args: &[Value], _env: &Environment) -> Result<Value, Error> {
            match (&args[0], &args[1]) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a $op b)),
                (Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a $op b)),
                (a, b) => Err(Error::Type(format!(
                    concat!("'", $op_str, "' requires two ints or two floats, got {} and {}"),
                    a.type_name(),
                    b.type_name()
                ))),
            }
        }
    };
}

ordering_comparison!(builtin_lt, <, "<");
ordering_comparison!(builtin_gt, >, ">");
ordering_comparison!(builtin_le, <=, "<=");
ordering_comparison!(builtin_ge, >=, ">=");

fn builtin_eq(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a == b)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Bool(a == b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
        (Value::Pattern(a), Value::Pattern(b)) => Ok(Value::Bool(a == b)),
        (a, b) => Err(Error::Type(format!(
            "'==' requires two operands of the same type among int, float, bool and pattern, \
             got {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn builtin_not(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let b = bool::try_from(&args[0])
        .map_err(|_| Error::Type(format!("'!' requires a bool, got {}", args[0].type_name())))?;
    Ok(Value::Bool(!b))
}

fn builtin_size(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let len = match &args[0] {
        Value::List(items) => items.borrow().len(),
        Value::Map(entries) => entries.borrow().len(),
        other => {
            return Err(Error::Type(format!(
                "'size' requires a list or a map, got {}",
                other.type_name()
            )));
        }
    };
    IntType::try_from(len)
        .map(Value::Int)
        .map_err(|_| Error::Arithmetic("collection size does not fit in an int".into()))
}

fn builtin_push(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let items = expect_list("push", &args[0])?;
    list_mut("push", items)?.extend(args[1..].iter().cloned());
    Ok(Value::Null)
}

fn builtin_pop(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let items = expect_list("pop", &args[0])?;
    Ok(list_mut("pop", items)?.pop().unwrap_or(Value::Null))
}

fn builtin_nth(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let items = expect_list("nth", &args[0])?;
    let index = IntType::try_from(&args[1]).map_err(|_| {
        Error::Type(format!(
            "'nth' requires an int index, got {}",
            args[1].type_name()
        ))
    })?;
    let items = items.borrow();
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| {
            Error::Lookup(format!(
                "index {index} out of range for list of size {}",
                items.len()
            ))
        })
}

fn builtin_set(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let entries = expect_map("set", &args[0])?;
    let key = expect_pattern("set", &args[1])?;
    map_mut("set", entries)?.insert(key, args[2].clone());
    Ok(Value::Null)
}

fn builtin_has(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let entries = expect_map("has", &args[0])?;
    let key = expect_pattern("has", &args[1])?;
    Ok(Value::Bool(entries.borrow().contains_key(&key)))
}

fn builtin_rm(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let entries = expect_map("rm", &args[0])?;
    let key = expect_pattern("rm", &args[1])?;
    map_mut("rm", entries)?.remove(&key);
    Ok(Value::Null)
}

fn builtin_append(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let target = expect_list("append", &args[0])?;
    // Snapshot every source first: a source may be the target itself
    let mut tail = Vec::new();
    for arg in &args[1..] {
        tail.extend(expect_list("append", arg)?.borrow().iter().cloned());
    }
    list_mut("append", target)?.extend(tail);
    Ok(args[0].clone())
}

fn builtin_concat(args: &[Value], _env: &Environment) -> Result<Value, Error> {
    let mut joined = Vec::new();
    for arg in args {
        joined.extend(expect_list("concat", arg)?.borrow().iter().cloned());
    }
    Ok(Value::new_list(joined))
}

/// Global registry of all built-in operations.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn function(id: &'static str, arity: Arity, f: BuiltinFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(f),
            arity,
        }
    }

    fn special_form(id: &'static str, arity: Arity, f: SpecialFormFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(f),
            arity,
        }
    }

    vec![
        // Control flow and binding
        special_form("begin", Arity::Any, eval_begin),
        special_form("if", Arity::Range(2, 3), eval_if),
        special_form("def", Arity::Exact(2), eval_def),
        special_form("while", Arity::AtLeast(1), eval_while),
        special_form("fn", Arity::Exact(2), eval_fn),
        // Code as data
        special_form("quote", Arity::Exact(1), eval_quote),
        special_form("'", Arity::Exact(1), eval_quote),
        special_form("eval", Arity::Exact(1), eval_eval),
        // Constructors; map checks its own pairing
        special_form("map", Arity::Any, eval_map_form),
        special_form("list", Arity::Any, eval_list_form),
        // Short-circuit logic
        special_form("&&", Arity::AtLeast(2), eval_and),
        special_form("||", Arity::AtLeast(2), eval_or),
        // Arithmetic
        function("+", Arity::AtLeast(1), builtin_add),
        function("-", Arity::Exact(2), builtin_sub),
        function("*", Arity::AtLeast(1), builtin_mul),
        function("/", Arity::Exact(2), builtin_div),
        function("%", Arity::Exact(2), builtin_rem),
        function("++", Arity::Exact(1), builtin_inc),
        function("--", Arity::Exact(1), builtin_dec),
        // Comparison and logic
        function("<", Arity::Exact(2), builtin_lt),
        function(">", Arity::Exact(2), builtin_gt),
        function("<=", Arity::Exact(2), builtin_le),
        function(">=", Arity::Exact(2), builtin_ge),
        function("==", Arity::Exact(2), builtin_eq),
        function("!", Arity::Exact(1), builtin_not),
        // Collections
        function("size", Arity::Exact(1), builtin_size),
        function("push", Arity::AtLeast(2), builtin_push),
        function("pop", Arity::Exact(1), builtin_pop),
        function("nth", Arity::Exact(2), builtin_nth),
        function("append", Arity::AtLeast(2), builtin_append),
        function("concat", Arity::AtLeast(2), builtin_concat),
        function("set", Arity::Exact(3), builtin_set),
        function("has", Arity::Exact(2), builtin_has),
        function("rm", Arity::Exact(2), builtin_rm),
    ]
});

/// Lookup table from identifier to BuiltinOp (private - use find_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub fn find_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

/// Find a special form by its identifier
pub(crate) fn find_special_form(id: &str) -> Option<&'static BuiltinOp> {
    find_op(id).filter(|op| op.is_special_form())
}
