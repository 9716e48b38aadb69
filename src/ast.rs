//! This module defines the runtime value model shared by the parser and the
//! evaluator. The main enum, [`Value`], covers atoms (`Null`, `Int`, `Float`,
//! `Bool`, `Pattern`, `Symbol`), shared containers (`List`, `Map`), host
//! handles (`Extern`) and callables (`Lambda`, `NativeFunction`).
//!
//! Parsed programs are Values too: a parenthesized form is a `List` whose
//! elements are unevaluated Values. Atoms are stored inline and copied on
//! every clone. Containers hold an `Rc<RefCell<..>>` handle, so cloning a
//! list or map Value yields another alias of the same storage.
//!
//! Ergonomic helpers such as [`val`], [`sym`], [`pat`] and [`nil`] build
//! Values in code and tests.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use internment::Intern;

use crate::{Error, MAX_RENDER_DEPTH};
use crate::builtinops::Arity;
use crate::evaluator::environment::{Environment, Frame};

/// Type alias for integer values in the interpreter
pub type IntType = i64;

/// Type alias for floating point values in the interpreter
pub type FloatType = f32;

/// Interned identifier used for symbols, patterns and binding names
pub type Name = Intern<String>;

/// Storage behind a `List` value
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Storage behind a `Map` value
pub type MapRef = Rc<RefCell<HashMap<Name, Value>>>;

/// Canonical signature of a native function.
///
/// Natives receive the already-evaluated arguments and the calling
/// environment. Arity has been checked against [`NativeFunction::arity`]
/// before the call.
pub type NativeFn = dyn Fn(&[Value], &Environment) -> Result<Value, Error>;

/// Intern a name
pub fn intern(name: &str) -> Name {
    Intern::new(name.to_owned())
}

/// Core value type of the interpreter
///
/// To build Values, use the helper functions:
/// - `val(42)`, `val(2.5)`, `val(true)` for atoms
/// - `sym("name")` for symbols, `pat("key")` for patterns
/// - `val(vec![sym("+"), val(1), val(2)])` for (code) lists
#[derive(Clone)]
pub enum Value {
    /// The absent value; also the result of `def`, `while` and missing branches
    Null,
    /// 64-bit signed integers
    Int(IntType),
    /// 32-bit floats
    Float(FloatType),
    /// Booleans
    Bool(bool),
    /// Pattern literal (`@name`), stored without the `@`
    Pattern(Name),
    /// Shared, mutable sequence
    List(ListRef),
    /// Shared, mutable pattern-keyed table
    Map(MapRef),
    /// Opaque handle owned by the host
    Extern(Rc<dyn Any>),
    /// Identifier, resolved through the environment when evaluated
    Symbol(Name),
    /// User-defined function
    Lambda(Rc<Lambda>),
    /// Function implemented in Rust
    NativeFunction(Rc<NativeFunction>),
}

/// A user-defined function created by `fn`
pub struct Lambda {
    pub params: Vec<Name>,
    pub body: Value,
    /// Local frame of the environment that evaluated the `fn` form
    pub(crate) closure: Frame,
}

/// A function implemented in Rust, callable from programs
pub struct NativeFunction {
    pub id: String,
    pub arity: Arity,
    pub(crate) func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(id: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value], &Environment) -> Result<Value, Error> + 'static,
    {
        NativeFunction {
            id: id.to_owned(),
            arity,
            func: Rc::new(func),
        }
    }

    /// Check arity, then invoke
    pub fn call(&self, args: &[Value], env: &Environment) -> Result<Value, Error> {
        self.arity.check(&self.id, args.len())?;
        (self.func)(args, env)
    }
}

impl Value {
    /// Build a new list from owned elements
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Build a new map from owned entries
    pub fn new_map(entries: HashMap<Name, Value>) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    /// Short lowercase name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Pattern(_) => "pattern",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Extern(_) => "extern",
            Value::Symbol(_) => "symbol",
            Value::Lambda(_) => "lambda",
            Value::NativeFunction(_) => "native function",
        }
    }

    /// True when both Values are handles to the same container or callable
    pub fn same_storage(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            (Value::Extern(a), Value::Extern(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<FloatType> for Value {
    fn from(n: FloatType) -> Self {
        Value::Float(n)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Int(IntType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::new_list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::new_list(arr.into_iter().map(Into::into).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl TryFrom<&Value> for IntType {
    type Error = Error;

    fn try_from(value: &Value) -> Result<IntType, Error> {
        match value {
            Value::Int(n) => Ok(*n),
            other => Err(Error::Type(format!("expected int, got {}", other.type_name()))),
        }
    }
}

impl TryFrom<&Value> for bool {
    type Error = Error;

    fn try_from(value: &Value) -> Result<bool, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::Type(format!("expected bool, got {}", other.type_name()))),
        }
    }
}

/// Helper function for creating symbols
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(intern(name.as_ref()))
}

/// Helper function for creating pattern literals (without the `@`)
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn pat<S: AsRef<str>>(name: S) -> Value {
    Value::Pattern(intern(name.as_ref()))
}

/// Helper function for creating Values from anything convertible
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for the empty list
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::new_list(vec![])
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut open = Vec::new();
        write_value(f, self, &mut open, 0)
    }
}

/// Writes `value`, tracking the containers currently being written so that
/// a list or map that contains itself prints `(...)` instead of recursing.
/// Containers nested deeper than [`MAX_RENDER_DEPTH`] print the same marker.
fn write_value(
    f: &mut fmt::Formatter<'_>,
    value: &Value,
    open: &mut Vec<*const ()>,
    depth: usize,
) -> fmt::Result {
    match value {
        Value::Null => write!(f, "null"),
        Value::Int(n) => write!(f, "{n}"),
        // Debug keeps the decimal point so 2.0 does not print like the Int 2
        Value::Float(n) => write!(f, "{n:?}"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Pattern(name) => write!(f, "@{}", name.as_str()),
        Value::Symbol(name) => write!(f, "{}", name.as_str()),
        Value::List(items) => {
            let id = Rc::as_ptr(items).cast::<()>();
            if depth >= MAX_RENDER_DEPTH || open.contains(&id) {
                return write!(f, "(...)");
            }
            let Ok(items) = items.try_borrow() else {
                return write!(f, "(...)");
            };
            open.push(id);
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_value(f, item, open, depth + 1)?;
            }
            open.pop();
            write!(f, ")")
        }
        Value::Map(entries) => {
            let id = Rc::as_ptr(entries).cast::<()>();
            if depth >= MAX_RENDER_DEPTH || open.contains(&id) {
                return write!(f, "{{...}}");
            }
            let Ok(entries) = entries.try_borrow() else {
                return write!(f, "{{...}}");
            };
            open.push(id);
            let mut sorted: Vec<_> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
            write!(f, "{{")?;
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "@{} ", key.as_str())?;
                write_value(f, item, open, depth + 1)?;
            }
            open.pop();
            write!(f, "}}")
        }
        Value::Extern(_) => write!(f, "#<extern>"),
        Value::Lambda(_) => write!(f, "#<lambda>"),
        Value::NativeFunction(native) => write!(f, "#<native:{}>", native.id),
    }
}

/// Containers are torn down with an explicit worklist. A solely owned list
/// or map hands its elements to the worklist before its storage is freed,
/// so dropping arbitrarily deep nesting uses constant stack.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_owned_children(self, &mut pending);
        while let Some(mut child) = pending.pop() {
            take_owned_children(&mut child, &mut pending);
        }
    }
}

/// Move the elements out of `value`'s container when no other handle to it
/// exists. Shared containers are left alone.
fn take_owned_children(value: &mut Value, pending: &mut Vec<Value>) {
    match value {
        Value::List(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.append(items.get_mut());
            }
        }
        Value::Map(entries) => {
            if let Some(entries) = Rc::get_mut(entries) {
                pending.extend(entries.get_mut().drain().map(|(_, item)| item));
            }
        }
        _ => {}
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Pattern(name) => write!(f, "Pattern({})", name.as_str()),
            Value::Symbol(name) => write!(f, "Symbol({})", name.as_str()),
            Value::List(_) | Value::Map(_) => write!(f, "{self}"),
            Value::Extern(_) => write!(f, "Extern"),
            Value::Lambda(lambda) => {
                let params: Vec<&str> = lambda.params.iter().map(|p| p.as_str()).collect();
                write!(f, "Lambda(params={params:?}, body={})", lambda.body)
            }
            Value::NativeFunction(native) => write!(f, "NativeFunction({})", native.id),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.same_storage(other) {
            return true;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Pattern(a), Value::Pattern(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Map(a), Value::Map(b)) => *a.borrow() == *b.borrow(),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => a.id == b.id,
            // Lambdas and externs compare by identity only
            _ => false,
        }
    }
}
