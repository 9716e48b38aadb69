use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Lambda, Name, NativeFunction, Value, intern};
use crate::builtinops::{OpKind, find_special_form, get_builtin_ops};
use crate::{Error, EvalResult};

pub mod environment;

use environment::Environment;

/// What a symbol with no binding in any frame evaluates to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnboundSymbols {
    /// Unbound symbols evaluate to `null`
    #[default]
    Null,
    /// Unbound symbols are a lookup error
    Error,
}

/// Host-chosen evaluation settings, fixed when an environment is created
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvalConfig {
    /// Nesting depth at which evaluation fails with `DepthLimit`; unbounded
    /// when `None`
    pub max_depth: Option<usize>,
    pub unbound_symbols: UnboundSymbols,
}

/// Evaluate an expression (public API)
pub fn eval(expr: &Value, env: &Environment) -> EvalResult {
    eval_with_depth_tracking(expr, env, 0)
}

/// Evaluate an expression with depth tracking to bound host recursion
pub(crate) fn eval_with_depth_tracking(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> EvalResult {
    if let Some(max) = env.config().max_depth {
        if depth >= max {
            return Err(Error::DepthLimit(max).into());
        }
    }
    match expr {
        // Self-evaluating forms
        Value::Null
        | Value::Int(_)
        | Value::Float(_)
        | Value::Bool(_)
        | Value::Pattern(_)
        | Value::Map(_)
        | Value::Extern(_)
        | Value::Lambda(_)
        | Value::NativeFunction(_) => Ok(expr.clone()),

        // Variable lookup
        Value::Symbol(name) => match env.lookup(name) {
            Some(value) => Ok(value),
            None => match env.config().unbound_symbols {
                UnboundSymbols::Null => Ok(Value::Null),
                UnboundSymbols::Error => {
                    Err(Error::Lookup(format!("unbound symbol '{}'", name.as_str())).into())
                }
            },
        },

        // Application or special form. The elements are snapshotted so that
        // evaluation may mutate the list without holding its borrow.
        Value::List(items) => {
            let elements = items
                .try_borrow()
                .map_err(|_| Error::Internal("list storage is already borrowed".into()))?
                .clone();
            eval_list(&elements, env, depth).map_err(|trace| trace.within(expr))
        }
    }
}

/// Helper function to evaluate argument expressions left to right, stopping
/// at the first failure
fn eval_args(args: &[Value], env: &Environment, depth: usize) -> Result<Vec<Value>, crate::Trace> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth + 1))
        .collect()
}

/// Evaluate a non-atomic form
///
/// A head symbol naming a special form is dispatched to the registry with
/// its operands unevaluated; special forms are looked up before the
/// environment and so cannot be shadowed. Any other head is evaluated like
/// an operand and then applied.
fn eval_list(elements: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let Some((head, operands)) = elements.split_first() else {
        return Ok(Value::Null);
    };

    if let Value::Symbol(name) = head {
        if let Some(op) = find_special_form(name.as_str()) {
            op.validate_arity(operands.len())?;
            if let OpKind::SpecialForm(form) = op.op_kind {
                return form(operands, env, depth);
            }
        }
    }

    let callee = eval_with_depth_tracking(head, env, depth + 1)?;
    let args = eval_args(operands, env, depth)?;
    apply(&callee, &args, env, depth)
}

/// Apply an evaluated callee to evaluated arguments
fn apply(callee: &Value, args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    match callee {
        Value::Pattern(key) => Ok(query_map(*key, args)?),
        Value::NativeFunction(native) => {
            trace!(native = %native.id, args = args.len(), "applying native");
            Ok(native.call(args, env)?)
        }
        Value::Lambda(lambda) => {
            trace!(params = lambda.params.len(), args = args.len(), "applying lambda");
            call_lambda(lambda, args, env, depth)
        }
        other => Err(Error::Type(format!("cannot apply {}: {other}", other.type_name())).into()),
    }
}

/// `(@key map)`: read one key of a map
fn query_map(key: Name, args: &[Value]) -> Result<Value, Error> {
    match args {
        [Value::Map(entries)] => entries.borrow().get(&key).cloned().ok_or_else(|| {
            Error::Lookup(format!("key @{} not found in map", key.as_str()))
        }),
        [other] => Err(Error::Type(format!(
            "pattern @{} can only be applied to a map, got {}",
            key.as_str(),
            other.type_name()
        ))),
        _ => Err(Error::Syntax(format!(
            "pattern @{} expects exactly 1 argument, got {}",
            key.as_str(),
            args.len()
        ))),
    }
}

/// Bind parameters positionally in a fresh frame and evaluate the body.
/// Missing arguments bind `null`; extra arguments are ignored.
fn call_lambda(lambda: &Lambda, args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let call_env = env.for_call(Rc::clone(&lambda.closure));
    for (i, param) in lambda.params.iter().enumerate() {
        let arg = args.get(i).cloned().unwrap_or(Value::Null);
        call_env.define(*param, arg)?;
    }
    eval_with_depth_tracking(&lambda.body, &call_env, depth + 1)
}

fn expect_condition(form: &str, value: &Value) -> Result<bool, Error> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(Error::Type(format!(
            "'{form}' condition must be a bool, got {}",
            other.type_name()
        ))),
    }
}

/// Evaluate begin special form
pub(crate) fn eval_begin(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let mut last = Value::Null;
    for expr in args {
        last = eval_with_depth_tracking(expr, env, depth + 1)?;
    }
    Ok(last)
}

/// Evaluate quote special form: the operand is returned unevaluated.
/// A quoted list is the program's own storage, not a copy.
pub(crate) fn eval_quote(args: &[Value], _env: &Environment, _depth: usize) -> EvalResult {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(Error::Internal("'quote' reached with unchecked arity".into()).into()),
    }
}

/// Evaluate eval special form: evaluate the operand, then evaluate the
/// resulting value as code in the same environment
pub(crate) fn eval_eval(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let [expr] = args else {
        return Err(Error::Internal("'eval' reached with unchecked arity".into()).into());
    };
    let code = eval_with_depth_tracking(expr, env, depth + 1)?;
    eval_with_depth_tracking(&code, env, depth + 1)
}

/// Evaluate if special form
pub(crate) fn eval_if(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let (condition_expr, then_expr, else_expr) = match args {
        [condition, then] => (condition, then, None),
        [condition, then, otherwise] => (condition, then, Some(otherwise)),
        _ => return Err(Error::Internal("'if' reached with unchecked arity".into()).into()),
    };
    let condition = eval_with_depth_tracking(condition_expr, env, depth + 1)?;
    if expect_condition("if", &condition)? {
        eval_with_depth_tracking(then_expr, env, depth + 1)
    } else if let Some(else_expr) = else_expr {
        eval_with_depth_tracking(else_expr, env, depth + 1)
    } else {
        Ok(Value::Null)
    }
}

/// Evaluate def special form
pub(crate) fn eval_def(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth + 1)?;
            debug!(name = name.as_str(), kind = value.type_name(), global = env.is_global(), "def");
            env.define(*name, value)?;
            Ok(Value::Null)
        }
        [other, _] => Err(Error::Syntax(format!(
            "'def' requires a symbol to bind, got {}",
            other.type_name()
        ))
        .into()),
        _ => Err(Error::Internal("'def' reached with unchecked arity".into()).into()),
    }
}

/// Evaluate while special form: test, run every body form, retest
pub(crate) fn eval_while(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    let Some((condition_expr, body)) = args.split_first() else {
        return Err(Error::Internal("'while' reached with unchecked arity".into()).into());
    };
    loop {
        let condition = eval_with_depth_tracking(condition_expr, env, depth + 1)?;
        if !expect_condition("while", &condition)? {
            return Ok(Value::Null);
        }
        for expr in body {
            eval_with_depth_tracking(expr, env, depth + 1)?;
        }
    }
}

/// Evaluate map special form: `(map @k1 e1 @k2 e2 ...)`
///
/// Keys must be pattern literals; the values are evaluated in order and a
/// repeated key keeps its last value.
pub(crate) fn eval_map_form(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    if args.len() % 2 != 0 {
        return Err(Error::Syntax(format!(
            "'map' expects @key/value pairs, got {} operands",
            args.len()
        ))
        .into());
    }
    let mut entries: HashMap<Name, Value> = HashMap::with_capacity(args.len() / 2);
    for pair in args.chunks_exact(2) {
        let Value::Pattern(key) = &pair[0] else {
            return Err(Error::Syntax(format!(
                "'map' keys must be @patterns, got {}",
                pair[0]
            ))
            .into());
        };
        let value = eval_with_depth_tracking(&pair[1], env, depth + 1)?;
        entries.insert(*key, value);
    }
    Ok(Value::new_map(entries))
}

/// Evaluate list special form
pub(crate) fn eval_list_form(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
    Ok(Value::new_list(eval_args(args, env, depth)?))
}

/// Evaluate fn special form
///
/// The lambda captures the current local frame by reference, so bindings
/// added to that frame after the `fn` is evaluated are visible to the body.
pub(crate) fn eval_fn(args: &[Value], env: &Environment, _depth: usize) -> EvalResult {
    match args {
        [Value::List(param_list), body] => {
            let mut params: Vec<Name> = Vec::new();
            for param in param_list.borrow().iter() {
                match param {
                    Value::Symbol(name) => {
                        if params.contains(name) {
                            return Err(Error::Syntax(format!(
                                "duplicate parameter name '{}'",
                                name.as_str()
                            ))
                            .into());
                        }
                        params.push(*name);
                    }
                    other => {
                        return Err(Error::Syntax(format!(
                            "'fn' parameters must be symbols, got {}",
                            other.type_name()
                        ))
                        .into());
                    }
                }
            }

            Ok(Value::Lambda(Rc::new(Lambda {
                params,
                body: body.clone(),
                closure: env.local_frame(),
            })))
        }
        [other, _] => Err(Error::Syntax(format!(
            "'fn' parameters must be a list, got {}",
            other.type_name()
        ))
        .into()),
        _ => Err(Error::Internal("'fn' reached with unchecked arity".into()).into()),
    }
}

macro_rules! boolean_logic_op {
    ($name:ident, $op_name:literal, $short_circuit:literal, $default:literal) => {
        pub(crate) fn $name(args: &[Value], env: &Environment, depth: usize) -> EvalResult {
            for arg in args {
                match eval_with_depth_tracking(arg, env, depth + 1)? {
                    Value::Bool($short_circuit) => return Ok(Value::Bool($short_circuit)),
                    Value::Bool(_) => continue,
                    other => {
                        return Err(Error::Type(format!(
                            concat!(
                                "'",
                                $op_name,
                                "' requires bool operands (no truthiness), got {}"
                            ),
                            other.type_name()
                        ))
                        .into());
                    }
                }
            }
            Ok(Value::Bool($default))
        }
    };
}

// Generate boolean logic forms
boolean_logic_op!(eval_and, "&&", false, true);
boolean_logic_op!(eval_or, "||", true, false);

/// Create a global environment with the builtin functions and default
/// settings
pub fn new_environment() -> Environment {
    new_environment_with_config(EvalConfig::default())
}

/// Create a global environment with the builtin functions bound as native
/// values, so that programs may pass them around or shadow them
pub fn new_environment_with_config(config: EvalConfig) -> Environment {
    let mut bindings = HashMap::new();
    for builtin_op in get_builtin_ops() {
        if let OpKind::Function(func) = builtin_op.op_kind {
            let native = NativeFunction::new(builtin_op.id, builtin_op.arity, func);
            bindings.insert(
                intern(builtin_op.id),
                Value::NativeFunction(Rc::new(native)),
            );
        }
    }
    debug!(natives = bindings.len(), ?config, "created global environment");
    Environment::new_global(config, bindings)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, pat, sym, val};
    use crate::builtinops::Arity;
    use crate::eval_source;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Macro for setup expressions that return Null (like def)
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(Value::Null))
        };
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = new_environment();

            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        match (eval_source(input, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert!(
                    actual == *expected_val,
                    "{test_id}: '{input}' expected {expected_val:?}, got {actual:?}"
                );
            }
            (Err(_), Error) => {} // Expected generic error
            (Err(trace), SpecificError(expected_text)) => {
                let error_msg = trace.error().to_string();
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: '{input}' error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: '{input}' expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!(
                    "{test_id}: '{input}' expected error containing '{expected_text}', \
                     got {actual:?}"
                );
            }
            (Err(trace), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {trace}");
            }
        }
    }

    /// Simplified test runner with specific error message support
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = new_environment();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("2.5", success(2.5f32)),
            ("true", success(true)),
            ("false", success(false)),
            ("@key", EvalResult(pat("key"))),
            ("()", EvalResult(Value::Null)),
            ("", EvalResult(Value::Null)),
            // === ARITHMETIC ===
            ("(+ 1 2 3)", success(6)),
            ("(+ 1.5 1.5)", success(3.0f32)),
            ("(+ 1 2.0)", SpecificError("requires all Int or all Float")),
            ("(+)", SpecificError("'+' expects at least 1 argument, got 0")),
            ("(- 10 3)", success(7)),
            ("(* 2 3 4)", success(24)),
            ("(/ 7 2)", success(3)),
            ("(/ 7 0)", SpecificError("division by zero")),
            ("(% 7 3)", success(1)),
            ("(+ (* 2 3) (- 8 2))", success(12)),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(++ 1)", success(2)),
            ("(-- 1)", success(0)),
            // === COMPARISON AND LOGIC ===
            ("(< 1 2)", success(true)),
            ("(>= 2.5 3.5)", success(false)),
            ("(== @a @a)", success(true)),
            ("(== 1 1.0)", SpecificError("Type error")),
            ("(! false)", success(true)),
            ("(&& true true)", success(true)),
            ("(&& true false)", success(false)),
            ("(|| false true)", success(true)),
            ("(|| false false false)", success(false)),
            ("(&& true 1)", SpecificError("'&&' requires bool operands")),
            ("(|| 1 true)", SpecificError("'||' requires bool operands")),
            // Short-circuit skips the operand that would fail
            ("(&& false (+ 1 2.0))", success(false)),
            ("(|| true (+ 1 2.0))", success(true)),
            ("(&& true)", SpecificError("'&&' expects at least 2 arguments")),
            // === CONDITIONALS ===
            ("(if true 1 2)", success(1)),
            ("(if false 1 2)", success(2)),
            ("(if false 1)", EvalResult(Value::Null)),
            ("(if 5 1 2)", SpecificError("'if' condition must be a bool, got int")),
            ("(if true)", SpecificError("'if' expects 2 to 3 arguments")),
            ("(if true 1 2 3)", Error),
            // Only the chosen branch is evaluated
            ("(if true 1 (+ 1 2.0))", success(1)),
            // === BEGIN ===
            ("(begin)", EvalResult(Value::Null)),
            ("(begin 1 2 3)", success(3)),
            // === CONSTRUCTORS ===
            ("(list)", EvalResult(nil())),
            ("(list 1 (+ 1 1) 3)", success([1, 2, 3])),
            ("[1 2 3]", success([1, 2, 3])),
            ("(size {@a 1 @b 2})", success(2)),
            ("(@b {@a 1 @b (+ 1 1)})", success(2)),
            ("(@a {@a 1 @a 2})", success(2)),
            ("(map @a)", SpecificError("'map' expects @key/value pairs")),
            ("(map a 1)", SpecificError("'map' keys must be @patterns")),
            // === PATTERN APPLICATION ===
            ("(@missing {@k 1})", SpecificError("@missing")),
            ("(@k (list 1))", SpecificError("can only be applied to a map")),
            ("(@k {@k 1} {@k 2})", SpecificError("expects exactly 1 argument")),
            // === FUNCTIONS ===
            ("((fn (x) (* x x)) 7)", success(49)),
            ("((fn (x y) y) 1)", EvalResult(Value::Null)),
            ("((fn (x) x) 1 2 3)", success(1)),
            ("((fn () 5))", success(5)),
            ("(fn (x x) x)", SpecificError("duplicate parameter name 'x'")),
            ("(fn (1) x)", SpecificError("'fn' parameters must be symbols")),
            ("(fn x x)", SpecificError("'fn' parameters must be a list")),
            ("((if true + *) 2 3)", success(5)),
            ("((if false + *) 2 3)", success(6)),
            ("(1 2 3)", SpecificError("cannot apply int")),
            ("(true)", SpecificError("cannot apply bool")),
            // === UNBOUND SYMBOLS (default policy) ===
            ("undefined-symbol", EvalResult(Value::Null)),
            ("(undefined-fn 1)", SpecificError("cannot apply null")),
            // === DEF ===
            ("(def 1 2)", SpecificError("'def' requires a symbol to bind")),
            ("(def x)", SpecificError("'def' expects exactly 2 arguments")),
            // === SPECIAL FORMS CANNOT BE SHADOWED ===
            ("(def if 5) (if true 1 2)", success(1)),
            // === SYNTAX ===
            ("(+ 1", SpecificError("missing ')'")),
            ("1 2", Error),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_environment_persistence() {
        let test_environments = vec![
            // Closures and later definitions in the captured frame
            TestEnvironment(vec![
                test_setup!("(def x 1)"),
                test_setup!("(def add (fn (y) (+ x y)))"),
                ("(add 5)", success(6)),
                test_setup!("(def x 10)"),
                ("(add 5)", success(15)),
            ]),
            // Aliased containers share storage
            TestEnvironment(vec![
                test_setup!("(def a (list 1))"),
                test_setup!("(def b a)"),
                test_setup!("(push b 2)"),
                ("(size a)", success(2)),
                ("(pop a)", success(2)),
                ("(size b)", success(1)),
                test_setup!("(def m {@k 1})"),
                test_setup!("(def n m)"),
                test_setup!("(set n @j 2)"),
                ("(@j m)", success(2)),
                ("(has m @k)", success(true)),
                test_setup!("(rm m @k)"),
                ("(has n @k)", success(false)),
            ]),
            // Atoms are values
            TestEnvironment(vec![
                test_setup!("(def i 1)"),
                ("(++ i)", success(2)),
                ("i", success(1)),
                test_setup!("(def j i)"),
                test_setup!("(def i 5)"),
                ("j", success(1)),
            ]),
            // while loops
            TestEnvironment(vec![
                test_setup!("(def i 0)"),
                test_setup!("(def acc (list))"),
                test_setup!("(while (< i 3) (push acc i) (def i (+ i 1)))"),
                ("acc", success([0, 1, 2])),
                ("i", success(3)),
                ("(while false)", EvalResult(Value::Null)),
                ("(while 1 2)", SpecificError("'while' condition must be a bool")),
            ]),
            // Recursion through the global frame
            TestEnvironment(vec![
                test_setup!(
                    "(def fact (fn (n) (if (<= n 1) 1 (* n (fact (- n 1))))))"
                ),
                ("(fact 10)", success(3_628_800)),
                test_setup!(
                    "(def fib (fn (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))"
                ),
                ("(fib 15)", success(610)),
            ]),
            // Builtins are ordinary bindings and can be shadowed or passed
            TestEnvironment(vec![
                test_setup!("(def apply2 (fn (f a b) (f a b)))"),
                ("(apply2 + 2 3)", success(5)),
                ("(apply2 < 2 3)", success(true)),
                test_setup!("(def size (fn (x) 0))"),
                ("(size (list 1 2))", success(0)),
            ]),
            // def inside a lambda binds locally
            TestEnvironment(vec![
                test_setup!("(def f (fn () (begin (def local 1) local)))"),
                ("(f)", success(1)),
                ("local", EvalResult(Value::Null)),
            ]),
            // A lambda defined in a call captures that call's frame
            TestEnvironment(vec![
                test_setup!("(def make-adder (fn (n) (fn (x) (+ x n))))"),
                test_setup!("(def add3 (make-adder 3))"),
                ("(add3 4)", success(7)),
                ("((make-adder 10) 1)", success(11)),
            ]),
            // A failing form stops its enclosing begin, argument list or loop
            TestEnvironment(vec![
                ("(begin (size 1) (def lost 1))", SpecificError("'size' requires")),
                ("lost", EvalResult(Value::Null)),
                ("(list (size 1) (def lost2 1))", SpecificError("'size' requires")),
                ("lost2", EvalResult(Value::Null)),
                ("(+ (def lost3 1) 2)", Error),
                ("lost3", success(1)),
                test_setup!("(def i 0)"),
                test_setup!("(def after 0)"),
                (
                    "(while (< i 3) (def i (+ i 1)) (size i) (def after 1))",
                    SpecificError("'size' requires a list or a map, got int"),
                ),
                ("i", success(1)),
                ("after", success(0)),
            ]),
            // Code as data
            TestEnvironment(vec![
                ("(quote x)", EvalResult(sym("x"))),
                ("(' @k)", EvalResult(pat("k"))),
                ("(quote (+ 1 2))", success(vec![sym("+"), val(1), val(2)])),
                test_setup!("(def code (' (* x 2)))"),
                test_setup!("(def x 21)"),
                ("(eval code)", success(42)),
                ("(eval (list (' +) 1 2))", success(3)),
                ("(eval 5)", success(5)),
                ("(eval (' (size 1)))", SpecificError("'size' requires")),
                ("(quote)", SpecificError("'quote' expects exactly 1 argument, got 0")),
                ("(eval 1 2)", SpecificError("'eval' expects exactly 1 argument, got 2")),
            ]),
        ];

        run_tests_in_environment(test_environments);
    }

    #[test]
    fn test_same_literal_evaluates_identically() {
        let env = new_environment();
        let expr = val(vec![sym("list"), val(1), val(2)]);
        let first = eval(&expr, &env).unwrap();
        let second = eval(&expr, &env).unwrap();
        assert_eq!(first, second);
        // Each evaluation constructs a fresh list
        assert!(!first.same_storage(&second));
        assert_eq!(expr, val(vec![sym("list"), val(1), val(2)]));
    }

    #[test]
    fn test_unbound_symbol_policies() {
        let lenient = new_environment();
        assert_eq!(eval(&sym("nope"), &lenient).unwrap(), Value::Null);

        let strict = new_environment_with_config(EvalConfig {
            unbound_symbols: UnboundSymbols::Error,
            ..EvalConfig::default()
        });
        let trace = eval(&sym("nope"), &strict).unwrap_err();
        assert_eq!(
            trace.error(),
            &crate::Error::Lookup("unbound symbol 'nope'".into())
        );
    }

    #[test]
    fn test_depth_limit() {
        let env = new_environment_with_config(EvalConfig {
            max_depth: Some(50),
            ..EvalConfig::default()
        });
        eval_source("(def loop (fn (n) (loop (+ n 1))))", &env).unwrap();
        let trace = eval_source("(loop 0)", &env).unwrap_err();
        assert_eq!(trace.error(), &crate::Error::DepthLimit(50));
        assert!(!trace.frames().is_empty());

        // Shallow programs are unaffected
        assert_eq!(eval_source("(+ 1 (+ 2 3))", &env).unwrap(), val(6));
    }

    #[test]
    fn test_trace_records_enclosing_forms() {
        let env = new_environment();
        let trace = eval_source("(begin (+ 1 (size 5)))", &env).unwrap_err();
        assert_eq!(
            trace.frames(),
            &[
                "(size 5)".to_owned(),
                "(+ 1 (size 5))".to_owned(),
                "(begin (+ 1 (size 5)))".to_owned()
            ]
        );
    }

    #[test]
    fn test_registered_native_receives_environment() {
        let env = new_environment();
        env.register_native("lookup-x", Arity::Exact(0), |_, env| {
            Ok(env.get("x").unwrap_or(Value::Null))
        })
        .unwrap();
        env.register_native("twice", Arity::Exact(1), |args, _| match &args[0] {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            other => Err(crate::Error::Type(format!("twice: got {}", other.type_name()))),
        })
        .unwrap();

        assert_eq!(eval_source("(def x 9) (lookup-x)", &env).unwrap(), val(9));
        assert_eq!(eval_source("(twice 21)", &env).unwrap(), val(42));
        let trace = eval_source("(twice 1 2)", &env).unwrap_err();
        assert_eq!(
            trace.error().to_string(),
            "Syntax error: 'twice' expects exactly 1 argument, got 2"
        );
    }

    #[test]
    fn test_extern_values_are_opaque_and_self_evaluating() {
        let env = new_environment();
        let handle = Value::Extern(Rc::new(String::from("host data")));
        env.define(intern("h"), handle.clone()).unwrap();
        assert_eq!(eval(&sym("h"), &env).unwrap(), handle);
        assert_eq!(eval(&handle, &env).unwrap(), handle);
        assert!(eval_source("(h 1)", &env).is_err());
    }
}
