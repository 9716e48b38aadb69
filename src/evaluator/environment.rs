use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::Error;
use crate::ast::{Name, NativeFunction, Value, intern};
use crate::builtinops::Arity;
use crate::evaluator::EvalConfig;

/// One level of bindings, shared between every environment that sees it
pub type Frame = Rc<RefCell<HashMap<Name, Value>>>;

fn new_frame(bindings: HashMap<Name, Value>) -> Frame {
    Rc::new(RefCell::new(bindings))
}

/// Lexical scope for evaluation
///
/// Three tiers are consulted in order: the local frame, the closure frame
/// captured by the running lambda, and the global frame. The global
/// environment has only a local frame, which is also its global frame.
/// Cloning an Environment shares all of its frames.
#[derive(Clone)]
pub struct Environment {
    local: Frame,
    closure: Option<Frame>,
    global: Option<Frame>,
    config: Rc<EvalConfig>,
}

impl Environment {
    /// A parentless environment whose only frame holds `bindings`
    pub(crate) fn new_global(config: EvalConfig, bindings: HashMap<Name, Value>) -> Self {
        Environment {
            local: new_frame(bindings),
            closure: None,
            global: None,
            config: Rc::new(config),
        }
    }

    /// Environment for one lambda call: an empty local frame, the lambda's
    /// captured frame, and this environment's global frame
    pub(crate) fn for_call(&self, closure: Frame) -> Self {
        Environment {
            local: new_frame(HashMap::new()),
            closure: Some(closure),
            global: Some(self.global_frame()),
            config: Rc::clone(&self.config),
        }
    }

    pub fn is_global(&self) -> bool {
        self.global.is_none()
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub(crate) fn local_frame(&self) -> Frame {
        Rc::clone(&self.local)
    }

    pub(crate) fn global_frame(&self) -> Frame {
        Rc::clone(self.global.as_ref().unwrap_or(&self.local))
    }

    /// Bind `name` in the local frame, replacing any previous binding there
    pub fn define(&self, name: Name, value: Value) -> Result<(), Error> {
        insert(&self.local, name, value)
    }

    /// Resolve `name` local first, then closure, then global
    pub fn lookup(&self, name: &Name) -> Option<Value> {
        [Some(&self.local), self.closure.as_ref(), self.global.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|frame| frame.try_borrow().ok()?.get(name).cloned())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lookup(&intern(name))
    }

    /// Register a host function in the global frame.
    ///
    /// The function receives evaluated arguments; its argument count has
    /// already been checked against `arity`.
    ///
    /// # Example
    /// ```
    /// use tealang::ast::Value;
    /// use tealang::builtinops::Arity;
    ///
    /// let env = tealang::new_environment();
    /// env.register_native("answer", Arity::Exact(0), |_args, _env| Ok(Value::Int(42)))
    ///     .unwrap();
    /// assert_eq!(tealang::run("(answer)", &env), "42");
    /// ```
    pub fn register_native<F>(&self, name: &str, arity: Arity, func: F) -> Result<(), Error>
    where
        F: Fn(&[Value], &Environment) -> Result<Value, Error> + 'static,
    {
        let native = NativeFunction::new(name, arity, func);
        insert(
            &self.global_frame(),
            intern(name),
            Value::NativeFunction(Rc::new(native)),
        )
    }

    /// Get every binding visible from here, sorted by name. Inner tiers
    /// override outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();
        for frame in [self.global.as_ref(), self.closure.as_ref(), Some(&self.local)]
            .into_iter()
            .flatten()
        {
            for (name, value) in frame.borrow().iter() {
                bindings.insert(name.as_str().to_owned(), value.clone());
            }
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

fn insert(frame: &Frame, name: Name, value: Value) -> Result<(), Error> {
    frame
        .try_borrow_mut()
        .map_err(|_| Error::Internal(format!("frame busy while binding '{}'", name.as_str())))?
        .insert(name, value);
    Ok(())
}
