//! Custom operator plugins.
//!
//! User-authored operators are compiled into shared objects and registered
//! with a host engine through a `load_operators` entry point. The engine
//! then invokes them like built-ins: pin values arrive through the same call
//! namespace as client-initiated traffic, the operator reads its inputs,
//! computes and writes its outputs.
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn load_operators(registry: *mut OperatorRegistry) {
//!     let registry = unsafe { &mut *registry };
//!     registry.record_operator(Box::new(EasyStatistics));
//! }
//! ```

use std::path::Path;

use fnv::FnvHashMap;
use libloading::{Library, Symbol};

use crate::binding::call::CallValue;
use crate::error::{Error, Result};
use crate::operator::specification::Specification;
use crate::operator::PinValue;
use crate::{Float, Id};

/// Exported symbol a plugin shared object must define.
pub const LOAD_ENTRY_POINT: &[u8] = b"load_operators";

/// Signature of the plugin entry point.
pub type LoadFn = unsafe extern "C" fn(registry: *mut OperatorRegistry);

/// A user-authored operator.
///
/// `run` reads inputs and writes outputs through the context; returning
/// `Ok(())` marks the evaluation succeeded, any error surfaces to the caller
/// as a typed engine error attributed to this operator.
pub trait CustomOperator: Send + Sync {
    /// Registered operator name, e.g. `my_plugin::easy_statistics`.
    fn name(&self) -> &str;

    fn specification(&self) -> Specification;

    fn run(&self, context: &mut OperatorContext) -> Result<()>;
}

/// Pin values of one invocation of a custom operator.
///
/// Input entities arrive as owned references; wrapping and dropping them
/// releases the engine-side reference taken for this invocation.
pub struct OperatorContext {
    inputs: FnvHashMap<i32, CallValue>,
    outputs: FnvHashMap<i32, CallValue>,
}

impl OperatorContext {
    pub fn new(inputs: FnvHashMap<i32, CallValue>) -> Self {
        Self {
            inputs,
            outputs: FnvHashMap::default(),
        }
    }

    pub fn input(&self, pin: i32) -> Result<&CallValue> {
        self.inputs.get(&pin).ok_or_else(|| {
            Error::validation(format!("no value connected to input pin {}", pin))
        })
    }

    pub fn input_int(&self, pin: i32) -> Result<Id> {
        match self.input(pin)? {
            CallValue::Int(v) => Ok(*v),
            other => Err(self.mismatch("int", other)),
        }
    }

    pub fn input_double(&self, pin: i32) -> Result<Float> {
        match self.input(pin)? {
            CallValue::Double(v) => Ok(*v),
            other => Err(self.mismatch("double", other)),
        }
    }

    pub fn input_string(&self, pin: i32) -> Result<&str> {
        match self.input(pin)? {
            CallValue::Str(v) => Ok(v),
            other => Err(self.mismatch("string", other)),
        }
    }

    pub fn input_double_vec(&self, pin: i32) -> Result<&[Float]> {
        match self.input(pin)? {
            CallValue::DoubleVec(v) => Ok(v),
            other => Err(self.mismatch("vector<double>", other)),
        }
    }

    /// Raw entity reference connected to `pin`, as a (kind, handle) pair.
    pub fn input_entity(&self, pin: i32) -> Result<(crate::EntityKind, crate::HandleId)> {
        match self.input(pin)? {
            CallValue::Entity { kind, handle } => Ok((*kind, *handle)),
            other => Err(self.mismatch("entity", other)),
        }
    }

    fn mismatch(&self, expected: &str, actual: &CallValue) -> Error {
        Error::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        }
    }

    /// Writes an output pin. Upstream references are not meaningful inside a
    /// custom operator and are rejected.
    pub fn set_output(&mut self, pin: i32, value: impl Into<PinValue>) -> Result<()> {
        let value = value.into().into_call_value()?;
        if let CallValue::Upstream { .. } = value {
            return Err(Error::validation(
                "a custom operator output must be a literal or an entity",
            ));
        }
        self.outputs.insert(pin, value);
        Ok(())
    }

    pub fn outputs(&self) -> &FnvHashMap<i32, CallValue> {
        &self.outputs
    }

    pub fn into_outputs(self) -> FnvHashMap<i32, CallValue> {
        self.outputs
    }
}

/// Registry of custom operators known to a host.
///
/// Loaded libraries stay resident for the registry's lifetime; dropping the
/// registry while the engine still routes calls to a plugin is undefined.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: FnvHashMap<String, Box<dyn CustomOperator>>,
    libraries: Vec<Library>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one operator class. Called by plugin entry points; also
    /// usable directly for operators compiled into the host.
    pub fn record_operator(&mut self, operator: Box<dyn CustomOperator>) {
        debug!("recorded custom operator `{}`", operator.name());
        self.operators.insert(operator.name().to_string(), operator);
    }

    /// Loads a plugin shared object and runs its `load_operators` entry
    /// point against this registry.
    pub fn load_plugin(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let library = unsafe { Library::new(path) }
            .map_err(|e| Error::Transport(format!("cannot load plugin `{}`: {}", path.display(), e)))?;
        {
            let entry: Symbol<LoadFn> = unsafe { library.get(LOAD_ENTRY_POINT) }.map_err(|e| {
                Error::UnsupportedOperation(format!(
                    "plugin `{}` exposes no `load_operators` entry point: {}",
                    path.display(),
                    e
                ))
            })?;
            unsafe { entry(self as *mut _) };
        }
        info!("loaded plugin `{}`", path.display());
        self.libraries.push(library);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(|n| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn specification(&self, name: &str) -> Option<Specification> {
        self.operators.get(name).map(|op| op.specification())
    }

    /// Invokes a registered operator, attributing failures to it.
    pub fn run(&self, name: &str, context: &mut OperatorContext) -> Result<()> {
        let operator = self.operators.get(name).ok_or_else(|| {
            Error::UnsupportedOperation(format!("no custom operator named `{}`", name))
        })?;
        operator.run(context).map_err(|e| match e {
            Error::Engine { .. } => e,
            other => Error::Engine {
                message: other.to_string(),
                operator: name.to_string(),
                backtrace: String::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::specification::PinSpecification;

    struct Doubler;

    impl CustomOperator for Doubler {
        fn name(&self) -> &str {
            "test::doubler"
        }

        fn specification(&self) -> Specification {
            Specification::new("doubles a scalar")
                .with_input(0, PinSpecification::new("value", &["double"], "input scalar"))
                .with_output(0, PinSpecification::new("value", &["double"], "doubled scalar"))
        }

        fn run(&self, context: &mut OperatorContext) -> Result<()> {
            let v = context.input_double(0)?;
            context.set_output(0, v * 2.0)
        }
    }

    #[test]
    fn recorded_operator_runs_through_registry() {
        let mut registry = OperatorRegistry::new();
        registry.record_operator(Box::new(Doubler));
        assert!(registry.contains("test::doubler"));

        let mut inputs = FnvHashMap::default();
        inputs.insert(0, CallValue::Double(21.0));
        let mut ctx = OperatorContext::new(inputs);
        registry.run("test::doubler", &mut ctx).unwrap();
        assert_eq!(ctx.outputs().get(&0), Some(&CallValue::Double(42.0)));
    }

    #[test]
    fn failures_are_attributed_to_the_operator() {
        let mut registry = OperatorRegistry::new();
        registry.record_operator(Box::new(Doubler));

        let mut ctx = OperatorContext::new(FnvHashMap::default());
        match registry.run("test::doubler", &mut ctx) {
            Err(Error::Engine { operator, .. }) => assert_eq!(operator, "test::doubler"),
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
