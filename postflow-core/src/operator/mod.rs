//! Operators: named computation units evaluated lazily by the engine.
//!
//! An [`Operator`] wraps an engine-side instance created by name. Inputs
//! connect to literals, entities or upstream operator outputs; nothing runs
//! until an output is requested, at which point the engine pulls the
//! transitive closure of upstream inputs.

use std::sync::{Arc, Mutex};

use crate::binding::call::{
    CallValue, OperatorCall, OutputKind, Request, Response,
};
use crate::entity::collection::{Collection, CollectionItem};
use crate::entity::field::{FieldBase, FieldPayload};
use crate::entity::unit_system::UnitSystem;
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::version::VERSION_PIN_ALIASES;
use crate::workflow::Workflow;
use crate::{Float, Id};

pub mod config;
pub mod specification;

use config::OperatorConfig;
use specification::Specification;

/// Anything connectable to an input pin.
///
/// Entities connect by reference, literals by value, and
/// [`OperatorOutput`] builds a lazy edge evaluated engine-side.
pub enum PinValue {
    Int(Id),
    Double(Float),
    Bool(bool),
    Str(String),
    IntVec(Vec<Id>),
    DoubleVec(Vec<Float>),
    StrVec(Vec<String>),
    UnitSystem(UnitSystem),
    Entity(Arc<EntityHandle>),
    Output(OperatorOutput),
}

impl PinValue {
    pub(crate) fn into_call_value(self) -> Result<CallValue> {
        Ok(match self {
            Self::Int(v) => CallValue::Int(v),
            Self::Double(v) => CallValue::Double(v),
            Self::Bool(v) => CallValue::Bool(v),
            Self::Str(v) => CallValue::Str(v),
            Self::IntVec(v) => CallValue::IntVec(v),
            Self::DoubleVec(v) => CallValue::DoubleVec(v),
            Self::StrVec(v) => CallValue::StrVec(v),
            Self::UnitSystem(v) => CallValue::UnitSystem(v),
            Self::Entity(handle) => CallValue::Entity {
                kind: handle.kind(),
                handle: handle.live_id()?,
            },
            Self::Output(output) => CallValue::Upstream {
                operator: output.operator.handle.live_id()?,
                pin: output.pin,
            },
        })
    }
}

macro_rules! pin_value_from_literal {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for PinValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

pin_value_from_literal! {
    Id => Int,
    Float => Double,
    bool => Bool,
    String => Str,
    Vec<Id> => IntVec,
    Vec<Float> => DoubleVec,
    Vec<String> => StrVec,
    UnitSystem => UnitSystem,
}

impl From<&str> for PinValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

macro_rules! pin_value_from_entity {
    ($($ty:ty),* $(,)?) => {
        $(impl From<&$ty> for PinValue {
            fn from(e: &$ty) -> Self {
                Self::Entity(e.handle().clone())
            }
        })*
    };
}

pin_value_from_entity! {
    crate::entity::scoping::Scoping,
    crate::entity::mesh::MeshedRegion,
    crate::entity::data_sources::DataSources,
    crate::entity::data_tree::DataTree,
    crate::entity::generic::GenericDataContainer,
    crate::entity::any::Any,
    crate::entity::support::Support,
    crate::entity::support::TimeFreqSupport,
}

impl<P: FieldPayload> From<&FieldBase<P>> for PinValue {
    fn from(e: &FieldBase<P>) -> Self {
        Self::Entity(e.handle().clone())
    }
}

impl<T: CollectionItem> From<&Collection<T>> for PinValue {
    fn from(e: &Collection<T>) -> Self {
        Self::Entity(e.handle().clone())
    }
}

impl From<OperatorOutput> for PinValue {
    fn from(output: OperatorOutput) -> Self {
        Self::Output(output)
    }
}

impl From<&Operator> for PinValue {
    fn from(op: &Operator) -> Self {
        // connecting an operator without a pin means its first output
        Self::Output(op.output(0))
    }
}

/// Types retrievable from an output pin.
pub trait FromOutput: Sized {
    fn requested() -> OutputKind;
    fn from_response(response: Response, server: &Server) -> Result<Self>;
}

macro_rules! from_output_literal {
    ($($ty:ty => $kind:ident / $variant:ident),* $(,)?) => {
        $(impl FromOutput for $ty {
            fn requested() -> OutputKind {
                OutputKind::$kind
            }

            fn from_response(response: Response, _server: &Server) -> Result<Self> {
                match response {
                    Response::$variant(v) => Ok(v),
                    other => Err(unexpected_response("operator_get_output", &other)),
                }
            }
        })*
    };
}

from_output_literal! {
    Id => Int / Int,
    Float => Double / Double,
    bool => Bool / Bool,
    String => Str / Str,
    Vec<u8> => Bytes / Bytes,
}

fn entity_from_response<E: Entity>(response: Response, server: &Server) -> Result<E> {
    match response {
        Response::Entity { kind, handle } => {
            E::adopt(EntityHandle::new(handle, kind, server.clone()))
        }
        Response::Handle(handle) => Ok(E::from_handle(EntityHandle::new(
            handle,
            E::KIND,
            server.clone(),
        ))),
        other => Err(unexpected_response("operator_get_output", &other)),
    }
}

macro_rules! from_output_entity {
    ($($ty:ty),* $(,)?) => {
        $(impl FromOutput for $ty {
            fn requested() -> OutputKind {
                OutputKind::Entity(<$ty as Entity>::KIND)
            }

            fn from_response(response: Response, server: &Server) -> Result<Self> {
                entity_from_response(response, server)
            }
        })*
    };
}

from_output_entity! {
    crate::entity::scoping::Scoping,
    crate::entity::mesh::MeshedRegion,
    crate::entity::data_sources::DataSources,
    crate::entity::data_tree::DataTree,
    crate::entity::generic::GenericDataContainer,
    crate::entity::any::Any,
    crate::entity::support::Support,
    crate::entity::support::TimeFreqSupport,
}

impl<P: FieldPayload> FromOutput for FieldBase<P> {
    fn requested() -> OutputKind {
        OutputKind::Entity(P::KIND)
    }

    fn from_response(response: Response, server: &Server) -> Result<Self> {
        entity_from_response(response, server)
    }
}

impl<T: CollectionItem> FromOutput for Collection<T> {
    fn requested() -> OutputKind {
        OutputKind::Entity(T::COLLECTION_KIND)
    }

    fn from_response(response: Response, server: &Server) -> Result<Self> {
        entity_from_response(response, server)
    }
}

impl FromOutput for Workflow {
    fn requested() -> OutputKind {
        OutputKind::Entity(EntityKind::Workflow)
    }

    fn from_response(response: Response, server: &Server) -> Result<Self> {
        match response {
            Response::Entity {
                kind: EntityKind::Workflow,
                handle,
            }
            | Response::Handle(handle) => Ok(Workflow::from_handle(EntityHandle::new(
                handle,
                EntityKind::Workflow,
                server.clone(),
            ))),
            other => Err(unexpected_response("operator_get_output", &other)),
        }
    }
}

/// Lazy reference to one output pin, usable as a pin value downstream.
#[derive(Clone)]
pub struct OperatorOutput {
    operator: Operator,
    pin: i32,
}

impl OperatorOutput {
    pub fn pin(&self) -> i32 {
        self.pin
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }
}

/// Engine-side operator instance.
#[derive(Clone)]
pub struct Operator {
    handle: Arc<EntityHandle>,
    name: String,
    // lazily fetched, at most once per wrapper
    spec: Arc<Mutex<Option<Arc<Specification>>>>,
}

impl Operator {
    /// Instantiates the named operator on `server`.
    ///
    /// The engine enforces license acceptance here; a rejection surfaces as
    /// a license error. An operator the engine does not register fails with
    /// an unsupported-operation error carrying a nearest-name hint.
    pub fn new(server: &Server, name: &str) -> Result<Self> {
        if !server.has_operator(name) {
            return Err(server.unknown_operator(name));
        }
        match server.call(Request::Operator(OperatorCall::New {
            name: name.to_string(),
        }))? {
            Response::Handle(h) => Ok(Self {
                handle: EntityHandle::new(h, EntityKind::Operator, server.clone()),
                name: name.to_string(),
                spec: Arc::new(Mutex::new(None)),
            }),
            other => Err(unexpected_response("operator_new", &other)),
        }
    }

    pub(crate) fn from_parts(handle: Arc<EntityHandle>, name: String) -> Self {
        Self {
            handle,
            name,
            spec: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Server {
        self.handle.server()
    }

    pub(crate) fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }

    fn call(&self, call: OperatorCall) -> Result<Response> {
        self.handle.server().call(Request::Operator(call))
    }

    /// Fresh instance of the same operator with the same configuration,
    /// without any of the connected inputs.
    pub fn derivate(&self) -> Result<Operator> {
        match self.call(OperatorCall::Derivate {
            operator: self.handle.live_id()?,
        })? {
            Response::Handle(h) => Ok(Self::from_parts(
                EntityHandle::new(h, EntityKind::Operator, self.handle.server().clone()),
                self.name.clone(),
            )),
            other => Err(unexpected_response("operator_derivate", &other)),
        }
    }

    /// Connects an input pin to a literal, an entity or an upstream output.
    pub fn connect(&self, pin: i32, value: impl Into<PinValue>) -> Result<()> {
        match self.call(OperatorCall::Connect {
            operator: self.handle.live_id()?,
            pin,
            value: value.into().into_call_value()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("operator_connect", &other)),
        }
    }

    /// Connects an input resolved by pin name.
    ///
    /// Aliased names still route to their pin but log a deprecation warning;
    /// alias resolution needs an engine >= 10.0.
    pub fn connect_named(&self, name: &str, value: impl Into<PinValue>) -> Result<()> {
        let spec = self.specification()?;
        let (pin, via_alias) = spec.input_pin_by_name(name)?;
        if via_alias {
            self.handle.server().require(VERSION_PIN_ALIASES)?;
            warn!(
                "input `{}` of operator `{}` is a deprecated alias of `{}`",
                name,
                self.name,
                spec.input_pin(pin).map(|p| p.name.as_str()).unwrap_or("?")
            );
        }
        self.connect(pin, value)
    }

    /// Evaluates the operator and retrieves an output pin as `T`.
    ///
    /// Evaluation is pull-driven: this is the moment the engine runs the
    /// upstream graph.
    pub fn get_output<T: FromOutput>(&self, pin: i32) -> Result<T> {
        let response = self.call(OperatorCall::GetOutput {
            operator: self.handle.live_id()?,
            pin,
            requested: T::requested(),
        })?;
        T::from_response(response, self.handle.server())
    }

    /// Lazy handle on an output pin, for wiring into downstream pins.
    pub fn output(&self, pin: i32) -> OperatorOutput {
        OperatorOutput {
            operator: self.clone(),
            pin,
        }
    }

    /// Evaluates for side effects, without retrieving an output.
    pub fn run(&self) -> Result<()> {
        match self.call(OperatorCall::Run {
            operator: self.handle.live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("operator_run", &other)),
        }
    }

    /// Declarative contract of this operator, fetched once and shared
    /// between clones.
    pub fn specification(&self) -> Result<Arc<Specification>> {
        let mut slot = self.spec.lock().unwrap();
        if let Some(spec) = slot.as_ref() {
            return Ok(spec.clone());
        }
        let spec = Self::specification_of(self.handle.server(), &self.name)?;
        *slot = Some(spec.clone());
        Ok(spec)
    }

    /// Specification lookup by operator name, without instantiating.
    pub fn specification_of(server: &Server, name: &str) -> Result<Arc<Specification>> {
        match server.call(Request::Operator(OperatorCall::GetSpecification {
            name: name.to_string(),
        }))? {
            Response::Spec(spec) => Ok(Arc::from(spec)),
            other => Err(unexpected_response("operator_get_specification", &other)),
        }
    }

    pub fn config(&self) -> Result<OperatorConfig> {
        match self.call(OperatorCall::GetConfig {
            operator: self.handle.live_id()?,
        })? {
            Response::Config(config) => Ok(config),
            other => Err(unexpected_response("operator_get_config", &other)),
        }
    }

    pub fn set_config(&self, config: OperatorConfig) -> Result<()> {
        match self.call(OperatorCall::SetConfig {
            operator: self.handle.live_id()?,
            config,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("operator_set_config", &other)),
        }
    }
}

impl PartialEq for Operator {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Operator(`{}`, {:?})", self.name, self.handle)
    }
}
