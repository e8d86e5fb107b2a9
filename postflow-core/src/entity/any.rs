//! Type-erased boxing for heterogeneous storage.

use std::sync::Arc;

use crate::binding::call::{AnyCall, CallValue, OutputKind, Request, Response};
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::{Float, Id};

/// A value boxed with its type tag. Retrieval goes through `cast`, which
/// fails with a type mismatch when the requested type disagrees with the
/// stored tag.
#[derive(Clone)]
pub struct Any {
    handle: Arc<EntityHandle>,
}

impl Entity for Any {
    const KIND: EntityKind = EntityKind::Any;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl Any {
    fn new(server: &Server, value: CallValue) -> Result<Self> {
        match server.call(Request::Any(AnyCall::New { value }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::Any,
                server.clone(),
            ))),
            other => Err(unexpected_response("any_new", &other)),
        }
    }

    pub fn from_int(server: &Server, value: Id) -> Result<Self> {
        Self::new(server, CallValue::Int(value))
    }

    pub fn from_double(server: &Server, value: Float) -> Result<Self> {
        Self::new(server, CallValue::Double(value))
    }

    pub fn from_string(server: &Server, value: &str) -> Result<Self> {
        Self::new(server, CallValue::Str(value.to_string()))
    }

    pub fn from_entity<E: Entity>(entity: &E) -> Result<Self> {
        Self::new(
            entity.server(),
            CallValue::Entity {
                kind: E::KIND,
                handle: entity.handle().live_id()?,
            },
        )
    }

    fn cast(&self, requested: OutputKind) -> Result<Response> {
        self.handle.server().call(Request::Any(AnyCall::Cast {
            any: self.handle.live_id()?,
            requested,
        }))
    }

    pub fn as_int(&self) -> Result<Id> {
        match self.cast(OutputKind::Int)? {
            Response::Int(v) => Ok(v),
            other => Err(unexpected_response("any_cast_int", &other)),
        }
    }

    pub fn as_double(&self) -> Result<Float> {
        match self.cast(OutputKind::Double)? {
            Response::Double(v) => Ok(v),
            other => Err(unexpected_response("any_cast_double", &other)),
        }
    }

    pub fn as_string(&self) -> Result<String> {
        match self.cast(OutputKind::Str)? {
            Response::Str(v) => Ok(v),
            other => Err(unexpected_response("any_cast_string", &other)),
        }
    }

    /// Unboxes into the typed wrapper `E`; the stored tag must match.
    pub fn as_entity<E: Entity>(&self) -> Result<E> {
        match self.cast(OutputKind::Entity(E::KIND))? {
            Response::Entity { kind, handle } => {
                if kind != E::KIND {
                    return Err(Error::TypeMismatch {
                        expected: E::KIND.to_str().to_string(),
                        actual: kind.to_str().to_string(),
                    });
                }
                Ok(E::from_handle(EntityHandle::new(
                    handle,
                    kind,
                    self.handle.server().clone(),
                )))
            }
            other => Err(unexpected_response("any_cast_entity", &other)),
        }
    }
}

impl PartialEq for Any {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for Any {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Any({:?})", self.handle)
    }
}
