//! Generic data containers: flat property bags mixing literals and entities.

use std::sync::Arc;

use crate::binding::call::{CallValue, GenericCall, Request, Response};
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::{Float, Id};

#[derive(Clone)]
pub struct GenericDataContainer {
    handle: Arc<EntityHandle>,
}

impl Entity for GenericDataContainer {
    const KIND: EntityKind = EntityKind::GenericDataContainer;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl GenericDataContainer {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::Generic(GenericCall::New))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::GenericDataContainer,
                server.clone(),
            ))),
            other => Err(unexpected_response("generic_new", &other)),
        }
    }

    fn call(&self, call: GenericCall) -> Result<Response> {
        self.handle.server().call(Request::Generic(call))
    }

    pub fn set_property(&self, name: &str, value: CallValue) -> Result<()> {
        match self.call(GenericCall::SetProperty {
            container: self.handle.live_id()?,
            name: name.to_string(),
            value,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("generic_set_property", &other)),
        }
    }

    pub fn set_int(&self, name: &str, value: Id) -> Result<()> {
        self.set_property(name, CallValue::Int(value))
    }

    pub fn set_double(&self, name: &str, value: Float) -> Result<()> {
        self.set_property(name, CallValue::Double(value))
    }

    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.set_property(name, CallValue::Str(value.to_string()))
    }

    /// Stores an entity by reference; the container does not own the handle.
    pub fn set_entity<E: Entity>(&self, name: &str, entity: &E) -> Result<()> {
        self.set_property(
            name,
            CallValue::Entity {
                kind: E::KIND,
                handle: entity.handle().live_id()?,
            },
        )
    }

    pub fn get_property(&self, name: &str) -> Result<CallValue> {
        match self.call(GenericCall::GetProperty {
            container: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected_response("generic_get_property", &other)),
        }
    }

    /// Retrieves an entity property as its typed wrapper.
    pub fn get_entity<E: Entity>(&self, name: &str) -> Result<E> {
        match self.get_property(name)? {
            CallValue::Entity { kind, handle } => {
                E::adopt(EntityHandle::new(handle, kind, self.handle.server().clone()))
            }
            other => Err(Error::TypeMismatch {
                expected: E::KIND.to_str().to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    pub fn property_names(&self) -> Result<Vec<String>> {
        match self.call(GenericCall::PropertyNames {
            container: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("generic_property_names", &other)),
        }
    }
}

impl PartialEq for GenericDataContainer {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for GenericDataContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "GenericDataContainer({:?})", self.handle)
    }
}
