//! Handle lifecycle.
//!
//! Every entity wrapper owns exactly one [`EntityHandle`]; container lookups
//! hand out shared views as `Arc<EntityHandle>`. The finalizer releases the
//! engine-side object exactly once and never panics: failures are logged,
//! and a closed server session makes the release a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::binding::call::{AdminCall, Request, Response};
use crate::entity::EntityKind;
use crate::error::{Error, Result};
use crate::server::Server;
use crate::HandleId;

/// Owned reference to an engine-side object.
pub struct EntityHandle {
    id: HandleId,
    kind: EntityKind,
    server: Server,
    released: AtomicBool,
}

impl EntityHandle {
    pub fn new(id: HandleId, kind: EntityKind, server: Server) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            server,
            released: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Guarded accessor used by every wrapper call; surfaces
    /// `HandleReleased` instead of handing a dead id to the engine.
    pub fn live_id(&self) -> Result<HandleId> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::HandleReleased {
                kind: self.kind,
                handle: self.id,
            });
        }
        Ok(self.id)
    }

    /// True when both handles name the same object on the same server.
    pub fn same_object(&self, other: &EntityHandle) -> bool {
        self.id == other.id && self.kind == other.kind && self.server == other.server
    }

    /// Portable byte serialization via the engine serializer.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let id = self.live_id()?;
        match self.server.call(Request::Admin(AdminCall::Serialize {
            kind: self.kind,
            handle: id,
        }))? {
            Response::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected_response("serialize", &other)),
        }
    }

    /// Reinstantiates serialized bytes on `target`, the only sanctioned way
    /// to move an entity between servers.
    pub fn deep_copy(&self, target: &Server) -> Result<Arc<EntityHandle>> {
        let bytes = self.serialize()?;
        match target.call(Request::Admin(AdminCall::Deserialize { bytes }))? {
            Response::Entity { kind, handle } => {
                if kind != self.kind {
                    return Err(Error::TypeMismatch {
                        expected: self.kind.to_str().to_string(),
                        actual: kind.to_str().to_string(),
                    });
                }
                Ok(EntityHandle::new(handle, kind, target.clone()))
            }
            other => Err(unexpected_response("deserialize", &other)),
        }
    }

    /// Engine comparator: content equality within a tolerance. Both handles
    /// must live on the same server.
    pub fn content_equals(&self, other: &EntityHandle, tolerance: f64) -> Result<bool> {
        if self.server != other.server {
            return Err(Error::validation(
                "content comparison requires both entities on the same server; deep_copy first",
            ));
        }
        match self.server.call(Request::Admin(AdminCall::ContentEquals {
            kind: self.kind,
            left: self.live_id()?,
            right: other.live_id()?,
            tolerance,
        }))? {
            Response::Bool(eq) => Ok(eq),
            other => Err(unexpected_response("content_equals", &other)),
        }
    }
}

impl Drop for EntityHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.server.release_quietly(AdminCall::ReleaseHandle {
            kind: self.kind,
            handle: self.id,
        });
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}#{}@server{}",
            self.kind,
            self.id,
            self.server.id()
        )
    }
}

/// Uniform error for a response shape the call contract does not allow.
pub(crate) fn unexpected_response(call: &str, response: &Response) -> Error {
    Error::Transport(format!(
        "engine returned an unexpected response to `{}`: {:?}",
        call, response
    ))
}
