//! Scopings: ordered id sequences tagged with a location.

use std::sync::Arc;

use crate::binding::call::{Request, Response, ScopingCall};
use crate::entity::{Entity, EntityKind, Location};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::version::{LARGE_SCOPING_LEN, VERSION_LARGE_SCOPING};
use crate::Id;

/// Ordered sequence of int ids plus a location tag.
#[derive(Clone)]
pub struct Scoping {
    handle: Arc<EntityHandle>,
}

impl Entity for Scoping {
    const KIND: EntityKind = EntityKind::Scoping;
    // id payloads compare exactly
    const CONTENT_TOLERANCE: f64 = 0.0;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl Scoping {
    pub fn new(server: &Server, location: Location) -> Result<Self> {
        match server.call(Request::Scoping(ScopingCall::New { location }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::Scoping,
                server.clone(),
            ))),
            other => Err(unexpected_response("scoping_new", &other)),
        }
    }

    fn call(&self, call: ScopingCall) -> Result<Response> {
        self.handle.server().call(Request::Scoping(call))
    }

    pub fn ids(&self) -> Result<Vec<Id>> {
        match self.call(ScopingCall::GetIds {
            scoping: self.handle.live_id()?,
        })? {
            Response::IntVec(ids) => Ok(ids),
            other => Err(unexpected_response("scoping_get_ids", &other)),
        }
    }

    /// Replaces the id sequence wholesale, preserving order.
    ///
    /// Arrays past two million entries need an engine >= 2.1.
    pub fn set_ids(&self, ids: Vec<Id>) -> Result<()> {
        if ids.len() > LARGE_SCOPING_LEN {
            self.handle.server().require(VERSION_LARGE_SCOPING)?;
        }
        match self.call(ScopingCall::SetIds {
            scoping: self.handle.live_id()?,
            ids,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("scoping_set_ids", &other)),
        }
    }

    pub fn location(&self) -> Result<Location> {
        match self.call(ScopingCall::GetLocation {
            scoping: self.handle.live_id()?,
        })? {
            Response::Str(loc) => Ok(Location::from_str(&loc)),
            other => Err(unexpected_response("scoping_get_location", &other)),
        }
    }

    pub fn set_location(&self, location: Location) -> Result<()> {
        match self.call(ScopingCall::SetLocation {
            scoping: self.handle.live_id()?,
            location,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("scoping_set_location", &other)),
        }
    }

    pub fn size(&self) -> Result<usize> {
        match self.call(ScopingCall::Size {
            scoping: self.handle.live_id()?,
        })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("scoping_size", &other)),
        }
    }

    /// Id stored at `index`.
    pub fn id(&self, index: usize) -> Result<Id> {
        match self.call(ScopingCall::IdAt {
            scoping: self.handle.live_id()?,
            index,
        })? {
            Response::Int(id) => Ok(id),
            other => Err(unexpected_response("scoping_id_at", &other)),
        }
    }

    /// Index holding `id`.
    pub fn index(&self, id: Id) -> Result<usize> {
        match self.call(ScopingCall::IndexOf {
            scoping: self.handle.live_id()?,
            id,
        })? {
            Response::Int(idx) => Ok(idx as usize),
            other => Err(unexpected_response("scoping_index_of", &other)),
        }
    }

    pub fn set_id(&self, index: usize, id: Id) -> Result<()> {
        match self.call(ScopingCall::SetId {
            scoping: self.handle.live_id()?,
            index,
            id,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("scoping_set_id", &other)),
        }
    }

    pub fn append(&self, id: Id) -> Result<()> {
        match self.call(ScopingCall::Append {
            scoping: self.handle.live_id()?,
            id,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("scoping_append", &other)),
        }
    }

    /// Opens a client-memory working copy; see [`LocalScoping`].
    pub fn as_local_scoping(&self) -> Result<LocalScoping> {
        LocalScoping::open(self.clone())
    }
}

impl PartialEq for Scoping {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for Scoping {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Scoping({:?})", self.handle)
    }
}

/// Client-only working set over a scoping.
///
/// Opening duplicates the ids into client memory; every mutation happens in
/// the buffer. The buffer flushes back to the engine exactly once, at drop
/// or through an explicit [`release`](LocalScoping::release). Until then the
/// engine-side scoping is unchanged, and the local copy must never be handed
/// to the engine.
pub struct LocalScoping {
    target: Scoping,
    ids: Vec<Id>,
    location: Location,
    dirty: bool,
    flushed: bool,
}

impl LocalScoping {
    fn open(target: Scoping) -> Result<Self> {
        let ids = target.ids()?;
        let location = target.location()?;
        Ok(Self {
            target,
            ids,
            location,
            dirty: false,
            flushed: false,
        })
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_ids(&mut self, ids: Vec<Id>) {
        self.ids = ids;
        self.dirty = true;
    }

    pub fn append(&mut self, id: Id) {
        self.ids.push(id);
        self.dirty = true;
    }

    pub fn set_id(&mut self, index: usize, id: Id) -> Result<()> {
        if index >= self.ids.len() {
            return Err(Error::validation(format!(
                "index {} out of bounds for local scoping of size {}",
                index,
                self.ids.len()
            )));
        }
        self.ids[index] = id;
        self.dirty = true;
        Ok(())
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
        self.dirty = true;
    }

    /// Explicit flush; afterwards the drop path is a no-op.
    pub fn release(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if !self.dirty {
            return Ok(());
        }
        self.target.set_ids(std::mem::take(&mut self.ids))?;
        self.target.set_location(self.location.clone())
    }
}

impl Drop for LocalScoping {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("local scoping flush failed: {}", e);
        }
    }
}
