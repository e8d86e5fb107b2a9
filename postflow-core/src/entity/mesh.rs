//! Meshed regions: nodes, elements and the metadata hanging off them.

use std::sync::Arc;

use crate::binding::call::{MeshCall, Request, Response};
use crate::entity::field::{Field, PropertyField};
use crate::entity::scoping::Scoping;
use crate::entity::{Entity, EntityKind};
use crate::error::Result;
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::Float;

#[derive(Clone)]
pub struct MeshedRegion {
    handle: Arc<EntityHandle>,
}

impl Entity for MeshedRegion {
    const KIND: EntityKind = EntityKind::MeshedRegion;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl MeshedRegion {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::Mesh(MeshCall::New))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::MeshedRegion,
                server.clone(),
            ))),
            other => Err(unexpected_response("mesh_new", &other)),
        }
    }

    fn call(&self, call: MeshCall) -> Result<Response> {
        self.handle.server().call(Request::Mesh(call))
    }

    fn count(&self, call: MeshCall, name: &'static str) -> Result<usize> {
        match self.call(call)? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response(name, &other)),
        }
    }

    pub fn node_count(&self) -> Result<usize> {
        let id = self.handle.live_id()?;
        self.count(MeshCall::NodeCount { mesh: id }, "mesh_node_count")
    }

    pub fn element_count(&self) -> Result<usize> {
        let id = self.handle.live_id()?;
        self.count(MeshCall::ElementCount { mesh: id }, "mesh_element_count")
    }

    pub fn face_count(&self) -> Result<usize> {
        let id = self.handle.live_id()?;
        self.count(MeshCall::FaceCount { mesh: id }, "mesh_face_count")
    }

    /// A mesh is empty only when it has no nodes, no faces and no elements;
    /// a node-only cloud still counts as a mesh.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.node_count()? == 0 && self.face_count()? == 0 && self.element_count()? == 0)
    }

    /// Nodal vector field of node coordinates.
    pub fn coordinates(&self) -> Result<Field> {
        match self.call(MeshCall::Coordinates {
            mesh: self.handle.live_id()?,
        })? {
            Response::Handle(h) => Ok(Field::from_handle(EntityHandle::new(
                h,
                EntityKind::Field,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("mesh_coordinates", &other)),
        }
    }

    pub fn set_coordinates(&self, field: &Field) -> Result<()> {
        match self.call(MeshCall::SetCoordinates {
            mesh: self.handle.live_id()?,
            field: field.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("mesh_set_coordinates", &other)),
        }
    }

    fn scoping_of(&self, call: MeshCall, name: &'static str) -> Result<Scoping> {
        match self.call(call)? {
            Response::Handle(h) => Ok(Scoping::from_handle(EntityHandle::new(
                h,
                EntityKind::Scoping,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response(name, &other)),
        }
    }

    pub fn node_scoping(&self) -> Result<Scoping> {
        let id = self.handle.live_id()?;
        self.scoping_of(MeshCall::NodeScoping { mesh: id }, "mesh_node_scoping")
    }

    pub fn set_node_scoping(&self, scoping: &Scoping) -> Result<()> {
        match self.call(MeshCall::SetNodeScoping {
            mesh: self.handle.live_id()?,
            scoping: scoping.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("mesh_set_node_scoping", &other)),
        }
    }

    pub fn element_scoping(&self) -> Result<Scoping> {
        let id = self.handle.live_id()?;
        self.scoping_of(
            MeshCall::ElementScoping { mesh: id },
            "mesh_element_scoping",
        )
    }

    pub fn unit(&self) -> Result<String> {
        match self.call(MeshCall::GetUnit {
            mesh: self.handle.live_id()?,
        })? {
            Response::Str(unit) => Ok(unit),
            other => Err(unexpected_response("mesh_get_unit", &other)),
        }
    }

    pub fn set_unit(&self, unit: &str) -> Result<()> {
        match self.call(MeshCall::SetUnit {
            mesh: self.handle.live_id()?,
            unit: unit.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("mesh_set_unit", &other)),
        }
    }

    /// Names of the integer properties stored on the mesh, e.g.
    /// `connectivity`, `eltype`, `mat`.
    pub fn available_property_fields(&self) -> Result<Vec<String>> {
        match self.call(MeshCall::AvailablePropertyFields {
            mesh: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("mesh_available_properties", &other)),
        }
    }

    pub fn property_field(&self, name: &str) -> Result<PropertyField> {
        match self.call(MeshCall::PropertyField {
            mesh: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Handle(h) => Ok(PropertyField::from_handle(EntityHandle::new(
                h,
                EntityKind::PropertyField,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("mesh_property_field", &other)),
        }
    }

    pub fn set_property_field(&self, name: &str, field: &PropertyField) -> Result<()> {
        match self.call(MeshCall::SetPropertyField {
            mesh: self.handle.live_id()?,
            name: name.to_string(),
            field: field.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("mesh_set_property_field", &other)),
        }
    }

    pub fn named_selections(&self) -> Result<Vec<String>> {
        match self.call(MeshCall::NamedSelections {
            mesh: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("mesh_named_selections", &other)),
        }
    }

    pub fn named_selection(&self, name: &str) -> Result<Scoping> {
        let id = self.handle.live_id()?;
        self.scoping_of(
            MeshCall::NamedSelection {
                mesh: id,
                name: name.to_string(),
            },
            "mesh_named_selection",
        )
    }

    pub fn set_named_selection(&self, name: &str, scoping: &Scoping) -> Result<()> {
        match self.call(MeshCall::SetNamedSelection {
            mesh: self.handle.live_id()?,
            name: name.to_string(),
            scoping: scoping.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("mesh_set_named_selection", &other)),
        }
    }

    /// New mesh with nodes translated by `scale` times the nodal vector
    /// `field`; the receiver is unchanged.
    pub fn deform_by(&self, field: &Field, scale: Float) -> Result<MeshedRegion> {
        match self.call(MeshCall::DeformBy {
            mesh: self.handle.live_id()?,
            field: field.handle().live_id()?,
            scale,
        })? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::MeshedRegion,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("mesh_deform_by", &other)),
        }
    }
}

impl PartialEq for MeshedRegion {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for MeshedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "MeshedRegion({:?})", self.handle)
    }
}
