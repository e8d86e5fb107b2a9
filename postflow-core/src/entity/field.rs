//! Fields: scoped data arrays with a location, a unit and a dimensionality.
//!
//! The four concrete field types share one engine surface and differ only in
//! their elementary scalar. [`FieldBase`] carries everything common; the
//! payload marker picks the entity kind, the scalar family and the data
//! accessors, so `Field`, [`PropertyField`], [`StringField`] and
//! [`CustomTypeField`] are aliases over the same plumbing.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::call::{FieldCall, Request, Response, ScalarKind};
use crate::entity::scoping::Scoping;
use crate::entity::support::Support;
use crate::entity::{Entity, EntityKind, Location};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::version::VERSION_NAMED_UNITS;
use crate::{Float, Id};

/// Selects the elementary scalar of a field wrapper.
pub trait FieldPayload: Sized {
    const KIND: EntityKind;
    const SCALAR: ScalarKind;
    const TOLERANCE: f64;
}

pub enum DoublePayload {}
pub enum IntPayload {}
pub enum StringPayload {}
pub enum BytesPayload {}

impl FieldPayload for DoublePayload {
    const KIND: EntityKind = EntityKind::Field;
    const SCALAR: ScalarKind = ScalarKind::Double;
    const TOLERANCE: f64 = 1e-12;
}

impl FieldPayload for IntPayload {
    const KIND: EntityKind = EntityKind::PropertyField;
    const SCALAR: ScalarKind = ScalarKind::Int;
    const TOLERANCE: f64 = 0.0;
}

impl FieldPayload for StringPayload {
    const KIND: EntityKind = EntityKind::StringField;
    const SCALAR: ScalarKind = ScalarKind::String;
    const TOLERANCE: f64 = 0.0;
}

impl FieldPayload for BytesPayload {
    const KIND: EntityKind = EntityKind::CustomTypeField;
    const SCALAR: ScalarKind = ScalarKind::Custom;
    const TOLERANCE: f64 = 0.0;
}

/// Real-valued field, the workhorse payload of result post-processing.
pub type Field = FieldBase<DoublePayload>;
/// Integer metadata attached to mesh entities.
pub type PropertyField = FieldBase<IntPayload>;
/// String payload, one entry per elementary entity.
pub type StringField = FieldBase<StringPayload>;
/// Raw bytes with a user-declared element type and width.
pub type CustomTypeField = FieldBase<BytesPayload>;

pub struct FieldBase<P> {
    handle: Arc<EntityHandle>,
    _payload: PhantomData<P>,
}

impl<P> Clone for FieldBase<P> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: FieldPayload> Entity for FieldBase<P> {
    const KIND: EntityKind = P::KIND;
    const CONTENT_TOLERANCE: f64 = P::TOLERANCE;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self {
            handle,
            _payload: PhantomData,
        }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl<P: FieldPayload> FieldBase<P> {
    pub fn new(server: &Server, location: Location, num_components: i32) -> Result<Self> {
        match server.call(Request::Field(FieldCall::New {
            scalar: P::SCALAR,
            location,
            num_components,
        }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                P::KIND,
                server.clone(),
            ))),
            other => Err(unexpected_response("field_new", &other)),
        }
    }

    fn call(&self, call: FieldCall) -> Result<Response> {
        self.handle.server().call(Request::Field(call))
    }

    fn id(&self) -> Result<crate::HandleId> {
        self.handle.live_id()
    }

    pub fn scoping(&self) -> Result<Scoping> {
        match self.call(FieldCall::GetScoping { field: self.id()? })? {
            Response::Handle(h) => Ok(Scoping::from_handle(EntityHandle::new(
                h,
                EntityKind::Scoping,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("field_get_scoping", &other)),
        }
    }

    pub fn set_scoping(&self, scoping: &Scoping) -> Result<()> {
        match self.call(FieldCall::SetScoping {
            field: self.id()?,
            scoping: scoping.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_scoping", &other)),
        }
    }

    pub fn location(&self) -> Result<Location> {
        match self.call(FieldCall::GetLocation { field: self.id()? })? {
            Response::Str(loc) => Ok(Location::from_str(&loc)),
            other => Err(unexpected_response("field_get_location", &other)),
        }
    }

    pub fn unit(&self) -> Result<String> {
        match self.call(FieldCall::GetUnit { field: self.id()? })? {
            Response::Str(unit) => Ok(unit),
            other => Err(unexpected_response("field_get_unit", &other)),
        }
    }

    pub fn set_unit(&self, unit: &str) -> Result<()> {
        match self.call(FieldCall::SetUnit {
            field: self.id()?,
            unit: unit.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_unit", &other)),
        }
    }

    /// Attaches a named dimensionless unit, a (homogeneity, name) pair such
    /// as `("ratio", "poisson")`. Needs an engine >= 11.0.
    pub fn set_named_unit(&self, homogeneity: &str, name: &str) -> Result<()> {
        self.handle.server().require(VERSION_NAMED_UNITS)?;
        match self.call(FieldCall::SetUnitNamed {
            field: self.id()?,
            homogeneity: homogeneity.to_string(),
            name: name.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_named_unit", &other)),
        }
    }

    /// Components per elementary entry, e.g. `[3]` for a vector field or
    /// `[3, 3]` for a tensor field.
    pub fn dimensionality(&self) -> Result<Vec<i32>> {
        match self.call(FieldCall::GetDimensionality { field: self.id()? })? {
            Response::IntVec(dims) => Ok(dims),
            other => Err(unexpected_response("field_get_dimensionality", &other)),
        }
    }

    pub fn set_dimensionality(&self, dimensions: Vec<i32>) -> Result<()> {
        match self.call(FieldCall::SetDimensionality {
            field: self.id()?,
            dimensions,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_dimensionality", &other)),
        }
    }

    pub fn shell_layers(&self) -> Result<i32> {
        match self.call(FieldCall::GetShellLayers { field: self.id()? })? {
            Response::Int(layers) => Ok(layers),
            other => Err(unexpected_response("field_get_shell_layers", &other)),
        }
    }

    pub fn set_shell_layers(&self, layers: i32) -> Result<()> {
        match self.call(FieldCall::SetShellLayers {
            field: self.id()?,
            layers,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_shell_layers", &other)),
        }
    }

    /// First-data-index per entity for fields with a variable number of
    /// entries per entity (elemental nodal layouts).
    pub fn data_pointer(&self) -> Result<Vec<Id>> {
        match self.call(FieldCall::GetDataPointer { field: self.id()? })? {
            Response::IntVec(pointer) => Ok(pointer),
            other => Err(unexpected_response("field_get_data_pointer", &other)),
        }
    }

    pub fn set_data_pointer(&self, pointer: Vec<Id>) -> Result<()> {
        match self.call(FieldCall::SetDataPointer {
            field: self.id()?,
            pointer,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_data_pointer", &other)),
        }
    }

    /// Total number of scalar entries.
    pub fn size(&self) -> Result<usize> {
        match self.call(FieldCall::Size { field: self.id()? })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("field_size", &other)),
        }
    }

    /// Number of elementary entities, i.e. `size / product(dimensionality)`.
    pub fn elementary_data_count(&self) -> Result<usize> {
        match self.call(FieldCall::ElementaryDataCount { field: self.id()? })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("field_elementary_data_count", &other)),
        }
    }

    pub fn resize(&self, entities: usize, data_len: usize) -> Result<()> {
        match self.call(FieldCall::Resize {
            field: self.id()?,
            entities,
            data_len,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_resize", &other)),
        }
    }

    pub fn support(&self) -> Result<Support> {
        match self.call(FieldCall::GetSupport { field: self.id()? })? {
            Response::Entity { kind, handle } => Ok(Support::from_handle(EntityHandle::new(
                handle,
                kind,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("field_get_support", &other)),
        }
    }

    pub fn set_support(&self, support: &Support) -> Result<()> {
        match self.call(FieldCall::SetSupport {
            field: self.id()?,
            support: support.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_support", &other)),
        }
    }
}

impl Field {
    pub fn data(&self) -> Result<Vec<Float>> {
        match self.call(FieldCall::GetDataDouble { field: self.id()? })? {
            Response::DoubleVec(data) => Ok(data),
            other => Err(unexpected_response("field_get_data", &other)),
        }
    }

    pub fn set_data(&self, data: Vec<Float>) -> Result<()> {
        match self.call(FieldCall::SetDataDouble {
            field: self.id()?,
            data,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_set_data", &other)),
        }
    }

    /// Elementary data of the entity stored at `index`.
    pub fn entity_data(&self, index: usize) -> Result<Vec<Float>> {
        match self.call(FieldCall::EntityData {
            field: self.id()?,
            index,
        })? {
            Response::DoubleVec(data) => Ok(data),
            other => Err(unexpected_response("field_entity_data", &other)),
        }
    }

    /// Elementary data of the entity carrying scoping id `id`.
    pub fn entity_data_by_id(&self, id: Id) -> Result<Vec<Float>> {
        match self.call(FieldCall::EntityDataById {
            field: self.id()?,
            id,
        })? {
            Response::DoubleVec(data) => Ok(data),
            other => Err(unexpected_response("field_entity_data_by_id", &other)),
        }
    }

    /// Appends elementary data under a new scoping id.
    pub fn append(&self, data: Vec<Float>, id: Id) -> Result<()> {
        match self.call(FieldCall::Append {
            field: self.id()?,
            data,
            id,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("field_append", &other)),
        }
    }

    /// Opens a client-memory working copy; see [`LocalField`].
    pub fn as_local_field(&self) -> Result<LocalField> {
        LocalField::open(self.clone())
    }
}

impl PropertyField {
    pub fn data(&self) -> Result<Vec<Id>> {
        match self.call(FieldCall::GetDataInt { field: self.id()? })? {
            Response::IntVec(data) => Ok(data),
            other => Err(unexpected_response("property_field_get_data", &other)),
        }
    }

    pub fn set_data(&self, data: Vec<Id>) -> Result<()> {
        match self.call(FieldCall::SetDataInt {
            field: self.id()?,
            data,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("property_field_set_data", &other)),
        }
    }
}

impl StringField {
    pub fn data(&self) -> Result<Vec<String>> {
        match self.call(FieldCall::GetDataString { field: self.id()? })? {
            Response::StrVec(data) => Ok(data),
            other => Err(unexpected_response("string_field_get_data", &other)),
        }
    }

    pub fn set_data(&self, data: Vec<String>) -> Result<()> {
        match self.call(FieldCall::SetDataString {
            field: self.id()?,
            data,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("string_field_set_data", &other)),
        }
    }
}

impl CustomTypeField {
    /// Raw payload bytes; layout interpretation is up to the caller.
    pub fn data(&self) -> Result<Vec<u8>> {
        match self.call(FieldCall::GetDataBytes { field: self.id()? })? {
            Response::Bytes(data) => Ok(data),
            other => Err(unexpected_response("custom_field_get_data", &other)),
        }
    }

    pub fn set_data(&self, data: Vec<u8>, elem_type: &str, elem_size: usize) -> Result<()> {
        if elem_size == 0 || data.len() % elem_size != 0 {
            return Err(Error::validation(format!(
                "custom field payload of {} bytes does not divide into `{}` elements of {} bytes",
                data.len(),
                elem_type,
                elem_size
            )));
        }
        match self.call(FieldCall::SetDataBytes {
            field: self.id()?,
            data,
            elem_type: elem_type.to_string(),
            elem_size,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("custom_field_set_data", &other)),
        }
    }
}

impl<P> PartialEq for FieldBase<P> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl<P: FieldPayload> std::fmt::Debug for FieldBase<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}({:?})", P::KIND, self.handle)
    }
}

/// Client-only working set over a real-valued field.
///
/// Opening pulls data, scoping ids and the data pointer into client memory.
/// Mutations stay local until the single flush at drop or through
/// [`release`](LocalField::release); the engine-side field is untouched in
/// between, and the local copy must never be handed to the engine.
pub struct LocalField {
    target: Field,
    data: Vec<Float>,
    ids: Vec<Id>,
    num_components: usize,
    dirty: bool,
    flushed: bool,
}

impl LocalField {
    fn open(target: Field) -> Result<Self> {
        let data = target.data()?;
        let ids = target.scoping()?.ids()?;
        let dims = target.dimensionality()?;
        let num_components = dims.iter().product::<i32>().max(1) as usize;
        Ok(Self {
            target,
            data,
            ids,
            num_components,
            dirty: false,
            flushed: false,
        })
    }

    pub fn data(&self) -> &[Float] {
        &self.data
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn set_data(&mut self, data: Vec<Float>) {
        self.data = data;
        self.dirty = true;
    }

    /// Elementary data of the entity stored at `index`, out of the local
    /// buffer.
    pub fn entity_data(&self, index: usize) -> Result<&[Float]> {
        let start = index * self.num_components;
        let end = start + self.num_components;
        if end > self.data.len() {
            return Err(Error::validation(format!(
                "entity index {} out of bounds for local field of {} entities",
                index,
                self.data.len() / self.num_components
            )));
        }
        Ok(&self.data[start..end])
    }

    /// Appends elementary data under a new scoping id, locally.
    pub fn append(&mut self, data: &[Float], id: Id) -> Result<()> {
        if data.len() != self.num_components {
            return Err(Error::validation(format!(
                "elementary data of {} entries appended to a field with {} components",
                data.len(),
                self.num_components
            )));
        }
        self.data.extend_from_slice(data);
        self.ids.push(id);
        self.dirty = true;
        Ok(())
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
        let scoping = self.target.scoping()?;
        scoping.set_ids(std::mem::take(&mut self.ids))?;
        self.target.set_data(std::mem::take(&mut self.data))
    }
}

impl Drop for LocalField {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("local field flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_markers_pick_distinct_kinds() {
        assert_eq!(Field::KIND, EntityKind::Field);
        assert_eq!(PropertyField::KIND, EntityKind::PropertyField);
        assert_eq!(StringField::KIND, EntityKind::StringField);
        assert_eq!(CustomTypeField::KIND, EntityKind::CustomTypeField);
    }
}
