//! Labeled collections of entities.
//!
//! A collection stores entries under a label space, a map from label names
//! to integer coordinates ("time" to 2, "complex" to 0). The concrete
//! containers are one generic over their item type; metadata getters are
//! memoized per wrapper instance through [`CallCache`].

use std::marker::PhantomData;
use std::sync::Arc;

use crate::binding::call::{CollectionCall, Request, Response};
use crate::cache::{CachePolicy, CallCache};
use crate::entity::any::Any;
use crate::entity::field::Field;
use crate::entity::mesh::MeshedRegion;
use crate::entity::scoping::Scoping;
use crate::entity::support::Support;
use crate::entity::{Entity, EntityKind};
use crate::error::Result;
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::Id;

/// Label-to-coordinate map identifying one entry of a collection.
pub type LabelSpace = Vec<(String, Id)>;

fn label_space(pairs: &[(&str, Id)]) -> LabelSpace {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

fn label_space_key(space: &LabelSpace) -> String {
    let mut key = String::new();
    for (name, value) in space {
        key.push_str(name);
        key.push(':');
        key.push_str(&value.to_string());
        key.push(';');
    }
    key
}

static COLLECTION_CACHE: CachePolicy = CachePolicy {
    pairs: &[
        ("labels", &["add_label"]),
        ("len", &["add", "add_label"]),
        ("label_space_at", &["add", "add_label"]),
    ],
};

/// Item types a collection can hold, each mapped to its container kind.
pub trait CollectionItem: Entity {
    const COLLECTION_KIND: EntityKind;
}

impl CollectionItem for Field {
    const COLLECTION_KIND: EntityKind = EntityKind::FieldsContainer;
}

impl CollectionItem for Scoping {
    const COLLECTION_KIND: EntityKind = EntityKind::ScopingsContainer;
}

impl CollectionItem for MeshedRegion {
    const COLLECTION_KIND: EntityKind = EntityKind::MeshesContainer;
}

impl CollectionItem for Any {
    const COLLECTION_KIND: EntityKind = EntityKind::AnyCollection;
}

/// Fields indexed by a label space, the usual output of result operators.
pub type FieldsContainer = Collection<Field>;
pub type ScopingsContainer = Collection<Scoping>;
pub type MeshesContainer = Collection<MeshedRegion>;
/// Heterogeneous collection over boxed [`Any`] entries.
pub type AnyCollection = Collection<Any>;

pub struct Collection<T> {
    handle: Arc<EntityHandle>,
    cache: CallCache,
    _item: PhantomData<T>,
}

impl<T: CollectionItem> Entity for Collection<T> {
    const KIND: EntityKind = T::COLLECTION_KIND;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self {
            handle,
            cache: CallCache::new(&COLLECTION_CACHE),
            _item: PhantomData,
        }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl<T: CollectionItem> Clone for Collection<T> {
    // the clone starts with a cold cache; memoized state is per wrapper
    fn clone(&self) -> Self {
        Self::from_handle(self.handle.clone())
    }
}

impl<T: CollectionItem> Collection<T> {
    pub fn new(server: &Server, labels: &[&str]) -> Result<Self> {
        match server.call(Request::Collection(CollectionCall::New {
            item_kind: T::KIND,
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                T::COLLECTION_KIND,
                server.clone(),
            ))),
            other => Err(unexpected_response("collection_new", &other)),
        }
    }

    fn call(&self, call: CollectionCall) -> Result<Response> {
        self.handle.server().call(Request::Collection(call))
    }

    fn item(&self, handle: crate::HandleId) -> T {
        T::from_handle(EntityHandle::new(
            handle,
            T::KIND,
            self.handle.server().clone(),
        ))
    }

    pub fn labels(&self) -> Result<Vec<String>> {
        let id = self.handle.live_id()?;
        match self.cache.get_or_call("labels", String::new(), || {
            self.call(CollectionCall::Labels { collection: id })
        })? {
            Response::StrVec(labels) => Ok(labels),
            other => Err(unexpected_response("collection_labels", &other)),
        }
    }

    /// Adds a label after the fact; every existing entry receives
    /// `default_value` as its coordinate on the new axis.
    pub fn add_label(&self, label: &str, default_value: Id) -> Result<()> {
        let response = self.call(CollectionCall::AddLabel {
            collection: self.handle.live_id()?,
            label: label.to_string(),
            default_value,
        })?;
        self.cache.invalidate("add_label");
        match response {
            Response::Done => Ok(()),
            other => Err(unexpected_response("collection_add_label", &other)),
        }
    }

    pub fn add(&self, item: &T, label_space: &[(&str, Id)]) -> Result<()> {
        let response = self.call(CollectionCall::Add {
            collection: self.handle.live_id()?,
            item: item.handle().live_id()?,
            label_space: self::label_space(label_space),
        })?;
        self.cache.invalidate("add");
        match response {
            Response::Done => Ok(()),
            other => Err(unexpected_response("collection_add", &other)),
        }
    }

    /// Entries whose label spaces contain every given pair. A partial map
    /// matches any coordinate on the unnamed axes.
    pub fn get_by_label_space(&self, pairs: &[(&str, Id)]) -> Result<Vec<T>> {
        match self.call(CollectionCall::GetByLabelSpace {
            collection: self.handle.live_id()?,
            label_space: self::label_space(pairs),
        })? {
            Response::HandleVec(handles) => {
                Ok(handles.into_iter().map(|h| self.item(h)).collect())
            }
            other => Err(unexpected_response("collection_get_by_label_space", &other)),
        }
    }

    pub fn at(&self, index: usize) -> Result<T> {
        match self.call(CollectionCall::At {
            collection: self.handle.live_id()?,
            index,
        })? {
            Response::Handle(h) => Ok(self.item(h)),
            other => Err(unexpected_response("collection_at", &other)),
        }
    }

    pub fn label_space_at(&self, index: usize) -> Result<LabelSpace> {
        let id = self.handle.live_id()?;
        match self
            .cache
            .get_or_call("label_space_at", index.to_string(), || {
                self.call(CollectionCall::LabelSpaceAt {
                    collection: id,
                    index,
                })
            })? {
            Response::LabelSpace(space) => Ok(space),
            other => Err(unexpected_response("collection_label_space_at", &other)),
        }
    }

    pub fn len(&self) -> Result<usize> {
        let id = self.handle.live_id()?;
        match self.cache.get_or_call("len", String::new(), || {
            self.call(CollectionCall::Len { collection: id })
        })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("collection_len", &other)),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn support(&self) -> Result<Support> {
        match self.call(CollectionCall::GetSupport {
            collection: self.handle.live_id()?,
        })? {
            Response::Entity { kind, handle } => Ok(Support::from_handle(EntityHandle::new(
                handle,
                kind,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("collection_get_support", &other)),
        }
    }

    pub fn set_support(&self, support: &Support) -> Result<()> {
        match self.call(CollectionCall::SetSupport {
            collection: self.handle.live_id()?,
            support: support.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("collection_set_support", &other)),
        }
    }
}

impl FieldsContainer {
    /// Fields stored at time/frequency set `set_id` (1-based).
    pub fn get_fields_by_time_id(&self, set_id: Id) -> Result<Vec<Field>> {
        self.get_by_label_space(&[("time", set_id)])
    }

    /// The single field at time/frequency set `set_id`, failing when the
    /// label space is ambiguous.
    pub fn get_field_by_time_id(&self, set_id: Id) -> Result<Field> {
        let mut fields = self.get_fields_by_time_id(set_id)?;
        match fields.len() {
            1 => Ok(fields.remove(0)),
            0 => Err(crate::error::Error::validation(format!(
                "no field stored at time set {}",
                set_id
            ))),
            n => Err(crate::error::Error::validation(format!(
                "{} fields stored at time set {}; narrow the label space",
                n, set_id
            ))),
        }
    }
}

impl<T: CollectionItem> PartialEq for Collection<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl<T: CollectionItem> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}({:?})", T::COLLECTION_KIND, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_space_key_is_order_sensitive() {
        let a = label_space(&[("time", 1), ("complex", 0)]);
        let b = label_space(&[("complex", 0), ("time", 1)]);
        assert_ne!(label_space_key(&a), label_space_key(&b));
    }

    #[test]
    fn container_kinds() {
        assert_eq!(FieldsContainer::KIND, EntityKind::FieldsContainer);
        assert_eq!(ScopingsContainer::KIND, EntityKind::ScopingsContainer);
        assert_eq!(MeshesContainer::KIND, EntityKind::MeshesContainer);
        assert_eq!(AnyCollection::KIND, EntityKind::AnyCollection);
    }
}
