//! Typed wrappers for engine-side entities.
//!
//! Every wrapper owns an opaque handle and routes reads and writes through
//! the server binding; no state is shadowed client-side except in the local
//! variants of the cache layer. Equality between wrappers is handle identity;
//! content comparison goes through the engine comparator
//! (`content_equals`).

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handle::EntityHandle;
use crate::server::Server;

pub mod any;
pub mod collection;
pub mod data_sources;
pub mod data_tree;
pub mod field;
pub mod generic;
pub mod mesh;
pub mod scoping;
pub mod support;
pub mod unit_system;

const SCOPING_KIND_NAME: &str = "scoping";
const FIELD_KIND_NAME: &str = "field";
const PROPERTY_FIELD_KIND_NAME: &str = "property_field";
const STRING_FIELD_KIND_NAME: &str = "string_field";
const CUSTOM_TYPE_FIELD_KIND_NAME: &str = "custom_type_field";
const FIELDS_CONTAINER_KIND_NAME: &str = "fields_container";
const SCOPINGS_CONTAINER_KIND_NAME: &str = "scopings_container";
const MESHES_CONTAINER_KIND_NAME: &str = "meshes_container";
const ANY_COLLECTION_KIND_NAME: &str = "any_collection";
const MESHED_REGION_KIND_NAME: &str = "meshed_region";
const DATA_SOURCES_KIND_NAME: &str = "data_sources";
const DATA_TREE_KIND_NAME: &str = "data_tree";
const GENERIC_DATA_CONTAINER_KIND_NAME: &str = "generic_data_container";
const ANY_KIND_NAME: &str = "any";
const SUPPORT_KIND_NAME: &str = "support";
const TIME_FREQ_SUPPORT_KIND_NAME: &str = "time_freq_support";
const OPERATOR_KIND_NAME: &str = "operator";
const WORKFLOW_KIND_NAME: &str = "workflow";

/// Closed registry of engine entity kinds.
///
/// Operators and workflows are ordinary engine-side objects as far as handle
/// lifecycle is concerned, so they appear here too.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    serde_repr::Serialize_repr,
    serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum EntityKind {
    Scoping,
    Field,
    PropertyField,
    StringField,
    CustomTypeField,
    FieldsContainer,
    ScopingsContainer,
    MeshesContainer,
    AnyCollection,
    MeshedRegion,
    DataSources,
    DataTree,
    GenericDataContainer,
    Any,
    Support,
    TimeFreqSupport,
    Operator,
    Workflow,
}

impl EntityKind {
    pub fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            SCOPING_KIND_NAME => Self::Scoping,
            FIELD_KIND_NAME => Self::Field,
            PROPERTY_FIELD_KIND_NAME => Self::PropertyField,
            STRING_FIELD_KIND_NAME => Self::StringField,
            CUSTOM_TYPE_FIELD_KIND_NAME => Self::CustomTypeField,
            FIELDS_CONTAINER_KIND_NAME => Self::FieldsContainer,
            SCOPINGS_CONTAINER_KIND_NAME => Self::ScopingsContainer,
            MESHES_CONTAINER_KIND_NAME => Self::MeshesContainer,
            ANY_COLLECTION_KIND_NAME => Self::AnyCollection,
            MESHED_REGION_KIND_NAME => Self::MeshedRegion,
            DATA_SOURCES_KIND_NAME => Self::DataSources,
            DATA_TREE_KIND_NAME => Self::DataTree,
            GENERIC_DATA_CONTAINER_KIND_NAME => Self::GenericDataContainer,
            ANY_KIND_NAME => Self::Any,
            SUPPORT_KIND_NAME => Self::Support,
            TIME_FREQ_SUPPORT_KIND_NAME => Self::TimeFreqSupport,
            OPERATOR_KIND_NAME => Self::Operator,
            WORKFLOW_KIND_NAME => Self::Workflow,
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "a registered entity kind".to_string(),
                    actual: s.to_string(),
                })
            }
        };
        Ok(kind)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Scoping => SCOPING_KIND_NAME,
            Self::Field => FIELD_KIND_NAME,
            Self::PropertyField => PROPERTY_FIELD_KIND_NAME,
            Self::StringField => STRING_FIELD_KIND_NAME,
            Self::CustomTypeField => CUSTOM_TYPE_FIELD_KIND_NAME,
            Self::FieldsContainer => FIELDS_CONTAINER_KIND_NAME,
            Self::ScopingsContainer => SCOPINGS_CONTAINER_KIND_NAME,
            Self::MeshesContainer => MESHES_CONTAINER_KIND_NAME,
            Self::AnyCollection => ANY_COLLECTION_KIND_NAME,
            Self::MeshedRegion => MESHED_REGION_KIND_NAME,
            Self::DataSources => DATA_SOURCES_KIND_NAME,
            Self::DataTree => DATA_TREE_KIND_NAME,
            Self::GenericDataContainer => GENERIC_DATA_CONTAINER_KIND_NAME,
            Self::Any => ANY_KIND_NAME,
            Self::Support => SUPPORT_KIND_NAME,
            Self::TimeFreqSupport => TIME_FREQ_SUPPORT_KIND_NAME,
            Self::Operator => OPERATOR_KIND_NAME,
            Self::Workflow => WORKFLOW_KIND_NAME,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Common contract of every typed wrapper.
///
/// Construction either allocates a fresh handle (inherent `new` on each
/// wrapper) or adopts an existing one; equality is handle identity; content
/// comparison and cross-server movement go through the engine.
pub trait Entity: Sized {
    const KIND: EntityKind;

    /// Numeric tolerance used by the parameterless `content_equals`.
    const CONTENT_TOLERANCE: f64 = 1e-12;

    /// Wraps a handle that is already known to carry `Self::KIND`.
    fn from_handle(handle: Arc<EntityHandle>) -> Self;

    fn handle(&self) -> &Arc<EntityHandle>;

    /// Adopts a handle after checking its kind tag.
    fn adopt(handle: Arc<EntityHandle>) -> Result<Self> {
        if handle.kind() != Self::KIND {
            return Err(Error::TypeMismatch {
                expected: Self::KIND.to_str().to_string(),
                actual: handle.kind().to_str().to_string(),
            });
        }
        Ok(Self::from_handle(handle))
    }

    fn server(&self) -> &Server {
        self.handle().server()
    }

    /// Serialize on this server, deserialize on `target`; the only
    /// sanctioned way to move an entity between servers.
    fn deep_copy(&self, target: &Server) -> Result<Self> {
        Ok(Self::from_handle(self.handle().deep_copy(target)?))
    }

    /// Engine comparator at the type-specific default tolerance.
    fn content_equals(&self, other: &Self) -> Result<bool> {
        self.handle()
            .content_equals(other.handle(), Self::CONTENT_TOLERANCE)
    }

    fn content_equals_with(&self, other: &Self, tolerance: f64) -> Result<bool> {
        self.handle().content_equals(other.handle(), tolerance)
    }
}

/// Semantic tag describing what the ids of a scoping refer to.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Location {
    Nodal,
    Elemental,
    ElementalNodal,
    Faces,
    TimeFreq,
    Overall,
    Other(String),
}

impl Location {
    pub fn from_str(s: &str) -> Self {
        match s {
            "nodal" => Self::Nodal,
            "elemental" => Self::Elemental,
            "elemental_nodal" => Self::ElementalNodal,
            "faces" => Self::Faces,
            "time_freq" => Self::TimeFreq,
            "overall" => Self::Overall,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Nodal => "nodal",
            Self::Elemental => "elemental",
            Self::ElementalNodal => "elemental_nodal",
            Self::Faces => "faces",
            Self::TimeFreq => "time_freq",
            Self::Overall => "overall",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::Nodal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_round_trip() {
        for kind in &[
            EntityKind::Scoping,
            EntityKind::Field,
            EntityKind::FieldsContainer,
            EntityKind::Workflow,
        ] {
            assert_eq!(EntityKind::from_str(kind.to_str()).unwrap(), *kind);
        }
    }

    #[test]
    fn location_preserves_unknown_tags() {
        let loc = Location::from_str("gauss_point");
        assert_eq!(loc, Location::Other("gauss_point".to_string()));
        assert_eq!(loc.as_str(), "gauss_point");
    }
}
