//! The engine call namespace.
//!
//! Every operation a binding can route is a variant in the category-grouped
//! [`Request`] enum; results come back as a [`Response`]. Both are plain
//! serde data so the same namespace serves the in-process function table and
//! the network wire without translation.

use crate::entity::unit_system::UnitSystem;
use crate::entity::{EntityKind, Location};
use crate::operator::config::OperatorConfig;
use crate::operator::specification::Specification;
use crate::version::{EngineVersion, ServerContext};
use crate::{Float, HandleId, Id};

/// A literal or entity reference crossing the call boundary.
///
/// This is the wire-safe half of the client-side `PinValue` union: entities
/// travel as `(kind, handle)` pairs, never as materialized data.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum CallValue {
    Int(Id),
    Double(Float),
    Bool(bool),
    Str(String),
    IntVec(Vec<Id>),
    DoubleVec(Vec<Float>),
    StrVec(Vec<String>),
    Bytes(Vec<u8>),
    UnitSystem(UnitSystem),
    Entity { kind: EntityKind, handle: HandleId },
    /// An edge from an upstream operator output pin.
    Upstream { operator: HandleId, pin: i32 },
}

impl CallValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::IntVec(_) => "vector<int>",
            Self::DoubleVec(_) => "vector<double>",
            Self::StrVec(_) => "vector<string>",
            Self::Bytes(_) => "bytes",
            Self::UnitSystem(_) => "unit_system",
            Self::Entity { kind, .. } => kind.to_str(),
            Self::Upstream { .. } => "upstream",
        }
    }
}

/// What a typed output request expects back.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub enum OutputKind {
    Entity(EntityKind),
    Int,
    Double,
    Bool,
    Str,
    Bytes,
}

/// Category-grouped request namespace.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Request {
    Admin(AdminCall),
    Operator(OperatorCall),
    Workflow(WorkflowCall),
    Scoping(ScopingCall),
    Field(FieldCall),
    Collection(CollectionCall),
    Mesh(MeshCall),
    DataSources(DataSourcesCall),
    DataTree(DataTreeCall),
    Generic(GenericCall),
    Support(SupportCall),
    Any(AnyCall),
}

impl Request {
    /// Coarse capability key used by `EngineBinding::supports`.
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Admin(_) => CallKind::Admin,
            Self::Operator(_) => CallKind::Operator,
            Self::Workflow(_) => CallKind::Workflow,
            Self::Scoping(_) => CallKind::Scoping,
            Self::Field(_) => CallKind::Field,
            Self::Collection(_) => CallKind::Collection,
            Self::Mesh(_) => CallKind::Mesh,
            Self::DataSources(_) => CallKind::DataSources,
            Self::DataTree(_) => CallKind::DataTree,
            Self::Generic(_) => CallKind::Generic,
            Self::Support(_) => CallKind::Support,
            Self::Any(_) => CallKind::Any,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    serde_repr::Deserialize_repr,
    serde_repr::Serialize_repr,
)]
#[repr(u8)]
pub enum CallKind {
    Admin,
    Operator,
    Workflow,
    Scoping,
    Field,
    Collection,
    Mesh,
    DataSources,
    DataTree,
    Generic,
    Support,
    Any,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum AdminCall {
    /// Version, context and available operators; issued once on connect.
    ServerInfo,
    /// Wire-level no-op used as heartbeat by the network binding.
    Ping,
    /// Engine-side release of a finalized handle.
    ReleaseHandle { kind: EntityKind, handle: HandleId },
    /// Portable byte serialization of an entity (the engine `serializer`).
    Serialize { kind: EntityKind, handle: HandleId },
    /// Reinstantiation from portable bytes (the engine `deserializer`).
    Deserialize { bytes: Vec<u8> },
    /// Engine comparator family: content equality within a tolerance.
    ContentEquals {
        kind: EntityKind,
        left: HandleId,
        right: HandleId,
        tolerance: Float,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum OperatorCall {
    New { name: String },
    /// Fresh instance with the same name and configuration.
    Derivate { operator: HandleId },
    Connect {
        operator: HandleId,
        pin: i32,
        value: CallValue,
    },
    GetOutput {
        operator: HandleId,
        pin: i32,
        requested: OutputKind,
    },
    Run { operator: HandleId },
    GetSpecification { name: String },
    SetConfig {
        operator: HandleId,
        config: OperatorConfig,
    },
    GetConfig { operator: HandleId },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum WorkflowCall {
    New,
    AddOperator { workflow: HandleId, operator: HandleId },
    SetInputName {
        workflow: HandleId,
        name: String,
        operator: HandleId,
        pin: i32,
    },
    SetOutputName {
        workflow: HandleId,
        name: String,
        operator: HandleId,
        pin: i32,
    },
    Connect {
        workflow: HandleId,
        name: String,
        value: CallValue,
    },
    GetOutput {
        workflow: HandleId,
        name: String,
        requested: OutputKind,
    },
    /// Fuses `other`'s exposed outputs to this workflow's exposed inputs.
    ConnectWith {
        workflow: HandleId,
        other: HandleId,
        /// Renames as (other output name, this input name); empty means
        /// match by identical names.
        mapping: Vec<(String, String)>,
    },
    OperatorNames { workflow: HandleId },
    Topology { workflow: HandleId },
    Record {
        workflow: HandleId,
        /// A transferred record is consumed on first retrieval.
        transfer_ownership: bool,
    },
    GetRecorded { id: u32 },
    /// Cooperative stop of a pending evaluation.
    Cancel { workflow: HandleId },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum ScopingCall {
    New { location: Location },
    SetIds { scoping: HandleId, ids: Vec<Id> },
    GetIds { scoping: HandleId },
    SetLocation { scoping: HandleId, location: Location },
    GetLocation { scoping: HandleId },
    Size { scoping: HandleId },
    IdAt { scoping: HandleId, index: usize },
    IndexOf { scoping: HandleId, id: Id },
    SetId {
        scoping: HandleId,
        index: usize,
        id: Id,
    },
    Append { scoping: HandleId, id: Id },
}

/// Scalar element family of a field payload.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    serde_repr::Deserialize_repr,
    serde_repr::Serialize_repr,
)]
#[repr(u8)]
pub enum ScalarKind {
    Double,
    Int,
    String,
    /// User-chosen element type of a custom type field, identified by name
    /// and byte width.
    Custom,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum FieldCall {
    New {
        scalar: ScalarKind,
        location: Location,
        /// Components per elementary entry.
        num_components: i32,
    },
    SetDataDouble { field: HandleId, data: Vec<Float> },
    GetDataDouble { field: HandleId },
    SetDataInt { field: HandleId, data: Vec<Id> },
    GetDataInt { field: HandleId },
    SetDataString { field: HandleId, data: Vec<String> },
    GetDataString { field: HandleId },
    SetDataBytes {
        field: HandleId,
        data: Vec<u8>,
        /// Element type name and byte width for custom type fields.
        elem_type: String,
        elem_size: usize,
    },
    GetDataBytes { field: HandleId },
    SetScoping { field: HandleId, scoping: HandleId },
    GetScoping { field: HandleId },
    SetUnit { field: HandleId, unit: String },
    /// Named dimensionless unit pair, engines >= 11.0.
    SetUnitNamed {
        field: HandleId,
        homogeneity: String,
        name: String,
    },
    GetUnit { field: HandleId },
    GetLocation { field: HandleId },
    SetDimensionality {
        field: HandleId,
        dimensions: Vec<i32>,
    },
    GetDimensionality { field: HandleId },
    SetShellLayers { field: HandleId, layers: i32 },
    GetShellLayers { field: HandleId },
    SetDataPointer { field: HandleId, pointer: Vec<Id> },
    GetDataPointer { field: HandleId },
    EntityData { field: HandleId, index: usize },
    EntityDataById { field: HandleId, id: Id },
    Append {
        field: HandleId,
        data: Vec<Float>,
        id: Id,
    },
    ElementaryDataCount { field: HandleId },
    Size { field: HandleId },
    Resize {
        field: HandleId,
        entities: usize,
        data_len: usize,
    },
    SetSupport { field: HandleId, support: HandleId },
    GetSupport { field: HandleId },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum CollectionCall {
    New {
        item_kind: EntityKind,
        labels: Vec<String>,
    },
    Labels { collection: HandleId },
    /// Late label addition propagates the default coordinate to every
    /// existing entry.
    AddLabel {
        collection: HandleId,
        label: String,
        default_value: Id,
    },
    Add {
        collection: HandleId,
        item: HandleId,
        label_space: Vec<(String, Id)>,
    },
    /// A partial label-space map returns every matching entry.
    GetByLabelSpace {
        collection: HandleId,
        label_space: Vec<(String, Id)>,
    },
    At { collection: HandleId, index: usize },
    LabelSpaceAt { collection: HandleId, index: usize },
    Len { collection: HandleId },
    SetSupport { collection: HandleId, support: HandleId },
    GetSupport { collection: HandleId },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum MeshCall {
    New,
    NodeCount { mesh: HandleId },
    ElementCount { mesh: HandleId },
    FaceCount { mesh: HandleId },
    SetCoordinates { mesh: HandleId, field: HandleId },
    Coordinates { mesh: HandleId },
    SetNodeScoping { mesh: HandleId, scoping: HandleId },
    NodeScoping { mesh: HandleId },
    ElementScoping { mesh: HandleId },
    SetUnit { mesh: HandleId, unit: String },
    GetUnit { mesh: HandleId },
    AvailablePropertyFields { mesh: HandleId },
    PropertyField { mesh: HandleId, name: String },
    SetPropertyField {
        mesh: HandleId,
        name: String,
        field: HandleId,
    },
    NamedSelections { mesh: HandleId },
    NamedSelection { mesh: HandleId, name: String },
    SetNamedSelection {
        mesh: HandleId,
        name: String,
        scoping: HandleId,
    },
    /// Translates nodes by a displacement field, returning a new mesh.
    DeformBy {
        mesh: HandleId,
        field: HandleId,
        scale: Float,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum DataSourcesCall {
    New,
    SetResultFilePath {
        sources: HandleId,
        path: String,
        result_key: String,
    },
    AddFilePath {
        sources: HandleId,
        path: String,
        result_key: String,
        namespace: String,
        domain_id: Option<i32>,
    },
    AddUpstream {
        sources: HandleId,
        upstream: HandleId,
        result_key: String,
    },
    RegisterNamespace {
        sources: HandleId,
        result_key: String,
        namespace: String,
    },
    ResultKey { sources: HandleId },
    PathCount { sources: HandleId },
    PathAt { sources: HandleId, index: usize },
    PathsByKey { sources: HandleId, result_key: String },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum DataTreeCall {
    New,
    Set {
        tree: HandleId,
        name: String,
        value: CallValue,
    },
    SetSubTree {
        tree: HandleId,
        name: String,
        subtree: HandleId,
    },
    Get { tree: HandleId, name: String },
    SubTree { tree: HandleId, name: String },
    Has { tree: HandleId, name: String },
    AttributeNames { tree: HandleId },
    SubTreeNames { tree: HandleId },
    ToTxt { tree: HandleId },
    ToJson { tree: HandleId },
    FromTxt { text: String },
    FromJson { text: String },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum GenericCall {
    New,
    SetProperty {
        container: HandleId,
        name: String,
        value: CallValue,
    },
    GetProperty { container: HandleId, name: String },
    PropertyNames { container: HandleId },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum SupportCall {
    NewTimeFreq,
    SetFrequencies { support: HandleId, field: HandleId },
    Frequencies { support: HandleId },
    SetComplexFrequencies { support: HandleId, field: HandleId },
    ComplexFrequencies { support: HandleId },
    SetRpms { support: HandleId, field: HandleId },
    Rpms { support: HandleId },
    NumSets { support: HandleId },
    NewSupport,
    PropertyNames { support: HandleId },
    PropertyField { support: HandleId, name: String },
    SetPropertyField {
        support: HandleId,
        name: String,
        field: HandleId,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum AnyCall {
    New { value: CallValue },
    /// Returns the boxed value; the requested kind must match the stored
    /// type tag or the call fails with a type mismatch.
    Cast { any: HandleId, requested: OutputKind },
}

/// Result of a routed call.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Response {
    Done,
    Handle(HandleId),
    Entity { kind: EntityKind, handle: HandleId },
    HandleVec(Vec<HandleId>),
    Int(Id),
    UInt(u32),
    Double(Float),
    Bool(bool),
    Str(String),
    IntVec(Vec<Id>),
    DoubleVec(Vec<Float>),
    StrVec(Vec<String>),
    Bytes(Vec<u8>),
    LabelSpace(Vec<(String, Id)>),
    Value(CallValue),
    Spec(Box<Specification>),
    Config(OperatorConfig),
    ServerInfo(ServerInfo),
    Topology(WorkflowTopology),
}

/// Engine identity retrieved on connect.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ServerInfo {
    pub version: EngineVersion,
    pub context: ServerContext,
    /// Operator names registered with the engine, used for capability
    /// probing and nearest-name hints.
    pub available_operators: Vec<String>,
}

/// Workflow structure as reported by the engine (engines >= 10.0).
#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
pub struct WorkflowTopology {
    pub operator_names: Vec<String>,
    /// (from operator index, from pin, to operator index, to pin).
    pub operator_edges: Vec<(usize, i32, usize, i32)>,
    /// (operator index, pin, literal type name).
    pub data_edges: Vec<(usize, i32, String)>,
    /// (exposed name, operator index, pin).
    pub exposed_inputs: Vec<(String, usize, i32)>,
    pub exposed_outputs: Vec<(String, usize, i32)>,
}
