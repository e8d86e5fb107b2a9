//! In-memory fixture engine.
//!
//! [`FixtureEngine`] implements the full call namespace against an in-memory
//! entity store, with a small set of deterministic operators. It exists so
//! the client model and both real bindings can be exercised without an
//! engine installation; `postflow-net` also serves it behind a socket in its
//! integration tests.
//!
//! Entities are reference counted: wrappers, collections and operators each
//! own a reference, and an entity disappears when the last one is released.

use std::hash::Hasher;
use std::sync::Mutex;

use fnv::{FnvHashMap, FnvHasher};
use id_pool::IdPool;
use linked_hash_map::LinkedHashMap;

use crate::binding::call::{
    AdminCall, AnyCall, CallKind, CallValue, CollectionCall, DataSourcesCall, DataTreeCall,
    FieldCall, GenericCall, MeshCall, OperatorCall, OutputKind, Request, Response, ScalarKind,
    ScopingCall, ServerInfo, SupportCall, WorkflowCall, WorkflowTopology,
};
use crate::binding::EngineBinding;
use crate::entity::{EntityKind, Location};
use crate::error::{Error, Result};
use crate::operator::config::OperatorConfig;
use crate::operator::specification::{PinSpecification, Specification};
use crate::plugin::{OperatorContext, OperatorRegistry};
use crate::server::Server;
use crate::version::{EngineVersion, ServerContext};
use crate::{Float, HandleId, Id};

/// Operators every fixture engine registers.
pub const BUILTIN_OPERATORS: &[&str] = &[
    "accumulate_over_label_fc",
    "displacement",
    "forward",
    "incremental::merge::fields_container",
    "min_max_fc",
    "min_max_fc_inc",
    "norm_fc",
    "scale",
];

/// Shape of the deterministic displacement fixture result.
pub const DISPLACEMENT_SETS: usize = 20;
pub const DISPLACEMENT_NODES: usize = 6;
pub const DISPLACEMENT_COMPONENTS: usize = 3;

/// Seed derived from the main result file path.
pub fn path_seed(path: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(path.as_bytes());
    hasher.finish()
}

/// Displacement component `index` of time set `set`, as produced by the
/// fixture `displacement` operator for a result file hashing to `seed`.
pub fn displacement_value(seed: u64, set: Id, index: usize) -> Float {
    let base = (seed % 9973) as Float / 9973.0 + 0.5;
    base * set as Float * (index as Float + 1.0) * 1.0e-6
}

#[derive(Clone, Debug, PartialEq)]
struct FieldStore {
    scalar: ScalarKind,
    location: Location,
    num_components: i32,
    doubles: Vec<Float>,
    ints: Vec<Id>,
    strings: Vec<String>,
    bytes: Vec<u8>,
    elem_type: String,
    elem_size: usize,
    unit: String,
    dimensions: Vec<i32>,
    shell_layers: i32,
    pointer: Vec<Id>,
    scoping: HandleId,
    support: Option<HandleId>,
}

impl FieldStore {
    fn new(scalar: ScalarKind, location: Location, num_components: i32, scoping: HandleId) -> Self {
        Self {
            scalar,
            location,
            num_components,
            doubles: Vec::new(),
            ints: Vec::new(),
            strings: Vec::new(),
            bytes: Vec::new(),
            elem_type: String::new(),
            elem_size: 0,
            unit: String::new(),
            dimensions: vec![num_components],
            shell_layers: 0,
            pointer: Vec::new(),
            scoping,
            support: None,
        }
    }

    fn kind(&self) -> EntityKind {
        match self.scalar {
            ScalarKind::Double => EntityKind::Field,
            ScalarKind::Int => EntityKind::PropertyField,
            ScalarKind::String => EntityKind::StringField,
            ScalarKind::Custom => EntityKind::CustomTypeField,
        }
    }

    fn len(&self) -> usize {
        match self.scalar {
            ScalarKind::Double => self.doubles.len(),
            ScalarKind::Int => self.ints.len(),
            ScalarKind::String => self.strings.len(),
            ScalarKind::Custom => {
                if self.elem_size > 0 {
                    self.bytes.len() / self.elem_size
                } else {
                    self.bytes.len()
                }
            }
        }
    }

    fn elementary_count(&self) -> usize {
        if !self.pointer.is_empty() {
            self.pointer.len()
        } else if self.num_components > 0 {
            self.len() / self.num_components as usize
        } else {
            0
        }
    }

    fn expect_scalar(&self, scalar: ScalarKind) -> Result<()> {
        if self.scalar != scalar {
            return Err(Error::TypeMismatch {
                expected: format!("{:?} payload", scalar),
                actual: format!("{:?} payload", self.scalar),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct DataSourcesStore {
    result_key: String,
    // (path, result key, namespace, domain)
    paths: Vec<(String, String, String, Option<i32>)>,
    upstreams: Vec<(HandleId, String)>,
    namespaces: Vec<(String, String)>,
}

impl DataSourcesStore {
    fn main_path(&self) -> Option<&str> {
        self.paths
            .iter()
            .find(|(_, key, _, _)| *key == self.result_key)
            .map(|(path, _, _, _)| path.as_str())
    }
}

#[derive(Clone, Debug, Default)]
struct DataTreeStore {
    attributes: LinkedHashMap<String, CallValue>,
    sub_trees: LinkedHashMap<String, HandleId>,
}

#[derive(Clone, Debug, Default)]
struct MeshStore {
    coordinates: Option<HandleId>,
    node_scoping: Option<HandleId>,
    unit: String,
    property_fields: LinkedHashMap<String, HandleId>,
    named_selections: LinkedHashMap<String, HandleId>,
}

#[derive(Clone, Debug)]
enum Acc {
    None,
    MinMax {
        template: Box<FieldStore>,
        // scoping ids snapshotted at fold time; the folded fields may be
        // released before the outputs are read
        ids: Vec<Id>,
        min: Vec<Float>,
        max: Vec<Float>,
    },
    Merged(Option<HandleId>),
}

#[derive(Clone, Debug)]
struct OperatorStore {
    name: String,
    config: OperatorConfig,
    inputs: FnvHashMap<i32, CallValue>,
    acc: Acc,
}

#[derive(Clone, Debug, Default)]
struct WorkflowStore {
    operators: Vec<HandleId>,
    inputs: LinkedHashMap<String, (HandleId, i32)>,
    outputs: LinkedHashMap<String, (HandleId, i32)>,
}

#[derive(Clone, Debug)]
enum Stored {
    Scoping {
        ids: Vec<Id>,
        location: Location,
    },
    Field(FieldStore),
    Collection {
        item_kind: EntityKind,
        labels: Vec<String>,
        entries: Vec<(Vec<(String, Id)>, HandleId)>,
        support: Option<HandleId>,
    },
    Mesh(MeshStore),
    DataSources(DataSourcesStore),
    DataTree(DataTreeStore),
    Generic {
        properties: LinkedHashMap<String, CallValue>,
    },
    Support {
        properties: LinkedHashMap<String, HandleId>,
    },
    TimeFreq {
        frequencies: Option<HandleId>,
        complex_frequencies: Option<HandleId>,
        rpms: Option<HandleId>,
    },
    Any(CallValue),
    Operator(OperatorStore),
    Workflow(WorkflowStore),
}

impl Stored {
    fn kind(&self) -> EntityKind {
        match self {
            Self::Scoping { .. } => EntityKind::Scoping,
            Self::Field(f) => f.kind(),
            Self::Collection { item_kind, .. } => match item_kind {
                EntityKind::Field => EntityKind::FieldsContainer,
                EntityKind::Scoping => EntityKind::ScopingsContainer,
                EntityKind::MeshedRegion => EntityKind::MeshesContainer,
                _ => EntityKind::AnyCollection,
            },
            Self::Mesh(_) => EntityKind::MeshedRegion,
            Self::DataSources(_) => EntityKind::DataSources,
            Self::DataTree(_) => EntityKind::DataTree,
            Self::Generic { .. } => EntityKind::GenericDataContainer,
            Self::Support { .. } => EntityKind::Support,
            Self::TimeFreq { .. } => EntityKind::TimeFreqSupport,
            Self::Any(_) => EntityKind::Any,
            Self::Operator(_) => EntityKind::Operator,
            Self::Workflow(_) => EntityKind::Workflow,
        }
    }

    /// Handles this entity owns a reference to.
    fn references(&self) -> Vec<HandleId> {
        let mut refs = Vec::new();
        let mut push_value = |refs: &mut Vec<HandleId>, value: &CallValue| {
            if let CallValue::Entity { handle, .. } = value {
                refs.push(*handle);
            }
        };
        match self {
            Self::Scoping { .. } => {}
            Self::Field(f) => {
                refs.push(f.scoping);
                refs.extend(f.support);
            }
            Self::Collection {
                entries, support, ..
            } => {
                refs.extend(entries.iter().map(|(_, h)| *h));
                refs.extend(*support);
            }
            Self::Mesh(m) => {
                refs.extend(m.coordinates);
                refs.extend(m.node_scoping);
                refs.extend(m.property_fields.values().copied());
                refs.extend(m.named_selections.values().copied());
            }
            Self::DataSources(d) => refs.extend(d.upstreams.iter().map(|(h, _)| *h)),
            Self::DataTree(t) => refs.extend(t.sub_trees.values().copied()),
            Self::Generic { properties } => {
                for value in properties.values() {
                    push_value(&mut refs, value);
                }
            }
            Self::Support { properties } => refs.extend(properties.values().copied()),
            Self::TimeFreq {
                frequencies,
                complex_frequencies,
                rpms,
            } => {
                refs.extend(*frequencies);
                refs.extend(*complex_frequencies);
                refs.extend(*rpms);
            }
            Self::Any(value) => push_value(&mut refs, value),
            Self::Operator(op) => {
                for value in op.inputs.values() {
                    match value {
                        CallValue::Entity { handle, .. } => refs.push(*handle),
                        CallValue::Upstream { operator, .. } => refs.push(*operator),
                        _ => {}
                    }
                }
                if let Acc::Merged(Some(h)) = op.acc {
                    refs.push(h);
                }
            }
            Self::Workflow(wf) => refs.extend(wf.operators.iter().copied()),
        }
        refs
    }
}

struct Entry {
    refs: u32,
    data: Stored,
}

struct EngineState {
    pool: IdPool,
    store: FnvHashMap<HandleId, Entry>,
    // record id -> (workflow handle, consumed on retrieval)
    recorded: FnvHashMap<u32, (HandleId, bool)>,
    next_record: u32,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            pool: IdPool::new(),
            store: FnvHashMap::default(),
            recorded: FnvHashMap::default(),
            next_record: 0,
        }
    }
}

impl EngineState {
    fn mint(&mut self, data: Stored) -> HandleId {
        let id = self
            .pool
            .request_id()
            .map(|id| id as HandleId)
            .unwrap_or_else(|| self.store.len() as HandleId + 1);
        self.store.insert(id, Entry { refs: 1, data });
        id
    }

    fn get(&self, handle: HandleId) -> Result<&Stored> {
        self.store
            .get(&handle)
            .map(|e| &e.data)
            .ok_or_else(|| unknown_handle(handle))
    }

    fn get_mut(&mut self, handle: HandleId) -> Result<&mut Stored> {
        self.store
            .get_mut(&handle)
            .map(|e| &mut e.data)
            .ok_or_else(|| unknown_handle(handle))
    }

    fn retain(&mut self, handle: HandleId) {
        if let Some(entry) = self.store.get_mut(&handle) {
            entry.refs += 1;
        }
    }

    /// Drops one reference; entities cascade to everything they own when
    /// their last reference goes.
    fn release(&mut self, handle: HandleId) -> Result<()> {
        let mut pending = vec![handle];
        let mut first = true;
        while let Some(h) = pending.pop() {
            let entry = match self.store.get_mut(&h) {
                Some(entry) => entry,
                None if first => return Err(unknown_handle(h)),
                None => continue,
            };
            first = false;
            entry.refs -= 1;
            if entry.refs == 0 {
                let entry = match self.store.remove(&h) {
                    Some(entry) => entry,
                    None => continue,
                };
                pending.extend(entry.data.references());
                if h <= u32::MAX as HandleId {
                    let _ = self.pool.return_id(h as u32);
                }
            }
        }
        Ok(())
    }

    fn scoping(&self, handle: HandleId) -> Result<(&Vec<Id>, &Location)> {
        match self.get(handle)? {
            Stored::Scoping { ids, location } => Ok((ids, location)),
            other => Err(kind_mismatch(EntityKind::Scoping, other.kind())),
        }
    }

    fn field(&self, handle: HandleId) -> Result<&FieldStore> {
        match self.get(handle)? {
            Stored::Field(f) => Ok(f),
            other => Err(kind_mismatch(EntityKind::Field, other.kind())),
        }
    }

    fn field_mut(&mut self, handle: HandleId) -> Result<&mut FieldStore> {
        match self.get_mut(handle)? {
            Stored::Field(f) => Ok(f),
            other => {
                let kind = other.kind();
                Err(kind_mismatch(EntityKind::Field, kind))
            }
        }
    }

    fn mint_scoping(&mut self, ids: Vec<Id>, location: Location) -> HandleId {
        self.mint(Stored::Scoping { ids, location })
    }

    fn mint_field(&mut self, mut store: FieldStore, scoping_ids: Vec<Id>) -> HandleId {
        let location = store.location.clone();
        store.scoping = self.mint_scoping(scoping_ids, location);
        self.mint(Stored::Field(store))
    }

    /// Swaps an optional owned reference, adjusting counts.
    fn swap_ref(&mut self, slot_old: Option<HandleId>, new: HandleId) -> Option<HandleId> {
        self.retain(new);
        if let Some(old) = slot_old {
            let _ = self.release(old);
        }
        Some(new)
    }
}

fn unknown_handle(handle: HandleId) -> Error {
    Error::Validation(format!("unknown engine handle {}", handle))
}

fn kind_mismatch(expected: EntityKind, actual: EntityKind) -> Error {
    Error::TypeMismatch {
        expected: expected.to_str().to_string(),
        actual: actual.to_str().to_string(),
    }
}

/// Deterministic in-memory engine used by the test suites.
pub struct FixtureEngine {
    version: EngineVersion,
    context: ServerContext,
    license_accepted: bool,
    registry: Option<OperatorRegistry>,
    state: Mutex<EngineState>,
}

impl Default for FixtureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureEngine {
    pub fn new() -> Self {
        Self {
            version: EngineVersion::new(11, 0, 0),
            context: ServerContext::Premium,
            license_accepted: true,
            registry: None,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn with_version(mut self, version: EngineVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_context(mut self, context: ServerContext) -> Self {
        self.context = context;
        self
    }

    /// Simulates an engine that has not seen a license acceptance.
    pub fn with_license(mut self, accepted: bool) -> Self {
        self.license_accepted = accepted;
        self
    }

    /// Hosts custom operators alongside the builtins.
    pub fn with_registry(mut self, registry: OperatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Negotiates a session over this engine.
    pub fn into_server(self) -> Result<Server> {
        Server::connect(Box::new(self))
    }

    fn operator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_OPERATORS.iter().map(|n| n.to_string()).collect();
        if let Some(registry) = &self.registry {
            names.extend(registry.names().map(|n| n.to_string()));
        }
        names.sort();
        names
    }

    fn knows_operator(&self, name: &str) -> bool {
        BUILTIN_OPERATORS.contains(&name)
            || self.registry.as_ref().map_or(false, |r| r.contains(name))
    }
}

impl EngineBinding for FixtureEngine {
    fn call(&self, request: Request) -> Result<Response> {
        let mut state = self.state.lock().unwrap();
        match request {
            Request::Admin(call) => self.handle_admin(&mut state, call),
            Request::Operator(call) => self.handle_operator(&mut state, call),
            Request::Workflow(call) => self.handle_workflow(&mut state, call),
            Request::Scoping(call) => handle_scoping(&mut state, call),
            Request::Field(call) => handle_field(&mut state, call),
            Request::Collection(call) => handle_collection(&mut state, call),
            Request::Mesh(call) => handle_mesh(&mut state, call),
            Request::DataSources(call) => handle_data_sources(&mut state, call),
            Request::DataTree(call) => handle_data_tree(&mut state, call),
            Request::Generic(call) => handle_generic(&mut state, call),
            Request::Support(call) => handle_support(&mut state, call),
            Request::Any(call) => handle_any(&mut state, call),
        }
    }

    fn info(&self) -> Result<ServerInfo> {
        Ok(ServerInfo {
            version: self.version.clone(),
            context: self.context,
            available_operators: self.operator_names(),
        })
    }

    fn supports(&self, _kind: CallKind) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("fixture engine {}", self.version)
    }
}

// ---- admin ----

impl FixtureEngine {
    fn handle_admin(&self, state: &mut EngineState, call: AdminCall) -> Result<Response> {
        match call {
            AdminCall::ServerInfo => Ok(Response::ServerInfo(self.info()?)),
            AdminCall::Ping => Ok(Response::Done),
            AdminCall::ReleaseHandle { handle, .. } => {
                state.release(handle)?;
                Ok(Response::Done)
            }
            AdminCall::Serialize { handle, .. } => {
                let portable = to_portable(state, handle)?;
                Ok(Response::Bytes(bincode::serialize(&portable)?))
            }
            AdminCall::Deserialize { bytes } => {
                let portable: Portable = bincode::deserialize(&bytes)?;
                let handle = from_portable(state, portable);
                let kind = state.get(handle)?.kind();
                Ok(Response::Entity { kind, handle })
            }
            AdminCall::ContentEquals {
                left,
                right,
                tolerance,
                ..
            } => {
                let a = to_portable(state, left)?;
                let b = to_portable(state, right)?;
                Ok(Response::Bool(portable_equals(&a, &b, tolerance)))
            }
        }
    }
}

// ---- scoping ----

fn handle_scoping(state: &mut EngineState, call: ScopingCall) -> Result<Response> {
    match call {
        ScopingCall::New { location } => {
            let handle = state.mint_scoping(Vec::new(), location);
            Ok(Response::Handle(handle))
        }
        ScopingCall::SetIds { scoping, ids } => {
            match state.get_mut(scoping)? {
                Stored::Scoping { ids: slot, .. } => *slot = ids,
                other => return Err(kind_mismatch(EntityKind::Scoping, other.kind())),
            }
            Ok(Response::Done)
        }
        ScopingCall::GetIds { scoping } => {
            let (ids, _) = state.scoping(scoping)?;
            Ok(Response::IntVec(ids.clone()))
        }
        ScopingCall::SetLocation { scoping, location } => {
            match state.get_mut(scoping)? {
                Stored::Scoping { location: slot, .. } => *slot = location,
                other => return Err(kind_mismatch(EntityKind::Scoping, other.kind())),
            }
            Ok(Response::Done)
        }
        ScopingCall::GetLocation { scoping } => {
            let (_, location) = state.scoping(scoping)?;
            Ok(Response::Str(location.as_str().to_string()))
        }
        ScopingCall::Size { scoping } => {
            let (ids, _) = state.scoping(scoping)?;
            Ok(Response::Int(ids.len() as Id))
        }
        ScopingCall::IdAt { scoping, index } => {
            let (ids, _) = state.scoping(scoping)?;
            ids.get(index).copied().map(Response::Int).ok_or_else(|| {
                Error::validation(format!(
                    "index {} out of bounds for scoping of size {}",
                    index,
                    ids.len()
                ))
            })
        }
        ScopingCall::IndexOf { scoping, id } => {
            let (ids, _) = state.scoping(scoping)?;
            ids.iter()
                .position(|i| *i == id)
                .map(|idx| Response::Int(idx as Id))
                .ok_or_else(|| Error::validation(format!("id {} not in scoping", id)))
        }
        ScopingCall::SetId { scoping, index, id } => {
            match state.get_mut(scoping)? {
                Stored::Scoping { ids, .. } => {
                    let len = ids.len();
                    let slot = ids.get_mut(index).ok_or_else(|| {
                        Error::validation(format!(
                            "index {} out of bounds for scoping of size {}",
                            index, len
                        ))
                    })?;
                    *slot = id;
                }
                other => return Err(kind_mismatch(EntityKind::Scoping, other.kind())),
            }
            Ok(Response::Done)
        }
        ScopingCall::Append { scoping, id } => {
            match state.get_mut(scoping)? {
                Stored::Scoping { ids, .. } => ids.push(id),
                other => return Err(kind_mismatch(EntityKind::Scoping, other.kind())),
            }
            Ok(Response::Done)
        }
    }
}

// ---- field ----

fn handle_field(state: &mut EngineState, call: FieldCall) -> Result<Response> {
    match call {
        FieldCall::New {
            scalar,
            location,
            num_components,
        } => {
            let scoping = state.mint_scoping(Vec::new(), location.clone());
            let handle = state.mint(Stored::Field(FieldStore::new(
                scalar,
                location,
                num_components,
                scoping,
            )));
            Ok(Response::Handle(handle))
        }
        FieldCall::SetDataDouble { field, data } => {
            let f = state.field_mut(field)?;
            f.expect_scalar(ScalarKind::Double)?;
            f.doubles = data;
            Ok(Response::Done)
        }
        FieldCall::GetDataDouble { field } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::Double)?;
            Ok(Response::DoubleVec(f.doubles.clone()))
        }
        FieldCall::SetDataInt { field, data } => {
            let f = state.field_mut(field)?;
            f.expect_scalar(ScalarKind::Int)?;
            f.ints = data;
            Ok(Response::Done)
        }
        FieldCall::GetDataInt { field } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::Int)?;
            Ok(Response::IntVec(f.ints.clone()))
        }
        FieldCall::SetDataString { field, data } => {
            let f = state.field_mut(field)?;
            f.expect_scalar(ScalarKind::String)?;
            f.strings = data;
            Ok(Response::Done)
        }
        FieldCall::GetDataString { field } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::String)?;
            Ok(Response::StrVec(f.strings.clone()))
        }
        FieldCall::SetDataBytes {
            field,
            data,
            elem_type,
            elem_size,
        } => {
            let f = state.field_mut(field)?;
            f.expect_scalar(ScalarKind::Custom)?;
            f.bytes = data;
            f.elem_type = elem_type;
            f.elem_size = elem_size;
            Ok(Response::Done)
        }
        FieldCall::GetDataBytes { field } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::Custom)?;
            Ok(Response::Bytes(f.bytes.clone()))
        }
        FieldCall::SetScoping { field, scoping } => {
            let (ids, location) = {
                let (ids, location) = state.scoping(scoping)?;
                (ids.clone(), location.clone())
            };
            let own = state.field(field)?.scoping;
            match state.get_mut(own)? {
                Stored::Scoping {
                    ids: slot,
                    location: loc,
                } => {
                    *slot = ids;
                    *loc = location;
                }
                _ => unreachable!("field scoping is always a scoping"),
            }
            Ok(Response::Done)
        }
        FieldCall::GetScoping { field } => {
            let scoping = state.field(field)?.scoping;
            state.retain(scoping);
            Ok(Response::Handle(scoping))
        }
        FieldCall::SetUnit { field, unit } => {
            state.field_mut(field)?.unit = unit;
            Ok(Response::Done)
        }
        FieldCall::SetUnitNamed {
            field,
            homogeneity,
            name,
        } => {
            state.field_mut(field)?.unit = format!("{}:{}", homogeneity, name);
            Ok(Response::Done)
        }
        FieldCall::GetUnit { field } => Ok(Response::Str(state.field(field)?.unit.clone())),
        FieldCall::GetLocation { field } => Ok(Response::Str(
            state.field(field)?.location.as_str().to_string(),
        )),
        FieldCall::SetDimensionality { field, dimensions } => {
            let f = state.field_mut(field)?;
            f.num_components = dimensions.iter().product::<i32>().max(1);
            f.dimensions = dimensions;
            Ok(Response::Done)
        }
        FieldCall::GetDimensionality { field } => {
            Ok(Response::IntVec(state.field(field)?.dimensions.clone()))
        }
        FieldCall::SetShellLayers { field, layers } => {
            if !(0..=4).contains(&layers) {
                return Err(Error::validation(format!(
                    "shell layer {} outside the supported range 0..=4",
                    layers
                )));
            }
            state.field_mut(field)?.shell_layers = layers;
            Ok(Response::Done)
        }
        FieldCall::GetShellLayers { field } => {
            Ok(Response::Int(state.field(field)?.shell_layers))
        }
        FieldCall::SetDataPointer { field, pointer } => {
            state.field_mut(field)?.pointer = pointer;
            Ok(Response::Done)
        }
        FieldCall::GetDataPointer { field } => {
            Ok(Response::IntVec(state.field(field)?.pointer.clone()))
        }
        FieldCall::EntityData { field, index } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::Double)?;
            entity_slice(f, index).map(|s| Response::DoubleVec(s.to_vec()))
        }
        FieldCall::EntityDataById { field, id } => {
            let f = state.field(field)?;
            f.expect_scalar(ScalarKind::Double)?;
            let (ids, _) = state.scoping(f.scoping)?;
            let index = ids
                .iter()
                .position(|i| *i == id)
                .ok_or_else(|| Error::validation(format!("id {} not in field scoping", id)))?;
            entity_slice(f, index).map(|s| Response::DoubleVec(s.to_vec()))
        }
        FieldCall::Append { field, data, id } => {
            let scoping = {
                let f = state.field_mut(field)?;
                f.expect_scalar(ScalarKind::Double)?;
                f.doubles.extend_from_slice(&data);
                f.scoping
            };
            match state.get_mut(scoping)? {
                Stored::Scoping { ids, .. } => ids.push(id),
                _ => unreachable!("field scoping is always a scoping"),
            }
            Ok(Response::Done)
        }
        FieldCall::ElementaryDataCount { field } => {
            Ok(Response::Int(state.field(field)?.elementary_count() as Id))
        }
        FieldCall::Size { field } => Ok(Response::Int(state.field(field)?.len() as Id)),
        FieldCall::Resize {
            field,
            entities,
            data_len,
        } => {
            let scoping = {
                let f = state.field_mut(field)?;
                match f.scalar {
                    ScalarKind::Double => f.doubles.resize(data_len, 0.0),
                    ScalarKind::Int => f.ints.resize(data_len, 0),
                    ScalarKind::String => f.strings.resize(data_len, String::new()),
                    ScalarKind::Custom => f.bytes.resize(data_len * f.elem_size.max(1), 0),
                }
                f.scoping
            };
            match state.get_mut(scoping)? {
                Stored::Scoping { ids, .. } => ids.resize(entities, 0),
                _ => unreachable!("field scoping is always a scoping"),
            }
            Ok(Response::Done)
        }
        FieldCall::SetSupport { field, support } => {
            let old = state.field(field)?.support;
            let new = state.swap_ref(old, support);
            state.field_mut(field)?.support = new;
            Ok(Response::Done)
        }
        FieldCall::GetSupport { field } => {
            let support = state
                .field(field)?
                .support
                .ok_or_else(|| Error::validation("field has no support attached"))?;
            let kind = state.get(support)?.kind();
            state.retain(support);
            Ok(Response::Entity {
                kind,
                handle: support,
            })
        }
    }
}

fn entity_slice(f: &FieldStore, index: usize) -> Result<&[Float]> {
    let (start, end) = if !f.pointer.is_empty() {
        let start = *f
            .pointer
            .get(index)
            .ok_or_else(|| Error::validation(format!("entity index {} out of bounds", index)))?
            as usize;
        let end = f
            .pointer
            .get(index + 1)
            .map(|p| *p as usize)
            .unwrap_or(f.doubles.len());
        (start, end)
    } else {
        let n = f.num_components.max(1) as usize;
        (index * n, index * n + n)
    };
    if end > f.doubles.len() || start > end {
        return Err(Error::validation(format!(
            "entity index {} out of bounds",
            index
        )));
    }
    Ok(&f.doubles[start..end])
}

// ---- collection ----

fn handle_collection(state: &mut EngineState, call: CollectionCall) -> Result<Response> {
    match call {
        CollectionCall::New { item_kind, labels } => {
            let handle = state.mint(Stored::Collection {
                item_kind,
                labels,
                entries: Vec::new(),
                support: None,
            });
            Ok(Response::Handle(handle))
        }
        CollectionCall::Labels { collection } => match state.get(collection)? {
            Stored::Collection { labels, .. } => Ok(Response::StrVec(labels.clone())),
            other => Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
        },
        CollectionCall::AddLabel {
            collection,
            label,
            default_value,
        } => {
            match state.get_mut(collection)? {
                Stored::Collection {
                    labels, entries, ..
                } => {
                    if labels.contains(&label) {
                        return Err(Error::validation(format!(
                            "label `{}` already declared",
                            label
                        )));
                    }
                    for (space, _) in entries.iter_mut() {
                        space.push((label.clone(), default_value));
                    }
                    labels.push(label);
                }
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            }
            Ok(Response::Done)
        }
        CollectionCall::Add {
            collection,
            item,
            label_space,
        } => {
            let item_kind = state.get(item)?.kind();
            match state.get(collection)? {
                Stored::Collection {
                    item_kind: expected,
                    labels,
                    ..
                } => {
                    if item_kind != *expected {
                        return Err(kind_mismatch(*expected, item_kind));
                    }
                    for label in labels {
                        if !label_space.iter().any(|(name, _)| name == label) {
                            return Err(Error::validation(format!(
                                "label space misses declared label `{}`",
                                label
                            )));
                        }
                    }
                    for (name, _) in &label_space {
                        if !labels.contains(name) {
                            return Err(Error::validation(format!(
                                "label `{}` not declared on the collection",
                                name
                            )));
                        }
                    }
                }
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            }
            state.retain(item);
            match state.get_mut(collection)? {
                Stored::Collection { entries, .. } => entries.push((label_space, item)),
                _ => unreachable!(),
            }
            Ok(Response::Done)
        }
        CollectionCall::GetByLabelSpace {
            collection,
            label_space,
        } => {
            let matches: Vec<HandleId> = match state.get(collection)? {
                Stored::Collection {
                    entries, labels, ..
                } => {
                    for (name, _) in &label_space {
                        if !labels.contains(name) {
                            return Err(Error::validation(format!(
                                "label `{}` not declared on the collection",
                                name
                            )));
                        }
                    }
                    entries
                        .iter()
                        .filter(|(space, _)| {
                            label_space
                                .iter()
                                .all(|pair| space.iter().any(|p| p == pair))
                        })
                        .map(|(_, h)| *h)
                        .collect()
                }
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            };
            for h in &matches {
                state.retain(*h);
            }
            Ok(Response::HandleVec(matches))
        }
        CollectionCall::At { collection, index } => {
            let handle = match state.get(collection)? {
                Stored::Collection { entries, .. } => entries
                    .get(index)
                    .map(|(_, h)| *h)
                    .ok_or_else(|| {
                        Error::validation(format!(
                            "index {} out of bounds for collection of {} entries",
                            index,
                            entries.len()
                        ))
                    })?,
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            };
            state.retain(handle);
            Ok(Response::Handle(handle))
        }
        CollectionCall::LabelSpaceAt { collection, index } => match state.get(collection)? {
            Stored::Collection { entries, .. } => entries
                .get(index)
                .map(|(space, _)| Response::LabelSpace(space.clone()))
                .ok_or_else(|| {
                    Error::validation(format!(
                        "index {} out of bounds for collection of {} entries",
                        index,
                        entries.len()
                    ))
                }),
            other => Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
        },
        CollectionCall::Len { collection } => match state.get(collection)? {
            Stored::Collection { entries, .. } => Ok(Response::Int(entries.len() as Id)),
            other => Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
        },
        CollectionCall::SetSupport {
            collection,
            support,
        } => {
            let old = match state.get(collection)? {
                Stored::Collection { support, .. } => *support,
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            };
            let new = state.swap_ref(old, support);
            match state.get_mut(collection)? {
                Stored::Collection { support, .. } => *support = new,
                _ => unreachable!(),
            }
            Ok(Response::Done)
        }
        CollectionCall::GetSupport { collection } => {
            let support = match state.get(collection)? {
                Stored::Collection { support, .. } => support
                    .ok_or_else(|| Error::validation("collection has no support attached"))?,
                other => return Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
            };
            let kind = state.get(support)?.kind();
            state.retain(support);
            Ok(Response::Entity {
                kind,
                handle: support,
            })
        }
    }
}

// ---- mesh ----

fn handle_mesh(state: &mut EngineState, call: MeshCall) -> Result<Response> {
    fn mesh(state: &EngineState, handle: HandleId) -> Result<&MeshStore> {
        match state.get(handle)? {
            Stored::Mesh(m) => Ok(m),
            other => Err(kind_mismatch(EntityKind::MeshedRegion, other.kind())),
        }
    }
    fn mesh_mut(state: &mut EngineState, handle: HandleId) -> Result<&mut MeshStore> {
        match state.get_mut(handle)? {
            Stored::Mesh(m) => Ok(m),
            other => {
                let kind = other.kind();
                Err(kind_mismatch(EntityKind::MeshedRegion, kind))
            }
        }
    }

    match call {
        MeshCall::New => Ok(Response::Handle(state.mint(Stored::Mesh(MeshStore::default())))),
        MeshCall::NodeCount { mesh: h } => {
            let m = mesh(state, h)?;
            let count = match m.coordinates {
                Some(c) => state.field(c)?.elementary_count(),
                None => match m.node_scoping {
                    Some(s) => state.scoping(s)?.0.len(),
                    None => 0,
                },
            };
            Ok(Response::Int(count as Id))
        }
        MeshCall::ElementCount { mesh: h } => {
            let m = mesh(state, h)?;
            let count = match m.property_fields.get("eltype") {
                Some(f) => state.field(*f)?.elementary_count(),
                None => 0,
            };
            Ok(Response::Int(count as Id))
        }
        MeshCall::FaceCount { mesh: h } => {
            let m = mesh(state, h)?;
            let count = match m.property_fields.get("faces") {
                Some(f) => state.field(*f)?.elementary_count(),
                None => 0,
            };
            Ok(Response::Int(count as Id))
        }
        MeshCall::SetCoordinates { mesh: h, field } => {
            state.field(field)?;
            let old = mesh(state, h)?.coordinates;
            let new = state.swap_ref(old, field);
            mesh_mut(state, h)?.coordinates = new;
            Ok(Response::Done)
        }
        MeshCall::Coordinates { mesh: h } => {
            let coords = mesh(state, h)?
                .coordinates
                .ok_or_else(|| Error::validation("mesh has no coordinates"))?;
            state.retain(coords);
            Ok(Response::Handle(coords))
        }
        MeshCall::SetNodeScoping { mesh: h, scoping } => {
            state.scoping(scoping)?;
            let old = mesh(state, h)?.node_scoping;
            let new = state.swap_ref(old, scoping);
            mesh_mut(state, h)?.node_scoping = new;
            Ok(Response::Done)
        }
        MeshCall::NodeScoping { mesh: h } => {
            let scoping = match mesh(state, h)?.node_scoping {
                Some(s) => s,
                None => {
                    // implicit scoping over 1..=node_count
                    let count = match mesh(state, h)?.coordinates {
                        Some(c) => state.field(c)?.elementary_count(),
                        None => 0,
                    };
                    let ids = (1..=count as Id).collect();
                    let minted = state.mint_scoping(ids, Location::Nodal);
                    mesh_mut(state, h)?.node_scoping = Some(minted);
                    minted
                }
            };
            state.retain(scoping);
            Ok(Response::Handle(scoping))
        }
        MeshCall::ElementScoping { mesh: h } => {
            let ids = match mesh(state, h)?.property_fields.get("eltype") {
                Some(f) => {
                    let scoping = state.field(*f)?.scoping;
                    state.scoping(scoping)?.0.clone()
                }
                None => Vec::new(),
            };
            let minted = state.mint_scoping(ids, Location::Elemental);
            Ok(Response::Handle(minted))
        }
        MeshCall::SetUnit { mesh: h, unit } => {
            mesh_mut(state, h)?.unit = unit;
            Ok(Response::Done)
        }
        MeshCall::GetUnit { mesh: h } => Ok(Response::Str(mesh(state, h)?.unit.clone())),
        MeshCall::AvailablePropertyFields { mesh: h } => Ok(Response::StrVec(
            mesh(state, h)?.property_fields.keys().cloned().collect(),
        )),
        MeshCall::PropertyField { mesh: h, name } => {
            let field = mesh(state, h)?
                .property_fields
                .get(&name)
                .copied()
                .ok_or_else(|| {
                    Error::validation(format!("mesh has no property field `{}`", name))
                })?;
            state.retain(field);
            Ok(Response::Handle(field))
        }
        MeshCall::SetPropertyField {
            mesh: h,
            name,
            field,
        } => {
            state.field(field)?;
            let old = mesh(state, h)?.property_fields.get(&name).copied();
            let new = state.swap_ref(old, field);
            if let Some(new) = new {
                mesh_mut(state, h)?.property_fields.insert(name, new);
            }
            Ok(Response::Done)
        }
        MeshCall::NamedSelections { mesh: h } => Ok(Response::StrVec(
            mesh(state, h)?.named_selections.keys().cloned().collect(),
        )),
        MeshCall::NamedSelection { mesh: h, name } => {
            let scoping = mesh(state, h)?
                .named_selections
                .get(&name)
                .copied()
                .ok_or_else(|| {
                    Error::validation(format!("mesh has no named selection `{}`", name))
                })?;
            state.retain(scoping);
            Ok(Response::Handle(scoping))
        }
        MeshCall::SetNamedSelection {
            mesh: h,
            name,
            scoping,
        } => {
            state.scoping(scoping)?;
            let old = mesh(state, h)?.named_selections.get(&name).copied();
            let new = state.swap_ref(old, scoping);
            if let Some(new) = new {
                mesh_mut(state, h)?.named_selections.insert(name, new);
            }
            Ok(Response::Done)
        }
        MeshCall::DeformBy {
            mesh: h,
            field,
            scale,
        } => {
            let displacement = state.field(field)?.clone();
            let m = mesh(state, h)?.clone();
            let coords_handle = m
                .coordinates
                .ok_or_else(|| Error::validation("cannot deform a mesh without coordinates"))?;
            let coords = state.field(coords_handle)?.clone();
            if coords.doubles.len() != displacement.doubles.len() {
                return Err(Error::validation(format!(
                    "displacement field of {} values cannot deform {} coordinates",
                    displacement.doubles.len(),
                    coords.doubles.len()
                )));
            }
            let deformed: Vec<Float> = coords
                .doubles
                .iter()
                .zip(&displacement.doubles)
                .map(|(c, d)| c + scale * d)
                .collect();
            let scoping_ids = state.scoping(coords.scoping)?.0.clone();
            let mut new_coords = coords;
            new_coords.doubles = deformed;
            let coords_minted = state.mint_field(new_coords, scoping_ids);
            let new_mesh = MeshStore {
                coordinates: Some(coords_minted),
                node_scoping: m.node_scoping,
                unit: m.unit.clone(),
                property_fields: m.property_fields.clone(),
                named_selections: m.named_selections.clone(),
            };
            // the new mesh takes its own references on everything it shares
            if let Some(s) = new_mesh.node_scoping {
                state.retain(s);
            }
            for f in new_mesh.property_fields.values() {
                state.retain(*f);
            }
            for s in new_mesh.named_selections.values() {
                state.retain(*s);
            }
            Ok(Response::Handle(state.mint(Stored::Mesh(new_mesh))))
        }
    }
}

// ---- data sources ----

fn handle_data_sources(state: &mut EngineState, call: DataSourcesCall) -> Result<Response> {
    fn sources(state: &EngineState, handle: HandleId) -> Result<&DataSourcesStore> {
        match state.get(handle)? {
            Stored::DataSources(d) => Ok(d),
            other => Err(kind_mismatch(EntityKind::DataSources, other.kind())),
        }
    }
    fn sources_mut(state: &mut EngineState, handle: HandleId) -> Result<&mut DataSourcesStore> {
        match state.get_mut(handle)? {
            Stored::DataSources(d) => Ok(d),
            other => {
                let kind = other.kind();
                Err(kind_mismatch(EntityKind::DataSources, kind))
            }
        }
    }

    match call {
        DataSourcesCall::New => Ok(Response::Handle(
            state.mint(Stored::DataSources(DataSourcesStore::default())),
        )),
        DataSourcesCall::SetResultFilePath {
            sources: h,
            path,
            result_key,
        } => {
            let d = sources_mut(state, h)?;
            d.result_key = result_key.clone();
            d.paths.push((path, result_key, String::new(), None));
            Ok(Response::Done)
        }
        DataSourcesCall::AddFilePath {
            sources: h,
            path,
            result_key,
            namespace,
            domain_id,
        } => {
            sources_mut(state, h)?
                .paths
                .push((path, result_key, namespace, domain_id));
            Ok(Response::Done)
        }
        DataSourcesCall::AddUpstream {
            sources: h,
            upstream,
            result_key,
        } => {
            sources(state, upstream)?;
            state.retain(upstream);
            sources_mut(state, h)?.upstreams.push((upstream, result_key));
            Ok(Response::Done)
        }
        DataSourcesCall::RegisterNamespace {
            sources: h,
            result_key,
            namespace,
        } => {
            sources_mut(state, h)?.namespaces.push((result_key, namespace));
            Ok(Response::Done)
        }
        DataSourcesCall::ResultKey { sources: h } => {
            Ok(Response::Str(sources(state, h)?.result_key.clone()))
        }
        DataSourcesCall::PathCount { sources: h } => {
            Ok(Response::Int(sources(state, h)?.paths.len() as Id))
        }
        DataSourcesCall::PathAt { sources: h, index } => {
            let d = sources(state, h)?;
            d.paths
                .get(index)
                .map(|(path, _, _, _)| Response::Str(path.clone()))
                .ok_or_else(|| {
                    Error::validation(format!(
                        "index {} out of bounds for {} declared paths",
                        index,
                        d.paths.len()
                    ))
                })
        }
        DataSourcesCall::PathsByKey {
            sources: h,
            result_key,
        } => Ok(Response::StrVec(
            sources(state, h)?
                .paths
                .iter()
                .filter(|(_, key, _, _)| *key == result_key)
                .map(|(path, _, _, _)| path.clone())
                .collect(),
        )),
    }
}

// ---- data tree ----

fn handle_data_tree(state: &mut EngineState, call: DataTreeCall) -> Result<Response> {
    fn tree(state: &EngineState, handle: HandleId) -> Result<&DataTreeStore> {
        match state.get(handle)? {
            Stored::DataTree(t) => Ok(t),
            other => Err(kind_mismatch(EntityKind::DataTree, other.kind())),
        }
    }
    fn tree_mut(state: &mut EngineState, handle: HandleId) -> Result<&mut DataTreeStore> {
        match state.get_mut(handle)? {
            Stored::DataTree(t) => Ok(t),
            other => {
                let kind = other.kind();
                Err(kind_mismatch(EntityKind::DataTree, kind))
            }
        }
    }

    match call {
        DataTreeCall::New => Ok(Response::Handle(
            state.mint(Stored::DataTree(DataTreeStore::default())),
        )),
        DataTreeCall::Set { tree: h, name, value } => {
            match value {
                CallValue::Entity { .. } | CallValue::Upstream { .. } => {
                    return Err(Error::validation(
                        "data tree attributes hold literals only",
                    ));
                }
                _ => {}
            }
            tree_mut(state, h)?.attributes.insert(name, value);
            Ok(Response::Done)
        }
        DataTreeCall::SetSubTree {
            tree: h,
            name,
            subtree,
        } => {
            tree(state, subtree)?;
            let old = tree(state, h)?.sub_trees.get(&name).copied();
            let new = state.swap_ref(old, subtree);
            if let Some(new) = new {
                tree_mut(state, h)?.sub_trees.insert(name, new);
            }
            Ok(Response::Done)
        }
        DataTreeCall::Get { tree: h, name } => tree(state, h)?
            .attributes
            .get(&name)
            .cloned()
            .map(Response::Value)
            .ok_or_else(|| Error::validation(format!("no attribute named `{}`", name))),
        DataTreeCall::SubTree { tree: h, name } => {
            let subtree = tree(state, h)?
                .sub_trees
                .get(&name)
                .copied()
                .ok_or_else(|| Error::validation(format!("no sub tree named `{}`", name)))?;
            state.retain(subtree);
            Ok(Response::Handle(subtree))
        }
        DataTreeCall::Has { tree: h, name } => {
            let t = tree(state, h)?;
            Ok(Response::Bool(
                t.attributes.contains_key(&name) || t.sub_trees.contains_key(&name),
            ))
        }
        DataTreeCall::AttributeNames { tree: h } => Ok(Response::StrVec(
            tree(state, h)?.attributes.keys().cloned().collect(),
        )),
        DataTreeCall::SubTreeNames { tree: h } => Ok(Response::StrVec(
            tree(state, h)?.sub_trees.keys().cloned().collect(),
        )),
        DataTreeCall::ToTxt { tree: h } => Ok(Response::Str(tree_to_txt(state, h, 0)?)),
        DataTreeCall::ToJson { tree: h } => {
            let value = tree_to_json(state, h)?;
            serde_json::to_string_pretty(&value)
                .map(Response::Str)
                .map_err(|e| Error::Serialization(e.to_string()))
        }
        DataTreeCall::FromTxt { text } => {
            let lines: Vec<&str> = text.lines().collect();
            let (handle, next) = tree_from_txt(state, &lines, 0, 0)?;
            if lines[next..].iter().any(|l| !l.trim().is_empty()) {
                return Err(Error::Serialization(
                    "trailing content after data tree text".to_string(),
                ));
            }
            Ok(Response::Handle(handle))
        }
        DataTreeCall::FromJson { text } => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| Error::Serialization(format!("malformed data tree json: {}", e)))?;
            let handle = tree_from_json(state, &value)?;
            Ok(Response::Handle(handle))
        }
    }
}

// Strings are always quoted and vectors always bracketed in the text
// rendering, so no payload can shadow another type on the way back in.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unquote(token: &str) -> String {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(c) => out.push(c),
            None => out.push('\\'),
        }
    }
    out
}

/// Splits bracketed vector content on `;`, leaving quoted items whole.
fn split_items(inner: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => items.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    items.push(current);
    items
}

fn render_scalar(value: &CallValue) -> Result<String> {
    Ok(match value {
        CallValue::Int(v) => v.to_string(),
        CallValue::Double(v) => format!("{:?}", v),
        CallValue::Bool(v) => v.to_string(),
        CallValue::Str(v) => quote(v),
        CallValue::IntVec(v) => format!(
            "[{}]",
            v.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(";")
        ),
        CallValue::DoubleVec(v) => format!(
            "[{}]",
            v.iter()
                .map(|d| format!("{:?}", d))
                .collect::<Vec<_>>()
                .join(";")
        ),
        CallValue::StrVec(v) => format!(
            "[{}]",
            v.iter().map(|s| quote(s)).collect::<Vec<_>>().join(";")
        ),
        other => {
            return Err(Error::Serialization(format!(
                "`{}` has no text rendering",
                other.type_name()
            )))
        }
    })
}

fn parse_scalar(text: &str) -> CallValue {
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        if inner.is_empty() {
            return CallValue::IntVec(Vec::new());
        }
        let parts = split_items(inner);
        if parts.iter().any(|p| p.starts_with('"')) {
            return CallValue::StrVec(parts.iter().map(|p| unquote(p)).collect());
        }
        let ints: core::result::Result<Vec<Id>, _> =
            parts.iter().map(|p| p.parse::<Id>()).collect();
        if let Ok(ints) = ints {
            return CallValue::IntVec(ints);
        }
        let doubles: core::result::Result<Vec<Float>, _> =
            parts.iter().map(|p| p.parse::<Float>()).collect();
        if let Ok(doubles) = doubles {
            return CallValue::DoubleVec(doubles);
        }
        return CallValue::StrVec(parts);
    }
    if text.starts_with('"') {
        return CallValue::Str(unquote(text));
    }
    if let Ok(i) = text.parse::<Id>() {
        return CallValue::Int(i);
    }
    if let Ok(d) = text.parse::<Float>() {
        return CallValue::Double(d);
    }
    match text {
        "true" => CallValue::Bool(true),
        "false" => CallValue::Bool(false),
        // bare words in hand-written files still read as strings
        _ => CallValue::Str(text.to_string()),
    }
}

fn tree_to_txt(state: &EngineState, handle: HandleId, depth: usize) -> Result<String> {
    let t = match state.get(handle)? {
        Stored::DataTree(t) => t.clone(),
        other => return Err(kind_mismatch(EntityKind::DataTree, other.kind())),
    };
    let indent = "  ".repeat(depth);
    let mut out = String::new();
    for (name, value) in &t.attributes {
        out.push_str(&format!("{}{}: {}\n", indent, name, render_scalar(value)?));
    }
    for (name, subtree) in &t.sub_trees {
        out.push_str(&format!("{}{}:\n", indent, name));
        out.push_str(&tree_to_txt(state, *subtree, depth + 1)?);
    }
    Ok(out)
}

/// Parses lines starting at `from` with indentation `depth`; returns the
/// minted tree and the index of the first line it did not consume.
fn tree_from_txt(
    state: &mut EngineState,
    lines: &[&str],
    mut from: usize,
    depth: usize,
) -> Result<(HandleId, usize)> {
    let mut store = DataTreeStore::default();
    while from < lines.len() {
        let raw = lines[from];
        if raw.trim().is_empty() {
            from += 1;
            continue;
        }
        let line_depth = (raw.len() - raw.trim_start().len()) / 2;
        if line_depth < depth {
            break;
        }
        if line_depth > depth {
            return Err(Error::Serialization(format!(
                "unexpected indentation in data tree text: `{}`",
                raw
            )));
        }
        let line = raw.trim();
        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| Error::Serialization(format!("malformed data tree line `{}`", line)))?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            let (subtree, next) = tree_from_txt(state, lines, from + 1, depth + 1)?;
            store.sub_trees.insert(name.to_string(), subtree);
            from = next;
        } else {
            store
                .attributes
                .insert(name.to_string(), parse_scalar(rest));
            from += 1;
        }
    }
    Ok((state.mint(Stored::DataTree(store)), from))
}

fn tree_to_json(state: &EngineState, handle: HandleId) -> Result<serde_json::Value> {
    let t = match state.get(handle)? {
        Stored::DataTree(t) => t.clone(),
        other => return Err(kind_mismatch(EntityKind::DataTree, other.kind())),
    };
    let mut object = serde_json::Map::new();
    for (name, value) in &t.attributes {
        let json = match value {
            CallValue::Int(v) => serde_json::json!(v),
            CallValue::Double(v) => serde_json::json!(v),
            CallValue::Bool(v) => serde_json::json!(v),
            CallValue::Str(v) => serde_json::json!(v),
            CallValue::IntVec(v) => serde_json::json!(v),
            CallValue::DoubleVec(v) => serde_json::json!(v),
            CallValue::StrVec(v) => serde_json::json!(v),
            other => {
                return Err(Error::Serialization(format!(
                    "`{}` has no json rendering",
                    other.type_name()
                )))
            }
        };
        object.insert(name.clone(), json);
    }
    for (name, subtree) in &t.sub_trees {
        object.insert(name.clone(), tree_to_json(state, *subtree)?);
    }
    Ok(serde_json::Value::Object(object))
}

fn tree_from_json(state: &mut EngineState, value: &serde_json::Value) -> Result<HandleId> {
    let object = value.as_object().ok_or_else(|| {
        Error::Serialization("data tree json must be an object".to_string())
    })?;
    let mut store = DataTreeStore::default();
    for (name, value) in object {
        match value {
            serde_json::Value::Object(_) => {
                let subtree = tree_from_json(state, value)?;
                store.sub_trees.insert(name.clone(), subtree);
            }
            serde_json::Value::Number(n) => {
                let parsed = if let Some(i) = n.as_i64() {
                    CallValue::Int(i as Id)
                } else {
                    CallValue::Double(n.as_f64().unwrap_or(0.0))
                };
                store.attributes.insert(name.clone(), parsed);
            }
            serde_json::Value::Bool(b) => {
                store.attributes.insert(name.clone(), CallValue::Bool(*b));
            }
            serde_json::Value::String(s) => {
                store
                    .attributes
                    .insert(name.clone(), CallValue::Str(s.clone()));
            }
            serde_json::Value::Array(items) => {
                let parsed = if items.iter().all(|i| i.as_i64().is_some()) {
                    CallValue::IntVec(items.iter().filter_map(|i| i.as_i64()).map(|i| i as Id).collect())
                } else if items.iter().all(|i| i.as_f64().is_some()) {
                    CallValue::DoubleVec(items.iter().filter_map(|i| i.as_f64()).collect())
                } else {
                    CallValue::StrVec(
                        items
                            .iter()
                            .map(|i| i.as_str().unwrap_or_default().to_string())
                            .collect(),
                    )
                };
                store.attributes.insert(name.clone(), parsed);
            }
            serde_json::Value::Null => {}
        }
    }
    Ok(state.mint(Stored::DataTree(store)))
}

// ---- generic, support, any ----

fn handle_generic(state: &mut EngineState, call: GenericCall) -> Result<Response> {
    match call {
        GenericCall::New => Ok(Response::Handle(state.mint(Stored::Generic {
            properties: LinkedHashMap::new(),
        }))),
        GenericCall::SetProperty {
            container,
            name,
            value,
        } => {
            if let CallValue::Upstream { .. } = value {
                return Err(Error::validation(
                    "generic containers hold literals and entities only",
                ));
            }
            if let CallValue::Entity { handle, .. } = &value {
                state.get(*handle)?;
                state.retain(*handle);
            }
            let old = match state.get_mut(container)? {
                Stored::Generic { properties } => properties.insert(name, value),
                other => {
                    let kind = other.kind();
                    return Err(kind_mismatch(EntityKind::GenericDataContainer, kind));
                }
            };
            if let Some(CallValue::Entity { handle, .. }) = old {
                let _ = state.release(handle);
            }
            Ok(Response::Done)
        }
        GenericCall::GetProperty { container, name } => {
            let value = match state.get(container)? {
                Stored::Generic { properties } => properties
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| Error::validation(format!("no property named `{}`", name)))?,
                other => {
                    return Err(kind_mismatch(EntityKind::GenericDataContainer, other.kind()))
                }
            };
            if let CallValue::Entity { handle, .. } = &value {
                state.retain(*handle);
            }
            Ok(Response::Value(value))
        }
        GenericCall::PropertyNames { container } => match state.get(container)? {
            Stored::Generic { properties } => {
                Ok(Response::StrVec(properties.keys().cloned().collect()))
            }
            other => Err(kind_mismatch(EntityKind::GenericDataContainer, other.kind())),
        },
    }
}

fn handle_support(state: &mut EngineState, call: SupportCall) -> Result<Response> {
    #[derive(Clone, Copy)]
    enum FreqSlot {
        Frequencies,
        Complex,
        Rpms,
    }
    impl FreqSlot {
        fn name(self) -> &'static str {
            match self {
                Self::Frequencies => "frequencies",
                Self::Complex => "complex frequencies",
                Self::Rpms => "rpms",
            }
        }
    }
    fn time_freq(stored: &Stored) -> Result<(Option<HandleId>, Option<HandleId>, Option<HandleId>)> {
        match stored {
            Stored::TimeFreq {
                frequencies,
                complex_frequencies,
                rpms,
            } => Ok((*frequencies, *complex_frequencies, *rpms)),
            other => Err(kind_mismatch(EntityKind::TimeFreqSupport, other.kind())),
        }
    }
    fn slot_of(stored: &Stored, slot: FreqSlot) -> Result<Option<HandleId>> {
        let (frequencies, complex, rpms) = time_freq(stored)?;
        Ok(match slot {
            FreqSlot::Frequencies => frequencies,
            FreqSlot::Complex => complex,
            FreqSlot::Rpms => rpms,
        })
    }
    fn freq_set(
        state: &mut EngineState,
        support: HandleId,
        slot: FreqSlot,
        field: HandleId,
    ) -> Result<Response> {
        state.field(field)?;
        let old = slot_of(state.get(support)?, slot)?;
        let new = state.swap_ref(old, field);
        match (state.get_mut(support)?, slot) {
            (Stored::TimeFreq { frequencies, .. }, FreqSlot::Frequencies) => *frequencies = new,
            (
                Stored::TimeFreq {
                    complex_frequencies,
                    ..
                },
                FreqSlot::Complex,
            ) => *complex_frequencies = new,
            (Stored::TimeFreq { rpms, .. }, FreqSlot::Rpms) => *rpms = new,
            _ => unreachable!("kind checked above"),
        }
        Ok(Response::Done)
    }
    fn freq_get(state: &mut EngineState, support: HandleId, slot: FreqSlot) -> Result<Response> {
        let field = slot_of(state.get(support)?, slot)?
            .ok_or_else(|| Error::validation(format!("support has no {}", slot.name())))?;
        state.retain(field);
        Ok(Response::Handle(field))
    }

    match call {
        SupportCall::NewTimeFreq => Ok(Response::Handle(state.mint(Stored::TimeFreq {
            frequencies: None,
            complex_frequencies: None,
            rpms: None,
        }))),
        SupportCall::NewSupport => Ok(Response::Handle(state.mint(Stored::Support {
            properties: LinkedHashMap::new(),
        }))),
        SupportCall::SetFrequencies { support, field } => {
            freq_set(state, support, FreqSlot::Frequencies, field)
        }
        SupportCall::Frequencies { support } => freq_get(state, support, FreqSlot::Frequencies),
        SupportCall::SetComplexFrequencies { support, field } => {
            freq_set(state, support, FreqSlot::Complex, field)
        }
        SupportCall::ComplexFrequencies { support } => freq_get(state, support, FreqSlot::Complex),
        SupportCall::SetRpms { support, field } => freq_set(state, support, FreqSlot::Rpms, field),
        SupportCall::Rpms { support } => freq_get(state, support, FreqSlot::Rpms),
        SupportCall::NumSets { support } => {
            let (frequencies, _, _) = time_freq(state.get(support)?)?;
            let count = match frequencies {
                Some(f) => state.field(f)?.elementary_count(),
                None => 0,
            };
            Ok(Response::Int(count as Id))
        }
        SupportCall::PropertyNames { support } => match state.get(support)? {
            Stored::Support { properties } => {
                Ok(Response::StrVec(properties.keys().cloned().collect()))
            }
            other => Err(kind_mismatch(EntityKind::Support, other.kind())),
        },
        SupportCall::PropertyField { support, name } => {
            let field = match state.get(support)? {
                Stored::Support { properties } => {
                    properties.get(&name).copied().ok_or_else(|| {
                        Error::validation(format!("support has no property `{}`", name))
                    })?
                }
                other => return Err(kind_mismatch(EntityKind::Support, other.kind())),
            };
            state.retain(field);
            Ok(Response::Handle(field))
        }
        SupportCall::SetPropertyField {
            support,
            name,
            field,
        } => {
            state.field(field)?;
            let old = match state.get(support)? {
                Stored::Support { properties } => properties.get(&name).copied(),
                other => return Err(kind_mismatch(EntityKind::Support, other.kind())),
            };
            let new = state.swap_ref(old, field);
            if let (Some(new), Stored::Support { properties }) = (new, state.get_mut(support)?) {
                properties.insert(name, new);
            }
            Ok(Response::Done)
        }
    }
}

fn handle_any(state: &mut EngineState, call: AnyCall) -> Result<Response> {
    match call {
        AnyCall::New { value } => {
            if let CallValue::Upstream { .. } = value {
                return Err(Error::validation("cannot box an upstream reference"));
            }
            if let CallValue::Entity { handle, .. } = &value {
                state.get(*handle)?;
                state.retain(*handle);
            }
            Ok(Response::Handle(state.mint(Stored::Any(value))))
        }
        AnyCall::Cast { any, requested } => {
            let value = match state.get(any)? {
                Stored::Any(value) => value.clone(),
                other => return Err(kind_mismatch(EntityKind::Any, other.kind())),
            };
            respond_with(state, requested, value)
        }
    }
}

/// Narrows an owned call value to the caller's requested output kind.
fn respond_with(state: &mut EngineState, requested: OutputKind, value: CallValue) -> Result<Response> {
    match (requested, value) {
        (OutputKind::Entity(kind), CallValue::Entity { kind: actual, handle }) => {
            if kind != actual {
                return Err(kind_mismatch(kind, actual));
            }
            state.retain(handle);
            Ok(Response::Entity { kind, handle })
        }
        (OutputKind::Int, CallValue::Int(v)) => Ok(Response::Int(v)),
        (OutputKind::Double, CallValue::Double(v)) => Ok(Response::Double(v)),
        (OutputKind::Bool, CallValue::Bool(v)) => Ok(Response::Bool(v)),
        (OutputKind::Str, CallValue::Str(v)) => Ok(Response::Str(v)),
        (OutputKind::Bytes, CallValue::Bytes(v)) => Ok(Response::Bytes(v)),
        (requested, value) => Err(Error::TypeMismatch {
            expected: format!("{:?}", requested),
            actual: value.type_name().to_string(),
        }),
    }
}

// ---- operators ----

impl FixtureEngine {
    fn handle_operator(&self, state: &mut EngineState, call: OperatorCall) -> Result<Response> {
        match call {
            OperatorCall::New { name } => {
                if !self.license_accepted {
                    return Err(Error::License(format!(
                        "license agreement not accepted; set {}=Y",
                        crate::LICENSE_ENV_VAR
                    )));
                }
                if !self.knows_operator(&name) {
                    return Err(Error::UnsupportedOperation(format!(
                        "operator `{}` is not registered with the engine",
                        name
                    )));
                }
                if name == "accumulate_over_label_fc" && self.context != ServerContext::Premium {
                    return Err(Error::License(format!(
                        "operator `{}` needs the premium context, session runs `{}`",
                        name, self.context
                    )));
                }
                Ok(Response::Handle(state.mint(Stored::Operator(OperatorStore {
                    name,
                    config: OperatorConfig::new(),
                    inputs: FnvHashMap::default(),
                    acc: Acc::None,
                }))))
            }
            OperatorCall::Derivate { operator } => {
                let (name, config) = match state.get(operator)? {
                    Stored::Operator(op) => (op.name.clone(), op.config.clone()),
                    other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
                };
                Ok(Response::Handle(state.mint(Stored::Operator(OperatorStore {
                    name,
                    config,
                    inputs: FnvHashMap::default(),
                    acc: Acc::None,
                }))))
            }
            OperatorCall::Connect {
                operator,
                pin,
                value,
            } => {
                match &value {
                    CallValue::Entity { handle, .. } => {
                        state.get(*handle)?;
                        state.retain(*handle);
                    }
                    CallValue::Upstream { operator: h, .. } => {
                        state.get(*h)?;
                        state.retain(*h);
                    }
                    _ => {}
                }
                let old = match state.get_mut(operator)? {
                    Stored::Operator(op) => op.inputs.insert(pin, value),
                    other => {
                        let kind = other.kind();
                        return Err(kind_mismatch(EntityKind::Operator, kind));
                    }
                };
                match old {
                    Some(CallValue::Entity { handle, .. })
                    | Some(CallValue::Upstream {
                        operator: handle, ..
                    }) => {
                        let _ = state.release(handle);
                    }
                    _ => {}
                }
                Ok(Response::Done)
            }
            OperatorCall::GetOutput {
                operator,
                pin,
                requested,
            } => {
                let value = self.evaluate(state, operator, pin)?;
                respond_with(state, requested, value)
            }
            OperatorCall::Run { operator } => {
                self.run_operator(state, operator)?;
                Ok(Response::Done)
            }
            OperatorCall::GetSpecification { name } => {
                if let Some(spec) = builtin_specification(&name) {
                    return Ok(Response::Spec(Box::new(spec)));
                }
                if let Some(spec) = self
                    .registry
                    .as_ref()
                    .and_then(|r| r.specification(&name))
                {
                    return Ok(Response::Spec(Box::new(spec)));
                }
                Err(Error::UnsupportedOperation(format!(
                    "operator `{}` is not registered with the engine",
                    name
                )))
            }
            OperatorCall::SetConfig { operator, config } => {
                match state.get_mut(operator)? {
                    Stored::Operator(op) => op.config = config,
                    other => {
                        let kind = other.kind();
                        return Err(kind_mismatch(EntityKind::Operator, kind));
                    }
                }
                Ok(Response::Done)
            }
            OperatorCall::GetConfig { operator } => match state.get(operator)? {
                Stored::Operator(op) => Ok(Response::Config(op.config.clone())),
                other => Err(kind_mismatch(EntityKind::Operator, other.kind())),
            },
        }
    }

    /// Resolves an operator's inputs, evaluating upstream references.
    fn resolve_inputs(
        &self,
        state: &mut EngineState,
        operator: HandleId,
    ) -> Result<FnvHashMap<i32, CallValue>> {
        let inputs = match state.get(operator)? {
            Stored::Operator(op) => op.inputs.clone(),
            other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
        };
        let mut resolved = FnvHashMap::default();
        for (pin, value) in inputs {
            let value = match value {
                CallValue::Upstream { operator, pin } => self.evaluate(state, operator, pin)?,
                other => other,
            };
            resolved.insert(pin, value);
        }
        Ok(resolved)
    }

    /// Evaluates one output pin, pulling upstream operators as needed.
    fn evaluate(&self, state: &mut EngineState, operator: HandleId, pin: i32) -> Result<CallValue> {
        let name = match state.get(operator)? {
            Stored::Operator(op) => op.name.clone(),
            other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
        };
        let inputs = self.resolve_inputs(state, operator)?;
        match name.as_str() {
            "forward" => inputs
                .get(&pin)
                .cloned()
                .ok_or_else(|| missing_input(&name, pin)),
            "min_max_fc" => {
                let fc = entity_input(&inputs, 0, &name)?;
                let (template, ids, min, max) = fold_min_max(state, fc, None)?;
                let data = match pin {
                    0 => min,
                    1 => max,
                    _ => return Err(missing_output(&name, pin)),
                };
                Ok(mint_like(state, &template, ids, data))
            }
            "min_max_fc_inc" => {
                let (template, ids, min, max) = match state.get(operator)? {
                    Stored::Operator(OperatorStore {
                        acc: Acc::MinMax {
                            template,
                            ids,
                            min,
                            max,
                        },
                        ..
                    }) => (
                        (**template).clone(),
                        ids.clone(),
                        min.clone(),
                        max.clone(),
                    ),
                    _ => {
                        return Err(Error::engine(
                            &name,
                            "no chunks folded yet; call run() before reading outputs",
                        ))
                    }
                };
                let data = match pin {
                    0 => min,
                    1 => max,
                    _ => return Err(missing_output(&name, pin)),
                };
                Ok(mint_like(state, &template, ids, data))
            }
            "incremental::merge::fields_container" => {
                let merged = match state.get(operator)? {
                    Stored::Operator(OperatorStore {
                        acc: Acc::Merged(Some(h)),
                        ..
                    }) => *h,
                    _ => {
                        return Err(Error::engine(
                            &name,
                            "no chunks folded yet; call run() before reading outputs",
                        ))
                    }
                };
                if pin != 0 {
                    return Err(missing_output(&name, pin));
                }
                state.retain(merged);
                Ok(CallValue::Entity {
                    kind: EntityKind::FieldsContainer,
                    handle: merged,
                })
            }
            "norm_fc" => {
                if pin != 0 {
                    return Err(missing_output(&name, pin));
                }
                let fc = entity_input(&inputs, 0, &name)?;
                let (labels, entries) = container_entries(state, fc)?;
                let mut out_entries = Vec::new();
                for (space, field) in entries {
                    let f = state.field(field)?.clone();
                    let ids = state.scoping(f.scoping)?.0.clone();
                    let n = f.num_components.max(1) as usize;
                    let norms: Vec<Float> = f
                        .doubles
                        .chunks(n)
                        .map(|chunk| chunk.iter().map(|v| v * v).sum::<Float>().sqrt())
                        .collect();
                    let mut norm_field =
                        FieldStore::new(ScalarKind::Double, f.location.clone(), 1, 0);
                    norm_field.unit = f.unit.clone();
                    norm_field.doubles = norms;
                    let minted = state.mint_field(norm_field, ids);
                    out_entries.push((space, minted));
                }
                let out = state.mint(Stored::Collection {
                    item_kind: EntityKind::Field,
                    labels,
                    entries: out_entries,
                    support: None,
                });
                Ok(CallValue::Entity {
                    kind: EntityKind::FieldsContainer,
                    handle: out,
                })
            }
            "scale" => {
                if pin != 0 {
                    return Err(missing_output(&name, pin));
                }
                let field = entity_input(&inputs, 0, &name)?;
                let f = state.field(field)?.clone();
                let ids = state.scoping(f.scoping)?.0.clone();
                let scaled: Vec<Float> = match inputs.get(&1) {
                    Some(CallValue::Double(w)) => f.doubles.iter().map(|v| v * w).collect(),
                    Some(CallValue::Entity { handle, .. }) => {
                        let weights = state.field(*handle)?;
                        if weights.doubles.len() != f.doubles.len() {
                            return Err(Error::engine(
                                &name,
                                format!(
                                    "weight field of {} values cannot scale {} values",
                                    weights.doubles.len(),
                                    f.doubles.len()
                                ),
                            ));
                        }
                        f.doubles
                            .iter()
                            .zip(&weights.doubles)
                            .map(|(v, w)| v * w)
                            .collect()
                    }
                    Some(other) => {
                        return Err(Error::TypeMismatch {
                            expected: "double or field".to_string(),
                            actual: other.type_name().to_string(),
                        })
                    }
                    None => return Err(missing_input(&name, 1)),
                };
                let mut out = f;
                out.doubles = scaled;
                let minted = state.mint_field(out, ids);
                Ok(CallValue::Entity {
                    kind: EntityKind::Field,
                    handle: minted,
                })
            }
            "accumulate_over_label_fc" => {
                if pin != 0 {
                    return Err(missing_output(&name, pin));
                }
                let fc = entity_input(&inputs, 0, &name)?;
                let (_, entries) = container_entries(state, fc)?;
                if entries.is_empty() {
                    return Err(Error::engine(&name, "empty fields container"));
                }
                let first = state.field(entries[0].1)?.clone();
                let ids = state.scoping(first.scoping)?.0.clone();
                let mut sum = vec![0.0; first.doubles.len()];
                for (_, field) in &entries {
                    let f = state.field(*field)?;
                    if f.doubles.len() != sum.len() {
                        return Err(Error::engine(&name, "fields differ in size"));
                    }
                    for (acc, v) in sum.iter_mut().zip(&f.doubles) {
                        *acc += v;
                    }
                }
                Ok(mint_like(state, &first, ids, sum))
            }
            "displacement" => {
                if pin != 0 {
                    return Err(missing_output(&name, pin));
                }
                let sources = entity_input(&inputs, 4, &name)?;
                let path = match state.get(sources)? {
                    Stored::DataSources(d) => d
                        .main_path()
                        .ok_or_else(|| Error::engine(&name, "data sources declare no result file"))?
                        .to_string(),
                    other => return Err(kind_mismatch(EntityKind::DataSources, other.kind())),
                };
                let seed = path_seed(&path);
                let sets: Vec<Id> = match inputs.get(&0) {
                    Some(CallValue::Entity { handle, .. }) => {
                        state.scoping(*handle)?.0.clone()
                    }
                    _ => (1..=DISPLACEMENT_SETS as Id).collect(),
                };
                let mut entries = Vec::new();
                for set in sets {
                    if set < 1 || set as usize > DISPLACEMENT_SETS {
                        return Err(Error::engine(
                            &name,
                            format!("time set {} outside 1..={}", set, DISPLACEMENT_SETS),
                        ));
                    }
                    let len = DISPLACEMENT_NODES * DISPLACEMENT_COMPONENTS;
                    let data: Vec<Float> =
                        (0..len).map(|i| displacement_value(seed, set, i)).collect();
                    let mut field = FieldStore::new(
                        ScalarKind::Double,
                        Location::Nodal,
                        DISPLACEMENT_COMPONENTS as i32,
                        0,
                    );
                    field.unit = "m".to_string();
                    field.doubles = data;
                    let ids = (1..=DISPLACEMENT_NODES as Id).collect();
                    let minted = state.mint_field(field, ids);
                    entries.push((vec![("time".to_string(), set)], minted));
                }
                let out = state.mint(Stored::Collection {
                    item_kind: EntityKind::Field,
                    labels: vec!["time".to_string()],
                    entries,
                    support: None,
                });
                Ok(CallValue::Entity {
                    kind: EntityKind::FieldsContainer,
                    handle: out,
                })
            }
            custom => self.evaluate_custom(state, custom, inputs, pin),
        }
    }

    fn evaluate_custom(
        &self,
        state: &mut EngineState,
        name: &str,
        inputs: FnvHashMap<i32, CallValue>,
        pin: i32,
    ) -> Result<CallValue> {
        let registry = self
            .registry
            .as_ref()
            .filter(|r| r.contains(name))
            .ok_or_else(|| {
                Error::UnsupportedOperation(format!(
                    "operator `{}` is not registered with the engine",
                    name
                ))
            })?;
        let mut context = OperatorContext::new(inputs);
        registry.run(name, &mut context)?;
        let value = context
            .into_outputs()
            .remove(&pin)
            .ok_or_else(|| missing_output(name, pin))?;
        if let CallValue::Entity { handle, .. } = &value {
            state.retain(*handle);
        }
        Ok(value)
    }

    /// Side-effect evaluation; folds chunk state for the stateful builtins.
    fn run_operator(&self, state: &mut EngineState, operator: HandleId) -> Result<()> {
        let name = match state.get(operator)? {
            Stored::Operator(op) => op.name.clone(),
            other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
        };
        match name.as_str() {
            "min_max_fc_inc" => {
                let inputs = self.resolve_inputs(state, operator)?;
                let fc = entity_input(&inputs, 0, &name)?;
                let prior = match state.get(operator)? {
                    Stored::Operator(OperatorStore {
                        acc:
                            Acc::MinMax {
                                template,
                                ids,
                                min,
                                max,
                            },
                        ..
                    }) => Some(((**template).clone(), ids.clone(), min.clone(), max.clone())),
                    _ => None,
                };
                let folded = fold_min_max(state, fc, prior)?;
                match state.get_mut(operator)? {
                    Stored::Operator(op) => {
                        op.acc = Acc::MinMax {
                            template: Box::new(folded.0),
                            ids: folded.1,
                            min: folded.2,
                            max: folded.3,
                        }
                    }
                    _ => unreachable!(),
                }
                Ok(())
            }
            "incremental::merge::fields_container" => {
                let inputs = self.resolve_inputs(state, operator)?;
                let fc = entity_input(&inputs, 0, &name)?;
                let (labels, entries) = container_entries(state, fc)?;
                let merged = match state.get(operator)? {
                    Stored::Operator(OperatorStore {
                        acc: Acc::Merged(Some(h)),
                        ..
                    }) => *h,
                    _ => {
                        let h = state.mint(Stored::Collection {
                            item_kind: EntityKind::Field,
                            labels: labels.clone(),
                            entries: Vec::new(),
                            support: None,
                        });
                        match state.get_mut(operator)? {
                            Stored::Operator(op) => op.acc = Acc::Merged(Some(h)),
                            _ => unreachable!(),
                        }
                        h
                    }
                };
                // fold by copying, so the chunk container can be released
                for (space, field) in entries {
                    let f = state.field(field)?.clone();
                    let ids = state.scoping(f.scoping)?.0.clone();
                    let copy = state.mint_field(f, ids);
                    match state.get_mut(merged)? {
                        Stored::Collection { entries, .. } => entries.push((space, copy)),
                        _ => unreachable!(),
                    }
                }
                Ok(())
            }
            // stateless operators evaluate pin 0 for effect
            _ => {
                let _ = self.evaluate(state, operator, 0)?;
                Ok(())
            }
        }
    }
}

fn missing_input(operator: &str, pin: i32) -> Error {
    Error::engine(
        operator,
        format!("no value connected to input pin {}", pin),
    )
}

fn missing_output(operator: &str, pin: i32) -> Error {
    Error::engine(operator, format!("operator has no output pin {}", pin))
}

fn entity_input(
    inputs: &FnvHashMap<i32, CallValue>,
    pin: i32,
    operator: &str,
) -> Result<HandleId> {
    match inputs.get(&pin) {
        Some(CallValue::Entity { handle, .. }) => Ok(*handle),
        Some(other) => Err(Error::TypeMismatch {
            expected: "entity".to_string(),
            actual: other.type_name().to_string(),
        }),
        None => Err(missing_input(operator, pin)),
    }
}

fn container_entries(
    state: &EngineState,
    collection: HandleId,
) -> Result<(Vec<String>, Vec<(Vec<(String, Id)>, HandleId)>)> {
    match state.get(collection)? {
        Stored::Collection {
            labels, entries, ..
        } => Ok((labels.clone(), entries.clone())),
        other => Err(kind_mismatch(EntityKind::FieldsContainer, other.kind())),
    }
}

/// Element-wise min/max over every field of a container, optionally seeded
/// with a prior fold.
fn fold_min_max(
    state: &EngineState,
    collection: HandleId,
    prior: Option<(FieldStore, Vec<Id>, Vec<Float>, Vec<Float>)>,
) -> Result<(FieldStore, Vec<Id>, Vec<Float>, Vec<Float>)> {
    let (_, entries) = container_entries(state, collection)?;
    let mut acc = prior;
    for (_, field) in &entries {
        let f = state.field(*field)?;
        if let Some((_, _, min, max)) = &mut acc {
            if f.doubles.len() != min.len() {
                return Err(Error::engine(
                    "min_max_fc",
                    format!(
                        "field of {} values folded into an aggregate of {}",
                        f.doubles.len(),
                        min.len()
                    ),
                ));
            }
            for (slot, v) in min.iter_mut().zip(&f.doubles) {
                if v < slot {
                    *slot = *v;
                }
            }
            for (slot, v) in max.iter_mut().zip(&f.doubles) {
                if v > slot {
                    *slot = *v;
                }
            }
        } else {
            let ids = state.scoping(f.scoping)?.0.clone();
            acc = Some((f.clone(), ids, f.doubles.clone(), f.doubles.clone()));
        }
    }
    acc.ok_or_else(|| Error::engine("min_max_fc", "empty fields container"))
}

/// Mints a field shaped like `template` over `ids`, carrying `data`.
fn mint_like(
    state: &mut EngineState,
    template: &FieldStore,
    ids: Vec<Id>,
    data: Vec<Float>,
) -> CallValue {
    let mut field = template.clone();
    field.doubles = data;
    field.support = None;
    let minted = state.mint_field(field, ids);
    CallValue::Entity {
        kind: EntityKind::Field,
        handle: minted,
    }
}

fn builtin_specification(name: &str) -> Option<Specification> {
    let spec = match name {
        "min_max_fc" => Specification::new("Element-wise min and max over a fields container.")
            .with_input(
                0,
                PinSpecification::new("fields_container", &["fields_container"], "input fields"),
            )
            .with_output(0, PinSpecification::new("field_min", &["field"], "minima"))
            .with_output(1, PinSpecification::new("field_max", &["field"], "maxima")),
        "min_max_fc_inc" => Specification::new(
            "Incremental element-wise min and max; folds one chunk per run.",
        )
        .with_input(
            0,
            PinSpecification::new("fields_container", &["fields_container"], "chunk to fold"),
        )
        .with_output(0, PinSpecification::new("field_min", &["field"], "minima"))
        .with_output(1, PinSpecification::new("field_max", &["field"], "maxima")),
        "norm_fc" => Specification::new("Euclidean norm of each field of a container.")
            .with_input(
                0,
                PinSpecification::new("fields_container", &["fields_container"], "input fields"),
            )
            .with_output(
                0,
                PinSpecification::new("fields_container", &["fields_container"], "norm fields"),
            ),
        "scale" => Specification::new("Scales a field by a constant or a weight field.")
            .with_input(0, PinSpecification::new("field", &["field"], "input field"))
            .with_input(
                1,
                PinSpecification::new("weights", &["double", "field"], "scaling weights")
                    .with_aliases(&["ponderation"]),
            )
            .with_output(0, PinSpecification::new("field", &["field"], "scaled field")),
        "forward" => Specification::new("Forwards any input unchanged.")
            .with_input(
                0,
                PinSpecification::new("any", &["any"], "forwarded value").ellipsis(),
            )
            .with_output(0, PinSpecification::new("any", &["any"], "forwarded value")),
        "displacement" => Specification::new("Nodal displacement by time set.")
            .with_input(
                0,
                PinSpecification::new("time_scoping", &["scoping"], "time sets to read")
                    .optional(),
            )
            .with_input(
                4,
                PinSpecification::new("data_sources", &["data_sources"], "result files"),
            )
            .with_output(
                0,
                PinSpecification::new(
                    "fields_container",
                    &["fields_container"],
                    "displacement per time set",
                ),
            ),
        "incremental::merge::fields_container" => Specification::new(
            "Folds successive fields containers into one running container.",
        )
        .with_input(
            0,
            PinSpecification::new("fields_container", &["fields_container"], "chunk to fold"),
        )
        .with_output(
            0,
            PinSpecification::new("fields_container", &["fields_container"], "merged fields"),
        ),
        "accumulate_over_label_fc" => Specification::new(
            "Element-wise sum over every field of a container (premium).",
        )
        .with_input(
            0,
            PinSpecification::new("fields_container", &["fields_container"], "input fields"),
        )
        .with_output(0, PinSpecification::new("field", &["field"], "summed field")),
        _ => return None,
    };
    Some(spec)
}

// ---- workflows ----

impl FixtureEngine {
    fn handle_workflow(&self, state: &mut EngineState, call: WorkflowCall) -> Result<Response> {
        fn workflow(state: &EngineState, handle: HandleId) -> Result<&WorkflowStore> {
            match state.get(handle)? {
                Stored::Workflow(wf) => Ok(wf),
                other => Err(kind_mismatch(EntityKind::Workflow, other.kind())),
            }
        }
        fn workflow_mut(state: &mut EngineState, handle: HandleId) -> Result<&mut WorkflowStore> {
            match state.get_mut(handle)? {
                Stored::Workflow(wf) => Ok(wf),
                other => {
                    let kind = other.kind();
                    Err(kind_mismatch(EntityKind::Workflow, kind))
                }
            }
        }
        fn register(state: &mut EngineState, wf: HandleId, operator: HandleId) -> Result<()> {
            if !workflow(state, wf)?.operators.contains(&operator) {
                state.retain(operator);
                workflow_mut(state, wf)?.operators.push(operator);
            }
            Ok(())
        }

        match call {
            WorkflowCall::New => Ok(Response::Handle(
                state.mint(Stored::Workflow(WorkflowStore::default())),
            )),
            WorkflowCall::AddOperator { workflow: h, operator } => {
                match state.get(operator)? {
                    Stored::Operator(_) => {}
                    other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
                }
                register(state, h, operator)?;
                Ok(Response::Done)
            }
            WorkflowCall::SetInputName {
                workflow: h,
                name,
                operator,
                pin,
            } => {
                register(state, h, operator)?;
                workflow_mut(state, h)?.inputs.insert(name, (operator, pin));
                Ok(Response::Done)
            }
            WorkflowCall::SetOutputName {
                workflow: h,
                name,
                operator,
                pin,
            } => {
                register(state, h, operator)?;
                workflow_mut(state, h)?.outputs.insert(name, (operator, pin));
                Ok(Response::Done)
            }
            WorkflowCall::Connect {
                workflow: h,
                name,
                value,
            } => {
                let (operator, pin) = workflow(state, h)?
                    .inputs
                    .get(&name)
                    .copied()
                    .ok_or_else(|| {
                        Error::validation(format!("workflow exposes no input named `{}`", name))
                    })?;
                self.handle_operator(state, OperatorCall::Connect {
                    operator,
                    pin,
                    value,
                })
            }
            WorkflowCall::GetOutput {
                workflow: h,
                name,
                requested,
            } => {
                let (operator, pin) = workflow(state, h)?
                    .outputs
                    .get(&name)
                    .copied()
                    .ok_or_else(|| {
                        Error::validation(format!("workflow exposes no output named `{}`", name))
                    })?;
                let value = self.evaluate(state, operator, pin)?;
                respond_with(state, requested, value)
            }
            WorkflowCall::ConnectWith {
                workflow: h,
                other,
                mapping,
            } => {
                let upstream = workflow(state, other)?.clone();
                let own_inputs = workflow(state, h)?.inputs.clone();
                let pairs: Vec<(String, String)> = if mapping.is_empty() {
                    own_inputs
                        .keys()
                        .filter(|name| upstream.outputs.contains_key(*name))
                        .map(|name| (name.clone(), name.clone()))
                        .collect()
                } else {
                    mapping
                };
                for (from, to) in pairs {
                    let (op, pin) = *upstream.outputs.get(&from).ok_or_else(|| {
                        Error::validation(format!(
                            "upstream workflow exposes no output named `{}`",
                            from
                        ))
                    })?;
                    let (target_op, target_pin) =
                        *own_inputs.get(&to).ok_or_else(|| {
                            Error::validation(format!(
                                "workflow exposes no input named `{}`",
                                to
                            ))
                        })?;
                    let value = self.evaluate(state, op, pin)?;
                    self.handle_operator(state, OperatorCall::Connect {
                        operator: target_op,
                        pin: target_pin,
                        value,
                    })?;
                }
                Ok(Response::Done)
            }
            WorkflowCall::OperatorNames { workflow: h } => {
                let mut names = Vec::new();
                for op in &workflow(state, h)?.operators {
                    if let Stored::Operator(op) = state.get(*op)? {
                        names.push(op.name.clone());
                    }
                }
                Ok(Response::StrVec(names))
            }
            WorkflowCall::Topology { workflow: h } => {
                let wf = workflow(state, h)?.clone();
                let index_of = |handle: HandleId| wf.operators.iter().position(|o| *o == handle);
                let mut topology = WorkflowTopology::default();
                for op in &wf.operators {
                    if let Stored::Operator(op) = state.get(*op)? {
                        topology.operator_names.push(op.name.clone());
                    }
                }
                for (idx, op) in wf.operators.iter().enumerate() {
                    if let Stored::Operator(op_store) = state.get(*op)? {
                        for (pin, value) in &op_store.inputs {
                            match value {
                                CallValue::Upstream { operator, pin: from } => {
                                    if let Some(from_idx) = index_of(*operator) {
                                        topology
                                            .operator_edges
                                            .push((from_idx, *from, idx, *pin));
                                    }
                                }
                                other => topology.data_edges.push((
                                    idx,
                                    *pin,
                                    other.type_name().to_string(),
                                )),
                            }
                        }
                    }
                }
                for (name, (op, pin)) in &wf.inputs {
                    if let Some(idx) = index_of(*op) {
                        topology.exposed_inputs.push((name.clone(), idx, *pin));
                    }
                }
                for (name, (op, pin)) in &wf.outputs {
                    if let Some(idx) = index_of(*op) {
                        topology.exposed_outputs.push((name.clone(), idx, *pin));
                    }
                }
                topology.operator_edges.sort_unstable();
                topology.data_edges.sort_unstable();
                Ok(Response::Topology(topology))
            }
            WorkflowCall::Record {
                workflow: h,
                transfer_ownership,
            } => {
                workflow(state, h)?;
                state.retain(h);
                state.next_record += 1;
                let id = state.next_record;
                state.recorded.insert(id, (h, transfer_ownership));
                Ok(Response::UInt(id))
            }
            WorkflowCall::GetRecorded { id } => {
                let (handle, transfer) = state
                    .recorded
                    .get(&id)
                    .copied()
                    .ok_or_else(|| Error::validation(format!("no recorded workflow {}", id)))?;
                if transfer {
                    // the registry's reference transfers to the caller
                    state.recorded.remove(&id);
                } else {
                    state.retain(handle);
                }
                Ok(Response::Handle(handle))
            }
            WorkflowCall::Cancel { workflow: h } => {
                workflow(state, h)?;
                // evaluation is synchronous here; cancellation is a no-op
                Ok(Response::Done)
            }
        }
    }
}

// ---- portable serialization ----

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
enum Portable {
    Scoping {
        ids: Vec<Id>,
        location: Location,
    },
    Field {
        scalar: ScalarKind,
        location: Location,
        num_components: i32,
        doubles: Vec<Float>,
        ints: Vec<Id>,
        strings: Vec<String>,
        bytes: Vec<u8>,
        elem_type: String,
        elem_size: usize,
        unit: String,
        dimensions: Vec<i32>,
        shell_layers: i32,
        pointer: Vec<Id>,
        scoping_ids: Vec<Id>,
    },
    Collection {
        item_kind: EntityKind,
        labels: Vec<String>,
        entries: Vec<(Vec<(String, Id)>, Portable)>,
    },
    DataTree {
        attributes: Vec<(String, CallValue)>,
        sub_trees: Vec<(String, Portable)>,
    },
    DataSources {
        result_key: String,
        paths: Vec<(String, String, String, Option<Id>)>,
        namespaces: Vec<(String, String)>,
        upstreams: Vec<(Portable, String)>,
    },
    Workflow {
        /// Per operator: name, configuration and inputs sorted by pin.
        operators: Vec<(String, OperatorConfig, Vec<(i32, PortableValue)>)>,
        /// Exposed inputs as (name, operator index, pin).
        inputs: Vec<(String, usize, i32)>,
        outputs: Vec<(String, usize, i32)>,
    },
}

/// An operator input inside a portable workflow. Upstream edges travel as
/// indexes into the workflow's operator list.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
enum PortableValue {
    Literal(CallValue),
    Entity(Box<Portable>),
    Upstream { operator: usize, pin: i32 },
}

fn to_portable(state: &EngineState, handle: HandleId) -> Result<Portable> {
    match state.get(handle)? {
        Stored::Scoping { ids, location } => Ok(Portable::Scoping {
            ids: ids.clone(),
            location: location.clone(),
        }),
        Stored::Field(f) => Ok(Portable::Field {
            scalar: f.scalar,
            location: f.location.clone(),
            num_components: f.num_components,
            doubles: f.doubles.clone(),
            ints: f.ints.clone(),
            strings: f.strings.clone(),
            bytes: f.bytes.clone(),
            elem_type: f.elem_type.clone(),
            elem_size: f.elem_size,
            unit: f.unit.clone(),
            dimensions: f.dimensions.clone(),
            shell_layers: f.shell_layers,
            pointer: f.pointer.clone(),
            scoping_ids: state.scoping(f.scoping)?.0.clone(),
        }),
        Stored::Collection {
            item_kind,
            labels,
            entries,
            ..
        } => {
            let mut portable_entries = Vec::new();
            for (space, item) in entries {
                portable_entries.push((space.clone(), to_portable(state, *item)?));
            }
            Ok(Portable::Collection {
                item_kind: *item_kind,
                labels: labels.clone(),
                entries: portable_entries,
            })
        }
        Stored::DataTree(t) => {
            let mut sub_trees = Vec::new();
            for (name, subtree) in &t.sub_trees {
                sub_trees.push((name.clone(), to_portable(state, *subtree)?));
            }
            Ok(Portable::DataTree {
                attributes: t.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                sub_trees,
            })
        }
        Stored::DataSources(d) => {
            let mut upstreams = Vec::new();
            for (handle, key) in &d.upstreams {
                upstreams.push((to_portable(state, *handle)?, key.clone()));
            }
            Ok(Portable::DataSources {
                result_key: d.result_key.clone(),
                paths: d.paths.clone(),
                namespaces: d.namespaces.clone(),
                upstreams,
            })
        }
        Stored::Workflow(wf) => {
            let index_of: FnvHashMap<HandleId, usize> = wf
                .operators
                .iter()
                .enumerate()
                .map(|(i, h)| (*h, i))
                .collect();
            let mut operators = Vec::new();
            for handle in &wf.operators {
                let op = match state.get(*handle)? {
                    Stored::Operator(op) => op,
                    other => return Err(kind_mismatch(EntityKind::Operator, other.kind())),
                };
                let mut inputs: Vec<(i32, PortableValue)> = Vec::new();
                for (pin, value) in &op.inputs {
                    let value = match value {
                        CallValue::Entity { handle, .. } => {
                            PortableValue::Entity(Box::new(to_portable(state, *handle)?))
                        }
                        CallValue::Upstream { operator, pin } => {
                            let index = index_of.get(operator).ok_or_else(|| {
                                Error::UnsupportedOperation(
                                    "workflow references an operator outside the graph"
                                        .to_string(),
                                )
                            })?;
                            PortableValue::Upstream {
                                operator: *index,
                                pin: *pin,
                            }
                        }
                        literal => PortableValue::Literal(literal.clone()),
                    };
                    inputs.push((*pin, value));
                }
                inputs.sort_by_key(|(pin, _)| *pin);
                operators.push((op.name.clone(), op.config.clone(), inputs));
            }
            let endpoint = |map: &LinkedHashMap<String, (HandleId, i32)>| {
                map.iter()
                    .map(|(name, (handle, pin))| {
                        let index = index_of.get(handle).copied().ok_or_else(|| {
                            Error::UnsupportedOperation(
                                "workflow exposes a pin of an unregistered operator".to_string(),
                            )
                        })?;
                        Ok((name.clone(), index, *pin))
                    })
                    .collect::<Result<Vec<_>>>()
            };
            Ok(Portable::Workflow {
                operators,
                inputs: endpoint(&wf.inputs)?,
                outputs: endpoint(&wf.outputs)?,
            })
        }
        other => Err(Error::UnsupportedOperation(format!(
            "`{}` entities have no portable serialization",
            other.kind()
        ))),
    }
}

/// Entity kind a portable value reinstantiates as.
fn portable_kind(portable: &Portable) -> EntityKind {
    match portable {
        Portable::Scoping { .. } => EntityKind::Scoping,
        Portable::Field { scalar, .. } => match scalar {
            ScalarKind::Double => EntityKind::Field,
            ScalarKind::Int => EntityKind::PropertyField,
            ScalarKind::String => EntityKind::StringField,
            ScalarKind::Custom => EntityKind::CustomTypeField,
        },
        Portable::Collection { item_kind, .. } => match item_kind {
            EntityKind::Field => EntityKind::FieldsContainer,
            EntityKind::Scoping => EntityKind::ScopingsContainer,
            EntityKind::MeshedRegion => EntityKind::MeshesContainer,
            _ => EntityKind::AnyCollection,
        },
        Portable::DataTree { .. } => EntityKind::DataTree,
        Portable::DataSources { .. } => EntityKind::DataSources,
        Portable::Workflow { .. } => EntityKind::Workflow,
    }
}

fn from_portable(state: &mut EngineState, portable: Portable) -> HandleId {
    match portable {
        Portable::Scoping { ids, location } => state.mint_scoping(ids, location),
        Portable::Field {
            scalar,
            location,
            num_components,
            doubles,
            ints,
            strings,
            bytes,
            elem_type,
            elem_size,
            unit,
            dimensions,
            shell_layers,
            pointer,
            scoping_ids,
        } => {
            let mut field = FieldStore::new(scalar, location, num_components, 0);
            field.doubles = doubles;
            field.ints = ints;
            field.strings = strings;
            field.bytes = bytes;
            field.elem_type = elem_type;
            field.elem_size = elem_size;
            field.unit = unit;
            field.dimensions = dimensions;
            field.shell_layers = shell_layers;
            field.pointer = pointer;
            state.mint_field(field, scoping_ids)
        }
        Portable::Collection {
            item_kind,
            labels,
            entries,
        } => {
            let mut stored_entries = Vec::new();
            for (space, item) in entries {
                stored_entries.push((space, from_portable(state, item)));
            }
            state.mint(Stored::Collection {
                item_kind,
                labels,
                entries: stored_entries,
                support: None,
            })
        }
        Portable::DataTree {
            attributes,
            sub_trees,
        } => {
            let mut store = DataTreeStore::default();
            for (name, value) in attributes {
                store.attributes.insert(name, value);
            }
            for (name, subtree) in sub_trees {
                let minted = from_portable(state, subtree);
                store.sub_trees.insert(name, minted);
            }
            state.mint(Stored::DataTree(store))
        }
        Portable::DataSources {
            result_key,
            paths,
            namespaces,
            upstreams,
        } => {
            let upstreams = upstreams
                .into_iter()
                .map(|(inner, key)| (from_portable(state, inner), key))
                .collect();
            state.mint(Stored::DataSources(DataSourcesStore {
                result_key,
                paths,
                namespaces,
                upstreams,
            }))
        }
        Portable::Workflow {
            operators,
            inputs,
            outputs,
        } => {
            // operators first, so upstream edges can point at them
            let handles: Vec<HandleId> = operators
                .iter()
                .map(|(name, config, _)| {
                    state.mint(Stored::Operator(OperatorStore {
                        name: name.clone(),
                        config: config.clone(),
                        inputs: FnvHashMap::default(),
                        acc: Acc::None,
                    }))
                })
                .collect();
            for (index, (_, _, pins)) in operators.into_iter().enumerate() {
                let mut resolved = FnvHashMap::default();
                for (pin, value) in pins {
                    let value = match value {
                        PortableValue::Literal(v) => v,
                        PortableValue::Entity(inner) => {
                            let kind = portable_kind(&inner);
                            let minted = from_portable(state, *inner);
                            CallValue::Entity {
                                kind,
                                handle: minted,
                            }
                        }
                        PortableValue::Upstream { operator, pin } => CallValue::Upstream {
                            operator: handles[operator],
                            pin,
                        },
                    };
                    resolved.insert(pin, value);
                }
                if let Ok(Stored::Operator(op)) = state.get_mut(handles[index]) {
                    op.inputs = resolved;
                }
            }
            let endpoint = |list: Vec<(String, usize, i32)>| {
                list.into_iter()
                    .map(|(name, index, pin)| (name, (handles[index], pin)))
                    .collect::<LinkedHashMap<_, _>>()
            };
            let inputs = endpoint(inputs);
            let outputs = endpoint(outputs);
            state.mint(Stored::Workflow(WorkflowStore {
                operators: handles,
                inputs,
                outputs,
            }))
        }
    }
}

fn floats_equal(a: &[Float], b: &[Float], tolerance: Float) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= tolerance)
}

fn portable_equals(a: &Portable, b: &Portable, tolerance: Float) -> bool {
    match (a, b) {
        (
            Portable::Scoping { ids: a_ids, location: a_loc },
            Portable::Scoping { ids: b_ids, location: b_loc },
        ) => a_ids == b_ids && a_loc == b_loc,
        (
            Portable::Field {
                scalar: a_scalar,
                location: a_loc,
                num_components: a_nc,
                doubles: a_d,
                ints: a_i,
                strings: a_s,
                bytes: a_b,
                scoping_ids: a_ids,
                ..
            },
            Portable::Field {
                scalar: b_scalar,
                location: b_loc,
                num_components: b_nc,
                doubles: b_d,
                ints: b_i,
                strings: b_s,
                bytes: b_b,
                scoping_ids: b_ids,
                ..
            },
        ) => {
            a_scalar == b_scalar
                && a_loc == b_loc
                && a_nc == b_nc
                && a_i == b_i
                && a_s == b_s
                && a_b == b_b
                && a_ids == b_ids
                && floats_equal(a_d, b_d, tolerance)
        }
        (
            Portable::Collection {
                item_kind: a_kind,
                labels: a_labels,
                entries: a_entries,
            },
            Portable::Collection {
                item_kind: b_kind,
                labels: b_labels,
                entries: b_entries,
            },
        ) => {
            a_kind == b_kind
                && a_labels == b_labels
                && a_entries.len() == b_entries.len()
                && a_entries.iter().zip(b_entries).all(|((sa, ia), (sb, ib))| {
                    sa == sb && portable_equals(ia, ib, tolerance)
                })
        }
        (
            Portable::DataTree {
                attributes: a_attrs,
                sub_trees: a_subs,
            },
            Portable::DataTree {
                attributes: b_attrs,
                sub_trees: b_subs,
            },
        ) => {
            a_attrs == b_attrs
                && a_subs.len() == b_subs.len()
                && a_subs.iter().zip(b_subs).all(|((na, ta), (nb, tb))| {
                    na == nb && portable_equals(ta, tb, tolerance)
                })
        }
        (
            Portable::DataSources {
                result_key: a_key,
                paths: a_paths,
                namespaces: a_ns,
                upstreams: a_up,
            },
            Portable::DataSources {
                result_key: b_key,
                paths: b_paths,
                namespaces: b_ns,
                upstreams: b_up,
            },
        ) => {
            a_key == b_key
                && a_paths == b_paths
                && a_ns == b_ns
                && a_up.len() == b_up.len()
                && a_up.iter().zip(b_up).all(|((ua, ka), (ub, kb))| {
                    ka == kb && portable_equals(ua, ub, tolerance)
                })
        }
        (
            Portable::Workflow {
                operators: a_ops,
                inputs: a_in,
                outputs: a_out,
            },
            Portable::Workflow {
                operators: b_ops,
                inputs: b_in,
                outputs: b_out,
            },
        ) => {
            a_in == b_in
                && a_out == b_out
                && a_ops.len() == b_ops.len()
                && a_ops.iter().zip(b_ops).all(|((na, ca, ia), (nb, cb, ib))| {
                    na == nb
                        && ca == cb
                        && ia.len() == ib.len()
                        && ia.iter().zip(ib).all(|((pa, va), (pb, vb))| {
                            pa == pb
                                && match (va, vb) {
                                    (PortableValue::Entity(ea), PortableValue::Entity(eb)) => {
                                        portable_equals(ea, eb, tolerance)
                                    }
                                    (va, vb) => va == vb,
                                }
                        })
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacement_values_are_deterministic() {
        let seed = path_seed("/models/plate.rst");
        assert_eq!(
            displacement_value(seed, 3, 7),
            displacement_value(seed, 3, 7)
        );
        assert_ne!(
            displacement_value(seed, 3, 7),
            displacement_value(seed, 4, 7)
        );
    }

    #[test]
    fn release_cascades_to_owned_references() {
        let mut state = EngineState::default();
        let scoping = state.mint_scoping(vec![1, 2], Location::Nodal);
        let mut field = FieldStore::new(ScalarKind::Double, Location::Nodal, 1, scoping);
        field.doubles = vec![1.0, 2.0];
        let field = state.mint(Stored::Field(field));
        assert!(state.get(scoping).is_ok());

        state.release(field).unwrap();
        assert!(state.get(field).is_err());
        assert!(state.get(scoping).is_err());
    }

    #[test]
    fn shared_references_survive_one_release() {
        let mut state = EngineState::default();
        let scoping = state.mint_scoping(vec![1], Location::Nodal);
        state.retain(scoping);
        state.release(scoping).unwrap();
        assert!(state.get(scoping).is_ok());
        state.release(scoping).unwrap();
        assert!(state.get(scoping).is_err());
    }
}
