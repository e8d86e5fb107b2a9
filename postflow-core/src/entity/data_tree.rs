//! Data trees: nested attribute maps used for engine-side metadata.

use std::sync::Arc;

use crate::binding::call::{CallValue, DataTreeCall, Request, Response};
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;
use crate::{Float, Id};

#[derive(Clone)]
pub struct DataTree {
    handle: Arc<EntityHandle>,
}

impl Entity for DataTree {
    const KIND: EntityKind = EntityKind::DataTree;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl DataTree {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::DataTree(DataTreeCall::New))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::DataTree,
                server.clone(),
            ))),
            other => Err(unexpected_response("data_tree_new", &other)),
        }
    }

    /// Parses the engine's indented text rendering into a fresh tree.
    pub fn from_txt(server: &Server, text: &str) -> Result<Self> {
        match server.call(Request::DataTree(DataTreeCall::FromTxt {
            text: text.to_string(),
        }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::DataTree,
                server.clone(),
            ))),
            other => Err(unexpected_response("data_tree_from_txt", &other)),
        }
    }

    pub fn from_json(server: &Server, text: &str) -> Result<Self> {
        match server.call(Request::DataTree(DataTreeCall::FromJson {
            text: text.to_string(),
        }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::DataTree,
                server.clone(),
            ))),
            other => Err(unexpected_response("data_tree_from_json", &other)),
        }
    }

    fn call(&self, call: DataTreeCall) -> Result<Response> {
        self.handle.server().call(Request::DataTree(call))
    }

    fn set(&self, name: &str, value: CallValue) -> Result<()> {
        match self.call(DataTreeCall::Set {
            tree: self.handle.live_id()?,
            name: name.to_string(),
            value,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_tree_set", &other)),
        }
    }

    pub fn set_int(&self, name: &str, value: Id) -> Result<()> {
        self.set(name, CallValue::Int(value))
    }

    pub fn set_double(&self, name: &str, value: Float) -> Result<()> {
        self.set(name, CallValue::Double(value))
    }

    pub fn set_string(&self, name: &str, value: &str) -> Result<()> {
        self.set(name, CallValue::Str(value.to_string()))
    }

    pub fn set_int_vec(&self, name: &str, value: Vec<Id>) -> Result<()> {
        self.set(name, CallValue::IntVec(value))
    }

    pub fn set_double_vec(&self, name: &str, value: Vec<Float>) -> Result<()> {
        self.set(name, CallValue::DoubleVec(value))
    }

    pub fn set_string_vec(&self, name: &str, value: Vec<String>) -> Result<()> {
        self.set(name, CallValue::StrVec(value))
    }

    pub fn set_sub_tree(&self, name: &str, subtree: &DataTree) -> Result<()> {
        match self.call(DataTreeCall::SetSubTree {
            tree: self.handle.live_id()?,
            name: name.to_string(),
            subtree: subtree.handle.live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_tree_set_sub_tree", &other)),
        }
    }

    /// Raw attribute value; type-specific getters narrow it.
    pub fn get(&self, name: &str) -> Result<CallValue> {
        match self.call(DataTreeCall::Get {
            tree: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected_response("data_tree_get", &other)),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<Id> {
        match self.get(name)? {
            CallValue::Int(v) => Ok(v),
            other => Err(self.type_mismatch("int", &other)),
        }
    }

    pub fn get_double(&self, name: &str) -> Result<Float> {
        match self.get(name)? {
            CallValue::Double(v) => Ok(v),
            other => Err(self.type_mismatch("double", &other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            CallValue::Str(v) => Ok(v),
            other => Err(self.type_mismatch("string", &other)),
        }
    }

    pub fn get_int_vec(&self, name: &str) -> Result<Vec<Id>> {
        match self.get(name)? {
            CallValue::IntVec(v) => Ok(v),
            other => Err(self.type_mismatch("vector<int>", &other)),
        }
    }

    pub fn get_double_vec(&self, name: &str) -> Result<Vec<Float>> {
        match self.get(name)? {
            CallValue::DoubleVec(v) => Ok(v),
            other => Err(self.type_mismatch("vector<double>", &other)),
        }
    }

    pub fn get_string_vec(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name)? {
            CallValue::StrVec(v) => Ok(v),
            other => Err(self.type_mismatch("vector<string>", &other)),
        }
    }

    fn type_mismatch(&self, expected: &str, actual: &CallValue) -> Error {
        Error::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        }
    }

    pub fn sub_tree(&self, name: &str) -> Result<DataTree> {
        match self.call(DataTreeCall::SubTree {
            tree: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::DataTree,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("data_tree_sub_tree", &other)),
        }
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        match self.call(DataTreeCall::Has {
            tree: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Bool(b) => Ok(b),
            other => Err(unexpected_response("data_tree_has", &other)),
        }
    }

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        match self.call(DataTreeCall::AttributeNames {
            tree: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("data_tree_attribute_names", &other)),
        }
    }

    pub fn sub_tree_names(&self) -> Result<Vec<String>> {
        match self.call(DataTreeCall::SubTreeNames {
            tree: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("data_tree_sub_tree_names", &other)),
        }
    }

    /// Indented text rendering, round-trippable through
    /// [`from_txt`](DataTree::from_txt).
    pub fn to_txt(&self) -> Result<String> {
        match self.call(DataTreeCall::ToTxt {
            tree: self.handle.live_id()?,
        })? {
            Response::Str(text) => Ok(text),
            other => Err(unexpected_response("data_tree_to_txt", &other)),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        match self.call(DataTreeCall::ToJson {
            tree: self.handle.live_id()?,
        })? {
            Response::Str(text) => Ok(text),
            other => Err(unexpected_response("data_tree_to_json", &other)),
        }
    }
}

impl PartialEq for DataTree {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for DataTree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "DataTree({:?})", self.handle)
    }
}
