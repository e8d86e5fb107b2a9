//! Supports: the axes data is defined against.
//!
//! A generic [`Support`] is a bag of named property fields; the
//! [`TimeFreqSupport`] specialization describes the time or frequency sets
//! of a solution.

use std::sync::Arc;

use crate::binding::call::{Request, Response, SupportCall};
use crate::entity::field::{Field, PropertyField};
use crate::entity::{Entity, EntityKind};
use crate::handle::{unexpected_response, EntityHandle};
use crate::error::Result;
use crate::server::Server;

#[derive(Clone)]
pub struct Support {
    handle: Arc<EntityHandle>,
}

impl Entity for Support {
    const KIND: EntityKind = EntityKind::Support;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl Support {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::Support(SupportCall::NewSupport))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::Support,
                server.clone(),
            ))),
            other => Err(unexpected_response("support_new", &other)),
        }
    }

    fn call(&self, call: SupportCall) -> Result<Response> {
        self.handle.server().call(Request::Support(call))
    }

    pub fn property_names(&self) -> Result<Vec<String>> {
        match self.call(SupportCall::PropertyNames {
            support: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("support_property_names", &other)),
        }
    }

    pub fn property_field(&self, name: &str) -> Result<PropertyField> {
        match self.call(SupportCall::PropertyField {
            support: self.handle.live_id()?,
            name: name.to_string(),
        })? {
            Response::Handle(h) => Ok(PropertyField::from_handle(EntityHandle::new(
                h,
                EntityKind::PropertyField,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response("support_property_field", &other)),
        }
    }

    pub fn set_property_field(&self, name: &str, field: &PropertyField) -> Result<()> {
        match self.call(SupportCall::SetPropertyField {
            support: self.handle.live_id()?,
            name: name.to_string(),
            field: field.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("support_set_property_field", &other)),
        }
    }
}

impl PartialEq for Support {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for Support {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Support({:?})", self.handle)
    }
}

/// Time or frequency axis of a solution: one real field of set values, an
/// optional complex counterpart and optional rotational speeds.
#[derive(Clone)]
pub struct TimeFreqSupport {
    handle: Arc<EntityHandle>,
}

impl Entity for TimeFreqSupport {
    const KIND: EntityKind = EntityKind::TimeFreqSupport;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl TimeFreqSupport {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::Support(SupportCall::NewTimeFreq))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::TimeFreqSupport,
                server.clone(),
            ))),
            other => Err(unexpected_response("time_freq_support_new", &other)),
        }
    }

    fn call(&self, call: SupportCall) -> Result<Response> {
        self.handle.server().call(Request::Support(call))
    }

    fn field_of(&self, call: SupportCall, name: &'static str) -> Result<Field> {
        match self.call(call)? {
            Response::Handle(h) => Ok(Field::from_handle(EntityHandle::new(
                h,
                EntityKind::Field,
                self.handle.server().clone(),
            ))),
            other => Err(unexpected_response(name, &other)),
        }
    }

    fn set_field(&self, call: SupportCall, name: &'static str) -> Result<()> {
        match self.call(call)? {
            Response::Done => Ok(()),
            other => Err(unexpected_response(name, &other)),
        }
    }

    /// Real set values, seconds or hertz depending on the analysis.
    pub fn frequencies(&self) -> Result<Field> {
        let id = self.handle.live_id()?;
        self.field_of(
            SupportCall::Frequencies { support: id },
            "time_freq_frequencies",
        )
    }

    pub fn set_frequencies(&self, field: &Field) -> Result<()> {
        let id = self.handle.live_id()?;
        let f = field.handle().live_id()?;
        self.set_field(
            SupportCall::SetFrequencies {
                support: id,
                field: f,
            },
            "time_freq_set_frequencies",
        )
    }

    pub fn complex_frequencies(&self) -> Result<Field> {
        let id = self.handle.live_id()?;
        self.field_of(
            SupportCall::ComplexFrequencies { support: id },
            "time_freq_complex_frequencies",
        )
    }

    pub fn set_complex_frequencies(&self, field: &Field) -> Result<()> {
        let id = self.handle.live_id()?;
        let f = field.handle().live_id()?;
        self.set_field(
            SupportCall::SetComplexFrequencies {
                support: id,
                field: f,
            },
            "time_freq_set_complex_frequencies",
        )
    }

    pub fn rpms(&self) -> Result<Field> {
        let id = self.handle.live_id()?;
        self.field_of(SupportCall::Rpms { support: id }, "time_freq_rpms")
    }

    pub fn set_rpms(&self, field: &Field) -> Result<()> {
        let id = self.handle.live_id()?;
        let f = field.handle().live_id()?;
        self.set_field(
            SupportCall::SetRpms {
                support: id,
                field: f,
            },
            "time_freq_set_rpms",
        )
    }

    pub fn num_sets(&self) -> Result<usize> {
        match self.call(SupportCall::NumSets {
            support: self.handle.live_id()?,
        })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("time_freq_num_sets", &other)),
        }
    }
}

impl PartialEq for TimeFreqSupport {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for TimeFreqSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "TimeFreqSupport({:?})", self.handle)
    }
}
