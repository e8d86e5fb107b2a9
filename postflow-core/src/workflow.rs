//! Workflows: operator graphs with named, exposed endpoints.
//!
//! A workflow packages a graph of connected operators behind stable input
//! and output names, hiding pin indices from the caller. Like single
//! operators, evaluation is pull-driven from the outputs.

use std::sync::Arc;

use crate::binding::call::{Request, Response, WorkflowCall, WorkflowTopology};
use crate::entity::{Entity, EntityKind};
use crate::error::Result;
use crate::handle::{unexpected_response, EntityHandle};
use crate::operator::{FromOutput, Operator, PinValue};
use crate::server::Server;
use crate::version::VERSION_PIN_ALIASES;

#[derive(Clone)]
pub struct Workflow {
    handle: Arc<EntityHandle>,
}

impl Entity for Workflow {
    const KIND: EntityKind = EntityKind::Workflow;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl Workflow {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::Workflow(WorkflowCall::New))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::Workflow,
                server.clone(),
            ))),
            other => Err(unexpected_response("workflow_new", &other)),
        }
    }

    fn call(&self, call: WorkflowCall) -> Result<Response> {
        self.handle.server().call(Request::Workflow(call))
    }

    /// Registers an operator with the graph. The workflow keeps the
    /// operator alive for its own lifetime.
    pub fn add_operator(&self, operator: &Operator) -> Result<()> {
        match self.call(WorkflowCall::AddOperator {
            workflow: self.handle.live_id()?,
            operator: operator.handle().live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_add_operator", &other)),
        }
    }

    /// Exposes an operator input pin under a workflow-level name.
    pub fn set_input_name(&self, name: &str, operator: &Operator, pin: i32) -> Result<()> {
        match self.call(WorkflowCall::SetInputName {
            workflow: self.handle.live_id()?,
            name: name.to_string(),
            operator: operator.handle().live_id()?,
            pin,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_set_input_name", &other)),
        }
    }

    /// Exposes an operator output pin under a workflow-level name.
    pub fn set_output_name(&self, name: &str, operator: &Operator, pin: i32) -> Result<()> {
        match self.call(WorkflowCall::SetOutputName {
            workflow: self.handle.live_id()?,
            name: name.to_string(),
            operator: operator.handle().live_id()?,
            pin,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_set_output_name", &other)),
        }
    }

    /// Connects a named exposed input.
    pub fn connect(&self, name: &str, value: impl Into<PinValue>) -> Result<()> {
        match self.call(WorkflowCall::Connect {
            workflow: self.handle.live_id()?,
            name: name.to_string(),
            value: value.into().into_call_value()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_connect", &other)),
        }
    }

    /// Evaluates the graph and retrieves a named exposed output as `T`.
    pub fn get_output<T: FromOutput>(&self, name: &str) -> Result<T> {
        let response = self.call(WorkflowCall::GetOutput {
            workflow: self.handle.live_id()?,
            name: name.to_string(),
            requested: T::requested(),
        })?;
        T::from_response(response, self.handle.server())
    }

    /// Fuses `upstream`'s exposed outputs onto this workflow's exposed
    /// inputs, matching by identical names.
    pub fn connect_with(&self, upstream: &Workflow) -> Result<()> {
        self.connect_with_mapping(upstream, &[])
    }

    /// Fusion with explicit renames, given as
    /// `(upstream output name, this input name)` pairs.
    pub fn connect_with_mapping(
        &self,
        upstream: &Workflow,
        mapping: &[(&str, &str)],
    ) -> Result<()> {
        match self.call(WorkflowCall::ConnectWith {
            workflow: self.handle.live_id()?,
            other: upstream.handle.live_id()?,
            mapping: mapping
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_connect_with", &other)),
        }
    }

    /// Names of the operators registered with the graph.
    pub fn operator_names(&self) -> Result<Vec<String>> {
        match self.call(WorkflowCall::OperatorNames {
            workflow: self.handle.live_id()?,
        })? {
            Response::StrVec(names) => Ok(names),
            other => Err(unexpected_response("workflow_operator_names", &other)),
        }
    }

    /// Structural introspection of the graph: operators, edges and exposed
    /// endpoints. Needs an engine >= 10.0.
    pub fn topology(&self) -> Result<WorkflowTopology> {
        self.handle.server().require(VERSION_PIN_ALIASES)?;
        match self.call(WorkflowCall::Topology {
            workflow: self.handle.live_id()?,
        })? {
            Response::Topology(topology) => Ok(topology),
            other => Err(unexpected_response("workflow_topology", &other)),
        }
    }

    /// Registers the workflow in the engine's recording registry and returns
    /// its retrieval id.
    ///
    /// With `transfer_ownership` the registry entry is consumed by the first
    /// [`get_recorded`](Workflow::get_recorded); otherwise it stays until the
    /// session ends.
    pub fn record(&self, transfer_ownership: bool) -> Result<u32> {
        match self.call(WorkflowCall::Record {
            workflow: self.handle.live_id()?,
            transfer_ownership,
        })? {
            Response::UInt(id) => Ok(id),
            other => Err(unexpected_response("workflow_record", &other)),
        }
    }

    /// Retrieves a previously recorded workflow by id, possibly from another
    /// session connected to the same engine.
    pub fn get_recorded(server: &Server, id: u32) -> Result<Workflow> {
        match server.call(Request::Workflow(WorkflowCall::GetRecorded { id }))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::Workflow,
                server.clone(),
            ))),
            other => Err(unexpected_response("workflow_get_recorded", &other)),
        }
    }

    /// Recreates the graph on another server, deep-copying connected
    /// literal inputs along with the structure.
    pub fn create_on_other_server(&self, target: &Server) -> Result<Workflow> {
        info!(
            "copying workflow from server {} to server {}",
            self.handle.server().id(),
            target.id()
        );
        self.deep_copy(target)
    }

    /// Requests a cooperative stop of a pending evaluation. Takes effect at
    /// the engine's next cancellation point; already-produced outputs stay
    /// valid.
    pub fn cancel(&self) -> Result<()> {
        match self.call(WorkflowCall::Cancel {
            workflow: self.handle.live_id()?,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("workflow_cancel", &other)),
        }
    }
}

impl PartialEq for Workflow {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Workflow({:?})", self.handle)
    }
}
