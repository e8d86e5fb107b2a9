//! This library implements the client side of a post-processing dataflow
//! runtime for finite-element results.
//!
//! Programming interface is centered around the [`Server`] structure, which
//! represents a live session with an external numerical engine, and the
//! [`Operator`] / [`Workflow`] pair used to describe computations the engine
//! evaluates on demand. Entities such as fields, scopings and meshes are
//! opaque engine-side objects; the typed wrappers in [`entity`] expose them
//! through blocking calls routed by the server's [`binding`].
//!
//! # Bindings
//!
//! Two bindings ship with the project. The in-process binding (feature
//! `dynlib`, enabled by default) loads the engine as a shared library and
//! talks to it through a C function table. The network binding lives in the
//! `postflow-net` crate and exchanges framed messages with a remote engine.
//! Both present identical observable semantics behind the
//! [`EngineBinding`] trait.
//!
//! # Example
//!
//! ```ignore
//! use postflow_core::{Operator, Server};
//!
//! let server = postflow_core::binding::inprocess::load("libengine.so")?;
//! let op = Operator::new(&server, "min_max_fc")?;
//! op.connect(0, fields_container)?;
//! let min: Field = op.get_output(0)?;
//! ```
//!
//! [`Server`]: server/struct.Server.html
//! [`Operator`]: operator/struct.Operator.html
//! [`Workflow`]: workflow/struct.Workflow.html
//! [`EngineBinding`]: binding/trait.EngineBinding.html

#![allow(unused)]

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// reexports
pub use binding::call::{CallValue, OutputKind, Request, Response, ServerInfo};
pub use binding::EngineBinding;
pub use config::RuntimeConfig;
pub use entity::any::Any;
pub use entity::collection::{FieldsContainer, MeshesContainer, ScopingsContainer};
pub use entity::data_sources::DataSources;
pub use entity::data_tree::DataTree;
pub use entity::field::{CustomTypeField, Field, PropertyField, StringField};
pub use entity::mesh::MeshedRegion;
pub use entity::scoping::Scoping;
pub use entity::{EntityKind, Location};
pub use error::{Error, Result};
pub use operator::specification::{PinSpecification, Specification};
pub use operator::Operator;
pub use server::Server;
pub use version::{EngineVersion, ServerContext};
pub use workflow::Workflow;

pub mod binding;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod handle;
pub mod incremental;
pub mod operator;
pub mod server;
pub mod version;
pub mod workflow;

mod license;

#[cfg(feature = "dynlib")]
pub mod plugin;

#[cfg(feature = "testkit")]
pub mod testkit;

// features
pub const FEATURE_NAME_DYNLIB: &str = "dynlib";
#[cfg(not(feature = "dynlib"))]
pub const FEATURE_DYNLIB: bool = false;
#[cfg(feature = "dynlib")]
pub const FEATURE_DYNLIB: bool = true;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Floating point number type used for field payloads.
pub type Float = f64;
/// Integer type used for entity ids and property payloads.
pub type Id = i32;
/// Opaque engine-side object identifier, scoped to a single server.
pub type HandleId = u64;

/// Environment variable gating operator creation on license acceptance.
pub const LICENSE_ENV_VAR: &str = "ANSYS_DPF_ACCEPT_LA";
/// Environment variable pointing at the mTLS certificate directory.
pub const CERTIFICATES_ENV_VAR: &str = "ANSYS_GRPC_CERTIFICATES";
