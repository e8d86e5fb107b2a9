//! Network binding for the postflow runtime.
//!
//! This crate lets the client model in `postflow-core` talk to an engine in
//! another process or on another machine. Each call becomes one framed wire
//! message exchanged over a blocking stream; the engine answers with the
//! result or a typed fault. Observable semantics are identical to the
//! in-process binding.
//!
//! The crate also ships [`EngineHost`], a serve loop exposing any core
//! binding over the wire. Pointing it at an in-process binding that loaded
//! custom operator plugins turns it into a sidecar plugin host.
//!
//! ```ignore
//! use postflow_net::{Endpoint, RemoteBinding};
//!
//! let endpoint: Endpoint = "tcp://127.0.0.1:50054".parse()?;
//! let server = RemoteBinding::connect(endpoint, &RuntimeConfig::default())?
//!     .into_server()?;
//! ```

#![allow(unused)]

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub use binding::RemoteBinding;
pub use channel::Channel;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use host::EngineHost;
pub use msg::{Encoding, MessageKind, WireMessage};

pub mod binding;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod msg;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
