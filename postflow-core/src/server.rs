//! Server sessions.
//!
//! A [`Server`] is a shared, cheaply clonable session with one engine
//! instance behind a concrete binding. Entities are server-scoped: a handle
//! minted by one server is meaningless to another, and crossing servers
//! always goes through an explicit deep copy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::binding::call::{AdminCall, Request, Response, ServerInfo};
use crate::binding::{closest_operator, EngineBinding};
use crate::error::{Error, Result};
use crate::version::{EngineVersion, ServerContext};

static SERVER_ID_COUNTER: AtomicU32 = AtomicU32::new(1);
static DEFAULT_SERVER: OnceLock<Mutex<Option<Server>>> = OnceLock::new();

struct ServerState {
    id: u32,
    binding: Box<dyn EngineBinding>,
    info: ServerInfo,
    closed: AtomicBool,
}

/// Live session with an engine instance.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
}

impl Server {
    /// Negotiates a session over an already-established binding.
    ///
    /// Retrieves the engine version and licensing context once; both are
    /// cached for the lifetime of the session.
    pub fn connect(binding: Box<dyn EngineBinding>) -> Result<Server> {
        let info = binding.info()?;
        let id = SERVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(
            "connected server {} ({}): engine {} [{}]",
            id,
            binding.describe(),
            info.version,
            info.context
        );
        Ok(Server {
            state: Arc::new(ServerState {
                id,
                binding,
                info,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Process-unique session id; used to detect cross-server misuse.
    pub fn id(&self) -> u32 {
        self.state.id
    }

    pub fn version(&self) -> &EngineVersion {
        &self.state.info.version
    }

    pub fn context(&self) -> ServerContext {
        self.state.info.context
    }

    /// Gate helper: errors with `VersionNotSupported` when the connected
    /// engine predates `required`.
    pub fn require(&self, required: &str) -> Result<()> {
        self.version().require(required)
    }

    pub fn available_operators(&self) -> &[String] {
        &self.state.info.available_operators
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.state
            .info
            .available_operators
            .iter()
            .any(|op| op == name)
    }

    /// Error for an operator the engine does not register, with a
    /// nearest-name hint when one is close enough.
    pub(crate) fn unknown_operator(&self, name: &str) -> Error {
        match closest_operator(name, &self.state.info.available_operators) {
            Some(hint) => Error::UnsupportedOperation(format!(
                "operator `{}` is not registered with the engine (closest match: `{}`)",
                name, hint
            )),
            None => Error::UnsupportedOperation(format!(
                "operator `{}` is not registered with the engine",
                name
            )),
        }
    }

    /// Routes one blocking call through the binding.
    pub fn call(&self, request: Request) -> Result<Response> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(Error::Transport("server session is closed".to_string()));
        }
        if !self.state.binding.supports(request.kind()) {
            return Err(Error::UnsupportedOperation(format!(
                "engine build does not service {:?} calls",
                request.kind()
            )));
        }
        self.state.binding.call(request)
    }

    /// Release call issued by entity finalizers. Never fails: a closed
    /// session turns the release into a no-op, other failures are logged
    /// and swallowed.
    pub(crate) fn release_quietly(&self, call: AdminCall) {
        if self.state.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.state.binding.call(Request::Admin(call)) {
            warn!("release failed on server {}: {}", self.state.id, e);
        }
    }

    /// Marks the session closed. Outstanding wrappers become dangling; their
    /// finalizers degrade to no-ops.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Installs this server as the process-wide default used by constructors
    /// when no server argument is given. Core logic never consults the
    /// default implicitly.
    pub fn set_as_default(&self) {
        let slot = DEFAULT_SERVER.get_or_init(|| Mutex::new(None));
        *slot.lock().unwrap() = Some(self.clone());
    }

    pub fn default_server() -> Option<Server> {
        DEFAULT_SERVER
            .get_or_init(|| Mutex::new(None))
            .lock()
            .unwrap()
            .clone()
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.state.id == other.state.id
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.state.id)
            .field("version", &self.state.info.version)
            .field("context", &self.state.info.context)
            .finish()
    }
}
