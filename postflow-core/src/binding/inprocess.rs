//! In-process engine binding.
//!
//! Loads the engine as a shared library and routes calls through a flat C
//! function table, one dispatch entry per call category. Requests and
//! responses cross the ABI as length-prefixed byte buffers (the sized-string
//! convention of engines >= 8.0); the engine allocates response buffers and
//! the table's `free_buffer` returns them.

use std::path::Path;

use libloading::{Library, Symbol};

use crate::binding::call::{CallKind, Request, Response, ServerInfo};
use crate::binding::EngineBinding;
use crate::error::{EngineFault, Error, Result};
use crate::server::Server;

/// ABI revision of [`EngineApi`]. Revision 1 predates sized strings and is
/// not loadable in-process.
pub const ABI_REVISION: u32 = 2;

/// Exported symbol returning the engine's function table.
pub const API_ENTRY_POINT: &[u8] = b"pf_engine_api";

pub type ApiFn = unsafe extern "C" fn() -> *const EngineApi;

/// One category dispatch: consumes a request buffer, produces a response
/// buffer through out-parameters and returns a status code. Zero means the
/// response buffer decodes as a `Response`; nonzero means it decodes as an
/// `EngineFault`.
pub type DispatchFn =
    unsafe extern "C" fn(req: *const u8, req_len: usize, resp: *mut *mut u8, resp_len: *mut usize) -> i32;

pub type FreeFn = unsafe extern "C" fn(ptr: *mut u8, len: usize);

/// Flat function table exported by an engine shared library.
///
/// A null category entry means the engine build does not ship that call
/// family; the binding reports it through `supports`.
#[repr(C)]
pub struct EngineApi {
    pub abi_revision: u32,
    pub free_buffer: Option<FreeFn>,
    pub admin: Option<DispatchFn>,
    pub operator: Option<DispatchFn>,
    pub workflow: Option<DispatchFn>,
    pub scoping: Option<DispatchFn>,
    pub field: Option<DispatchFn>,
    pub collection: Option<DispatchFn>,
    pub mesh: Option<DispatchFn>,
    pub data_sources: Option<DispatchFn>,
    pub data_tree: Option<DispatchFn>,
    pub generic: Option<DispatchFn>,
    pub support: Option<DispatchFn>,
    pub any: Option<DispatchFn>,
}

impl EngineApi {
    fn entry(&self, kind: CallKind) -> Option<DispatchFn> {
        match kind {
            CallKind::Admin => self.admin,
            CallKind::Operator => self.operator,
            CallKind::Workflow => self.workflow,
            CallKind::Scoping => self.scoping,
            CallKind::Field => self.field,
            CallKind::Collection => self.collection,
            CallKind::Mesh => self.mesh,
            CallKind::DataSources => self.data_sources,
            CallKind::DataTree => self.data_tree,
            CallKind::Generic => self.generic,
            CallKind::Support => self.support,
            CallKind::Any => self.any,
        }
    }
}

/// Binding over a loaded engine library.
pub struct InProcessBinding {
    api: *const EngineApi,
    path: String,
    // dropped last, keeps `api` valid
    _library: Library,
}

// the engine serializes access per session behind each dispatch entry
unsafe impl Send for InProcessBinding {}
unsafe impl Sync for InProcessBinding {}

impl InProcessBinding {
    /// Loads the engine library at `path` and resolves its function table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let library = unsafe { Library::new(path) }.map_err(|e| {
            Error::Transport(format!("cannot load engine `{}`: {}", path.display(), e))
        })?;
        let api = {
            let entry: Symbol<ApiFn> = unsafe { library.get(API_ENTRY_POINT) }.map_err(|e| {
                Error::Transport(format!(
                    "`{}` is not an engine library (missing function table): {}",
                    path.display(),
                    e
                ))
            })?;
            unsafe { entry() }
        };
        if api.is_null() {
            return Err(Error::Transport(format!(
                "engine `{}` returned a null function table",
                path.display()
            )));
        }
        let revision = unsafe { (*api).abi_revision };
        if revision < ABI_REVISION {
            return Err(Error::VersionNotSupported {
                required: format!("function table revision {}", ABI_REVISION),
                actual: format!("revision {}", revision),
            });
        }
        debug!("loaded engine `{}` (table revision {})", path.display(), revision);
        Ok(Self {
            api,
            path: path.display().to_string(),
            _library: library,
        })
    }

    fn api(&self) -> &EngineApi {
        unsafe { &*self.api }
    }

    fn dispatch(&self, entry: DispatchFn, request: &Request) -> Result<Response> {
        let encoded = bincode::serialize(request)?;
        let mut resp_ptr: *mut u8 = std::ptr::null_mut();
        let mut resp_len: usize = 0;
        let status = unsafe { entry(encoded.as_ptr(), encoded.len(), &mut resp_ptr, &mut resp_len) };
        if resp_ptr.is_null() {
            return Err(Error::Transport(format!(
                "engine `{}` returned no response buffer (status {})",
                self.path, status
            )));
        }
        let bytes = unsafe { std::slice::from_raw_parts(resp_ptr, resp_len) }.to_vec();
        if let Some(free) = self.api().free_buffer {
            unsafe { free(resp_ptr, resp_len) };
        }
        if status == 0 {
            Ok(bincode::deserialize(&bytes)?)
        } else {
            let fault: EngineFault = bincode::deserialize(&bytes)?;
            Err(fault.into())
        }
    }
}

impl EngineBinding for InProcessBinding {
    fn call(&self, request: Request) -> Result<Response> {
        let entry = self.api().entry(request.kind()).ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "engine build does not service {:?} calls",
                request.kind()
            ))
        })?;
        self.dispatch(entry, &request)
    }

    fn info(&self) -> Result<ServerInfo> {
        match self.call(Request::Admin(crate::binding::call::AdminCall::ServerInfo))? {
            Response::ServerInfo(info) => Ok(info),
            other => Err(Error::Transport(format!(
                "engine returned an unexpected response to `server_info`: {:?}",
                other
            ))),
        }
    }

    fn supports(&self, kind: CallKind) -> bool {
        self.api().entry(kind).is_some()
    }

    fn describe(&self) -> String {
        format!("in-process `{}`", self.path)
    }
}

/// Loads an engine library and negotiates a session over it.
pub fn load(path: impl AsRef<Path>) -> Result<Server> {
    if !crate::license::license_accepted() {
        warn!(
            "license agreement not accepted ({} is unset); the engine will refuse operator creation",
            crate::LICENSE_ENV_VAR
        );
    }
    Server::connect(Box::new(InProcessBinding::open(path)?))
}
