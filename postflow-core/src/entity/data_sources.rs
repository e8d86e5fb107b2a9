//! Data sources: the set of result files an evaluation reads from.

use std::path::Path;
use std::sync::Arc;

use crate::binding::call::{DataSourcesCall, Request, Response};
use crate::entity::{Entity, EntityKind};
use crate::error::{Error, Result};
use crate::handle::{unexpected_response, EntityHandle};
use crate::server::Server;

/// Result key inferred from a file extension, lowercased. `file.rst` reads
/// with the `rst` key; extensionless paths need an explicit key.
fn key_from_path(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Paths travel in canonical form when the file exists client-side, so the
/// engine never sees `..` segments or UNC prefixes; unknown paths pass
/// through untouched (they may only exist on the engine host).
fn normalize(path: &Path) -> String {
    match dunce::canonicalize(path) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[derive(Clone)]
pub struct DataSources {
    handle: Arc<EntityHandle>,
}

impl Entity for DataSources {
    const KIND: EntityKind = EntityKind::DataSources;

    fn from_handle(handle: Arc<EntityHandle>) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &Arc<EntityHandle> {
        &self.handle
    }
}

impl DataSources {
    pub fn new(server: &Server) -> Result<Self> {
        match server.call(Request::DataSources(DataSourcesCall::New))? {
            Response::Handle(h) => Ok(Self::from_handle(EntityHandle::new(
                h,
                EntityKind::DataSources,
                server.clone(),
            ))),
            other => Err(unexpected_response("data_sources_new", &other)),
        }
    }

    fn call(&self, call: DataSourcesCall) -> Result<Response> {
        self.handle.server().call(Request::DataSources(call))
    }

    /// Declares the main result file; the result key comes from the file
    /// extension.
    pub fn set_result_file_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let key = key_from_path(path).ok_or_else(|| {
            Error::validation(format!(
                "cannot infer a result key from `{}`; use set_result_file_path_with_key",
                path.display()
            ))
        })?;
        self.set_result_file_path_with_key(path, &key)
    }

    pub fn set_result_file_path_with_key(
        &self,
        path: impl AsRef<Path>,
        result_key: &str,
    ) -> Result<()> {
        match self.call(DataSourcesCall::SetResultFilePath {
            sources: self.handle.live_id()?,
            path: normalize(path.as_ref()),
            result_key: result_key.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_sources_set_result_file", &other)),
        }
    }

    /// Declares an auxiliary file; the key comes from the extension.
    pub fn add_file_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let key = key_from_path(path).ok_or_else(|| {
            Error::validation(format!(
                "cannot infer a result key from `{}`; use add_file_path_with_key",
                path.display()
            ))
        })?;
        self.add_file_path_for_domain(path, &key, "", None)
    }

    pub fn add_file_path_with_key(&self, path: impl AsRef<Path>, result_key: &str) -> Result<()> {
        self.add_file_path_for_domain(path, result_key, "", None)
    }

    /// Full form: explicit key, plugin namespace and, for distributed
    /// results, the domain the file belongs to.
    pub fn add_file_path_for_domain(
        &self,
        path: impl AsRef<Path>,
        result_key: &str,
        namespace: &str,
        domain_id: Option<i32>,
    ) -> Result<()> {
        match self.call(DataSourcesCall::AddFilePath {
            sources: self.handle.live_id()?,
            path: normalize(path.as_ref()),
            result_key: result_key.to_string(),
            namespace: namespace.to_string(),
            domain_id,
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_sources_add_file", &other)),
        }
    }

    /// Chains another data sources whose files are read before this one's,
    /// e.g. an upstream generated by a conversion operator.
    pub fn add_upstream(&self, upstream: &DataSources, result_key: &str) -> Result<()> {
        match self.call(DataSourcesCall::AddUpstream {
            sources: self.handle.live_id()?,
            upstream: upstream.handle.live_id()?,
            result_key: result_key.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_sources_add_upstream", &other)),
        }
    }

    /// Routes a result key to a reader plugin namespace.
    pub fn register_namespace(&self, result_key: &str, namespace: &str) -> Result<()> {
        match self.call(DataSourcesCall::RegisterNamespace {
            sources: self.handle.live_id()?,
            result_key: result_key.to_string(),
            namespace: namespace.to_string(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected_response("data_sources_register_namespace", &other)),
        }
    }

    /// Key of the main result file.
    pub fn result_key(&self) -> Result<String> {
        match self.call(DataSourcesCall::ResultKey {
            sources: self.handle.live_id()?,
        })? {
            Response::Str(key) => Ok(key),
            other => Err(unexpected_response("data_sources_result_key", &other)),
        }
    }

    pub fn path_count(&self) -> Result<usize> {
        match self.call(DataSourcesCall::PathCount {
            sources: self.handle.live_id()?,
        })? {
            Response::Int(n) => Ok(n as usize),
            other => Err(unexpected_response("data_sources_path_count", &other)),
        }
    }

    pub fn path_at(&self, index: usize) -> Result<String> {
        match self.call(DataSourcesCall::PathAt {
            sources: self.handle.live_id()?,
            index,
        })? {
            Response::Str(path) => Ok(path),
            other => Err(unexpected_response("data_sources_path_at", &other)),
        }
    }

    pub fn paths_by_key(&self, result_key: &str) -> Result<Vec<String>> {
        match self.call(DataSourcesCall::PathsByKey {
            sources: self.handle.live_id()?,
            result_key: result_key.to_string(),
        })? {
            Response::StrVec(paths) => Ok(paths),
            other => Err(unexpected_response("data_sources_paths_by_key", &other)),
        }
    }
}

impl PartialEq for DataSources {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_object(&other.handle)
    }
}

impl std::fmt::Debug for DataSources {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "DataSources({:?})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_inference_lowercases_extensions() {
        assert_eq!(key_from_path(Path::new("model.RST")), Some("rst".to_string()));
        assert_eq!(key_from_path(Path::new("a/b/c.d3plot")), Some("d3plot".to_string()));
        assert_eq!(key_from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn unknown_paths_pass_through_normalization() {
        let raw = Path::new("/definitely/not/a/real/file.rst");
        assert_eq!(normalize(raw), raw.to_string_lossy());
    }
}
