//! Engine bindings.
//!
//! A *binding* realizes the abstract call namespace against a concrete
//! engine: the in-process function table of a loaded shared library, the
//! network channel of `postflow-net`, or the in-memory fixture engine of the
//! test kit. All calls are blocking from the caller's viewpoint.

use crate::binding::call::{CallKind, Request, Response, ServerInfo};
use crate::error::Result;

pub mod call;

#[cfg(feature = "dynlib")]
pub mod inprocess;

/// The single seam between the client model and a concrete engine.
///
/// Implementations must observe identical semantics for error signaling,
/// handle lifetime and value representation; the typed wrappers above this
/// trait cannot tell bindings apart.
pub trait EngineBinding: Send + Sync {
    /// Routes one blocking call to the engine.
    fn call(&self, request: Request) -> Result<Response>;

    /// Engine identity; retrieved once on connect and cached by the server.
    fn info(&self) -> Result<ServerInfo>;

    /// Per-category availability. A category an engine build does not ship
    /// fails up front with `UnsupportedOperation` instead of a transport
    /// error deep inside a call.
    fn supports(&self, kind: CallKind) -> bool {
        let _ = kind;
        true
    }

    /// Human-readable description of the binding for logs.
    fn describe(&self) -> String;
}

/// Nearest registered operator name, for did-you-mean hints on unknown
/// operators.
pub(crate) fn closest_operator<'a>(name: &str, available: &'a [String]) -> Option<&'a str> {
    available
        .iter()
        .map(|cand| (strsim::levenshtein(name, cand), cand))
        .filter(|(dist, _)| *dist <= 3)
        .min_by_key(|(dist, _)| *dist)
        .map(|(_, cand)| cand.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_operator_suggests_near_misses_only() {
        let ops = vec![
            "min_max_fc".to_string(),
            "norm_fc".to_string(),
            "scale".to_string(),
        ];
        assert_eq!(closest_operator("min_max_fd", &ops), Some("min_max_fc"));
        assert_eq!(closest_operator("completely_different", &ops), None);
    }
}
