//! Per-instance memoization of pure getters.
//!
//! Wrappers with expensive pure getters carry a [`CallCache`]: results are
//! memoized by `(method, args)` and dropped when a declared mutating method
//! runs. The getter-to-setters association is static per wrapper class; a
//! cache never observes mutations made through a different wrapper aliasing
//! the same engine object.

use std::sync::Mutex;

use fnv::FnvHashMap;

use crate::binding::call::Response;
use crate::error::Result;

/// Static association between cached getters and the setters that
/// invalidate them.
pub struct CachePolicy {
    pub pairs: &'static [(&'static str, &'static [&'static str])],
}

impl CachePolicy {
    fn getters_for<'a>(&'a self, setter: &'a str) -> impl Iterator<Item = &'static str> + 'a {
        self.pairs
            .iter()
            .filter(move |(_, setters)| setters.contains(&setter))
            .map(|(getter, _)| *getter)
    }
}

/// Memoization table attached to one wrapper instance.
pub struct CallCache {
    policy: &'static CachePolicy,
    entries: Mutex<FnvHashMap<(&'static str, String), Response>>,
}

impl CallCache {
    pub fn new(policy: &'static CachePolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Returns the memoized response for `(getter, arg_key)` or runs `call`
    /// and stores its result.
    pub fn get_or_call(
        &self,
        getter: &'static str,
        arg_key: String,
        call: impl FnOnce() -> Result<Response>,
    ) -> Result<Response> {
        let key = (getter, arg_key);
        if let Some(hit) = self.entries.lock().unwrap().get(&key) {
            trace!("cache hit: {}({})", key.0, key.1);
            return Ok(hit.clone());
        }
        let response = call()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key, response.clone());
        Ok(response)
    }

    /// Drops every memoized entry of the getters associated with `setter`.
    pub fn invalidate(&self, setter: &str) {
        let mut entries = self.entries.lock().unwrap();
        for getter in self.policy.getters_for(setter) {
            entries.retain(|(g, _), _| *g != getter);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::call::Response;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static POLICY: CachePolicy = CachePolicy {
        pairs: &[
            ("labels", &["add_label"]),
            ("len", &["add", "add_label"]),
        ],
    };

    #[test]
    fn second_lookup_is_memoized() {
        let cache = CallCache::new(&POLICY);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache
                .get_or_call("labels", String::new(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::StrVec(vec!["time".to_string()]))
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setter_invalidates_only_associated_getters() {
        let cache = CallCache::new(&POLICY);
        cache
            .get_or_call("labels", String::new(), || Ok(Response::Done))
            .unwrap();
        cache
            .get_or_call("len", String::new(), || Ok(Response::Int(2)))
            .unwrap();

        cache.invalidate("add");

        let labels_calls = AtomicUsize::new(0);
        cache
            .get_or_call("labels", String::new(), || {
                labels_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Response::Done)
            })
            .unwrap();
        assert_eq!(labels_calls.load(Ordering::SeqCst), 0, "labels survived");

        let len_calls = AtomicUsize::new(0);
        cache
            .get_or_call("len", String::new(), || {
                len_calls.fetch_add(1, Ordering::SeqCst);
                Ok(Response::Int(3))
            })
            .unwrap();
        assert_eq!(len_calls.load(Ordering::SeqCst), 1, "len dropped");
    }
}
