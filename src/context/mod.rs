//! Shared per-directory context.
//!
//! A `_context` file in any handler directory evaluates to a JSON value that
//! every handler under that directory can read. Lookup walks from the request
//! path's own directory up through its ancestors and returns the first
//! registered value, so a deeper `_context` shadows a shallower one for its
//! subtree only.
//!
//! The store publishes immutable snapshots through [`arc_swap`]: the loader
//! replaces the whole map on every change, and a concurrent reader sees
//! either the old or the new table, never a partially updated one.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;

type ContextMap = HashMap<String, Arc<Value>>;

/// Directory-keyed shared context values.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use understudy::context::ContextStore;
///
/// let store = ContextStore::new();
/// store.add("/", json!({"tenant": "acme"}));
/// store.add("/admin", json!({"tenant": "internal"}));
///
/// let ctx = store.find("/admin/users/7").unwrap();
/// assert_eq!(ctx["tenant"], json!("internal"));
/// let ctx = store.find("/widgets/7").unwrap();
/// assert_eq!(ctx["tenant"], json!("acme"));
/// ```
#[derive(Debug, Default)]
pub struct ContextStore {
    entries: ArcSwap<ContextMap>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the context value for a directory.
    ///
    /// Returns `true` when an existing value was replaced.
    pub fn add(&self, directory: &str, value: Value) -> bool {
        let key = normalize(directory);
        let mut entries: ContextMap = self.entries.load().as_ref().clone();
        let replaced = entries.insert(key, Arc::new(value)).is_some();
        self.entries.store(Arc::new(entries));
        replaced
    }

    /// Drops the context value for a directory.
    ///
    /// Returns `true` if a value was removed.
    pub fn remove(&self, directory: &str) -> bool {
        let key = normalize(directory);
        let mut entries: ContextMap = self.entries.load().as_ref().clone();
        let removed = entries.remove(&key).is_some();
        if removed {
            self.entries.store(Arc::new(entries));
        }
        removed
    }

    /// Resolves the context visible to a request path: the value registered
    /// at the nearest ancestor directory (starting with the path's own
    /// directory, ending at `/`), or `None` when the whole chain is bare.
    pub fn find(&self, path: &str) -> Option<Arc<Value>> {
        let entries = self.entries.load();
        let lowered = path.to_ascii_lowercase();
        let mut segments: Vec<&str> = lowered.split('/').filter(|s| !s.is_empty()).collect();
        // The final segment is the leaf, not a directory.
        segments.pop();

        loop {
            let key = if segments.is_empty() {
                "/".to_owned()
            } else {
                format!("/{}", segments.join("/"))
            };
            if let Some(value) = entries.get(&key) {
                return Some(Arc::clone(value));
            }
            if segments.is_empty() {
                return None;
            }
            segments.pop();
        }
    }

    /// The number of registered directory contexts.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// `true` if no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

/// Lower-cases and canonicalizes a directory key: `Admin/` → `/admin`.
fn normalize(directory: &str) -> String {
    let lowered = directory.to_ascii_lowercase();
    let trimmed = lowered.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nearest_ancestor_wins() {
        let store = ContextStore::new();
        store.add("/a", json!("outer"));
        store.add("/a/b", json!("inner"));

        assert_eq!(*store.find("/a/b/c").unwrap(), json!("inner"));
        assert_eq!(*store.find("/a/x").unwrap(), json!("outer"));
        assert!(store.find("/elsewhere/x").is_none());
    }

    #[test]
    fn own_directory_is_checked_first() {
        let store = ContextStore::new();
        store.add("/a", json!("outer"));

        // `/a/b` is a leaf inside directory `/a`.
        assert_eq!(*store.find("/a/b").unwrap(), json!("outer"));
        // `/a` itself is a leaf inside the root directory.
        assert!(store.find("/a").is_none());
    }

    #[test]
    fn root_context_catches_everything() {
        let store = ContextStore::new();
        store.add("/", json!({"shared": true}));

        assert!(store.find("/deeply/nested/path").is_some());
        assert!(store.find("/x").is_some());
    }

    #[test]
    fn keys_are_case_insensitive() {
        let store = ContextStore::new();
        store.add("/Admin", json!("ops"));
        assert_eq!(*store.find("/admin/users").unwrap(), json!("ops"));
        assert_eq!(*store.find("/ADMIN/USERS").unwrap(), json!("ops"));
    }

    #[test]
    fn replace_and_remove() {
        let store = ContextStore::new();
        assert!(!store.add("/a", json!(1)));
        assert!(store.add("/a", json!(2)));
        assert_eq!(*store.find("/a/leaf").unwrap(), json!(2));

        assert!(store.remove("/a"));
        assert!(store.find("/a/leaf").is_none());
        assert!(!store.remove("/a"));
        assert!(store.is_empty());
    }
}
