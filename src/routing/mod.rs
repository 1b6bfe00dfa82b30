//! The routing trie.
//!
//! Routes come from the handler filesystem, so they share its shape: a path
//! of directory segments ending in a leaf, where any segment may be a
//! `{name}` wildcard. The trie mirrors that structure level by level —
//! literal children in hash maps keyed by the lower-cased segment, plus at
//! most one wildcard child per level — which keeps every operation at
//! O(path depth) no matter how many routes are registered.
//!
//! Matching rules:
//!
//! | Rule | Effect |
//! |------|--------|
//! | Case folding | `/Widgets/List` resolves like `/widgets/list` |
//! | Literal precedence | `/items/special` beats `/items/{id}` for `special` |
//! | One wildcard per level | a second `{other}` sibling is rejected at registration |
//! | No backtracking | a literal directory that dead-ends is not retried via its wildcard sibling |
//!
//! A miss is not an error: [`resolve`](RouteTrie::resolve) returns the tagged
//! [`RouteMatch`], and the dispatcher turns `NotFound` into an HTTP 404.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::module::HandlerModule;

/// Errors raised while registering a route.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A second wildcard with a different variable name at the same level;
    /// the first registration keeps the name.
    #[error("wildcard `{{{incoming}}}` conflicts with existing `{{{existing}}}` at `{route}`")]
    WildcardConflict {
        route: String,
        existing: String,
        incoming: String,
    },
    #[error("cannot register an empty route")]
    EmptyRoute,
}

/// The outcome of resolving a request path.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found(RouteTarget),
    NotFound,
}

impl RouteMatch {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// A successful match: the module, the template it was registered under, and
/// the wildcard captures in path order.
///
/// Captured values keep the case the request used; variable names keep the
/// case the route declared.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub module: Arc<HandlerModule>,
    pub route: String,
    pub variables: Vec<(String, String)>,
}

/// A path segment as written in a route template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

fn parse_segments(url: &str) -> Vec<Segment> {
    if url.is_empty() {
        return Vec::new();
    }
    // The root path `/` keeps its single empty segment, so it is an ordinary
    // literal leaf at the trie root.
    let trimmed = url.strip_prefix('/').unwrap_or(url);
    trimmed
        .split('/')
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Some(variable) => Segment::Wildcard(variable.to_owned()),
                None => Segment::Literal(segment.to_owned()),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Leaf {
    module: Arc<HandlerModule>,
    route: String,
}

#[derive(Debug, Clone)]
struct WildcardDir {
    variable: String,
    node: DirNode,
}

#[derive(Debug, Clone)]
struct WildcardLeaf {
    variable: String,
    leaf: Leaf,
}

/// One level of the trie: literal children, plus at most one wildcard
/// directory and one wildcard leaf.
#[derive(Debug, Clone, Default)]
struct DirNode {
    directories: HashMap<String, DirNode>,
    wildcard_directory: Option<Box<WildcardDir>>,
    leaves: HashMap<String, Leaf>,
    wildcard_leaf: Option<WildcardLeaf>,
}

/// The complete route table.
///
/// The trie itself is a plain value; concurrent publication is the
/// [`Registry`](crate::registry::Registry)'s job, which clones the current
/// trie, mutates the clone, and swaps it in atomically.
///
/// # Examples
///
/// ```
/// use understudy::module::{HandlerModule, ReturnValue};
/// use understudy::routing::{RouteMatch, RouteTrie};
///
/// let module = HandlerModule::builder()
///     .get(|_interaction| async { Ok(ReturnValue::text("found")) })
///     .build();
///
/// let mut routes = RouteTrie::new();
/// routes.add("/widgets/{id}", module).unwrap();
///
/// let RouteMatch::Found(target) = routes.resolve("/Widgets/17") else {
///     panic!("expected a match");
/// };
/// assert_eq!(target.route, "/widgets/{id}");
/// assert_eq!(target.variables, vec![("id".to_string(), "17".to_string())]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RouteTrie {
    root: DirNode,
}

impl RouteTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under a route template.
    ///
    /// Returns `true` when an existing leaf for the same template was
    /// replaced (the reload path). Intermediate directories are created as
    /// needed.
    pub fn add(&mut self, url: &str, module: Arc<HandlerModule>) -> Result<bool, RouteError> {
        let segments = parse_segments(url);
        let Some((last, directories)) = segments.split_last() else {
            return Err(RouteError::EmptyRoute);
        };

        let mut node = &mut self.root;
        for segment in directories {
            node = match segment {
                Segment::Literal(name) => node
                    .directories
                    .entry(name.to_ascii_lowercase())
                    .or_default(),
                Segment::Wildcard(variable) => {
                    let wildcard = node.wildcard_directory.get_or_insert_with(|| {
                        Box::new(WildcardDir {
                            variable: variable.clone(),
                            node: DirNode::default(),
                        })
                    });
                    if wildcard.variable != *variable {
                        return Err(RouteError::WildcardConflict {
                            route: url.to_owned(),
                            existing: wildcard.variable.clone(),
                            incoming: variable.clone(),
                        });
                    }
                    &mut wildcard.node
                }
            };
        }

        let leaf = Leaf {
            module,
            route: url.to_owned(),
        };
        match last {
            Segment::Literal(name) => {
                let replaced = node.leaves.insert(name.to_ascii_lowercase(), leaf);
                Ok(replaced.is_some())
            }
            Segment::Wildcard(variable) => {
                if let Some(existing) = &node.wildcard_leaf {
                    if existing.variable != *variable {
                        return Err(RouteError::WildcardConflict {
                            route: url.to_owned(),
                            existing: existing.variable.clone(),
                            incoming: variable.clone(),
                        });
                    }
                }
                let replaced = node.wildcard_leaf.is_some();
                node.wildcard_leaf = Some(WildcardLeaf {
                    variable: variable.clone(),
                    leaf,
                });
                Ok(replaced)
            }
        }
    }

    /// Deletes the leaf registered under a route template.
    ///
    /// Returns `true` if a leaf was removed. Emptied intermediate
    /// directories are left in place; they cost a few hash entries and keep
    /// removal O(depth).
    pub fn remove(&mut self, url: &str) -> bool {
        let segments = parse_segments(url);
        let Some((last, directories)) = segments.split_last() else {
            return false;
        };

        let mut node = &mut self.root;
        for segment in directories {
            let next = match segment {
                Segment::Literal(name) => node.directories.get_mut(&name.to_ascii_lowercase()),
                Segment::Wildcard(_) => node.wildcard_directory.as_deref_mut().map(|w| &mut w.node),
            };
            match next {
                Some(next) => node = next,
                None => return false,
            }
        }

        match last {
            Segment::Literal(name) => node.leaves.remove(&name.to_ascii_lowercase()).is_some(),
            Segment::Wildcard(_) => node.wildcard_leaf.take().is_some(),
        }
    }

    /// Resolves a request path to its handler module.
    ///
    /// At every level an exact (case-folded) literal wins over the wildcard;
    /// wildcard steps record `variable → segment` with the segment exactly as
    /// the request spelled it. There is no backtracking: once a literal
    /// directory is entered, a dead end inside it is a miss even if the
    /// wildcard sibling could have matched.
    pub fn resolve(&self, path: &str) -> RouteMatch {
        if path.is_empty() {
            return RouteMatch::NotFound;
        }
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').collect();
        let Some((last, directories)) = segments.split_last() else {
            return RouteMatch::NotFound;
        };

        let mut node = &self.root;
        let mut variables: Vec<(String, String)> = Vec::new();
        for segment in directories {
            if let Some(next) = node.directories.get(&segment.to_ascii_lowercase()) {
                node = next;
            } else if let Some(wildcard) = &node.wildcard_directory {
                variables.push((wildcard.variable.clone(), (*segment).to_owned()));
                node = &wildcard.node;
            } else {
                return RouteMatch::NotFound;
            }
        }

        if let Some(leaf) = node.leaves.get(&last.to_ascii_lowercase()) {
            return RouteMatch::Found(RouteTarget {
                module: Arc::clone(&leaf.module),
                route: leaf.route.clone(),
                variables,
            });
        }
        if let Some(wildcard) = &node.wildcard_leaf {
            variables.push((wildcard.variable.clone(), (*last).to_owned()));
            return RouteMatch::Found(RouteTarget {
                module: Arc::clone(&wildcard.leaf.module),
                route: wildcard.leaf.route.clone(),
                variables,
            });
        }
        RouteMatch::NotFound
    }

    /// `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        let root = &self.root;
        root.directories.is_empty()
            && root.wildcard_directory.is_none()
            && root.leaves.is_empty()
            && root.wildcard_leaf.is_none()
    }
}
