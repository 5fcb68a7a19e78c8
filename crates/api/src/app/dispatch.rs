//! First-match dispatch over the route table.
//!
//! axum's router prefers static segments over parameters and never falls
//! back to another pattern once a path node is chosen. Requests reaching any
//! mounted path are therefore resolved here, against the whole table in
//! registration order.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use axum::http::Method;
use axum::routing::MethodFilter;
use tracing::warn;

use crate::route::{Handler, Route};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    /// `:name`, one non-empty segment
    Param(String),
    /// `*name`, the non-empty remainder of the path
    Rest(String),
}

/// A route path such as `/tasks/:task/jobs/:job_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = s.strip_prefix('*') {
                    Segment::Rest(name.to_string())
                } else {
                    Segment::Static(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Match a request path, returning the decoded path parameters.
    pub fn capture(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = path.split('/');

        for segment in &self.segments {
            match segment {
                Segment::Static(expected) => {
                    if parts.next()? != expected {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let part = parts.next().filter(|p| !p.is_empty())?;
                    params.insert(name.clone(), decode(part)?);
                }
                Segment::Rest(name) => {
                    let rest = parts.by_ref().collect::<Vec<_>>().join("/");
                    if rest.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode(&rest)?);
                }
            }
        }

        parts.next().is_none().then_some(params)
    }
}

fn decode(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(Cow::into_owned)
}

struct Entry {
    method: Method,
    path: String,
    pattern: PathPattern,
    handler: Handler,
}

/// Outcome of resolving one request.
pub enum Resolved<'a> {
    Found {
        handler: &'a Handler,
        params: HashMap<String, String>,
    },
    /// Some route matches the path, none for this method.
    MethodNotAllowed,
    NotFound,
}

/// The mountable part of a route table.
pub struct Dispatcher {
    entries: Vec<Entry>,
}

impl Dispatcher {
    /// Keep the first of each exact `(method, path)` pair; later duplicates
    /// are skipped with a warning.
    pub fn new(table: &[Route]) -> Self {
        let mut seen: HashSet<(Method, &str)> = HashSet::new();
        let mut entries = Vec::with_capacity(table.len());

        for route in table {
            if MethodFilter::try_from(route.method.clone()).is_err() {
                warn!(method = %route.method, path = %route.path, "unsupported method; route skipped");
                continue;
            }
            if !seen.insert((route.method.clone(), route.path.as_str())) {
                warn!(
                    method = %route.method,
                    path = %route.path,
                    "duplicate route skipped; first registration wins"
                );
                continue;
            }
            entries.push(Entry {
                method: route.method.clone(),
                path: route.path.clone(),
                pattern: PathPattern::parse(&route.path),
                handler: route.handler.clone(),
            });
        }

        Self { entries }
    }

    /// Distinct paths in first-registration order.
    pub fn paths(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|e| e.path.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Every method some route answers to, `None` for an empty table.
    pub fn methods(&self) -> Option<MethodFilter> {
        self.entries
            .iter()
            .filter_map(|e| MethodFilter::try_from(e.method.clone()).ok())
            .reduce(MethodFilter::or)
    }

    /// The first route, in table order, whose method and pattern match.
    /// `HEAD` falls back to `GET` routes.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolved<'_> {
        let mut path_matched = false;

        for entry in &self.entries {
            let Some(params) = entry.pattern.capture(path) else {
                continue;
            };
            if entry.method == *method || (*method == Method::HEAD && entry.method == Method::GET) {
                return Resolved::Found {
                    handler: &entry.handler,
                    params,
                };
            }
            path_matched = true;
        }

        if path_matched {
            Resolved::MethodNotAllowed
        } else {
            Resolved::NotFound
        }
    }
}
