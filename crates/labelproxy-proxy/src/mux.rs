//! A strict path multiplexer.
//!
//! Refuses to register a pattern that overlaps any previously registered
//! pattern, so a misconfiguration that would otherwise create an
//! unenforced sub-path is a startup error instead of a runtime bypass.

use labelproxy_core::{Error, Result};

/// A registry of exact path patterns to handlers of type `H`.
///
/// Patterns are normalized by stripping a trailing `/`; both `p` and `p/`
/// dispatch to the same handler, and any path nested under a registered
/// pattern dispatches to it too, since the overlap check guarantees no
/// deeper route could ever have been registered underneath it.
#[derive(Clone)]
pub struct StrictMux<H> {
    routes: Vec<(String, H)>,
}

impl<H: Clone> Default for StrictMux<H> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<H: Clone> StrictMux<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `pattern`. Fails if `pattern` is empty, `/`,
    /// or overlaps any pattern already registered.
    pub fn register(&mut self, pattern: &str, handler: H) -> Result<()> {
        let normalized = normalize(pattern);
        if normalized.is_empty() || normalized == "/" {
            return Err(Error::config(format!(
                "pattern {pattern:?} matches all paths, which is not allowed"
            )));
        }
        for (existing, _) in &self.routes {
            if overlaps(existing, &normalized) {
                return Err(Error::config(format!(
                    "pattern {pattern:?} overlaps with already-registered pattern {existing:?}"
                )));
            }
        }
        self.routes.push((normalized, handler));
        Ok(())
    }

    /// Find the handler bound to `path`, if any.
    pub fn serve(&self, path: &str) -> Option<&H> {
        let path = normalize(path);
        self.routes
            .iter()
            .find(|(pattern, _)| path == *pattern || path.starts_with(&format!("{pattern}/")))
            .map(|(_, h)| h)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(p, _)| p.as_str())
    }
}

fn normalize(pattern: &str) -> String {
    if pattern.len() > 1 && pattern.ends_with('/') {
        pattern.trim_end_matches('/').to_string()
    } else {
        pattern.to_string()
    }
}

fn overlaps(existing: &str, new: &str) -> bool {
    let existing_slash = format!("{existing}/");
    let new_slash = format!("{new}/");
    existing == new || new_slash.starts_with(&existing_slash) || existing_slash.starts_with(&new_slash)
}
