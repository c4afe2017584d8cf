//! The tenant matcher value: `{kind, name, value}`.
//!
//! Shared between the query/selector enforcer and the Alertmanager filter
//! enforcer so both subsystems agree on operator semantics and
//! stringification.

use std::fmt;

/// One of the four matcher operators PromQL and Alertmanager both use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// `label="value"`
    Eq,
    /// `label!="value"`
    Neq,
    /// `label=~"value"`
    Re,
    /// `label!~"value"`
    Nre,
}

impl MatcherKind {
    /// The operator token as it appears in PromQL/Alertmanager matcher syntax.
    pub fn as_str(self) -> &'static str {
        match self {
            MatcherKind::Eq => "=",
            MatcherKind::Neq => "!=",
            MatcherKind::Re => "=~",
            MatcherKind::Nre => "!~",
        }
    }

    /// Classify a raw parameter value's prefix into an operator, longest-first
    /// so `!~` is not mistaken for a bare `!`.
    pub fn classify_prefix(raw: &str) -> (MatcherKind, &str) {
        if let Some(rest) = raw.strip_prefix("!~") {
            (MatcherKind::Nre, rest)
        } else if let Some(rest) = raw.strip_prefix('~') {
            (MatcherKind::Re, rest)
        } else if let Some(rest) = raw.strip_prefix('!') {
            (MatcherKind::Neq, rest)
        } else {
            (MatcherKind::Eq, raw)
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tenant matcher derived from the tenant label and the caller's
/// tenant value. `name` is never empty once a matcher is in flight through
/// a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantMatcher {
    pub kind: MatcherKind,
    pub name: String,
    pub value: String,
}

impl TenantMatcher {
    pub fn new(kind: MatcherKind, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Render as a PromQL matcher fragment, e.g. `tenant_id="a"`.
    pub fn to_promql(&self) -> String {
        format!(
            "{}{}{:?}",
            self.name,
            self.kind.as_str(),
            self.value
        )
    }

    /// Render as an Alertmanager filter entry, e.g. `tenant_id=~"a.*"`.
    /// Alertmanager's filter grammar uses the same operator tokens as
    /// PromQL, so this is identical to `to_promql`.
    pub fn to_filter(&self) -> String {
        self.to_promql()
    }

    /// Does a candidate label value satisfy this matcher's predicate?
    /// Used by the response filter against decoded JSON labels.
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        let candidate = candidate.unwrap_or("");
        match self.kind {
            MatcherKind::Eq => candidate == self.value,
            MatcherKind::Neq => candidate != self.value,
            MatcherKind::Re => regex_full_match(&self.value, candidate),
            MatcherKind::Nre => !regex_full_match(&self.value, candidate),
        }
    }
}

/// PromQL regex matchers are implicitly anchored (`^(?:value)$`).
fn regex_full_match(pattern: &str, candidate: &str) -> bool {
    let anchored = format!("^(?:{})$", pattern);
    match regex::Regex::new(&anchored) {
        Ok(re) => re.is_match(candidate),
        Err(_) => false,
    }
}
