//! The Alertmanager filter/silence enforcer: appends the tenant matcher to
//! `filter` query parameters, and enforces tenancy inside silence JSON
//! bodies.

use labelproxy_core::{Error, MatcherKind, Result, TenantMatcher};
use serde_json::Value;

use crate::ast::parse_single_matcher;

/// Append the tenant matcher to a `filter` multi-valued query parameter
/// (used by `GET /alerts`, `GET /alerts/groups`, `GET /silences`).
pub fn enforce_filter_list(filters: &[String], matcher: &TenantMatcher) -> Vec<String> {
    let mut out: Vec<String> = filters.to_vec();
    out.push(matcher.to_filter());
    out
}

/// Parse each `filter` entry, validating it is well-formed Alertmanager
/// matcher syntax. Malformed entries are passed through unchanged upstream
/// already rejects them; parsing here is only used where a proxy-side
/// decision depends on an existing filter's content.
pub fn parse_filters(filters: &[String]) -> Result<Vec<TenantMatcher>> {
    filters.iter().map(|f| parse_single_matcher(f)).collect()
}

fn kind_to_flags(kind: MatcherKind) -> (bool, bool) {
    match kind {
        MatcherKind::Eq => (false, true),
        MatcherKind::Neq => (false, false),
        MatcherKind::Re => (true, true),
        MatcherKind::Nre => (true, false),
    }
}

fn flags_to_kind(is_regex: bool, is_equal: bool) -> MatcherKind {
    match (is_regex, is_equal) {
        (false, true) => MatcherKind::Eq,
        (false, false) => MatcherKind::Neq,
        (true, true) => MatcherKind::Re,
        (true, false) => MatcherKind::Nre,
    }
}

fn json_to_matcher(entry: &Value) -> Option<TenantMatcher> {
    let name = entry.get("name")?.as_str()?.to_string();
    let value = entry.get("value")?.as_str()?.to_string();
    let is_regex = entry.get("isRegex").and_then(Value::as_bool).unwrap_or(false);
    let is_equal = entry.get("isEqual").and_then(Value::as_bool).unwrap_or(true);
    Some(TenantMatcher::new(flags_to_kind(is_regex, is_equal), name, value))
}

fn matcher_to_json(m: &TenantMatcher) -> Value {
    let (is_regex, is_equal) = kind_to_flags(m.kind);
    serde_json::json!({
        "name": m.name,
        "value": m.value,
        "isRegex": is_regex,
        "isEqual": is_equal,
    })
}

/// Enforce tenancy inside a `POST /api/v2/silences` body.
///
/// Rejects (`IllegalMatcher`, surfaced as `400`) any silence whose matcher
/// list already names the tenant label with a different value; otherwise
/// adds or replaces the tenant matcher in the silence's matcher list.
pub fn enforce_silence_body(body: &[u8], tenant: &TenantMatcher) -> Result<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(body).map_err(|e| Error::parse(e.to_string()))?;

    let matchers = value
        .get_mut("matchers")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::parse("silence body has no matchers array".to_string()))?;

    let mut replaced = false;
    for entry in matchers.iter_mut() {
        let Some(existing) = json_to_matcher(entry) else {
            continue;
        };
        if existing.name != tenant.name {
            continue;
        }
        if existing == *tenant {
            replaced = true;
            continue;
        }
        return Err(Error::IllegalMatcher(tenant.name.clone()));
    }

    if !replaced {
        if let Some(pos) = matchers
            .iter()
            .position(|e| e.get("name").and_then(Value::as_str) == Some(tenant.name.as_str()))
        {
            matchers[pos] = matcher_to_json(tenant);
        } else {
            matchers.push(matcher_to_json(tenant));
        }
    }

    serde_json::to_vec(&value).map_err(|e| Error::internal(e.to_string()))
}

/// Check whether a fetched silence's matcher list already contains the
/// tenant matcher. Used as the `DELETE /silence/<id>` preflight check.
pub fn silence_matches_tenant(body: &[u8], tenant: &TenantMatcher) -> Result<bool> {
    let value: Value = serde_json::from_slice(body).map_err(|e| Error::parse(e.to_string()))?;
    let matchers = value
        .get("matchers")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::parse("silence body has no matchers array".to_string()))?;

    Ok(matchers
        .iter()
        .filter_map(json_to_matcher)
        .any(|m| m == *tenant))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_a() -> TenantMatcher {
        TenantMatcher::new(MatcherKind::Eq, "tenant_id", "a")
    }

    #[test]
    fn appends_to_filter_list() {
        let out = enforce_filter_list(&["alertname=~\"Foo.*\"".to_string()], &tenant_a());
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], r#"tenant_id="a""#);
    }

    #[test]
    fn parses_alertmanager_filter_matcher() {
        let m = parse_single_matcher(r#"alertname=~"Foo.*""#).unwrap();
        assert_eq!(m.kind, MatcherKind::Re);
        assert_eq!(m.name, "alertname");
        assert_eq!(m.value, "Foo.*");
    }

    #[test]
    fn silence_body_gets_tenant_matcher_appended() {
        let body = br#"{"matchers":[{"name":"alertname","value":"Foo","isRegex":false,"isEqual":true}],"startsAt":"2026-01-01T00:00:00Z","createdBy":"me"}"#;
        let out = enforce_silence_body(body, &tenant_a()).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        let matchers = value["matchers"].as_array().unwrap();
        assert_eq!(matchers.len(), 2);
        assert_eq!(value["createdBy"], "me");
    }

    #[test]
    fn silence_body_cross_tenant_rejected() {
        let body = br#"{"matchers":[{"name":"tenant_id","value":"b","isRegex":false,"isEqual":true}]}"#;
        let err = enforce_silence_body(body, &tenant_a()).unwrap_err();
        assert!(matches!(err, Error::IllegalMatcher(_)));
    }

    #[test]
    fn s6_delete_silence_cross_tenant_detected() {
        let body = br#"{"matchers":[{"name":"tenant_id","value":"b","isRegex":false,"isEqual":true}]}"#;
        assert!(!silence_matches_tenant(body, &tenant_a()).unwrap());
    }
}
