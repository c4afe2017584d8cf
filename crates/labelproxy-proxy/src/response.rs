//! Response filter.
//!
//! Post-processes the JSON bodies of `/api/v1/rules` and `/api/v1/alerts`
//! so that a tenant never sees a rule group, rule, or alert whose labels
//! belong to a different tenant. If the body does not decode as the
//! expected shape, the response is passed through unchanged — this covers
//! upstream error payloads and any other non-JSON content.

use labelproxy_core::TenantMatcher;
use serde_json::Value;

/// Filter a `/api/v1/rules` response body in place.
///
/// Shape: `{ status, data: { groups: [ { rules: [ { labels, alerts?: [...] } ] } ] } }`.
/// A rule survives if its own `labels` satisfy the matcher. Within a
/// surviving rule, nested `alerts` are filtered independently by their own
/// labels — a recording rule's labels and its firing alerts' labels are not
/// the same thing. Rule groups left empty after filtering are dropped
/// entirely.
pub fn filter_rules_response(body: &[u8], matcher: &TenantMatcher, label_name: &str) -> Option<Vec<u8>> {
    let mut root: Value = serde_json::from_slice(body).ok()?;
    let groups = root.get_mut("data")?.get_mut("groups")?.as_array_mut()?;

    for group in groups.iter_mut() {
        let Some(rules) = group.get_mut("rules").and_then(Value::as_array_mut) else {
            continue;
        };
        let mut kept = Vec::with_capacity(rules.len());
        for mut rule in std::mem::take(rules) {
            if !labels_match(&rule, label_name, matcher) {
                continue;
            }
            if let Some(alerts) = rule.get_mut("alerts").and_then(Value::as_array_mut) {
                alerts.retain(|alert| labels_match(alert, label_name, matcher));
            }
            kept.push(rule);
        }
        *rules = kept;
    }
    groups.retain(|group| {
        group
            .get("rules")
            .and_then(Value::as_array)
            .map(|rules| !rules.is_empty())
            .unwrap_or(false)
    });

    serde_json::to_vec(&root).ok()
}

/// Filter a `/api/v1/alerts` response body in place.
///
/// Shape: `{ status, data: { alerts: [ { labels } ] } }` (no groups, unlike
/// the rules endpoint).
pub fn filter_alerts_response(body: &[u8], matcher: &TenantMatcher, label_name: &str) -> Option<Vec<u8>> {
    let mut root: Value = serde_json::from_slice(body).ok()?;
    let alerts = root.get_mut("data")?.get_mut("alerts")?.as_array_mut()?;
    alerts.retain(|alert| labels_match(alert, label_name, matcher));
    serde_json::to_vec(&root).ok()
}

fn labels_match(item: &Value, label_name: &str, matcher: &TenantMatcher) -> bool {
    let candidate = item
        .get("labels")
        .and_then(|labels| labels.get(label_name))
        .and_then(Value::as_str);
    matcher.matches(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelproxy_core::MatcherKind;
    use serde_json::json;

    fn tenant_a() -> TenantMatcher {
        TenantMatcher::new(MatcherKind::Eq, "tenant_id", "a")
    }

    #[test]
    fn s7_rules_response_filtered_by_tenant() {
        let body = json!({
            "status": "success",
            "data": {
                "groups": [
                    {"name": "g1", "rules": [{"labels": {"tenant_id": "a"}}]},
                    {"name": "g2", "rules": [{"labels": {"tenant_id": "b"}}]},
                ]
            }
        });
        let out = filter_rules_response(&serde_json::to_vec(&body).unwrap(), &tenant_a(), "tenant_id").unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();
        let groups = out["data"]["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["name"], "g1");
    }

    #[test]
    fn empty_group_after_filtering_is_dropped() {
        let body = json!({
            "status": "success",
            "data": {
                "groups": [
                    {"name": "g1", "rules": [{"labels": {"tenant_id": "b"}}, {"labels": {"tenant_id": "c"}}]},
                ]
            }
        });
        let out = filter_rules_response(&serde_json::to_vec(&body).unwrap(), &tenant_a(), "tenant_id").unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();
        assert!(out["data"]["groups"].as_array().unwrap().is_empty());
    }

    #[test]
    fn nested_alerts_filtered_independently_of_rule_labels() {
        let body = json!({
            "status": "success",
            "data": {
                "groups": [{
                    "name": "g1",
                    "rules": [{
                        "labels": {},
                        "alerts": [
                            {"labels": {"tenant_id": "a"}},
                            {"labels": {"tenant_id": "b"}},
                        ]
                    }]
                }]
            }
        });
        let out = filter_rules_response(&serde_json::to_vec(&body).unwrap(), &tenant_a(), "tenant_id").unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();
        let rules = out["data"]["groups"][0]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["alerts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn alerts_response_filtered_by_tenant() {
        let body = json!({
            "status": "success",
            "data": {
                "alerts": [
                    {"labels": {"tenant_id": "a"}},
                    {"labels": {"tenant_id": "b"}},
                ]
            }
        });
        let out = filter_alerts_response(&serde_json::to_vec(&body).unwrap(), &tenant_a(), "tenant_id").unwrap();
        let out: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(out["data"]["alerts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn non_json_body_passes_through_as_none() {
        assert!(filter_rules_response(b"not json", &tenant_a(), "tenant_id").is_none());
        assert!(filter_alerts_response(b"not json", &tenant_a(), "tenant_id").is_none());
    }

    #[test]
    fn filtering_is_idempotent() {
        let body = json!({
            "status": "success",
            "data": {
                "groups": [
                    {"name": "g1", "rules": [{"labels": {"tenant_id": "a"}}]},
                    {"name": "g2", "rules": [{"labels": {"tenant_id": "b"}}]},
                ]
            }
        });
        let once = filter_rules_response(&serde_json::to_vec(&body).unwrap(), &tenant_a(), "tenant_id").unwrap();
        let twice = filter_rules_response(&once, &tenant_a(), "tenant_id").unwrap();
        assert_eq!(once, twice);
    }
}
