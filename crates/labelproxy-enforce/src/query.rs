//! The query AST enforcer: parses the `query` parameter, walks every
//! vector/matrix selector and subquery, injects or reconciles the tenant
//! matcher, and re-serializes.

use labelproxy_core::{Result, TenantMatcher};

use crate::ast;
use crate::reconcile::reconcile;

/// Enforce the tenant matcher against a full PromQL expression, returning
/// the rewritten query text.
pub fn enforce_query(query: &str, matcher: &TenantMatcher, error_on_replace: bool) -> Result<String> {
    let mut expr = ast::parse(query)?;

    let mut first_err = None;
    expr.for_each_selector_mut(&mut |sel| {
        if first_err.is_some() {
            return;
        }
        if let Err(e) = reconcile(&mut sel.matchers, matcher, error_on_replace) {
            first_err = Some(e);
        }
    });
    if let Some(e) = first_err {
        return Err(e);
    }

    Ok(expr.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelproxy_core::MatcherKind;

    fn tenant_a() -> TenantMatcher {
        TenantMatcher::new(MatcherKind::Eq, "tenant_id", "a")
    }

    #[test]
    fn s1_injects_matcher_into_bare_metric() {
        let out = enforce_query("up", &tenant_a(), false).unwrap();
        assert_eq!(out, r#"up{tenant_id="a"}"#);
    }

    #[test]
    fn s2_leaves_matching_matcher_untouched() {
        let out = enforce_query(r#"up{tenant_id="a"}"#, &tenant_a(), false).unwrap();
        assert_eq!(out, r#"up{tenant_id="a"}"#);
    }

    #[test]
    fn s3_replaces_conflicting_matcher_when_not_strict() {
        let out = enforce_query(r#"up{tenant_id="b"}"#, &tenant_a(), false).unwrap();
        assert_eq!(out, r#"up{tenant_id="a"}"#);
    }

    #[test]
    fn s4_rejects_conflicting_matcher_when_strict() {
        let err = enforce_query(r#"up{tenant_id="b"}"#, &tenant_a(), true).unwrap_err();
        assert!(matches!(err, labelproxy_core::Error::IllegalMatcher(_)));
    }

    #[test]
    fn injects_into_every_selector_in_a_binary_expression() {
        let out = enforce_query("up + down", &tenant_a(), false).unwrap();
        assert_eq!(out, r#"up{tenant_id="a"} + down{tenant_id="a"}"#);
    }

    #[test]
    fn injects_into_matrix_selector_inside_function_call() {
        let out = enforce_query("rate(http_requests_total[5m])", &tenant_a(), false).unwrap();
        assert_eq!(out, r#"rate(http_requests_total{tenant_id="a"}[5m])"#);
    }

    #[test]
    fn propagates_parse_errors() {
        let err = enforce_query("up{", &tenant_a(), false).unwrap_err();
        assert!(matches!(err, labelproxy_core::Error::Parse(_)));
    }
}
