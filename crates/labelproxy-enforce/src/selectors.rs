//! The `match[]` selector-list enforcer: used by federation, series,
//! labels, and label-values endpoints.

use labelproxy_core::{Result, TenantMatcher};

use crate::ast;
use crate::reconcile::reconcile;

/// Enforce the tenant matcher against a `match[]` parameter's values.
///
/// If `selectors` is empty, a single selector consisting of just the
/// tenant matcher is returned. Otherwise every entry is parsed, the
/// matcher is reconciled into it, and it is re-serialized.
pub fn enforce_selector_list(
    selectors: &[String],
    matcher: &TenantMatcher,
    error_on_replace: bool,
) -> Result<Vec<String>> {
    if selectors.is_empty() {
        return Ok(vec![bare_matcher_selector(matcher)]);
    }

    selectors
        .iter()
        .map(|raw| {
            let mut sel = ast::parse_selector(raw)?;
            reconcile(&mut sel.matchers, matcher, error_on_replace)?;
            Ok(sel.serialize())
        })
        .collect()
}

fn bare_matcher_selector(matcher: &TenantMatcher) -> String {
    format!("{{{}}}", matcher.to_promql())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelproxy_core::MatcherKind;

    fn tenant_a() -> TenantMatcher {
        TenantMatcher::new(MatcherKind::Eq, "tenant_id", "a")
    }

    #[test]
    fn s5_empty_match_becomes_single_tenant_selector() {
        let out = enforce_selector_list(&[], &tenant_a(), false).unwrap();
        assert_eq!(out, vec![r#"{tenant_id="a"}"#.to_string()]);
    }

    #[test]
    fn appends_to_existing_selectors() {
        let out = enforce_selector_list(
            &["up".to_string(), r#"down{job="x"}"#.to_string()],
            &tenant_a(),
            false,
        )
        .unwrap();
        assert_eq!(out[0], r#"up{tenant_id="a"}"#);
        assert_eq!(out[1], r#"down{job="x",tenant_id="a"}"#);
    }

    #[test]
    fn rejects_non_selector_input() {
        assert!(enforce_selector_list(&["up + down".to_string()], &tenant_a(), false).is_err());
    }
}
