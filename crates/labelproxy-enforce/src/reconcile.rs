//! Matcher reconciliation policy, kept independent of the tree-walk
//! mechanism that calls it. The AST walker and the selector/filter
//! enforcers all funnel through this single function so the
//! `error_on_replace` policy lives in exactly one place.

use labelproxy_core::{Error, Result, TenantMatcher};

/// Reconcile an existing matcher list against one injected tenant matcher.
///
/// - No existing matcher with the same name: append.
/// - An existing matcher with the same name and value: leave unchanged.
/// - An existing matcher with the same name but a different value: replace,
///   unless `error_on_replace` is set, in which case fail.
pub fn reconcile(
    existing: &mut Vec<TenantMatcher>,
    inject: &TenantMatcher,
    error_on_replace: bool,
) -> Result<()> {
    if let Some(pos) = existing.iter().position(|m| m.name == inject.name) {
        if existing[pos] == *inject {
            return Ok(());
        }
        if error_on_replace {
            return Err(Error::IllegalMatcher(inject.name.clone()));
        }
        existing[pos] = inject.clone();
    } else {
        existing.push(inject.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelproxy_core::MatcherKind;

    fn m(kind: MatcherKind, value: &str) -> TenantMatcher {
        TenantMatcher::new(kind, "tenant_id", value)
    }

    #[test]
    fn appends_when_absent() {
        let mut existing = vec![];
        reconcile(&mut existing, &m(MatcherKind::Eq, "a"), false).unwrap();
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn leaves_unchanged_when_equal() {
        let mut existing = vec![m(MatcherKind::Eq, "a")];
        reconcile(&mut existing, &m(MatcherKind::Eq, "a"), true).unwrap();
        assert_eq!(existing, vec![m(MatcherKind::Eq, "a")]);
    }

    #[test]
    fn replaces_when_conflicting_and_not_strict() {
        let mut existing = vec![m(MatcherKind::Eq, "b")];
        reconcile(&mut existing, &m(MatcherKind::Eq, "a"), false).unwrap();
        assert_eq!(existing, vec![m(MatcherKind::Eq, "a")]);
    }

    #[test]
    fn fails_when_conflicting_and_strict() {
        let mut existing = vec![m(MatcherKind::Eq, "b")];
        let err = reconcile(&mut existing, &m(MatcherKind::Eq, "a"), true).unwrap_err();
        assert!(matches!(err, Error::IllegalMatcher(_)));
    }
}
