//! Label Proxy Enforce
//!
//! The AST enforcer: parses PromQL queries, bare metric selectors, and
//! Alertmanager filter/silence grammars, and injects or reconciles the
//! tenant matcher into every matcher-bearing node.

pub mod alertfilter;
pub mod ast;
pub mod query;
pub mod reconcile;
pub mod selectors;

pub use ast::{Expr, Selector};
pub use query::enforce_query;
pub use reconcile::reconcile;
pub use selectors::enforce_selector_list;
