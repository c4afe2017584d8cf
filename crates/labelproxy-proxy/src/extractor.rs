//! The label-value extractor.
//!
//! Resolves the tenant matcher from static configuration or from a
//! request parameter, and strips that parameter from the forwarded
//! request so the upstream never sees the configured label name.

use labelproxy_core::{Error, MatcherKind, Result, TenantMatcher};

use crate::config::ProxyConfig;

/// The URL query and (for POST form bodies) form parameters of a request,
/// mutable so the extractor and rewriters can strip/replace entries before
/// the request is forwarded. Plain `Vec<(String, String)>` preserves
/// parameter order and duplicate keys, unlike a map.
#[derive(Debug, Clone, Default)]
pub struct RewritableRequest {
    pub url_query: Vec<(String, String)>,
    pub form_body: Option<Vec<(String, String)>>,
}

impl RewritableRequest {
    pub fn new(url_query: Vec<(String, String)>, form_body: Option<Vec<(String, String)>>) -> Self {
        Self {
            url_query,
            form_body,
        }
    }

    /// All values bound to `key`, in either location, in order.
    pub fn get_all(&self, key: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .url_query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect();
        if let Some(form) = &self.form_body {
            out.extend(form.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()));
        }
        out
    }

    /// Replace all values bound to `key` in both locations. Values already
    /// present in the URL query are replaced there; form-body values are
    /// replaced in the form; new values not already present anywhere are
    /// appended to the URL query.
    pub fn set_all(&mut self, key: &str, values: Vec<String>) {
        self.remove_all(key);
        for v in values {
            self.url_query.push((key.to_string(), v));
        }
    }

    pub fn remove_all(&mut self, key: &str) {
        self.url_query.retain(|(k, _)| k != key);
        if let Some(form) = &mut self.form_body {
            form.retain(|(k, _)| k != key);
        }
    }

    /// Remove every value bound to `key` from both locations and return
    /// the first one found, if any. Merges the URL query and, for POST,
    /// the form body, into a single lookup.
    fn take_first(&mut self, key: &str) -> Option<String> {
        let mut value = None;
        self.url_query.retain(|(k, v)| {
            if k == key {
                value.get_or_insert_with(|| v.clone());
                false
            } else {
                true
            }
        });
        if let Some(form) = &mut self.form_body {
            form.retain(|(k, v)| {
                if k == key {
                    value.get_or_insert_with(|| v.clone());
                    false
                } else {
                    true
                }
            });
        }
        value
    }
}

/// Resolve the tenant matcher and strip the label parameter from `req`.
pub fn extract_tenant(config: &ProxyConfig, req: &mut RewritableRequest) -> Result<TenantMatcher> {
    let form_value = req.take_first(&config.label_name);

    let raw = match (&config.static_label_value, form_value) {
        (Some(_), Some(_)) => return Err(Error::TenantAmbiguous(config.label_name.clone())),
        (Some(static_value), None) => static_value.clone(),
        (None, Some(value)) => value,
        (None, None) => return Err(Error::TenantMissing(config.label_name.clone())),
    };

    Ok(parse_tenant_value(&config.label_name, &raw))
}

/// Classify the prefix (`!~`, `~`, `!`) and trim surrounding quotes.
fn parse_tenant_value(label_name: &str, raw: &str) -> TenantMatcher {
    let (kind, rest) = MatcherKind::classify_prefix(raw);
    TenantMatcher::new(kind, label_name, trim_one_quote_pair(rest))
}

fn trim_one_quote_pair(s: &str) -> String {
    let s = s.strip_prefix('"').unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s).to_string()
}
