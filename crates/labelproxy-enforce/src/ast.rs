//! A small recursive-descent parser for the subset of PromQL needed to find
//! and rewrite every matcher-bearing node in a query. This does not
//! evaluate queries; it only needs to locate vector/matrix selectors and
//! re-serialize the tree after mutation.

use labelproxy_core::{Error, MatcherKind, Result, TenantMatcher};

/// A vector or matrix selector: the only node kind that carries matchers.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub metric_name: Option<String>,
    pub matchers: Vec<TenantMatcher>,
    /// `Some(range)` for a matrix selector, e.g. `"5m"`.
    pub range: Option<String>,
    pub offset: Option<String>,
    pub at: Option<String>,
}

impl Selector {
    pub fn serialize(&self) -> String {
        let mut s = String::new();
        if let Some(name) = &self.metric_name {
            s.push_str(name);
        }
        if !self.matchers.is_empty() || self.metric_name.is_none() {
            s.push('{');
            s.push_str(
                &self
                    .matchers
                    .iter()
                    .map(|m| m.to_promql())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            s.push('}');
        }
        if let Some(range) = &self.range {
            s.push('[');
            s.push_str(range);
            s.push(']');
        }
        if let Some(offset) = &self.offset {
            s.push_str(" offset ");
            s.push_str(offset);
        }
        if let Some(at) = &self.at {
            s.push_str(" @ ");
            s.push_str(at);
        }
        s
    }
}

/// A `by (...)`/`without (...)` clause on an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggModifier {
    pub without: bool,
    pub labels: Vec<String>,
}

/// An `on (...)`/`ignoring (...)` clause, optionally with `group_left`/`group_right`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinModifier {
    pub bool_modifier: bool,
    pub vector_matching: Option<(bool /* is_on */, Vec<String>)>,
    pub group: Option<(bool /* left */, Vec<String>)>,
}

/// The expression tree. Only `Expr::Selector` carries matchers; every other
/// variant is structural and is re-serialized from its children.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Selector(Selector),
    Paren(Box<Expr>),
    Unary(char, Box<Expr>),
    Binary(Box<Expr>, String, Box<Expr>, Option<BinModifier>),
    Aggregate {
        func: String,
        args: Vec<Expr>,
        modifier: Option<AggModifier>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Subquery {
        expr: Box<Expr>,
        range: String,
        step: Option<String>,
        offset: Option<String>,
        at: Option<String>,
    },
}

impl Expr {
    pub fn serialize(&self) -> String {
        match self {
            Expr::Number(n) => format_number(*n),
            Expr::Str(s) => format!("{:?}", s),
            Expr::Selector(sel) => sel.serialize(),
            Expr::Paren(inner) => format!("({})", inner.serialize()),
            Expr::Unary(op, inner) => format!("{}{}", op, inner.serialize()),
            Expr::Binary(lhs, op, rhs, modifier) => {
                let mut s = format!("{} {}", lhs.serialize(), op);
                if let Some(m) = modifier {
                    if m.bool_modifier {
                        s.push_str(" bool");
                    }
                    if let Some((is_on, labels)) = &m.vector_matching {
                        s.push_str(if *is_on { " on(" } else { " ignoring(" });
                        s.push_str(&labels.join(","));
                        s.push(')');
                    }
                    if let Some((left, labels)) = &m.group {
                        s.push_str(if *left { " group_left(" } else { " group_right(" });
                        s.push_str(&labels.join(","));
                        s.push(')');
                    }
                }
                s.push(' ');
                s.push_str(&rhs.serialize());
                s
            }
            Expr::Aggregate {
                func,
                args,
                modifier,
            } => {
                let mut s = func.clone();
                if let Some(m) = modifier {
                    s.push_str(if m.without { " without(" } else { " by(" });
                    s.push_str(&m.labels.join(","));
                    s.push(')');
                }
                s.push('(');
                s.push_str(
                    &args
                        .iter()
                        .map(Expr::serialize)
                        .collect::<Vec<_>>()
                        .join(","),
                );
                s.push(')');
                s
            }
            Expr::Call { func, args } => format!(
                "{}({})",
                func,
                args.iter().map(Expr::serialize).collect::<Vec<_>>().join(",")
            ),
            Expr::Subquery {
                expr,
                range,
                step,
                offset,
                at,
            } => {
                let mut s = format!("{}[{}:{}]", expr.serialize(), range, step.clone().unwrap_or_default());
                if let Some(offset) = offset {
                    s.push_str(" offset ");
                    s.push_str(offset);
                }
                if let Some(at) = at {
                    s.push_str(" @ ");
                    s.push_str(at);
                }
                s
            }
        }
    }

    /// Visit every matcher-bearing node (depth first) with a mutable callback.
    pub fn for_each_selector_mut(&mut self, f: &mut impl FnMut(&mut Selector)) {
        match self {
            Expr::Selector(sel) => f(sel),
            Expr::Paren(inner) | Expr::Unary(_, inner) => inner.for_each_selector_mut(f),
            Expr::Binary(lhs, _, rhs, _) => {
                lhs.for_each_selector_mut(f);
                rhs.for_each_selector_mut(f);
            }
            Expr::Aggregate { args, .. } | Expr::Call { args, .. } => {
                for a in args {
                    a.for_each_selector_mut(f);
                }
            }
            Expr::Subquery { expr, .. } => expr.for_each_selector_mut(f),
            Expr::Number(_) | Expr::Str(_) => {}
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse a full PromQL expression (`/api/v1/query`'s `query` parameter).
pub fn parse(input: &str) -> Result<Expr> {
    let mut p = Parser::new(input);
    let expr = p.parse_expr(0)?;
    p.skip_ws();
    if !p.eof() {
        return Err(Error::parse(input.to_string()));
    }
    Ok(expr)
}

/// Parse a bare metric selector (`match[]` entries and federation targets):
/// a vector selector with no binary operators, aggregations, or ranges.
pub fn parse_selector(input: &str) -> Result<Selector> {
    let mut p = Parser::new(input);
    let sel = p
        .parse_vector_selector()
        .ok_or_else(|| Error::parse(input.to_string()))?;
    p.skip_ws();
    if !p.eof() {
        return Err(Error::parse(input.to_string()));
    }
    Ok(sel)
}

/// Parse a single Alertmanager-grammar matcher: `label=value`,
/// `label!=value`, `label=~re`, `label!~re`.
pub fn parse_single_matcher(input: &str) -> Result<TenantMatcher> {
    let mut p = Parser::new(input);
    p.skip_ws();
    let name = p
        .parse_ident()
        .ok_or_else(|| Error::parse(input.to_string()))?;
    let kind = p
        .parse_match_op()
        .ok_or_else(|| Error::parse(input.to_string()))?;
    let value = p
        .parse_string()
        .or_else(|| p.parse_raw_token())
        .ok_or_else(|| Error::parse(input.to_string()))?;
    p.skip_ws();
    if !p.eof() {
        return Err(Error::parse(input.to_string()));
    }
    Ok(TenantMatcher::new(kind, name, value))
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

const KEYWORDS_BIN: &[(&str, u8)] = &[
    ("or", 1),
    ("and", 2),
    ("unless", 2),
];

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn consume(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_ident(&mut self) -> Option<String> {
        let save = self.pos;
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == ':' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            self.pos = save;
            return None;
        }
        let ident = self.src[start..self.pos].to_string();
        self.pos = save;
        Some(ident)
    }

    fn parse_ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == ':' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            None
        } else {
            Some(self.src[start..self.pos].to_string())
        }
    }

    fn parse_string(&mut self) -> Option<String> {
        self.skip_ws();
        let quote = self.peek()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        self.bump();
        let mut s = String::new();
        loop {
            let c = self.bump()?;
            if c == quote {
                break;
            }
            if c == '\\' {
                let esc = self.bump()?;
                s.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            } else {
                s.push(c);
            }
        }
        Some(s)
    }

    fn parse_number(&mut self) -> Option<f64> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.peek(), Some('+') | Some('-')) {
            self.pos += 1;
        }
        let mut seen_digit = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                seen_digit = true;
                self.pos += 1;
            } else if c == '.' || c == 'e' || c == 'E' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if !seen_digit {
            self.pos = start;
            return None;
        }
        self.src[start..self.pos].parse::<f64>().ok()
    }

    /// Durations/timestamps have no internal whitespace; consume raw chars
    /// until the next structural delimiter.
    fn parse_raw_token(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ']' || c == ')' || c == ',' || c == ':' {
                break;
            }
            self.pos += c.len_utf8();
        }
        if self.pos == start {
            None
        } else {
            Some(self.src[start..self.pos].to_string())
        }
    }

    fn parse_match_op(&mut self) -> Option<MatcherKind> {
        self.skip_ws();
        for (tok, kind) in [
            ("=~", MatcherKind::Re),
            ("!~", MatcherKind::Nre),
            ("!=", MatcherKind::Neq),
            ("=", MatcherKind::Eq),
        ] {
            if self.starts_with(tok) {
                self.pos += tok.len();
                return Some(kind);
            }
        }
        None
    }

    fn parse_label_list(&mut self) -> Vec<String> {
        let mut labels = Vec::new();
        self.consume("(");
        loop {
            self.skip_ws();
            if self.consume(")") {
                break;
            }
            if let Some(id) = self.parse_ident() {
                labels.push(id);
            } else {
                break;
            }
            self.skip_ws();
            if !self.consume(",") {
                self.consume(")");
                break;
            }
        }
        labels
    }

    fn parse_matchers(&mut self) -> Option<Vec<TenantMatcher>> {
        self.skip_ws();
        if !self.consume("{") {
            return None;
        }
        let mut matchers = Vec::new();
        loop {
            self.skip_ws();
            if self.consume("}") {
                break;
            }
            let name = self.parse_ident()?;
            let kind = self.parse_match_op()?;
            let value = self.parse_string()?;
            matchers.push(TenantMatcher::new(kind, name, value));
            self.skip_ws();
            if !self.consume(",") {
                self.consume("}");
                break;
            }
        }
        Some(matchers)
    }

    /// Optional `offset <duration>` / `@ <timestamp>` modifiers, in either order.
    fn parse_modifiers(&mut self) -> (Option<String>, Option<String>) {
        let mut offset = None;
        let mut at = None;
        loop {
            self.skip_ws();
            if let Some(ident) = self.peek_ident() {
                if ident == "offset" {
                    self.parse_ident();
                    offset = self.parse_raw_token();
                    continue;
                }
            }
            if self.starts_with("@") {
                self.pos += 1;
                at = self.parse_raw_token();
                continue;
            }
            break;
        }
        (offset, at)
    }

    fn parse_vector_selector(&mut self) -> Option<Selector> {
        self.skip_ws();
        let save = self.pos;

        let metric_name = match self.peek_ident() {
            Some(id) if !is_reserved(&id) => {
                self.parse_ident();
                Some(id)
            }
            _ => None,
        };

        let matchers = self.parse_matchers().unwrap_or_default();
        if metric_name.is_none() && matchers.is_empty() {
            self.pos = save;
            return None;
        }

        let mut range = None;
        self.skip_ws();
        if self.consume("[") {
            let r = self.parse_raw_token()?;
            self.consume("]");
            range = Some(r);
        }

        let (offset, at) = self.parse_modifiers();

        Some(Selector {
            metric_name,
            matchers,
            range,
            offset,
            at,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_ws();

        if let Some(n) = self.parse_number() {
            return Ok(Expr::Number(n));
        }
        if let Some(s) = self.parse_string() {
            return Ok(Expr::Str(s));
        }
        if matches!(self.peek(), Some('+') | Some('-')) {
            let op = self.bump().unwrap();
            let inner = self.parse_primary()?;
            return Ok(Expr::Unary(op, Box::new(inner)));
        }
        if self.consume("(") {
            let inner = self.parse_expr(0)?;
            self.skip_ws();
            if !self.consume(")") {
                return Err(Error::parse(self.src.to_string()));
            }
            return self.parse_postfix(Expr::Paren(Box::new(inner)));
        }

        if let Some(ident) = self.peek_ident() {
            if is_aggregate(&ident) {
                self.parse_ident();
                return self.parse_aggregate(ident);
            }
            // function call or bare selector; disambiguate on '(' immediately after ident
            let save = self.pos;
            self.parse_ident();
            self.skip_ws();
            if self.starts_with("(") {
                self.consume("(");
                let args = self.parse_arg_list()?;
                return self.parse_postfix(Expr::Call { func: ident, args });
            }
            self.pos = save;
        }

        let sel = self
            .parse_vector_selector()
            .ok_or_else(|| Error::parse(self.src.to_string()))?;
        self.parse_postfix(Expr::Selector(sel))
    }

    /// A parenthesized or selector expression may be followed by a
    /// subquery range (`[5m:1m]`) and then `offset`/`@` modifiers.
    fn parse_postfix(&mut self, expr: Expr) -> Result<Expr> {
        self.skip_ws();
        if matches!(&expr, Expr::Paren(_) | Expr::Call { .. } | Expr::Aggregate { .. })
            && self.starts_with("[")
        {
            self.consume("[");
            let range = self.parse_raw_token().ok_or_else(|| Error::parse(self.src.to_string()))?;
            let step = if self.consume(":") {
                self.parse_raw_token()
            } else {
                None
            };
            self.consume("]");
            let (offset, at) = self.parse_modifiers();
            return Ok(Expr::Subquery {
                expr: Box::new(expr),
                range,
                step,
                offset,
                at,
            });
        }
        Ok(expr)
    }

    fn parse_arg_list(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.consume(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            self.skip_ws();
            if self.consume(",") {
                continue;
            }
            if !self.consume(")") {
                return Err(Error::parse(self.src.to_string()));
            }
            break;
        }
        Ok(args)
    }

    fn parse_aggregate(&mut self, func: String) -> Result<Expr> {
        self.skip_ws();
        let mut modifier = None;
        if let Some(ident) = self.peek_ident() {
            if ident == "by" || ident == "without" {
                self.parse_ident();
                let labels = self.parse_label_list();
                modifier = Some(AggModifier {
                    without: ident == "without",
                    labels,
                });
            }
        }
        self.skip_ws();
        if !self.consume("(") {
            return Err(Error::parse(self.src.to_string()));
        }
        let args = self.parse_arg_list()?;

        // trailing `by`/`without` clause, e.g. `sum(rate(x[5m])) by (instance)`
        if modifier.is_none() {
            self.skip_ws();
            if let Some(ident) = self.peek_ident() {
                if ident == "by" || ident == "without" {
                    self.parse_ident();
                    let labels = self.parse_label_list();
                    modifier = Some(AggModifier {
                        without: ident == "without",
                        labels,
                    });
                }
            }
        }

        self.parse_postfix(Expr::Aggregate {
            func,
            args,
            modifier,
        })
    }

    fn peek_bin_op(&mut self) -> Option<(String, u8, bool)> {
        self.skip_ws();
        for (tok, prec) in [
            ("==", 3),
            ("!=", 3),
            (">=", 3),
            ("<=", 3),
            (">", 3),
            ("<", 3),
            ("+", 4),
            ("-", 4),
            ("*", 5),
            ("/", 5),
            ("%", 5),
            ("^", 6),
        ] {
            if self.starts_with(tok) {
                return Some((tok.to_string(), prec, tok == "^"));
            }
        }
        if let Some(ident) = self.peek_ident() {
            for (kw, prec) in KEYWORDS_BIN {
                if ident == *kw {
                    return Some((ident, *prec, false));
                }
            }
        }
        None
    }

    fn parse_bin_modifier(&mut self) -> Option<BinModifier> {
        self.skip_ws();
        let mut bool_modifier = false;
        let mut vector_matching = None;
        let mut group = None;

        if let Some(ident) = self.peek_ident() {
            if ident == "bool" {
                self.parse_ident();
                bool_modifier = true;
            }
        }
        self.skip_ws();
        if let Some(ident) = self.peek_ident() {
            if ident == "on" || ident == "ignoring" {
                self.parse_ident();
                let labels = self.parse_label_list();
                vector_matching = Some((ident == "on", labels));
            }
        }
        self.skip_ws();
        if let Some(ident) = self.peek_ident() {
            if ident == "group_left" || ident == "group_right" {
                self.parse_ident();
                self.skip_ws();
                let labels = if self.starts_with("(") {
                    self.parse_label_list()
                } else {
                    Vec::new()
                };
                group = Some((ident == "group_left", labels));
            }
        }

        if bool_modifier || vector_matching.is_some() || group.is_some() {
            Some(BinModifier {
                bool_modifier,
                vector_matching,
                group,
            })
        } else {
            None
        }
    }

    /// Precedence-climbing binary expression parser.
    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_primary()?;
        loop {
            let save = self.pos;
            let Some((op, prec, right_assoc)) = self.peek_bin_op() else {
                break;
            };
            if prec < min_prec {
                self.pos = save;
                break;
            }
            // consume the operator token
            self.skip_ws();
            if op.chars().next().unwrap().is_alphabetic() {
                self.parse_ident();
            } else {
                self.pos += op.len();
            }
            let modifier = self.parse_bin_modifier();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_expr(next_min)?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs), modifier);
        }
        Ok(lhs)
    }
}

fn is_reserved(ident: &str) -> bool {
    matches!(
        ident,
        "by" | "without" | "on" | "ignoring" | "group_left" | "group_right" | "offset" | "bool"
    ) || KEYWORDS_BIN.iter().any(|(kw, _)| *kw == ident)
}

fn is_aggregate(ident: &str) -> bool {
    matches!(
        ident,
        "sum"
            | "min"
            | "max"
            | "avg"
            | "group"
            | "stddev"
            | "stdvar"
            | "count"
            | "count_values"
            | "bottomk"
            | "topk"
            | "quantile"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors_of(expr: &mut Expr) -> Vec<Selector> {
        let mut out = Vec::new();
        expr.for_each_selector_mut(&mut |s| out.push(s.clone()));
        out
    }

    #[test]
    fn parses_bare_metric() {
        let mut e = parse("up").unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 1);
        assert_eq!(sels[0].metric_name.as_deref(), Some("up"));
        assert!(sels[0].matchers.is_empty());
    }

    #[test]
    fn parses_selector_with_matcher() {
        let mut e = parse(r#"up{tenant_id="a"}"#).unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 1);
        assert_eq!(sels[0].matchers.len(), 1);
        assert_eq!(sels[0].matchers[0].value, "a");
    }

    #[test]
    fn parses_matrix_selector_with_range() {
        let mut e = parse(r#"rate(http_requests_total{job="api"}[5m])"#).unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 1);
        assert_eq!(sels[0].range.as_deref(), Some("5m"));
    }

    #[test]
    fn parses_aggregation_with_by_clause() {
        let mut e = parse(r#"sum by (instance) (rate(up[5m]))"#).unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 1);
        if let Expr::Aggregate { modifier, .. } = &e {
            let m = modifier.as_ref().unwrap();
            assert!(!m.without);
            assert_eq!(m.labels, vec!["instance".to_string()]);
        } else {
            panic!("expected aggregate");
        }
    }

    #[test]
    fn parses_binary_expression_with_two_selectors() {
        let mut e = parse(r#"up{a="1"} + on(instance) up{b="2"}"#).unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 2);
    }

    #[test]
    fn parses_subquery() {
        let mut e = parse(r#"rate(up[5m])[10m:1m]"#).unwrap();
        let sels = selectors_of(&mut e);
        assert_eq!(sels.len(), 1);
    }

    #[test]
    fn round_trips_offset() {
        let e = parse(r#"up{a="1"} offset 5m"#).unwrap();
        assert!(e.serialize().contains("offset 5m"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("up{").is_err());
        assert!(parse("up + ").is_err());
    }

    #[test]
    fn parse_selector_rejects_operators() {
        assert!(parse_selector(r#"up{a="1"} + down"#).is_err());
        let sel = parse_selector(r#"{__name__="up",job="x"}"#).unwrap();
        assert!(sel.metric_name.is_none());
        assert_eq!(sel.matchers.len(), 2);
    }
}
