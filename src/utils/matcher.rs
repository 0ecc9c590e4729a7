//! Field-scoped filter rules
//!
//! A rule maps a node field to a pattern. Patterns follow the `/body/flags`
//! convention (`i` is the only flag, case-insensitive), an optional leading `!`
//! negates the pattern, and anything without delimiters is a literal substring.

use crate::models::{FilterRule, ParsedNode};
use regex::Regex;

/// A single pattern, compiled once.
#[derive(Debug, Clone)]
pub struct Pattern {
    negate: bool,
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Literal(String),
    /// `None` when the body failed to compile; such a pattern never matches.
    Regex(Option<Regex>),
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        let (negate, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let kind = match split_delimited(body) {
            Some((inner, case_insensitive)) => {
                let source = if case_insensitive {
                    format!("(?i){}", inner)
                } else {
                    inner.to_string()
                };
                match Regex::new(&source) {
                    Ok(re) => PatternKind::Regex(Some(re)),
                    Err(e) => {
                        log::debug!("Invalid filter pattern {}: {}", raw, e);
                        PatternKind::Regex(None)
                    }
                }
            }
            None => PatternKind::Literal(body.to_string()),
        };

        Pattern { negate, kind }
    }

    pub fn is_match(&self, text: &str) -> bool {
        let found = match &self.kind {
            PatternKind::Literal(needle) => text.contains(needle.as_str()),
            PatternKind::Regex(Some(re)) => re.is_match(text),
            PatternKind::Regex(None) => return false,
        };
        found != self.negate
    }
}

/// Splits `/body/flags` into `(body, case_insensitive)`.
fn split_delimited(pattern: &str) -> Option<(&str, bool)> {
    let rest = pattern.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if !flags.chars().all(|c| c == 'i') {
        return None;
    }
    Some((body, !flags.is_empty()))
}

/// Returns the string value of a node field, or `None` for unknown keys.
pub fn node_field(node: &ParsedNode, key: &str) -> Option<String> {
    let transport = &node.transport;
    let value = match key.to_lowercase().as_str() {
        "tag" => node.filter_tag(),
        "label" | "name" | "remark" => node.display_name.clone(),
        "server" | "host" => node.server.clone(),
        "port" => node.port.to_string(),
        "sni" => transport.sni().unwrap_or_default().to_string(),
        "protocol" | "scheme" => node.protocol.as_str().to_string(),
        "network" | "transport" => transport.network.as_str().to_string(),
        "security" => transport.security.as_str().to_string(),
        "flow" => transport.flow.clone().unwrap_or_default(),
        "fp" | "fingerprint" => transport.fingerprint().unwrap_or_default().to_string(),
        _ => return None,
    };
    Some(value)
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    entries: Vec<(String, Pattern)>,
}

impl CompiledRule {
    pub fn new(rule: &FilterRule) -> Self {
        CompiledRule {
            entries: rule
                .iter()
                .map(|(key, pattern)| (key.clone(), Pattern::parse(pattern)))
                .collect(),
        }
    }

    /// Every entry must match. Unknown field keys never match.
    pub fn matches(&self, node: &ParsedNode) -> bool {
        self.entries
            .iter()
            .all(|(key, pattern)| match node_field(node, key) {
                Some(value) => pattern.is_match(&value),
                None => false,
            })
    }
}

/// A disjunction of rules.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    pub fn new<'a, I>(rules: I) -> Self
    where
        I: IntoIterator<Item = &'a FilterRule>,
    {
        CompiledRules {
            rules: rules.into_iter().map(CompiledRule::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Short-circuits on the first matching rule.
    pub fn any_match(&self, node: &ParsedNode) -> bool {
        self.rules.iter().any(|rule| rule.matches(node))
    }
}

/// Match a single rule against a node
pub fn matches(node: &ParsedNode, rule: &FilterRule) -> bool {
    CompiledRule::new(rule).matches(node)
}

/// Match a rule set against a node; `true` on the first matching rule
pub fn any_match(node: &ParsedNode, rules: &[FilterRule]) -> bool {
    rules.iter().any(|rule| matches(node, rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Identity, Network, ParsedNode, Protocol, Security, TlsOptions, TransportOptions,
    };

    // Helper function to create a test node
    fn create_test_node(name: &str) -> ParsedNode {
        let transport = TransportOptions {
            security: Security::Tls(TlsOptions {
                server_name: Some("www.microsoft.com".to_string()),
                ..Default::default()
            }),
            network: Network::Grpc { service_name: None },
            ..Default::default()
        };
        ParsedNode::new(
            Protocol::Vless,
            Identity::Uuid {
                uuid: "2ee2a715-d541-416a-8713-d66567448c2e".to_string(),
                alter_id: 0,
            },
            "91.98.155.240".to_string(),
            443,
            transport,
            name.to_string(),
        )
    }

    fn rule(key: &str, pattern: &str) -> FilterRule {
        let mut r = FilterRule::new();
        r.insert(key.to_string(), pattern.to_string());
        r
    }

    #[test]
    fn test_pattern_case_insensitive() {
        assert!(Pattern::parse("/Germany/i").is_match("🇩🇪 germany [black lists]"));
        assert!(!Pattern::parse("/Germany/").is_match("germany"));
        assert!(Pattern::parse("/Germany/").is_match("Germany"));
    }

    #[test]
    fn test_pattern_literal() {
        assert!(Pattern::parse("Germ").is_match("Germany"));
        assert!(!Pattern::parse("germ").is_match("Germany"));
        // Unknown flags make the whole string a literal
        assert!(Pattern::parse("/path/to").is_match("a/path/to/b"));
        assert!(Pattern::parse("a.b").is_match("xa.by"));
        assert!(!Pattern::parse("a.b").is_match("axb"));
    }

    #[test]
    fn test_pattern_negation() {
        let p = Pattern::parse("!/(DO_NOT_USE_THIS)/i");
        assert!(p.is_match("Austria"));
        assert!(!p.is_match("do_not_use_this node"));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(!Pattern::parse("/([a-/").is_match("anything"));
        assert!(!Pattern::parse("!/([a-/").is_match("anything"));
    }

    #[test]
    fn test_fields() {
        let node = create_test_node("🇩🇪 Germany [black lists]");
        assert!(matches(&node, &rule("tag", "/germany/i")));
        assert!(matches(&node, &rule("sni", "/microsoft/")));
        assert!(matches(&node, &rule("server", "91.98")));
        assert!(matches(&node, &rule("network", "/^grpc$/")));
        assert!(matches(&node, &rule("protocol", "vless")));
        assert!(matches(&node, &rule("Port", "/^443$/")));
        assert!(!matches(&node, &rule("uuid", "/.*/")));
        assert!(!matches(&node, &rule("bogus", "/.*/")));
    }

    #[test]
    fn test_rule_is_conjunction_and_set_is_disjunction() {
        let node = create_test_node("Austria");
        let mut both = rule("tag", "Austria");
        both.insert("sni".to_string(), "/nope/".to_string());
        assert!(!matches(&node, &both));
        assert!(matches(&node, &FilterRule::new()));

        let rules = vec![both, rule("server", "91.")];
        assert!(any_match(&node, &rules));
        assert!(CompiledRules::new(&rules).any_match(&node));
        assert!(!any_match(&node, &[]));
    }
}
