//! The versioned ParserConfig document: subscription sources and the selector
//! groups built from them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field name → pattern (`/body/flags`, `!` negation, or literal substring).
/// Every entry of one rule must match; a list of rules is a disjunction.
pub type FilterRule = BTreeMap<String, String>;

/// One subscription entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxySource {
    #[serde(default)]
    pub source: String,

    #[serde(
        rename = "Connections",
        alias = "connections",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub connections: Vec<String>,

    #[serde(
        rename = "Skip",
        alias = "skip",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub skip: Vec<FilterRule>,
}

impl ProxySource {
    pub fn from_url(url: &str) -> Self {
        ProxySource {
            source: url.to_string(),
            ..Default::default()
        }
    }

    pub fn inline(connections: Vec<String>) -> Self {
        ProxySource {
            connections,
            ..Default::default()
        }
    }

    pub fn is_remote(&self) -> bool {
        !self.source.trim().is_empty()
    }
}

/// Members of a selector group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorMembers {
    /// Inclusion rules; accepts a single rule object or an array of them.
    #[serde(
        default,
        deserialize_with = "one_or_many_rules",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub proxies: Vec<FilterRule>,

    /// Tags always appended after the matched nodes.
    #[serde(
        rename = "addOutbounds",
        alias = "add_outbounds",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub add_outbounds: Vec<String>,
}

/// User-declared selector group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default)]
    pub tag: String,

    #[serde(rename = "type", default)]
    pub type_field: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,

    #[serde(default)]
    pub outbounds: SelectorMembers,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Reload and bookkeeping metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reload: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_updated: String,
}

/// The nested `ParserConfig` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserConfigBody {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,

    #[serde(default)]
    pub proxies: Vec<ProxySource>,

    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,

    #[serde(default)]
    pub parser: ParserMeta,
}

/// The whole document as persisted by the surrounding application.
///
/// Version 1 documents may keep `proxies`, `outbounds` and `reload` at the
/// root; normalization moves them into [`ParserConfigBody`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub version: u32,

    #[serde(rename = "ParserConfig", alias = "parserConfig", default)]
    pub parser_config: ParserConfigBody,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<ProxySource>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbounds: Option<Vec<OutboundConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload: Option<String>,
}

impl ParserConfig {
    /// Highest of the root and nested versions.
    pub fn effective_version(&self) -> u32 {
        self.version.max(self.parser_config.version)
    }

    pub fn proxies(&self) -> &[ProxySource] {
        &self.parser_config.proxies
    }

    pub fn outbounds(&self) -> &[OutboundConfig] {
        &self.parser_config.outbounds
    }

    /// Reload interval, falling back to the default when unset or unparseable.
    pub fn reload_interval(&self) -> Duration {
        crate::settings::normalize::parse_duration(&self.parser_config.parser.reload)
            .unwrap_or(crate::settings::normalize::DEFAULT_RELOAD_INTERVAL)
    }
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn one_or_many_rules<'de, D>(deserializer: D) -> Result<Vec<FilterRule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(FilterRule),
        Many(Vec<FilterRule>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(rule)) => vec![rule],
        Some(OneOrMany::Many(rules)) => rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wizard_template() {
        let doc = r#"{
          "version": 1,
          "ParserConfig": {
            "proxies": [{ "source": "https://example.com/sub" }],
            "outbounds": [
              {
                "tag": "proxy-out",
                "type": "selector",
                "options": { "interrupt_exist_connections": true },
                "outbounds": {
                  "proxies": { "tag": "!/(DO_NOT_USE_THIS)/i" },
                  "addOutbounds": ["direct-out"]
                },
                "comment": "Proxy group for all connections"
              }
            ]
          }
        }"#;

        let cfg: ParserConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.proxies().len(), 1);
        assert!(cfg.proxies()[0].is_remote());

        let selector = &cfg.outbounds()[0];
        assert_eq!(selector.tag, "proxy-out");
        assert_eq!(selector.outbounds.proxies.len(), 1);
        assert_eq!(
            selector.outbounds.proxies[0].get("tag").map(String::as_str),
            Some("!/(DO_NOT_USE_THIS)/i")
        );
        assert_eq!(selector.outbounds.add_outbounds, vec!["direct-out"]);
        assert_eq!(
            selector.options.get("interrupt_exist_connections"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_source_field_aliases() {
        let src: ProxySource = serde_json::from_str(
            r#"{"source": "", "connections": ["vless://a@b:1"], "skip": [{"tag": "/x/"}]}"#,
        )
        .unwrap();
        assert!(!src.is_remote());
        assert_eq!(src.connections.len(), 1);
        assert_eq!(src.skip.len(), 1);

        let out = serde_json::to_value(&src).unwrap();
        assert!(out.get("Connections").is_some());
        assert!(out.get("Skip").is_some());
    }

    #[test]
    fn test_proxies_rule_array() {
        let members: SelectorMembers =
            serde_json::from_str(r#"{"proxies": [{"tag": "/a/"}, {"sni": "b"}]}"#).unwrap();
        assert_eq!(members.proxies.len(), 2);
        assert!(members.add_outbounds.is_empty());
    }
}
