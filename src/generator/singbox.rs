use log::{debug, warn};
use serde_json::{json, Map, Value};

use crate::error::{ParseError, Result};
use crate::models::{Identity, Network, OutboundConfig, ParsedNode, Protocol, Security, TlsOptions};
use crate::utils::matcher::CompiledRules;

/// Plugin names sing-box ships with, keyed by the names links use.
const SS_PLUGINS: &[(&str, &str)] = &[
    ("obfs-local", "obfs-local"),
    ("simple-obfs", "obfs-local"),
    ("v2ray-plugin", "v2ray-plugin"),
];

/// Selector kinds a config may declare.
pub const GROUP_TYPES: &[&str] = &["selector", "urltest"];

/// Rejects nodes whose transport has no sing-box mapping
///
/// Runs before a tag is allocated so an unusable node never consumes one.
pub fn check_supported(node: &ParsedNode) -> Result<()> {
    let endpoint = || format!("{}:{}", node.server, node.port);

    match &node.transport.network {
        Network::Other(name) => {
            return Err(ParseError::UnsupportedTransport(format!(
                "network {} on {}",
                name,
                endpoint()
            )))
        }
        Network::Tcp {
            header_type: Some(header),
            ..
        } if header != "http" => {
            return Err(ParseError::UnsupportedTransport(format!(
                "tcp header {} on {}",
                header,
                endpoint()
            )))
        }
        _ => {}
    }

    if let Security::Reality(reality) = &node.transport.security {
        if reality.public_key.is_empty() {
            return Err(ParseError::UnsupportedTransport(format!(
                "reality without public key on {}",
                endpoint()
            )));
        }
    }

    if let Some(plugin) = &node.transport.plugin {
        if ss_plugin_name(&plugin.name).is_none() {
            return Err(ParseError::UnsupportedTransport(format!(
                "shadowsocks plugin {} on {}",
                plugin.name,
                endpoint()
            )));
        }
    }

    Ok(())
}

fn ss_plugin_name(name: &str) -> Option<&'static str> {
    SS_PLUGINS
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, canonical)| *canonical)
}

fn tls_block(tls: &TlsOptions) -> Value {
    let mut block = json!({
        "enabled": true,
        "insecure": tls.insecure,
    });
    if let Some(server_name) = &tls.server_name {
        block["server_name"] = json!(server_name);
    }
    if !tls.alpn.is_empty() {
        block["alpn"] = json!(tls.alpn);
    }
    if let Some(fingerprint) = &tls.fingerprint {
        block["utls"] = json!({
            "enabled": true,
            "fingerprint": fingerprint,
        });
    }
    block
}

fn security_block(security: &Security) -> Option<Value> {
    match security {
        Security::None => None,
        Security::Tls(tls) => Some(tls_block(tls)),
        Security::Reality(reality) => {
            let mut block = tls_block(&reality.tls);
            // sing-box only speaks reality through uTLS
            if reality.tls.fingerprint.is_none() {
                block["utls"] = json!({
                    "enabled": true,
                    "fingerprint": "chrome",
                });
            }
            let mut reality_block = json!({
                "enabled": true,
                "public_key": reality.public_key,
            });
            if let Some(short_id) = &reality.short_id {
                reality_block["short_id"] = json!(short_id);
            }
            block["reality"] = reality_block;
            Some(block)
        }
    }
}

fn transport_block(network: &Network) -> Option<Value> {
    match network {
        Network::Tcp { header_type: None, .. } => None,
        Network::Tcp {
            header_type: Some(_),
            path,
            host,
        }
        | Network::Http { path, host } => {
            let mut transport = json!({ "type": "http" });
            if let Some(path) = path {
                transport["path"] = json!(path);
            }
            if !host.is_empty() {
                transport["host"] = json!(host);
            }
            Some(transport)
        }
        Network::Ws { path, host } => {
            let mut transport = json!({ "type": "ws" });
            if let Some(path) = path {
                transport["path"] = json!(path);
            }
            if let Some(host) = host {
                transport["headers"] = json!({ "Host": host });
            }
            Some(transport)
        }
        Network::Grpc { service_name } => {
            let mut transport = json!({ "type": "grpc" });
            if let Some(service_name) = service_name {
                transport["service_name"] = json!(service_name);
            }
            Some(transport)
        }
        Network::HttpUpgrade { path, host } => {
            let mut transport = json!({ "type": "httpupgrade" });
            if let Some(path) = path {
                transport["path"] = json!(path);
            }
            if let Some(host) = host {
                transport["host"] = json!(host);
            }
            Some(transport)
        }
        // Rejected by check_supported
        Network::Other(_) => None,
    }
}

/// Render the sing-box outbound descriptor of a tagged node
///
/// Keys `tag`, `type`, `server` and `server_port` are always present; the rest
/// depends on the protocol and the transport options.
pub fn generate_outbound(node: &ParsedNode) -> Result<Map<String, Value>> {
    if node.tag().is_empty() {
        return Err(ParseError::UnsupportedTransport(format!(
            "untagged node {}:{}",
            node.server, node.port
        )));
    }
    check_supported(node)?;

    let mut outbound = json!({
        "tag": node.tag(),
        "type": node.protocol.as_str(),
        "server": node.server,
        "server_port": node.port,
    });

    match (&node.protocol, &node.identity) {
        (Protocol::Vless, Identity::Uuid { uuid, .. }) => {
            outbound["uuid"] = json!(uuid);
            if let Some(flow) = &node.transport.flow {
                outbound["flow"] = json!(flow);
            }
        }
        (Protocol::Vmess, Identity::Uuid { uuid, alter_id }) => {
            outbound["uuid"] = json!(uuid);
            outbound["alter_id"] = json!(alter_id);
            outbound["security"] = json!(node.transport.cipher.as_deref().unwrap_or("auto"));
        }
        (Protocol::Trojan, Identity::Password(password))
        | (Protocol::Hysteria2, Identity::Password(password)) => {
            outbound["password"] = json!(password);
        }
        (Protocol::Shadowsocks, Identity::Cipher { method, password }) => {
            outbound["method"] = json!(method);
            outbound["password"] = json!(password);
            if let Some(plugin) = &node.transport.plugin {
                if let Some(name) = ss_plugin_name(&plugin.name) {
                    outbound["plugin"] = json!(name);
                    outbound["plugin_opts"] = json!(plugin.opts);
                }
            }
        }
        (protocol, _) => {
            return Err(ParseError::UnsupportedTransport(format!(
                "{} node with mismatched credential",
                protocol.as_str()
            )))
        }
    }

    if let Some(obfs) = &node.transport.obfs {
        outbound["obfs"] = json!({
            "type": obfs.kind,
            "password": obfs.password,
        });
    }

    if let Some(tls) = security_block(&node.transport.security) {
        outbound["tls"] = tls;
    }
    if let Some(transport) = transport_block(&node.transport.network) {
        outbound["transport"] = transport;
    }

    match outbound {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::SchemaViolation(format!(
            "outbound is not an object: {}",
            other
        ))),
    }
}

/// Build a selector (or urltest) descriptor from already generated nodes
///
/// Members are the nodes matching any of the config's filters, in batch order,
/// followed by `addOutbounds`. A selector without members is omitted.
pub fn generate_selector(
    nodes: &[ParsedNode],
    cfg: &OutboundConfig,
) -> Result<Option<Map<String, Value>>> {
    if cfg.tag.trim().is_empty() {
        return Err(ParseError::SchemaViolation(
            "selector without a tag".to_string(),
        ));
    }

    let rules = CompiledRules::new(&cfg.outbounds.proxies);
    let mut members: Vec<String> = if rules.is_empty() {
        Vec::new()
    } else {
        nodes
            .iter()
            .filter(|node| !node.tag().is_empty() && rules.any_match(node))
            .map(|node| node.tag().to_string())
            .collect()
    };
    members.extend(
        cfg.outbounds
            .add_outbounds
            .iter()
            .filter(|tag| !tag.is_empty())
            .cloned(),
    );

    if members.is_empty() {
        debug!("Selector {} has no members, omitting", cfg.tag);
        return Ok(None);
    }

    let kind = if cfg.type_field.is_empty() {
        "selector"
    } else {
        cfg.type_field.as_str()
    };

    let mut selector = Map::new();
    selector.insert("tag".to_string(), json!(cfg.tag));
    selector.insert("type".to_string(), json!(kind));
    selector.insert("outbounds".to_string(), json!(members));
    for (key, value) in &cfg.options {
        if !selector.contains_key(key) {
            selector.insert(key.clone(), value.clone());
        }
    }

    Ok(Some(selector))
}

/// Compact JSON with sorted keys, so equal descriptors render to equal bytes.
pub fn render_fragment(descriptor: &Map<String, Value>) -> Result<String> {
    serde_json::to_string(descriptor)
        .map_err(|e| ParseError::SchemaViolation(format!("unserializable descriptor: {}", e)))
}

/// Node descriptors followed by selector descriptors
///
/// Nodes without an outbound are skipped; a failing selector is logged and
/// left out without affecting the others.
pub fn generate_all(nodes: &[ParsedNode], configs: &[OutboundConfig]) -> Vec<Map<String, Value>> {
    let mut out: Vec<Map<String, Value>> = nodes
        .iter()
        .filter_map(|node| node.outbound().cloned())
        .collect();

    for cfg in configs {
        match generate_selector(nodes, cfg) {
            Ok(Some(selector)) => out.push(selector),
            Ok(None) => {}
            Err(e) => warn!("Skipping selector {:?}: {}", cfg.tag, e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FilterRule, Hy2Obfs, RealityOptions, SsPlugin, TransportOptions};
    use crate::parser::explodes::parse_node;

    fn tagged(link: &str, tag: &str) -> ParsedNode {
        let mut node = parse_node(link, &[]).unwrap().unwrap();
        node.set_tag(tag.to_string());
        node
    }

    fn rule(key: &str, pattern: &str) -> FilterRule {
        let mut rule = FilterRule::new();
        rule.insert(key.to_string(), pattern.to_string());
        rule
    }

    #[test]
    fn test_vless_reality_outbound() {
        let node = tagged(
            "vless://4a3ece53-6000-4ba3-a9fa-fd0d7ba61cf3@31.57.228.19:443?encryption=none&flow=xtls-rprx-vision&security=reality&sni=hls-svod.itunes.apple.com&fp=chrome&pbk=mLmBhbVFfNuo2eUgBh6r9-5Koz9mUCn3aSzlR6IejUg&sid=48720c&type=tcp&headerType=none#AE",
            "AE",
        );
        let outbound = Value::Object(generate_outbound(&node).unwrap());

        assert_eq!(outbound["tag"], "AE");
        assert_eq!(outbound["type"], "vless");
        assert_eq!(outbound["server"], "31.57.228.19");
        assert_eq!(outbound["server_port"], 443);
        assert_eq!(outbound["uuid"], "4a3ece53-6000-4ba3-a9fa-fd0d7ba61cf3");
        assert_eq!(outbound["flow"], "xtls-rprx-vision");
        assert_eq!(outbound["tls"]["server_name"], "hls-svod.itunes.apple.com");
        assert_eq!(outbound["tls"]["utls"]["fingerprint"], "chrome");
        assert_eq!(outbound["tls"]["reality"]["short_id"], "48720c");
        assert!(outbound.get("transport").is_none());
    }

    #[test]
    fn test_vmess_ws_outbound() {
        let node = tagged(
            "vmess://b831381d-6324-4d53-ad4f-8cda48b30811@example.com:8080?network=ws&path=%2Fray&host=cdn.example.com#ws",
            "ws",
        );
        let outbound = Value::Object(generate_outbound(&node).unwrap());
        assert_eq!(outbound["security"], "auto");
        assert_eq!(outbound["alter_id"], 0);
        assert_eq!(
            outbound["transport"],
            json!({"type": "ws", "path": "/ray", "headers": {"Host": "cdn.example.com"}})
        );
        assert!(outbound.get("tls").is_none());
    }

    #[test]
    fn test_tcp_http_header_outbound() {
        let node = tagged(
            "vless://id@h.example:80?type=tcp&headerType=http&path=/p&host=x.com",
            "obfs",
        );
        let outbound = Value::Object(generate_outbound(&node).unwrap());
        assert_eq!(
            outbound["transport"],
            json!({"type": "http", "path": "/p", "host": ["x.com"]})
        );
    }

    #[test]
    fn test_shadowsocks_and_hysteria2_outbounds() {
        let mut node = ParsedNode::new(
            Protocol::Shadowsocks,
            Identity::Cipher {
                method: "aes-128-gcm".to_string(),
                password: "pw".to_string(),
            },
            "1.1.1.1".to_string(),
            8388,
            TransportOptions {
                plugin: Some(SsPlugin {
                    name: "simple-obfs".to_string(),
                    opts: "obfs=http;obfs-host=a.com".to_string(),
                }),
                ..Default::default()
            },
            String::new(),
        );
        node.set_tag("ss".to_string());
        let outbound = Value::Object(generate_outbound(&node).unwrap());
        assert_eq!(outbound["plugin"], "obfs-local");
        assert_eq!(outbound["plugin_opts"], "obfs=http;obfs-host=a.com");

        let mut node = ParsedNode::new(
            Protocol::Hysteria2,
            Identity::Password("pw".to_string()),
            "h.example".to_string(),
            443,
            TransportOptions {
                security: Security::Tls(TlsOptions::default()),
                obfs: Some(Hy2Obfs {
                    kind: "salamander".to_string(),
                    password: "o".to_string(),
                }),
                ..Default::default()
            },
            String::new(),
        );
        node.set_tag("hy2".to_string());
        let outbound = Value::Object(generate_outbound(&node).unwrap());
        assert_eq!(outbound["obfs"], json!({"type": "salamander", "password": "o"}));
        assert_eq!(outbound["tls"]["enabled"], true);
    }

    #[test]
    fn test_unsupported_outbounds() {
        let untagged = parse_node("trojan://pw@h.example:443", &[]).unwrap().unwrap();
        assert!(matches!(
            generate_outbound(&untagged),
            Err(ParseError::UnsupportedTransport(_))
        ));

        let kcp = tagged("vless://id@h.example:443?type=kcp", "kcp");
        assert!(matches!(
            check_supported(&kcp),
            Err(ParseError::UnsupportedTransport(_))
        ));

        let mut no_key = tagged("vless://id@h.example:443", "r");
        no_key.transport.security = Security::Reality(RealityOptions::default());
        assert!(matches!(
            generate_outbound(&no_key),
            Err(ParseError::UnsupportedTransport(_))
        ));

        let mut kcptun = tagged("ss://YWVzLTEyOC1nY206cHc@h.example:8388#k", "k");
        kcptun.transport.plugin = Some(SsPlugin {
            name: "kcptun".to_string(),
            opts: String::new(),
        });
        assert!(matches!(
            generate_outbound(&kcptun),
            Err(ParseError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_selector_members_and_options() {
        let nodes = vec![
            tagged("trojan://pw@de.example:443#Germany 1", "Germany 1"),
            tagged("trojan://pw@nl.example:443#Netherlands", "Netherlands"),
            tagged("trojan://pw@de2.example:443#Germany 2", "Germany 2"),
        ];
        let mut cfg = OutboundConfig {
            tag: "proxy-out".to_string(),
            type_field: "selector".to_string(),
            ..Default::default()
        };
        cfg.outbounds.proxies = vec![rule("tag", "/germany/i")];
        cfg.outbounds.add_outbounds = vec!["direct-out".to_string()];
        cfg.options.insert("default".to_string(), json!("Germany 2"));
        cfg.options.insert("tag".to_string(), json!("ignored"));

        let selector = Value::Object(generate_selector(&nodes, &cfg).unwrap().unwrap());
        assert_eq!(selector["tag"], "proxy-out");
        assert_eq!(
            selector["outbounds"],
            json!(["Germany 1", "Germany 2", "direct-out"])
        );
        assert_eq!(selector["default"], "Germany 2");
    }

    #[test]
    fn test_selector_empty_and_invalid() {
        let nodes = vec![tagged("trojan://pw@nl.example:443#NL", "NL")];
        let mut cfg = OutboundConfig {
            tag: "de".to_string(),
            ..Default::default()
        };
        cfg.outbounds.proxies = vec![rule("tag", "/Germany/")];
        assert!(generate_selector(&nodes, &cfg).unwrap().is_none());

        cfg.tag = String::new();
        assert!(matches!(
            generate_selector(&nodes, &cfg),
            Err(ParseError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_render_fragment_is_stable() {
        let node = tagged("trojan://pw@h.example:443?sni=s.example#T", "T");
        let first = render_fragment(&generate_outbound(&node).unwrap()).unwrap();
        let second = render_fragment(&generate_outbound(&node.clone()).unwrap()).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(r#"{"password":"pw","server":"h.example""#));
    }

    #[test]
    fn test_generate_all_orders_nodes_before_selectors() {
        let nodes: Vec<ParsedNode> = vec![tagged("trojan://pw@h.example:443#A", "A")]
            .into_iter()
            .map(|n| n.generate().unwrap())
            .collect();
        let mut cfg = OutboundConfig {
            tag: "all".to_string(),
            ..Default::default()
        };
        cfg.outbounds.proxies = vec![FilterRule::new()];
        let broken = OutboundConfig::default();

        let all = generate_all(&nodes, &[cfg, broken]);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["tag"], "A");
        assert_eq!(all[1]["outbounds"], json!(["A"]));
    }
}
