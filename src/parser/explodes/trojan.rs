use super::common::{
    build_transport, parse_url, url_host, url_port, userinfo_secret, QueryParams,
};
use crate::error::{ParseError, Result};
use crate::models::{Identity, ParsedNode, Protocol};
use crate::utils::url::decode_fragment;

/// Parse a Trojan link into a node
///
/// Format: `trojan://password@host[:port]?sni=...&type=ws&path=...#name`.
/// The port defaults to 443 and TLS is on unless `security=none`.
pub fn explode_trojan(link: &str) -> Result<ParsedNode> {
    let url = parse_url(link)?;

    let password = userinfo_secret(&url);
    if password.is_empty() {
        return Err(ParseError::malformed(link, "missing password"));
    }

    let host = url_host(&url, link)?;
    let port = url_port(&url, link, Some(443))?;

    let mut params = QueryParams::from_url(&url);

    // Legacy shadowrocket style: ws=1&wspath=/path
    if params.take("ws").as_deref() == Some("1") {
        params.insert("type", "ws");
        if let Some(path) = params.take("wspath") {
            params.insert("path", path);
        }
    }

    let mut transport = build_transport(&mut params, link, "tls")?;
    transport.extra = params.into_extra();

    let remark = url.fragment().map(decode_fragment).unwrap_or_default();

    Ok(ParsedNode::new(
        Protocol::Trojan,
        Identity::Password(password),
        host,
        port,
        transport,
        remark,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Network, Security};

    #[test]
    fn test_trojan_defaults() {
        let node = explode_trojan("trojan://secret@example.com?peer=cdn.example.com#JP").unwrap();
        assert_eq!(node.port, 443);
        assert_eq!(node.identity, Identity::Password("secret".to_string()));
        assert_eq!(node.transport.sni(), Some("cdn.example.com"));
        assert!(matches!(node.transport.security, Security::Tls(_)));
        assert_eq!(node.display_name, "JP");
    }

    #[test]
    fn test_trojan_legacy_ws() {
        let node =
            explode_trojan("trojan://p%40ss@1.2.3.4:8443?ws=1&wspath=%2Fws&tfo=1").unwrap();
        assert_eq!(node.identity, Identity::Password("p@ss".to_string()));
        assert_eq!(
            node.transport.network,
            Network::Ws {
                path: Some("/ws".to_string()),
                host: None
            }
        );
        assert_eq!(node.transport.extra.get("tfo").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_trojan_password_with_colon() {
        let node = explode_trojan("trojan://pa:ss@h.example:443#T").unwrap();
        assert_eq!(node.identity, Identity::Password("pa:ss".to_string()));
        assert_eq!(node.display_name, "T");
    }

    #[test]
    fn test_trojan_plain() {
        let node = explode_trojan("trojan://pw@h.example:443?security=none").unwrap();
        assert_eq!(node.transport.security, Security::None);
    }

    #[test]
    fn test_trojan_missing_password() {
        assert!(matches!(
            explode_trojan("trojan://@host:443"),
            Err(ParseError::MalformedLink { .. })
        ));
    }
}
