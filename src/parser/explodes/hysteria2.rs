use super::common::{parse_url, url_host, url_port, userinfo_secret, QueryParams};
use crate::error::{ParseError, Result};
use crate::models::{
    Hy2Obfs, Identity, ParsedNode, Protocol, Security, TlsOptions, TransportOptions,
};
use crate::utils::url::decode_fragment;

/// Parse a Hysteria2 link into a node
///
/// Accepts both `hysteria2://` and the short `hy2://` scheme:
/// `hy2://password@host[:port]?sni=...&obfs=salamander&obfs-password=...#name`.
/// Hysteria2 always runs over TLS; the port defaults to 443.
pub fn explode_hysteria2(link: &str) -> Result<ParsedNode> {
    let url = parse_url(link)?;

    let password = userinfo_secret(&url);
    if password.is_empty() {
        return Err(ParseError::malformed(link, "missing password"));
    }

    let host = url_host(&url, link)?;
    let port = url_port(&url, link, Some(443))?;

    let mut params = QueryParams::from_url(&url);

    let tls = TlsOptions {
        server_name: params.take_first(&["sni", "peer"]),
        insecure: params
            .take_bool(&["insecure", "allowInsecure"], link)?
            .unwrap_or(false),
        fingerprint: None,
        alpn: params
            .take("alpn")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    };

    let obfs_password = params.take("obfs-password");
    let obfs = match params.take("obfs") {
        None => None,
        Some(kind) if kind == "none" => None,
        Some(kind) => Some(Hy2Obfs {
            kind,
            password: obfs_password.ok_or_else(|| {
                ParseError::malformed(link, "obfs without obfs-password")
            })?,
        }),
    };

    let transport = TransportOptions {
        security: Security::Tls(tls),
        obfs,
        extra: params.into_extra(),
        ..Default::default()
    };

    let remark = url.fragment().map(decode_fragment).unwrap_or_default();

    Ok(ParsedNode::new(
        Protocol::Hysteria2,
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

    #[test]
    fn test_hy2_short_scheme() {
        let node = explode_hysteria2(
            "hy2://letmein@example.com:8443?sni=real.example.com&insecure=1&obfs=salamander&obfs-password=gawr&up=100#HY2%20Node",
        )
        .unwrap();

        assert_eq!(node.protocol, Protocol::Hysteria2);
        assert_eq!(node.identity, Identity::Password("letmein".to_string()));
        assert_eq!(node.port, 8443);
        assert_eq!(node.display_name, "HY2 Node");
        assert_eq!(node.transport.sni(), Some("real.example.com"));
        assert_eq!(
            node.transport.obfs,
            Some(Hy2Obfs {
                kind: "salamander".to_string(),
                password: "gawr".to_string()
            })
        );
        assert_eq!(node.transport.extra.get("up").map(String::as_str), Some("100"));
        match &node.transport.security {
            Security::Tls(tls) => assert!(tls.insecure),
            other => panic!("expected tls, got {:?}", other),
        }
    }

    #[test]
    fn test_hysteria2_defaults() {
        let node = explode_hysteria2("hysteria2://user:pass@[2001:db8::2]/").unwrap();
        assert_eq!(node.port, 443);
        assert_eq!(node.server, "2001:db8::2");
        assert_eq!(node.identity, Identity::Password("user:pass".to_string()));
        assert!(node.transport.obfs.is_none());
        assert_eq!(node.display_name, "2001:db8::2:443");
    }

    #[test]
    fn test_hysteria2_malformed() {
        for link in [
            "hy2://@example.com:443",
            "hy2://pw@example.com:443?obfs=salamander",
            "hy2://pw@example.com:443?insecure=sometimes",
        ] {
            assert!(
                matches!(explode_hysteria2(link), Err(ParseError::MalformedLink { .. })),
                "{} should be malformed",
                link
            );
        }
    }
}
