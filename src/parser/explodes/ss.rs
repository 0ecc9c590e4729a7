use super::common::{split_host_port, QueryParams};
use crate::error::{ParseError, Result};
use crate::models::{Identity, ParsedNode, Protocol, SsPlugin, TransportOptions};
use crate::utils::base64::base64_decode_bytes;
use crate::utils::url::{decode_fragment, split_fragment, url_decode};

/// Parse a Shadowsocks link into a node
///
/// Handles SIP002 (`ss://base64(method:password)@host:port?plugin=...#name`,
/// also with a plain percent-encoded `method:password`) and the legacy form
/// `ss://base64(method:password@host:port)#name`.
pub fn explode_ss(link: &str) -> Result<ParsedNode> {
    let body = link.split_once("://").map(|(_, rest)| rest).unwrap_or(link);

    let (body, fragment) = split_fragment(body);
    let remark = fragment.map(decode_fragment).unwrap_or_default();

    // Replace "/?" with "?" so the query split works for both spellings
    let body = body.replace("/?", "?");
    let (main, query) = match body.split_once('?') {
        Some((main, query)) => (main.to_string(), Some(query.to_string())),
        None => (body.trim_end_matches('/').to_string(), None),
    };

    let (method, password, server, port) = if let Some((secret, server_port)) =
        main.rsplit_once('@')
    {
        let (method, password) = decode_secret(secret, link)?;
        let (server, port) = split_host_port(server_port, link)?;
        (method, password, server, port)
    } else {
        let decoded = base64_decode_bytes(&main)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| ParseError::malformed(link, "undecodable legacy payload"))?;
        let (secret, server_port) = decoded
            .rsplit_once('@')
            .ok_or_else(|| ParseError::malformed(link, "missing server"))?;
        let (method, password) = split_method_password(secret, link)?;
        let (server, port) = split_host_port(server_port, link)?;
        (method, password, server, port)
    };

    let mut params = query
        .as_deref()
        .map(QueryParams::from_query)
        .unwrap_or_default();

    let plugin = params.take("plugin").map(|raw| {
        let raw = url_decode(&raw);
        match raw.split_once(';') {
            Some((name, opts)) => SsPlugin {
                name: name.to_string(),
                opts: opts.to_string(),
            },
            None => SsPlugin {
                name: raw,
                opts: String::new(),
            },
        }
    });

    let transport = TransportOptions {
        plugin,
        extra: params.into_extra(),
        ..Default::default()
    };

    Ok(ParsedNode::new(
        Protocol::Shadowsocks,
        Identity::Cipher { method, password },
        server,
        port,
        transport,
        remark,
    ))
}

/// SIP002 userinfo: base64 of `method:password`, or the percent-encoded pair
/// used by 2022 ciphers.
fn decode_secret(secret: &str, link: &str) -> Result<(String, String)> {
    if let Some(decoded) = base64_decode_bytes(secret).and_then(|b| String::from_utf8(b).ok()) {
        if decoded.contains(':') {
            return split_method_password(&decoded, link);
        }
    }
    split_method_password(&url_decode(secret), link)
}

fn split_method_password(secret: &str, link: &str) -> Result<(String, String)> {
    // The password may itself contain colons
    let (method, password) = secret
        .split_once(':')
        .ok_or_else(|| ParseError::malformed(link, "missing method or password"))?;
    if method.is_empty() || password.is_empty() {
        return Err(ParseError::malformed(link, "missing method or password"));
    }
    Ok((method.to_lowercase(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose, Engine};

    #[test]
    fn test_sip002_base64_userinfo() {
        let secret = general_purpose::URL_SAFE_NO_PAD.encode("aes-256-gcm:pa:ss");
        let link = format!(
            "ss://{}@198.51.100.7:8388/?plugin=obfs-local%3Bobfs%3Dhttp%3Bobfs-host%3Dexample.com&group=x#%E6%97%A5%E6%9C%AC",
            secret
        );
        let node = explode_ss(&link).unwrap();

        assert_eq!(
            node.identity,
            Identity::Cipher {
                method: "aes-256-gcm".to_string(),
                password: "pa:ss".to_string()
            }
        );
        assert_eq!(node.server, "198.51.100.7");
        assert_eq!(node.port, 8388);
        assert_eq!(node.display_name, "日本");
        let plugin = node.transport.plugin.as_ref().unwrap();
        assert_eq!(plugin.name, "obfs-local");
        assert_eq!(plugin.opts, "obfs=http;obfs-host=example.com");
        assert_eq!(node.transport.extra.get("group").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_sip002_plain_userinfo() {
        let node = explode_ss(
            "ss://2022-blake3-aes-128-gcm:YctPZ6U7xPPcU%2Bgp3u%2B0tx%2FtRizJN9K8y%2BuKlW2qjlI%3D@[2001:db8::1]:443#v6",
        )
        .unwrap();
        assert_eq!(node.server, "2001:db8::1");
        assert_eq!(
            node.identity,
            Identity::Cipher {
                method: "2022-blake3-aes-128-gcm".to_string(),
                password: "YctPZ6U7xPPcU+gp3u+0tx/tRizJN9K8y+uKlW2qjlI=".to_string()
            }
        );
    }

    #[test]
    fn test_legacy_form() {
        let payload =
            general_purpose::STANDARD.encode("chacha20-ietf-poly1305:secret@10.0.0.1:8000");
        let node = explode_ss(&format!("ss://{}#Legacy", payload)).unwrap();
        assert_eq!(node.server, "10.0.0.1");
        assert_eq!(node.port, 8000);
        assert_eq!(node.display_name, "Legacy");
        assert!(node.transport.plugin.is_none());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            explode_ss("ss://!!!#x"),
            Err(ParseError::MalformedLink { .. })
        ));
        let secret = general_purpose::STANDARD.encode("aes-128-gcm:pw");
        assert!(matches!(
            explode_ss(&format!("ss://{}@host#noport", secret)),
            Err(ParseError::MalformedLink { .. })
        ));
    }
}
