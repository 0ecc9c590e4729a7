use super::common::{build_transport, normalize_uuid, parse_url, url_host, url_port, QueryParams};
use crate::error::{ParseError, Result};
use crate::models::{Identity, ParsedNode, Protocol};
use crate::utils::base64::base64_decode_bytes;
use crate::utils::url::{decode_fragment, split_fragment, url_decode};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    // uuid-alterId userinfo of the old std vmess form
    static ref UUID_AID_REGEX: Regex = Regex::new(
        r"^([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})-(\d+)$"
    )
    .unwrap();
}

/// Parse a VMess link into a node
///
/// Tries the v2rayN base64 JSON form first, then the URI form
/// `vmess://uuid@host:port?type=ws&security=tls#name`.
pub fn explode_vmess(link: &str) -> Result<ParsedNode> {
    let body = link.split_once("://").map(|(_, rest)| rest).unwrap_or(link);
    let (payload, _) = split_fragment(body);

    if let Some(json) = base64_decode_bytes(payload)
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .filter(Value::is_object)
    {
        return explode_vmess_json(link, &json);
    }

    if payload.contains('@') {
        return explode_std_vmess(link);
    }

    Err(ParseError::malformed(link, "undecodable vmess payload"))
}

/// Reads a field that providers send either as a string or as a number.
fn json_str(json: &Value, key: &str) -> Option<String> {
    match &json[key] {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn explode_vmess_json(link: &str, json: &Value) -> Result<ParsedNode> {
    let version = json_str(json, "v")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(1);

    let server = json_str(json, "add").ok_or_else(|| ParseError::malformed(link, "missing add"))?;
    let port = json_str(json, "port")
        .ok_or_else(|| ParseError::malformed(link, "missing port"))?
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ParseError::malformed(link, "invalid port"))?;
    let uuid = json_str(json, "id").ok_or_else(|| ParseError::malformed(link, "missing id"))?;
    let alter_id = match json_str(json, "aid") {
        None => 0,
        Some(aid) => aid
            .parse::<u16>()
            .map_err(|_| ParseError::malformed(link, format!("invalid aid: {}", aid)))?,
    };

    let net = json_str(json, "net").unwrap_or_else(|| "tcp".to_string());
    let mut host = json_str(json, "host");
    let mut path = json_str(json, "path");

    // v1 packed "host;path" into the host field
    if version == 1 && path.is_none() {
        let packed = host
            .as_deref()
            .and_then(|h| h.split_once(';'))
            .map(|(h, p)| (h.to_string(), p.to_string()));
        if let Some((h, p)) = packed {
            host = Some(h).filter(|s| !s.is_empty());
            path = Some(p).filter(|s| !s.is_empty());
        }
    }

    // Re-express the JSON fields as link query keys and share the link logic
    let mut params = QueryParams::default();
    params.insert("type", net.clone());
    if let Some(security) = json_str(json, "tls") {
        params.insert("security", security);
    }
    for key in ["sni", "fp", "alpn", "allowInsecure"] {
        if let Some(value) = json_str(json, key) {
            params.insert(key, value);
        }
    }
    if let Some(header) = json_str(json, "type") {
        params.insert("headerType", header);
    }
    if let Some(host) = host {
        params.insert("host", host);
    }
    if let Some(path) = path {
        let key = if net == "grpc" { "serviceName" } else { "path" };
        params.insert(key, path);
    }

    let mut transport = build_transport(&mut params, link, "none")?;
    transport.cipher = json_str(json, "scy").or_else(|| json_str(json, "security"));
    transport.extra = params.into_extra();

    Ok(ParsedNode::new(
        Protocol::Vmess,
        Identity::Uuid {
            uuid: normalize_uuid(&uuid),
            alter_id,
        },
        server,
        port,
        transport,
        json_str(json, "ps").unwrap_or_default(),
    ))
}

/// Parse a URI form VMess link.
fn explode_std_vmess(link: &str) -> Result<ParsedNode> {
    let url = parse_url(link)?;

    let userinfo = url_decode(url.username());
    if userinfo.is_empty() {
        return Err(ParseError::malformed(link, "missing uuid"));
    }
    let (uuid, alter_id) = match UUID_AID_REGEX.captures(&userinfo) {
        Some(caps) => (
            caps[1].to_string(),
            caps[2]
                .parse::<u16>()
                .map_err(|_| ParseError::malformed(link, "invalid alterId"))?,
        ),
        None => (userinfo, 0),
    };

    let host = url_host(&url, link)?;
    let port = url_port(&url, link, None)?;

    let mut params = QueryParams::from_url(&url);
    if let Some(network) = params.take("network") {
        params.insert("type", network);
    }
    let tls_flag = params.take("tls");
    if let Some(tls) = tls_flag {
        if tls == "1" || tls == "tls" || tls == "true" {
            params.insert("security", "tls");
        }
    }
    let cipher = params.take_first(&["encryption", "scy"]);
    let alter_id = match params.take("alterId") {
        Some(aid) => aid
            .parse::<u16>()
            .map_err(|_| ParseError::malformed(link, "invalid alterId"))?,
        None => alter_id,
    };

    let mut transport = build_transport(&mut params, link, "none")?;
    transport.cipher = cipher;
    transport.extra = params.into_extra();

    let remark = url.fragment().map(decode_fragment).unwrap_or_default();

    Ok(ParsedNode::new(
        Protocol::Vmess,
        Identity::Uuid {
            uuid: normalize_uuid(&uuid),
            alter_id,
        },
        host,
        port,
        transport,
        remark,
    ))
}
