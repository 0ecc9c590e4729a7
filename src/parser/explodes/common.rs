use std::collections::BTreeMap;

use url::{Host, Url};

use crate::error::{ParseError, Result};
use crate::models::{
    FilterRule, Network, ParsedNode, RealityOptions, Security, TlsOptions, TransportOptions,
};
use crate::utils::matcher::CompiledRules;
use crate::utils::url::url_decode;

/// Schemes with a dedicated parser.
pub const SUPPORTED_SCHEMES: &[&str] = &[
    "vless",
    "vmess",
    "trojan",
    "ss",
    "hysteria2",
    "hy2",
];

/// Returns the lowercased scheme of a link, if it has one.
pub fn link_scheme(link: &str) -> Option<String> {
    let pos = link.find("://")?;
    let scheme = &link[..pos];
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

/// Whether a subscription line is a link this crate can parse.
pub fn is_direct_link(line: &str) -> bool {
    link_scheme(line.trim())
        .map(|scheme| SUPPORTED_SCHEMES.contains(&scheme.as_str()))
        .unwrap_or(false)
}

/// Explode a proxy link into a node
///
/// This function detects the type of proxy link and calls the appropriate parser.
/// A node matched by any skip rule is dropped: `Ok(None)` means "skipped", never
/// "failed".
pub fn explode(link: &str, skip: &CompiledRules) -> Result<Option<ParsedNode>> {
    let link = link.trim();
    let scheme = link_scheme(link).ok_or_else(|| {
        let shown: String = link.chars().take(16).collect();
        ParseError::UnsupportedScheme(shown)
    })?;

    let node = match scheme.as_str() {
        "vless" => super::vless::explode_vless(link)?,
        "vmess" => super::vmess::explode_vmess(link)?,
        "trojan" => super::trojan::explode_trojan(link)?,
        "ss" => super::ss::explode_ss(link)?,
        "hysteria2" | "hy2" => super::hysteria2::explode_hysteria2(link)?,
        _ => return Err(ParseError::UnsupportedScheme(scheme)),
    };

    if skip.any_match(&node) {
        return Ok(None);
    }
    Ok(Some(node))
}

/// Parse one link with a list of skip rules.
pub fn parse_node(uri: &str, skip_filters: &[FilterRule]) -> Result<Option<ParsedNode>> {
    explode(uri, &CompiledRules::new(skip_filters))
}

pub(crate) fn parse_url(link: &str) -> Result<Url> {
    Url::parse(link).map_err(|e| ParseError::malformed(link, format!("invalid URL: {}", e)))
}

/// Password-style userinfo. An unescaped `:` splits it into username and
/// password, so both halves are joined back.
pub(crate) fn userinfo_secret(url: &Url) -> String {
    match url.password() {
        Some(pass) => format!("{}:{}", url_decode(url.username()), url_decode(pass)),
        None => url_decode(url.username()),
    }
}

/// Extracts the host without IPv6 brackets.
pub(crate) fn url_host(url: &Url, link: &str) -> Result<String> {
    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Domain(domain)) => domain.to_string(),
        None => String::new(),
    };
    if host.is_empty() {
        return Err(ParseError::malformed(link, "missing host"));
    }
    Ok(host)
}

/// Port from the authority, or `default` when the link omits it.
pub(crate) fn url_port(url: &Url, link: &str, default: Option<u16>) -> Result<u16> {
    match url.port().or(default) {
        Some(0) => Err(ParseError::malformed(link, "port 0")),
        Some(port) => Ok(port),
        None => Err(ParseError::malformed(link, "missing port")),
    }
}

/// Parses `host:port`, `[v6]:port`.
pub(crate) fn split_host_port(input: &str, link: &str) -> Result<(String, u16)> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| ParseError::malformed(link, "missing port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ParseError::malformed(link, "missing host"));
    }
    let port = port
        .trim_end_matches('/')
        .parse::<u16>()
        .map_err(|_| ParseError::malformed(link, format!("invalid port: {}", port)))?;
    if port == 0 {
        return Err(ParseError::malformed(link, "port 0"));
    }
    Ok((host.to_string(), port))
}

/// Lowercase hyphenated form for valid UUIDs; anything else is kept verbatim.
pub(crate) fn normalize_uuid(raw: &str) -> String {
    match uuid::Uuid::parse_str(raw.trim()) {
        Ok(id) => id.hyphenated().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Query parameters of a link. Parsers `take` what they understand; whatever
/// is left becomes the node's `extra` options.
#[derive(Debug, Default)]
pub(crate) struct QueryParams {
    params: BTreeMap<String, String>,
}

impl QueryParams {
    pub fn from_url(url: &Url) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in url.query_pairs() {
            params.insert(key.to_string(), value.to_string());
        }
        QueryParams { params }
    }

    pub fn from_query(query: &str) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.to_string(), value.to_string());
        }
        QueryParams { params }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.params.insert(key.to_string(), value.into());
    }

    /// Removes `key`; empty values count as absent.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.params
            .remove(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value among `keys`; all of them are consumed.
    pub fn take_first(&mut self, keys: &[&str]) -> Option<String> {
        let mut found = None;
        for key in keys {
            let value = self.take(key);
            if found.is_none() {
                found = value;
            }
        }
        found
    }

    pub fn take_bool(&mut self, keys: &[&str], link: &str) -> Result<Option<bool>> {
        match self.take_first(keys) {
            None => Ok(None),
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(Some(true)),
                "0" | "false" | "no" => Ok(Some(false)),
                _ => Err(ParseError::malformed(
                    link,
                    format!("invalid boolean {}={}", keys[0], raw),
                )),
            },
        }
    }

    pub fn into_extra(self) -> BTreeMap<String, String> {
        self.params
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Builds security and network options from the xray-style query keys shared by
/// vless, trojan and vmess links.
pub(crate) fn build_transport(
    params: &mut QueryParams,
    link: &str,
    default_security: &str,
) -> Result<TransportOptions> {
    let security_name = params
        .take("security")
        .unwrap_or_else(|| default_security.to_string())
        .to_lowercase();

    let tls = TlsOptions {
        server_name: params.take_first(&["sni", "peer"]),
        insecure: params
            .take_bool(&["allowInsecure", "insecure"], link)?
            .unwrap_or(false),
        fingerprint: params.take("fp"),
        alpn: split_list(params.take("alpn")),
    };

    let security = match security_name.as_str() {
        "" | "none" => Security::None,
        "tls" | "xtls" => Security::Tls(tls),
        "reality" => Security::Reality(RealityOptions {
            tls,
            public_key: params.take("pbk").unwrap_or_default(),
            short_id: params.take("sid"),
        }),
        other => {
            return Err(ParseError::malformed(
                link,
                format!("unknown security: {}", other),
            ))
        }
    };

    let network_name = params
        .take("type")
        .unwrap_or_else(|| "tcp".to_string())
        .to_lowercase();
    let network = match network_name.as_str() {
        "tcp" | "raw" => {
            let header_type = params.take("headerType").filter(|h| h != "none");
            let (path, host) = if header_type.as_deref() == Some("http") {
                (params.take("path"), split_list(params.take("host")))
            } else {
                (None, Vec::new())
            };
            Network::Tcp {
                header_type,
                path,
                host,
            }
        }
        "ws" | "websocket" => Network::Ws {
            path: params.take("path"),
            host: params.take("host"),
        },
        "grpc" | "gun" => Network::Grpc {
            service_name: params.take("serviceName"),
        },
        "http" | "h2" => Network::Http {
            path: params.take("path"),
            host: split_list(params.take("host")),
        },
        "httpupgrade" => Network::HttpUpgrade {
            path: params.take("path"),
            host: params.take("host"),
        },
        other => Network::Other(other.to_string()),
    };

    Ok(TransportOptions {
        security,
        network,
        ..Default::default()
    })
}
