//! Proxy node model definitions
//!
//! Contains the canonical representation of one proxy endpoint parsed from a
//! subscription link.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Represents the protocol family of a node.
/// This is the canonical enum used for protocol identification across the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
    Hysteria2,
}

impl Protocol {
    /// The outbound `type` the external process expects.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Hysteria2 => "hysteria2",
        }
    }
}

/// Protocol-specific credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// vless and vmess user id; `alter_id` is always 0 for vless.
    Uuid { uuid: String, alter_id: u16 },
    /// trojan and hysteria2
    Password(String),
    /// shadowsocks
    Cipher { method: String, password: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub server_name: Option<String>,
    pub insecure: bool,
    pub fingerprint: Option<String>,
    pub alpn: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealityOptions {
    pub tls: TlsOptions,
    pub public_key: String,
    pub short_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Security {
    #[default]
    None,
    Tls(TlsOptions),
    Reality(RealityOptions),
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls(_) => "tls",
            Security::Reality(_) => "reality",
        }
    }

    pub fn tls_options(&self) -> Option<&TlsOptions> {
        match self {
            Security::None => None,
            Security::Tls(tls) => Some(tls),
            Security::Reality(reality) => Some(&reality.tls),
        }
    }
}

/// Stream transport carried under the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    /// `path` and `host` only apply to the `http` header obfuscation.
    Tcp {
        header_type: Option<String>,
        path: Option<String>,
        host: Vec<String>,
    },
    Ws { path: Option<String>, host: Option<String> },
    Grpc { service_name: Option<String> },
    Http { path: Option<String>, host: Vec<String> },
    HttpUpgrade { path: Option<String>, host: Option<String> },
    /// Anything the generator has no mapping for (kcp, quic, xhttp, ...).
    Other(String),
}

impl Default for Network {
    fn default() -> Self {
        Network::Tcp {
            header_type: None,
            path: None,
            host: Vec::new(),
        }
    }
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp { .. } => "tcp",
            Network::Ws { .. } => "ws",
            Network::Grpc { .. } => "grpc",
            Network::Http { .. } => "http",
            Network::HttpUpgrade { .. } => "httpupgrade",
            Network::Other(name) => name,
        }
    }
}

/// Shadowsocks SIP003 plugin, `plugin=name;opt=value;...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsPlugin {
    pub name: String,
    pub opts: String,
}

/// Hysteria2 salamander obfuscation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hy2Obfs {
    pub kind: String,
    pub password: String,
}

/// Protocol and transport options of a node.
///
/// Known combinations are typed; every query key a parser did not consume ends
/// up in `extra` so nothing a provider sends is lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub security: Security,
    pub network: Network,
    /// vless flow control, e.g. `xtls-rprx-vision`
    pub flow: Option<String>,
    /// vmess body cipher (`auto`, `aes-128-gcm`, ...)
    pub cipher: Option<String>,
    pub plugin: Option<SsPlugin>,
    pub obfs: Option<Hy2Obfs>,
    pub extra: BTreeMap<String, String>,
}

impl TransportOptions {
    pub fn sni(&self) -> Option<&str> {
        self.security
            .tls_options()
            .and_then(|tls| tls.server_name.as_deref())
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.security
            .tls_options()
            .and_then(|tls| tls.fingerprint.as_deref())
    }
}

/// Canonical representation of one proxy endpoint.
///
/// `tag` is empty until the ledger assigns one and `outbound` is absent until
/// [`ParsedNode::generate`] runs. Generation consumes the node, and the tag can
/// only be set from inside the crate, so a generated node is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    pub protocol: Protocol,
    pub identity: Identity,
    pub server: String,
    pub port: u16,
    pub transport: TransportOptions,
    pub display_name: String,
    tag: String,
    outbound: Option<Map<String, Value>>,
}

impl ParsedNode {
    pub fn new(
        protocol: Protocol,
        identity: Identity,
        server: String,
        port: u16,
        transport: TransportOptions,
        display_name: String,
    ) -> Self {
        let display_name = if display_name.trim().is_empty() {
            format!("{}:{}", server, port)
        } else {
            display_name
        };
        ParsedNode {
            protocol,
            identity,
            server,
            port,
            transport,
            display_name,
            tag: String::new(),
            outbound: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn outbound(&self) -> Option<&Map<String, Value>> {
        self.outbound.as_ref()
    }

    pub fn is_generated(&self) -> bool {
        self.outbound.is_some()
    }

    pub(crate) fn set_tag(&mut self, tag: String) {
        debug_assert!(self.outbound.is_none(), "tag changed after generation");
        self.tag = tag;
    }

    /// Renders the outbound descriptor and freezes the node.
    pub fn generate(mut self) -> crate::Result<Self> {
        if self.outbound.is_none() {
            self.outbound = Some(crate::generator::generate_outbound(&self)?);
        }
        Ok(self)
    }

    /// Tag used for filtering: the allocated one, or the candidate derived from
    /// the display name before allocation.
    pub fn filter_tag(&self) -> String {
        if self.tag.is_empty() {
            crate::ledger::tag_candidate(&self.display_name, &self.server, self.port)
        } else {
            self.tag.clone()
        }
    }
}
