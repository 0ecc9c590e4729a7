use super::common::{build_transport, normalize_uuid, parse_url, url_host, url_port, QueryParams};
use crate::error::{ParseError, Result};
use crate::models::{Identity, ParsedNode, Protocol};
use crate::utils::url::{decode_fragment, url_decode};

/// Parse a VLESS link into a node
///
/// Format: `vless://uuid@host:port?encryption=none&security=reality&...#name`
pub fn explode_vless(link: &str) -> Result<ParsedNode> {
    let url = parse_url(link)?;

    let uuid = url_decode(url.username());
    if uuid.trim().is_empty() {
        return Err(ParseError::malformed(link, "missing uuid"));
    }

    let host = url_host(&url, link)?;
    let port = url_port(&url, link, None)?;

    let mut params = QueryParams::from_url(&url);

    // VLESS has no body encryption; anything but "none" is a broken link
    if let Some(encryption) = params.take("encryption") {
        if encryption != "none" {
            return Err(ParseError::malformed(
                link,
                format!("unsupported encryption: {}", encryption),
            ));
        }
    }

    let flow = params.take("flow");
    let mut transport = build_transport(&mut params, link, "none")?;
    transport.flow = flow;
    transport.extra = params.into_extra();

    let remark = url.fragment().map(decode_fragment).unwrap_or_default();

    Ok(ParsedNode::new(
        Protocol::Vless,
        Identity::Uuid {
            uuid: normalize_uuid(&uuid),
            alter_id: 0,
        },
        host,
        port,
        transport,
        remark,
    ))
}
