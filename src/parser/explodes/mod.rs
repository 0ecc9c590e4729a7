pub mod common;
pub mod hysteria2;
pub mod ss;
pub mod trojan;
pub mod vless;
pub mod vmess;

pub use common::{explode, is_direct_link, link_scheme, parse_node, SUPPORTED_SCHEMES};
