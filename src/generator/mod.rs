pub mod singbox;

pub use singbox::{
    check_supported, generate_all, generate_outbound, generate_selector, render_fragment,
};
