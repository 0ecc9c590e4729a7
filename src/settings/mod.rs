//! ParserConfig loading and normalization.

pub mod load;
pub mod normalize;

pub use load::{
    load_normalized, load_parser_config, parse_parser_config, render_parser_config,
    save_parser_config,
};
pub use normalize::{
    normalize, parse_duration, CURRENT_PARSER_CONFIG_VERSION, DEFAULT_RELOAD,
    DEFAULT_RELOAD_INTERVAL,
};
