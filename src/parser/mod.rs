pub mod explodes;
pub mod subparser;

pub use explodes::{explode, is_direct_link, parse_node};
pub use subparser::{split_links, BatchReport, LinkFailure, SourceProcessor, SourceReport};
