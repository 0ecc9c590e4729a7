//! Reading and writing ParserConfig documents.

use std::fs;
use std::path::Path;

use log::debug;

use super::normalize::normalize;
use crate::error::{ParseError, Result};
use crate::models::ParserConfig;

/// Parse a ParserConfig document from JSON text.
pub fn parse_parser_config(content: &str) -> Result<ParserConfig> {
    serde_json::from_str(content)
        .map_err(|e| ParseError::SchemaViolation(format!("invalid ParserConfig: {}", e)))
}

/// Read a ParserConfig document from disk without normalizing it.
pub fn load_parser_config<P: AsRef<Path>>(path: P) -> Result<ParserConfig> {
    let path = path.as_ref();
    debug!("Loading ParserConfig from {}", path.display());
    let content = fs::read_to_string(path)?;
    parse_parser_config(&content)
}

/// Read and normalize in one step.
pub fn load_normalized<P: AsRef<Path>>(path: P, strict: bool) -> Result<ParserConfig> {
    let mut doc = load_parser_config(path)?;
    normalize(&mut doc, strict)?;
    Ok(doc)
}

/// Pretty-printed JSON, the form the configuration is persisted in.
pub fn render_parser_config(doc: &ParserConfig) -> Result<String> {
    serde_json::to_string_pretty(doc)
        .map_err(|e| ParseError::SchemaViolation(format!("unserializable ParserConfig: {}", e)))
}

pub fn save_parser_config<P: AsRef<Path>>(path: P, doc: &ParserConfig) -> Result<()> {
    fs::write(path, render_parser_config(doc)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::normalize::CURRENT_PARSER_CONFIG_VERSION;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_and_normalize_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": 1, "ParserConfig": {{"proxies": [{{"source": "https://a.example/sub"}}]}}}}"#
        )
        .unwrap();

        let doc = load_normalized(file.path(), true).unwrap();
        assert_eq!(doc.version, CURRENT_PARSER_CONFIG_VERSION);
        assert_eq!(doc.parser_config.parser.reload, "4h");
        assert_eq!(doc.proxies()[0].source, "https://a.example/sub");
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            parse_parser_config("{not json"),
            Err(ParseError::SchemaViolation(_))
        ));
        assert!(matches!(
            parse_parser_config(r#"{"version": "two"}"#),
            Err(ParseError::SchemaViolation(_))
        ));
        assert!(matches!(
            load_parser_config("/nonexistent/parser_config.json"),
            Err(ParseError::Io(_))
        ));
    }

    #[test]
    fn test_save_round_trips_normalized_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut doc =
            parse_parser_config(r#"{"ParserConfig": {"outbounds": [{"tag": "proxy-out"}]}}"#)
                .unwrap();
        normalize(&mut doc, false).unwrap();

        save_parser_config(&path, &doc).unwrap();
        let reloaded = load_parser_config(&path).unwrap();
        assert_eq!(reloaded, doc);
        assert_eq!(reloaded.outbounds()[0].type_field, "selector");
    }
}
