//! Bringing a ParserConfig document up to the current schema version.

use std::collections::HashSet;
use std::time::Duration;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::error::{ParseError, Result};
use crate::generator::singbox::GROUP_TYPES;
use crate::models::ParserConfig;

pub const CURRENT_PARSER_CONFIG_VERSION: u32 = 2;

pub const DEFAULT_RELOAD: &str = "4h";
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

lazy_static! {
    static ref DURATION_PART: Regex = Regex::new(r"^(\d+(?:\.\d+)?)(ms|h|m|s)").unwrap();
}

/// Parses Go-style durations made of `h`, `m`, `s` and `ms` parts, e.g. `4h`,
/// `1h30m` or `90s`. Zero and malformed values yield `None`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let caps = DURATION_PART.captures(rest)?;
        let value: f64 = caps[1].parse().ok()?;
        let millis = match &caps[2] {
            "h" => value * 3_600_000.0,
            "m" => value * 60_000.0,
            "s" => value * 1_000.0,
            _ => value,
        };
        total += millis;
        rest = &rest[caps[0].len()..];
    }

    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(Duration::from_millis(total.round() as u64))
}

fn violation(strict: bool, message: String) -> Result<()> {
    if strict {
        Err(ParseError::SchemaViolation(message))
    } else {
        warn!("{}; repairing", message);
        Ok(())
    }
}

/// Normalize a ParserConfig in place
///
/// Legacy root fields are moved into the nested body, both version fields are
/// raised to [`CURRENT_PARSER_CONFIG_VERSION`] and defaults are filled in. A
/// newer version is kept as is so saving the document never downgrades it. In
/// strict mode every repair that would change the meaning of the document is
/// an error instead; the document may be partially updated when that happens.
pub fn normalize(doc: &mut ParserConfig, strict: bool) -> Result<()> {
    let version = doc.effective_version();
    if version > CURRENT_PARSER_CONFIG_VERSION {
        violation(
            strict,
            format!(
                "ParserConfig version {} is newer than supported version {}",
                version, CURRENT_PARSER_CONFIG_VERSION
            ),
        )?;
    }

    hoist_legacy_fields(doc, strict)?;

    let version = version.max(CURRENT_PARSER_CONFIG_VERSION);
    doc.version = version;
    doc.parser_config.version = version;

    let meta = &mut doc.parser_config.parser;
    if meta.reload.trim().is_empty() {
        meta.reload = DEFAULT_RELOAD.to_string();
    } else if parse_duration(&meta.reload).is_none() {
        violation(strict, format!("invalid reload interval {:?}", meta.reload))?;
        meta.reload = DEFAULT_RELOAD.to_string();
    } else {
        meta.reload = meta.reload.trim().to_string();
    }

    normalize_outbounds(doc, strict)
}

fn hoist_legacy_fields(doc: &mut ParserConfig, strict: bool) -> Result<()> {
    let body = &mut doc.parser_config;

    if let Some(legacy) = doc.proxies.take().filter(|p| !p.is_empty()) {
        if body.proxies.is_empty() {
            body.proxies = legacy;
        } else {
            violation(
                strict,
                "proxies present both at the root and in ParserConfig".to_string(),
            )?;
            body.proxies.extend(legacy);
        }
    }

    if let Some(legacy) = doc.outbounds.take().filter(|o| !o.is_empty()) {
        if body.outbounds.is_empty() {
            body.outbounds = legacy;
        } else {
            violation(
                strict,
                "outbounds present both at the root and in ParserConfig".to_string(),
            )?;
            body.outbounds.extend(legacy);
        }
    }

    if let Some(legacy) = doc.reload.take().filter(|r| !r.trim().is_empty()) {
        if body.parser.reload.trim().is_empty() {
            body.parser.reload = legacy;
        } else if body.parser.reload.trim() != legacy.trim() {
            violation(
                strict,
                format!(
                    "reload {:?} at the root conflicts with {:?} in ParserConfig",
                    legacy, body.parser.reload
                ),
            )?;
        }
    }

    Ok(())
}

fn normalize_outbounds(doc: &mut ParserConfig, strict: bool) -> Result<()> {
    let outbounds = std::mem::take(&mut doc.parser_config.outbounds);
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(outbounds.len());

    for mut cfg in outbounds {
        cfg.tag = cfg.tag.trim().to_string();
        if cfg.tag.is_empty() {
            violation(strict, "outbound without a tag".to_string())?;
            continue;
        }

        let kind = cfg.type_field.trim().to_lowercase();
        cfg.type_field = if kind.is_empty() {
            "selector".to_string()
        } else if GROUP_TYPES.contains(&kind.as_str()) {
            kind
        } else {
            violation(
                strict,
                format!("outbound {} has unsupported type {:?}", cfg.tag, kind),
            )?;
            "selector".to_string()
        };

        if !seen.insert(cfg.tag.clone()) {
            violation(strict, format!("duplicate outbound tag {}", cfg.tag))?;
            continue;
        }
        kept.push(cfg);
    }

    doc.parser_config.outbounds = kept;
    Ok(())
}
