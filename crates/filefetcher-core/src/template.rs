//! URL and output-path resolution.
//!
//! Templates carry two layers of substitution: `$field`/`${field}` references
//! to the datalogger's own scalar fields, then strftime-style day formatting.
//! For a given (datalogger, day) pair the resolved output path is a pure
//! function of configuration, which is what makes a bare existence check a
//! valid idempotence test across process restarts.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};
use thiserror::Error;
use url::Url;

use crate::config::Datalogger;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown substitution ${0}")]
    UnknownField(String),

    #[error("dangling $ in template {0:?}")]
    DanglingDollar(String),

    #[error("invalid day format in {0:?}")]
    DayFormat(String),

    #[error("invalid URL {url}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot override port on {0}")]
    Port(String),
}

/// Resolve the day-specific URL, applying the port override if configured.
pub fn resolve_url(logger: &Datalogger, day: NaiveDate) -> Result<Url, TemplateError> {
    let substituted = substitute(&logger.url, logger)?;
    let resolved = format_day(&substituted, day)?;
    let mut url = Url::parse(&resolved).map_err(|source| TemplateError::Url {
        url: resolved.clone(),
        source,
    })?;
    if let Some(port) = logger.port {
        url.set_port(Some(port))
            .map_err(|()| TemplateError::Port(resolved))?;
    }
    Ok(url)
}

/// Resolve the final output path for a day.
///
/// With an `out_path` template configured the path is formatted under
/// `out_dir`; otherwise it is derived from the URL's path component under a
/// `name` subdirectory, mirroring the remote layout.
pub fn resolve_out_path(
    logger: &Datalogger,
    day: NaiveDate,
    url: &Url,
) -> Result<PathBuf, TemplateError> {
    match &logger.out_path {
        Some(template) => {
            let substituted = substitute(template, logger)?;
            let resolved = format_day(&substituted, day)?;
            Ok(logger.out_dir.join(resolved))
        }
        None => Ok(logger
            .out_dir
            .join(&logger.name)
            .join(url.path().trim_start_matches('/'))),
    }
}

/// Replace `$field` and `${field}` references with the datalogger's own
/// fields. `$$` escapes a literal dollar sign.
fn substitute(template: &str, logger: &Datalogger) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some((_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some((_, '{')) => {
                chars.next();
                let mut key = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    key.push(c);
                }
                if !closed {
                    return Err(TemplateError::DanglingDollar(template.to_string()));
                }
                out.push_str(&field(logger, &key)?);
            }
            Some((_, c)) if c.is_ascii_alphanumeric() || c == '_' => {
                let mut key = String::new();
                while let Some((_, c)) = chars.peek().copied() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        key.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&field(logger, &key)?);
            }
            _ => return Err(TemplateError::DanglingDollar(template.to_string())),
        }
    }
    Ok(out)
}

fn field(logger: &Datalogger, key: &str) -> Result<String, TemplateError> {
    match key {
        "name" => Ok(logger.name.clone()),
        "out_dir" => Ok(logger.out_dir.display().to_string()),
        "port" => logger
            .port
            .map(|p| p.to_string())
            .ok_or_else(|| TemplateError::UnknownField(key.to_string())),
        _ => Err(TemplateError::UnknownField(key.to_string())),
    }
}

/// Apply strftime-style day formatting, rejecting malformed format strings
/// instead of panicking inside chrono's Display path.
fn format_day(format: &str, day: NaiveDate) -> Result<String, TemplateError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.contains(&Item::Error) {
        return Err(TemplateError::DayFormat(format.to_string()));
    }
    let mut out = String::with_capacity(format.len());
    write!(out, "{}", day.format_with_items(items.into_iter()))
        .map_err(|_| TemplateError::DayFormat(format.to_string()))?;
    Ok(out)
}
