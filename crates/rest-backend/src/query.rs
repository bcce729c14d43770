//! Request-target construction for the data API.
//!
//! Reads are expressed entirely in the query string:
//! `select=<projection>&<col>=eq.<value>...&limit=<n>&order=<col>.<asc|desc>`.

use crate::args::SelectArgs;
use crate::error::{BackendError, Result};
use serde_json::Value;
use url::Url;

/// Build the query string for a select call.
///
/// Filters keep the order they were declared in.
#[must_use]
pub fn select_query(args: &SelectArgs) -> String {
    let mut query = format!("select={}", encode_component(&args.select));

    if let Some(filters) = &args.match_filters {
        for (key, value) in filters {
            query.push('&');
            query.push_str(&encode_component(key));
            query.push_str("=eq.");
            query.push_str(&encode_component(&value_to_string(value)));
        }
    }

    if let Some(limit) = args.limit.filter(|n| *n > 0) {
        query.push_str(&format!("&limit={limit}"));
    }

    if let Some(order) = &args.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        query.push_str(&format!(
            "&order={}.{direction}",
            encode_component(&order.column)
        ));
    }

    query
}

/// `<base>/<resource_path>/<table>[?query]`
///
/// # Errors
///
/// Returns [`BackendError::Config`] if the resulting URL does not parse.
pub fn table_url(
    base_url: &str,
    resource_path: &str,
    table: &str,
    query: Option<&str>,
) -> Result<Url> {
    let resource = resource_path.trim_matches('/');
    let mut raw = base_url.trim_end_matches('/').to_string();
    if !resource.is_empty() {
        raw.push('/');
        raw.push_str(resource);
    }
    raw.push('/');
    raw.push_str(&encode_component(table));

    let mut url =
        Url::parse(&raw).map_err(|e| BackendError::Config(format!("Invalid URL '{raw}': {e}")))?;
    if let Some(q) = query {
        url.set_query(Some(q));
    }
    Ok(url)
}

/// Percent-encode everything except the `encodeURIComponent` safe set.
#[must_use]
pub fn encode_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_component_safe(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_component_safe(b: u8) -> bool {
    matches!(
        b,
        b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'.'
            | b'_'
            | b'~'
            | b'!'
            | b'*'
            | b'\''
            | b'('
            | b')'
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => value.to_string(),
    }
}
