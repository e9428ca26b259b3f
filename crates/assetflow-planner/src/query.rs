//! String query grammar.
//!
//! ```text
//! query    := "*" | ops? key ops?
//! ops      := "*" | "+"+
//! key      := segment ("/" segment)*
//! ```
//!
//! A leading `ops` walks upstream, a trailing one downstream; `*` is unbounded
//! and N pluses mean depth N. When both sides are present the result is the
//! union of the two traversals, each counted from the key itself.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use assetflow_core::key::AssetKey;

use crate::error::SelectionError;
use crate::selection::AssetSelection;

const QUERY_RE: &str = r"^([+*]*)(.*?)([+*]*)$";

static QUERY: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(QUERY_RE));

fn malformed(query: &str, reason: impl Into<String>) -> SelectionError {
    SelectionError::MalformedQuery {
        query: query.to_string(),
        reason: reason.into(),
    }
}

/// Traversal depth for one operator run; `Ok(None)` is unbounded.
fn depth_of(query: &str, ops: &str) -> Result<Option<u32>, SelectionError> {
    if ops == "*" {
        return Ok(None);
    }
    if ops.contains('*') {
        return Err(malformed(query, "'*' cannot be combined with '+' on one side"));
    }
    u32::try_from(ops.len())
        .map(Some)
        .map_err(|_| malformed(query, "traversal depth too large"))
}

/// Parse one query into a selection tree.
pub fn parse_query(query: &str) -> Result<AssetSelection, SelectionError> {
    let q = query.trim();
    if q.is_empty() {
        return Err(malformed(query, "empty query"));
    }
    if q == "*" {
        return Ok(AssetSelection::All);
    }

    let re = QUERY.as_ref().map_err(|e| malformed(query, e.to_string()))?;
    let caps = re
        .captures(q)
        .ok_or_else(|| malformed(query, "unrecognised query"))?;
    let up = caps.get(1).map_or("", |m| m.as_str());
    let body = caps.get(2).map_or("", |m| m.as_str());
    let down = caps.get(3).map_or("", |m| m.as_str());

    if body.is_empty() {
        return Err(malformed(query, "traversal operators without an asset key"));
    }
    if body.contains(['+', '*']) || body.chars().any(char::is_whitespace) {
        return Err(malformed(query, format!("invalid asset key '{body}'")));
    }
    let segments: Vec<&str> = body.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(malformed(query, format!("empty key segment in '{body}'")));
    }

    let base = AssetSelection::keys([AssetKey::new(segments)]);
    let selection = match (up.is_empty(), down.is_empty()) {
        (true, true) => base,
        (false, true) => base.upstream(depth_of(query, up)?),
        (true, false) => base.downstream(depth_of(query, down)?),
        (false, false) => {
            let up_depth = depth_of(query, up)?;
            let down_depth = depth_of(query, down)?;
            base.clone().upstream(up_depth) | base.downstream(down_depth)
        }
    };
    Ok(selection)
}

/// Parse a list of queries; the result is their union.
pub fn parse_queries<S: AsRef<str>>(queries: &[S]) -> Result<AssetSelection, SelectionError> {
    let parts = queries
        .iter()
        .map(|q| parse_query(q.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let selection = AssetSelection::union_all(parts).ok_or_else(|| malformed("", "empty query list"))?;
    trace!(queries = queries.len(), selection = %selection, "parsed queries");
    Ok(selection)
}
