//! Pagination protocols: REST next-link following and GraphQL cursor
//! walking.
//!
//! The two protocols fail differently by contract. A REST page without the
//! configured next-link property is simply the last page. A GraphQL page
//! missing `pageInfo.hasNextPage` or an element `cursor` is malformed and
//! aborts the run with a structural error.

use anyhow::Context;
use serde_json::{Value, json};
use url::Url;

use crate::error::{ProbeError, ProbeResult};
use crate::source::{AFTER_PLACEHOLDER, FIRST_PLACEHOLDER, GraphQlSource, RestSource, lookup};

/// Works out the URL of the page after `current_url`, or `None` when the
/// crawl is done.
///
/// Stops on: no next-link configured, property absent or null, empty value,
/// or a value identical to the current URL (some APIs echo the last page's
/// own link forever).
pub fn next_page_url(
    body: &Value,
    rest: &RestSource,
    base_url: &str,
    current_url: &str,
) -> ProbeResult<Option<String>> {
    let Some(property) = rest.next_link.as_deref() else {
        return Ok(None);
    };
    let next = match lookup(body, property) {
        Some(Value::String(link)) if !link.is_empty() => link.clone(),
        _ => return Ok(None),
    };
    let next = if rest.next_link_is_relative {
        let base = Url::parse(base_url)
            .with_context(|| format!("Parsing base URL '{base_url}'"))
            .map_err(|err| ProbeError::Config(err.to_string()))?;
        base.join(&next)
            .map_err(|err| ProbeError::Config(format!("Joining next link '{next}': {err}")))?
            .to_string()
    } else {
        next
    };
    if next == current_url {
        return Ok(None);
    }
    Ok(Some(next))
}

/// Cursor state for one GraphQL crawl.
#[derive(Debug)]
pub struct GraphQlWalker {
    query: String,
    first: u32,
    /// pageInfo path: collection reference with the repeating element
    /// replaced by `pageInfo`.
    page_info_path: String,
    after: Option<String>,
}

impl GraphQlWalker {
    pub fn new(graphql: &GraphQlSource) -> Self {
        let mut segments: Vec<&str> = graphql
            .collection
            .segments()
            .iter()
            .map(String::as_str)
            .collect();
        segments.pop();
        segments.push("pageInfo");
        Self {
            query: graphql.query.clone(),
            first: graphql.first,
            page_info_path: segments.join("."),
            after: None,
        }
    }

    /// Request body for the current position: the query template with
    /// `$first` and `$after` substituted (`null` before the first page).
    pub fn request_body(&self) -> Value {
        let after = match &self.after {
            Some(cursor) => format!("\"{cursor}\""),
            None => "null".to_string(),
        };
        let query = self
            .query
            .replace(FIRST_PLACEHOLDER, &self.first.to_string())
            .replace(AFTER_PLACEHOLDER, &after);
        json!({ "query": query })
    }

    /// Reads `hasNextPage` for the page just fetched. Absence is malformed,
    /// not exhausted.
    pub fn has_next_page(&self, data: &Value) -> ProbeResult<bool> {
        let key = format!("{}.hasNextPage", self.page_info_path);
        match lookup(data, &key) {
            Some(Value::Bool(flag)) => Ok(*flag),
            _ => Err(ProbeError::structure(key, data)),
        }
    }

    /// Advances the cursor past the element whose `cursor` carries the
    /// maximum final numeric segment.
    pub fn advance(&mut self, elements: &[Value]) -> ProbeResult<()> {
        let mut best: Option<(i64, &str)> = None;
        for element in elements {
            let cursor = element
                .get("cursor")
                .and_then(Value::as_str)
                .ok_or_else(|| ProbeError::structure("cursor", element))?;
            let suffix = cursor
                .rsplit('.')
                .next()
                .and_then(|tail| tail.parse::<i64>().ok())
                .ok_or_else(|| ProbeError::Structure {
                    key: "cursor".to_string(),
                    snippet: format!("'{cursor}' has no numeric suffix"),
                })?;
            if best.is_none_or(|(max, _)| suffix > max) {
                best = Some((suffix, cursor));
            }
        }
        let (_, cursor) = best.ok_or_else(|| ProbeError::Structure {
            key: "cursor".to_string(),
            snippet: "page contains no elements to advance past".to_string(),
        })?;
        self.after = Some(cursor.to_string());
        Ok(())
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }
}
