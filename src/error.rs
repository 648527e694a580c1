//! Error taxonomy for one analysis run.
//!
//! Structural, classification, precision, and authentication failures abort
//! a run and carry enough context (column name, offending key, JSON snippet)
//! to fix the source configuration. Transport failures are deliberately a
//! separate type: the walker treats them as end-of-crawl with partial
//! results, never as a fatal error.

use thiserror::Error;

/// Maximum characters of raw JSON echoed into an error message.
const SNIPPET_LIMIT: usize = 160;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// A key the schema contract requires is absent from a response body.
    #[error("missing required key '{key}' in response: {snippet}")]
    Structure { key: String, snippet: String },

    /// A leaf value matched none of the supported JSON shapes.
    #[error("column '{column}' received unsupported value {value}")]
    Classification { column: String, value: String },

    /// A decimal value needs more total digits than SQL Server allows.
    #[error("column '{column}' requires decimal precision {required}, maximum is {max}")]
    PrecisionOverflow {
        column: String,
        required: u32,
        max: u32,
    },

    /// The token endpoint answered without the configured token property.
    #[error("token endpoint '{url}' response is missing property '{property}'")]
    Authentication { url: String, property: String },

    /// The source descriptor itself is unusable.
    #[error("invalid source configuration: {0}")]
    Config(String),

    /// Transport failure in a phase where it cannot be absorbed (token
    /// resolution happens before any page exists to truncate).
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

impl ProbeError {
    pub fn structure(key: impl Into<String>, body: &serde_json::Value) -> Self {
        ProbeError::Structure {
            key: key.into(),
            snippet: snippet(body),
        }
    }
}

/// Truncated single-line rendering of a JSON value for error messages.
pub fn snippet(value: &serde_json::Value) -> String {
    snippet_text(&value.to_string())
}

/// Truncates raw response text for error messages.
pub fn snippet_text(rendered: &str) -> String {
    if rendered.len() > SNIPPET_LIMIT {
        let cut = rendered
            .char_indices()
            .take_while(|(idx, _)| *idx < SNIPPET_LIMIT)
            .last()
            .map(|(idx, c)| idx + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &rendered[..cut])
    } else {
        rendered.to_string()
    }
}

pub type ProbeResult<T> = std::result::Result<T, ProbeError>;
