//! Access-token resolution for Basic, Token, and OAuth2 sources.
//!
//! Runs exactly once per analysis, before the first page fetch; the
//! resulting header is cached for the remainder of the run. No refresh on
//! expiry is attempted.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;
use serde_json::{Map, Value};

use crate::error::{ProbeError, ProbeResult, snippet_text};
use crate::source::{AuthScheme, DataSource, OAuth2Endpoint};
use crate::transport::PageFetcher;

/// Resolves the `Authorization` header for a run, if the source needs one.
pub fn resolve(source: &DataSource, fetcher: &PageFetcher) -> ProbeResult<Option<(String, String)>> {
    let header = match &source.auth {
        AuthScheme::None => None,
        AuthScheme::Basic { username, password } => {
            let encoded = BASE64.encode(format!("{username}:{password}"));
            Some(format!("Basic {encoded}"))
        }
        AuthScheme::Token(endpoint) => {
            let body = Value::Object(
                endpoint
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            );
            let token = request_token(fetcher, &endpoint.token_url, &body, &endpoint.token_property)?;
            Some(format!("Bearer {token}"))
        }
        AuthScheme::OAuth2(endpoint) => {
            let body = oauth2_body(endpoint);
            let token = request_token(fetcher, &endpoint.token_url, &body, &endpoint.token_property)?;
            Some(format!("Bearer {token}"))
        }
    };
    if header.is_some() {
        debug!("Resolved auth header for source '{}'", source.name);
    }
    Ok(header.map(|value| ("Authorization".to_string(), value)))
}

fn oauth2_body(endpoint: &OAuth2Endpoint) -> Value {
    let mut body = Map::new();
    body.insert(
        "grant_type".to_string(),
        Value::String(endpoint.grant_type.clone()),
    );
    body.insert(
        "client_id".to_string(),
        Value::String(endpoint.client_id.clone()),
    );
    body.insert(
        "client_secret".to_string(),
        Value::String(endpoint.client_secret.clone()),
    );
    body.insert(
        "username".to_string(),
        Value::String(endpoint.username.clone()),
    );
    body.insert(
        "password".to_string(),
        Value::String(endpoint.password.clone()),
    );
    for (key, value) in &endpoint.params {
        body.insert(key.clone(), Value::String(value.clone()));
    }
    Value::Object(body)
}

fn request_token(
    fetcher: &PageFetcher,
    url: &str,
    body: &Value,
    property: &str,
) -> ProbeResult<String> {
    let raw = fetcher.post_json(url, body, &[])?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|_| ProbeError::Structure {
        key: property.to_string(),
        snippet: snippet_text(&raw),
    })?;
    match parsed.get(property) {
        Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
        _ => Err(ProbeError::Authentication {
            url: url.to_string(),
            property: property.to_string(),
        }),
    }
}
