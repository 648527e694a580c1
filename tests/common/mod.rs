#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::{TempDir, tempdir};
use vault_probe::source::{
    AuthScheme, CollectionRef, DataSource, FetchPolicy, GraphQlSource, Protocol, RestSource,
};
use vault_probe::transport::{Headers, Transport, TransportError};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

#[derive(Debug, Clone)]
pub enum CannedResponse {
    Body(String),
    Failure(String),
}

/// In-memory transport serving canned page bodies per URL, in order.
/// GET and POST share the queue; every request is recorded for assertions.
#[derive(Default)]
pub struct FakeTransport {
    responses: RefCell<BTreeMap<String, Vec<CannedResponse>>>,
    pub requests: RefCell<Vec<(String, Option<Value>, Vec<(String, String)>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, url: &str, body: Value) {
        self.responses
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push(CannedResponse::Body(body.to_string()));
    }

    pub fn enqueue_raw(&self, url: &str, body: &str) {
        self.responses
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push(CannedResponse::Body(body.to_string()));
    }

    pub fn enqueue_failure(&self, url: &str, reason: &str) {
        self.responses
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push(CannedResponse::Failure(reason.to_string()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    fn serve(
        &self,
        url: &str,
        body: Option<&Value>,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        self.requests.borrow_mut().push((
            url.to_string(),
            body.cloned(),
            headers.to_vec(),
        ));
        let mut responses = self.responses.borrow_mut();
        let queue = responses
            .get_mut(url)
            .ok_or_else(|| TransportError::Unreachable {
                url: url.to_string(),
                reason: "no canned response".to_string(),
            })?;
        if queue.is_empty() {
            return Err(TransportError::Unreachable {
                url: url.to_string(),
                reason: "response queue exhausted".to_string(),
            });
        }
        match queue.remove(0) {
            CannedResponse::Body(body) => Ok(body),
            CannedResponse::Failure(reason) => Err(TransportError::Unreachable {
                url: url.to_string(),
                reason,
            }),
        }
    }
}

impl Transport for FakeTransport {
    fn get(&self, url: &str, headers: &Headers) -> Result<String, TransportError> {
        self.serve(url, None, headers)
    }

    fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &Headers,
    ) -> Result<String, TransportError> {
        self.serve(url, Some(body), headers)
    }
}

/// Fetch policy with retries collapsed so failure tests run instantly.
pub fn fast_fetch() -> FetchPolicy {
    FetchPolicy {
        attempts: 1,
        retry_delay_ms: 0,
        ..FetchPolicy::default()
    }
}

pub fn rest_source(name: &str, collection: &str, next_link: Option<&str>) -> DataSource {
    DataSource {
        name: name.to_string(),
        base_url: "https://api.test".to_string(),
        relative_path: "records".to_string(),
        auth: AuthScheme::None,
        protocol: Protocol::Rest(RestSource {
            collection: CollectionRef::parse(collection).expect("collection ref"),
            next_link: next_link.map(str::to_string),
            next_link_is_relative: false,
        }),
        fetch: fast_fetch(),
    }
}

pub fn graphql_source(name: &str, fields: &[&str]) -> DataSource {
    DataSource {
        name: name.to_string(),
        base_url: "https://api.test".to_string(),
        relative_path: "graphql".to_string(),
        auth: AuthScheme::None,
        protocol: Protocol::GraphQl(GraphQlSource {
            query: "query { orders(first: $first, after: $after) { \
                    pageInfo { hasNextPage } edges { cursor node { id } } } }"
                .to_string(),
            first: 2,
            collection: CollectionRef::parse("orders.edges").expect("collection ref"),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }),
        fetch: fast_fetch(),
    }
}
