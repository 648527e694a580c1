//! The analysis orchestrator: walks pages, flattens records, and widens
//! columns until the source is exhausted, the crawl is truncated by the
//! network, or the caller cancels.
//!
//! One run owns its [`ColumnCatalog`] outright; nothing is shared across
//! runs and pages are processed strictly one at a time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth;
use crate::error::{ProbeError, ProbeResult, snippet_text};
use crate::flatten::{Row, flatten};
use crate::paginate::{GraphQlWalker, next_page_url};
use crate::source::{DataSource, GraphQlSource, Protocol, RestSource};
use crate::transport::{PageFetcher, Transport};
use crate::widen::{Column, ColumnCatalog, observe};

/// Candidate column GraphQL responses always carry but schemas never need.
const PAGE_INFO_FIELD: &str = "pageInfo.hasNextPage";

/// Cooperative cancellation flag; hand a clone to the caller and check it
/// between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How a crawl ended. `Truncated` means a page stayed unreachable after
/// retries and the catalog only covers the pages seen so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Termination {
    Exhausted,
    Truncated { url: String, reason: String },
    Cancelled,
}

/// Result of one analysis run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Analysis {
    pub source: String,
    pub pages: usize,
    pub rows: usize,
    pub termination: Termination,
    pub columns: BTreeMap<String, Column>,
}

impl Analysis {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Creating analysis file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing analysis YAML")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file =
            std::fs::File::open(path).with_context(|| format!("Opening analysis file {path:?}"))?;
        serde_yaml::from_reader(file).context("Parsing analysis YAML")
    }
}

pub struct SchemaAnalyzer<'a> {
    source: &'a DataSource,
    transport: &'a dyn Transport,
    cancel: CancelToken,
}

impl<'a> SchemaAnalyzer<'a> {
    pub fn new(source: &'a DataSource, transport: &'a dyn Transport) -> Self {
        Self {
            source,
            transport,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the full crawl and returns the inferred column catalog.
    pub fn run(&self) -> ProbeResult<Analysis> {
        self.source
            .validate()
            .map_err(|err| ProbeError::Config(err.to_string()))?;
        let fetcher = PageFetcher::new(self.transport, &self.source.fetch);
        let header = auth::resolve(self.source, &fetcher)?;
        let headers: Vec<(String, String)> = header.into_iter().collect();
        info!("Analyzing source '{}'", self.source.name);
        match &self.source.protocol {
            Protocol::Rest(rest) => self.run_rest(rest, &fetcher, &headers),
            Protocol::GraphQl(graphql) => self.run_graphql(graphql, &fetcher, &headers),
        }
    }

    fn run_rest(
        &self,
        rest: &RestSource,
        fetcher: &PageFetcher,
        headers: &[(String, String)],
    ) -> ProbeResult<Analysis> {
        let mut catalog = ColumnCatalog::new();
        let mut candidates: Vec<String> = Vec::new();
        let mut url = self
            .source
            .first_page_url()
            .map_err(|err| ProbeError::Config(err.to_string()))?;
        let mut pages = 0usize;
        let mut rows = 0usize;

        let termination = loop {
            if self.cancel.is_cancelled() {
                info!("Run cancelled after {pages} page(s)");
                break Termination::Cancelled;
            }
            if page_cap_reached(self.source, pages) {
                break Termination::Exhausted;
            }
            let raw = match fetcher.get(&url, headers) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("Crawl truncated at '{url}': {err}");
                    break Termination::Truncated {
                        url: url.clone(),
                        reason: err.to_string(),
                    };
                }
            };
            let body = parse_body(&raw)?;
            let records = resolve_records(&body, rest)?;
            let mut page_rows: Vec<Row> = Vec::new();
            for record in &records {
                page_rows.extend(flatten(record)?);
            }
            if pages == 0 {
                candidates = discover_rest_candidates(&page_rows);
                for name in &candidates {
                    catalog.seed(name);
                }
                debug!("Discovered {} candidate column(s)", candidates.len());
            }
            widen_page(&mut catalog, &candidates, &page_rows)?;
            rows += page_rows.len();
            pages += 1;
            debug!("Page {pages}: {} row(s)", page_rows.len());

            match next_page_url(&body, rest, &self.source.base_url, &url)? {
                Some(next) => url = next,
                None => break Termination::Exhausted,
            }
        };

        self.finish(catalog, pages, rows, termination)
    }

    fn run_graphql(
        &self,
        graphql: &GraphQlSource,
        fetcher: &PageFetcher,
        headers: &[(String, String)],
    ) -> ProbeResult<Analysis> {
        let mut catalog = ColumnCatalog::new();
        let candidates: Vec<String> = graphql
            .fields
            .iter()
            .filter(|field| field.as_str() != PAGE_INFO_FIELD)
            .cloned()
            .collect();
        for name in &candidates {
            catalog.seed(name);
        }
        let url = self
            .source
            .first_page_url()
            .map_err(|err| ProbeError::Config(err.to_string()))?;
        let mut walker = GraphQlWalker::new(graphql);
        let mut pages = 0usize;
        let mut rows = 0usize;

        let termination = loop {
            if self.cancel.is_cancelled() {
                info!("Run cancelled after {pages} page(s)");
                break Termination::Cancelled;
            }
            if page_cap_reached(self.source, pages) {
                break Termination::Exhausted;
            }
            let request = walker.request_body();
            let raw = match fetcher.post_json(&url, &request, headers) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("Crawl truncated at '{url}': {err}");
                    break Termination::Truncated {
                        url: url.clone(),
                        reason: err.to_string(),
                    };
                }
            };
            let body = parse_body(&raw)?;
            let data = body
                .get("data")
                .ok_or_else(|| ProbeError::structure("data", &body))?;
            let elements = graphql
                .collection
                .resolve(data)
                .and_then(Value::as_array)
                .ok_or_else(|| ProbeError::structure(graphql.collection.path(), data))?;

            let mut page_rows: Vec<Row> = Vec::new();
            for element in elements {
                page_rows.extend(flatten(element)?);
            }
            widen_page(&mut catalog, &candidates, &page_rows)?;
            rows += page_rows.len();
            pages += 1;
            debug!("Page {pages}: {} row(s)", page_rows.len());

            if !walker.has_next_page(data)? {
                break Termination::Exhausted;
            }
            walker.advance(elements)?;
        };

        self.finish(catalog, pages, rows, termination)
    }

    fn finish(
        &self,
        catalog: ColumnCatalog,
        pages: usize,
        rows: usize,
        termination: Termination,
    ) -> ProbeResult<Analysis> {
        info!(
            "Source '{}': {} column(s) inferred from {rows} row(s) across {pages} page(s)",
            self.source.name,
            catalog.len()
        );
        Ok(Analysis {
            source: self.source.name.clone(),
            pages,
            rows,
            termination,
            columns: catalog.finish(),
        })
    }
}

fn page_cap_reached(source: &DataSource, pages: usize) -> bool {
    match source.fetch.max_pages {
        Some(cap) if pages >= cap => {
            info!("Stopping at configured page cap of {cap}");
            true
        }
        _ => false,
    }
}

fn parse_body(raw: &str) -> ProbeResult<Value> {
    serde_json::from_str(raw).map_err(|_| ProbeError::Structure {
        key: "$".to_string(),
        snippet: snippet_text(raw),
    })
}

/// The collection reference must resolve; a single object is accepted as a
/// one-record collection.
fn resolve_records<'a>(body: &'a Value, rest: &RestSource) -> ProbeResult<Vec<&'a Value>> {
    let resolved = rest
        .collection
        .resolve(body)
        .ok_or_else(|| ProbeError::structure(rest.collection.path(), body))?;
    match resolved {
        Value::Array(items) => Ok(items.iter().collect()),
        single => Ok(vec![single]),
    }
}

/// First-page column discovery: the key set of the row with the most
/// leaves becomes the candidate set for the whole run.
fn discover_rest_candidates(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .max_by_key(|row| row.len())
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

fn widen_page(catalog: &mut ColumnCatalog, candidates: &[String], rows: &[Row]) -> ProbeResult<()> {
    for row in rows {
        for name in candidates {
            observe(catalog.state_mut(name), row.get(name))?;
        }
    }
    Ok(())
}
