//! Data source descriptors: everything one analysis run needs to know about
//! a REST or GraphQL endpoint, loaded from and saved to YAML.
//!
//! The descriptor is supplied by the surrounding modelling tool; this crate
//! only validates the parts the inference engine depends on (URLs, the
//! collection reference, GraphQL placeholders, auth configuration).

use std::{fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Placeholder in a GraphQL query template replaced with the page size.
pub const FIRST_PLACEHOLDER: &str = "$first";
/// Placeholder replaced with the quoted cursor to continue after, or with
/// `null` on the first page.
pub const AFTER_PLACEHOLDER: &str = "$after";

fn default_page_size() -> u32 {
    100
}

/// Path to the repeating record collection inside one page of response.
///
/// Accepts the REST bracket syntax (`data[items]`) as well as dotted paths
/// (`orders.edges`); both reduce to the same property segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    segments: Vec<String>,
}

impl CollectionRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<String> = raw
            .split(['.', '[', ']'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        ensure!(
            !segments.is_empty(),
            "Collection reference '{raw}' contains no property names"
        );
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Navigates to the referenced value inside one page body.
    pub fn resolve<'a>(&self, body: &'a Value) -> Option<&'a Value> {
        let mut current = body;
        for segment in &self.segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn path(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl Serialize for CollectionRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.path())
    }
}

impl<'de> Deserialize<'de> for CollectionRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        CollectionRef::parse(&raw).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// Dotted-path lookup into a JSON value, shared by next-link and pageInfo
/// resolution.
pub fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenEndpoint {
    pub token_url: String,
    /// Property of the endpoint's JSON response holding the access token.
    pub token_property: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuth2Endpoint {
    pub token_url: String,
    pub token_property: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    #[serde(default = "OAuth2Endpoint::default_grant_type")]
    pub grant_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl OAuth2Endpoint {
    fn default_grant_type() -> String {
        "password".to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthScheme {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Token(TokenEndpoint),
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Endpoint),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestSource {
    /// Where the repeating record collection lives inside each page.
    pub collection: CollectionRef,
    /// Property path holding the URL of the next page, if the API paginates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
    /// Whether the next-link value needs the base URL prefixed.
    #[serde(default)]
    pub next_link_is_relative: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphQlSource {
    /// Query template; must contain the `$first` and `$after` placeholders.
    pub query: String,
    /// Page size substituted for `$first`.
    #[serde(default = "default_page_size")]
    pub first: u32,
    /// Path from the response's `data` object to the repeating element list.
    pub collection: CollectionRef,
    /// Candidate columns, as dotted paths relative to a collection element.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Protocol {
    Rest(RestSource),
    #[serde(rename = "graphql")]
    GraphQl(GraphQlSource),
}

/// Retry/backoff and page-limit policy for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Attempts per page before the crawl is reported truncated.
    #[serde(default = "FetchPolicy::default_attempts")]
    pub attempts: u32,
    #[serde(default = "FetchPolicy::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "FetchPolicy::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Safety cap on pages; `None` walks until the API stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
}

impl FetchPolicy {
    const fn default_attempts() -> u32 {
        3
    }
    const fn default_retry_delay_ms() -> u64 {
        1_000
    }
    const fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::default_attempts(),
            retry_delay_ms: Self::default_retry_delay_ms(),
            timeout_secs: Self::default_timeout_secs(),
            max_pages: None,
        }
    }
}

/// Descriptor of one REST or GraphQL data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSource {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default)]
    pub auth: AuthScheme,
    pub protocol: Protocol,
    #[serde(default)]
    pub fetch: FetchPolicy,
}

impl DataSource {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening source file {path:?}"))?;
        let reader = BufReader::new(file);
        let source: DataSource =
            serde_yaml::from_reader(reader).context("Parsing source YAML")?;
        source.validate()?;
        Ok(source)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating source file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing source YAML")
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.trim().is_empty(), "Source name must not be empty");
        let base = Url::parse(&self.base_url)
            .with_context(|| format!("Parsing base URL '{}'", self.base_url))?;
        ensure!(
            matches!(base.scheme(), "http" | "https"),
            "Base URL '{}' must use http or https",
            self.base_url
        );
        match &self.protocol {
            Protocol::Rest(rest) => {
                if let Some(link) = &rest.next_link {
                    ensure!(
                        !link.trim().is_empty(),
                        "REST next-link property must not be empty when set"
                    );
                }
            }
            Protocol::GraphQl(graphql) => {
                ensure!(
                    graphql.query.contains(FIRST_PLACEHOLDER),
                    "GraphQL query must contain the '{FIRST_PLACEHOLDER}' placeholder"
                );
                ensure!(
                    graphql.query.contains(AFTER_PLACEHOLDER),
                    "GraphQL query must contain the '{AFTER_PLACEHOLDER}' placeholder"
                );
                ensure!(
                    !graphql.fields.is_empty(),
                    "GraphQL source must list at least one candidate field"
                );
                ensure!(
                    graphql.fields.iter().all(|f| !f.trim().is_empty()),
                    "GraphQL field paths must not be empty"
                );
            }
        }
        if let AuthScheme::Token(endpoint) = &self.auth {
            ensure!(
                !endpoint.token_property.trim().is_empty(),
                "Token auth requires a token property name"
            );
        }
        if let AuthScheme::OAuth2(endpoint) = &self.auth {
            ensure!(
                !endpoint.token_property.trim().is_empty(),
                "OAuth2 auth requires a token property name"
            );
        }
        Ok(())
    }

    /// URL of the first page: base URL joined with the relative path.
    pub fn first_page_url(&self) -> Result<String> {
        let base = Url::parse(&self.base_url)
            .with_context(|| format!("Parsing base URL '{}'", self.base_url))?;
        if self.relative_path.is_empty() {
            return Ok(base.to_string());
        }
        let joined = base
            .join(&self.relative_path)
            .with_context(|| format!("Joining '{}' onto base URL", self.relative_path))?;
        Ok(joined.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rest_source() -> DataSource {
        DataSource {
            name: "orders".to_string(),
            base_url: "https://api.example.com".to_string(),
            relative_path: "v2/orders".to_string(),
            auth: AuthScheme::None,
            protocol: Protocol::Rest(RestSource {
                collection: CollectionRef::parse("data[items]").unwrap(),
                next_link: Some("links.next".to_string()),
                next_link_is_relative: true,
            }),
            fetch: FetchPolicy::default(),
        }
    }

    #[test]
    fn collection_ref_accepts_bracket_and_dotted_syntax() {
        let bracketed = CollectionRef::parse("data[items]").unwrap();
        assert_eq!(bracketed.segments(), ["data", "items"]);
        let dotted = CollectionRef::parse("orders.edges").unwrap();
        assert_eq!(dotted.segments(), ["orders", "edges"]);
        let single = CollectionRef::parse("results").unwrap();
        assert_eq!(single.segments(), ["results"]);
        assert!(CollectionRef::parse("  ").is_err());
    }

    #[test]
    fn collection_ref_resolves_into_nested_bodies() {
        let body = json!({"data": {"items": [1, 2]}});
        let reference = CollectionRef::parse("data[items]").unwrap();
        assert_eq!(reference.resolve(&body), Some(&json!([1, 2])));
        assert_eq!(CollectionRef::parse("data.missing").unwrap().resolve(&body), None);
    }

    #[test]
    fn lookup_walks_dotted_paths() {
        let body = json!({"pageInfo": {"hasNextPage": true}});
        assert_eq!(lookup(&body, "pageInfo.hasNextPage"), Some(&json!(true)));
        assert_eq!(lookup(&body, "pageInfo.endCursor"), None);
    }

    #[test]
    fn first_page_url_joins_relative_path() {
        let source = rest_source();
        assert_eq!(
            source.first_page_url().unwrap(),
            "https://api.example.com/v2/orders"
        );
    }

    #[test]
    fn graphql_validation_requires_placeholders_and_fields() {
        let mut source = rest_source();
        source.protocol = Protocol::GraphQl(GraphQlSource {
            query: "query { orders(first: $first, after: $after) { edges { cursor } } }"
                .to_string(),
            first: 50,
            collection: CollectionRef::parse("orders.edges").unwrap(),
            fields: vec!["node.id".to_string()],
        });
        source.validate().unwrap();

        if let Protocol::GraphQl(graphql) = &mut source.protocol {
            graphql.query = "query { orders { edges { cursor } } }".to_string();
        }
        assert!(source.validate().is_err());
    }

    #[test]
    fn descriptor_round_trips_through_yaml() {
        let source = rest_source();
        let yaml = serde_yaml::to_string(&source).unwrap();
        let parsed: DataSource = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, source);
    }

    #[test]
    fn auth_scheme_yaml_uses_tagged_schemes() {
        let yaml = "scheme: basic\nusername: svc\npassword: hunter2\n";
        let parsed: AuthScheme = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            parsed,
            AuthScheme::Basic {
                username: "svc".to_string(),
                password: "hunter2".to_string()
            }
        );
    }
}
