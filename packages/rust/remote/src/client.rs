//! HTTP client for the Notion-style REST API.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use docmirror_shared::{
    Block, DocumentProperties, DocumentSummary, MirrorError, PropertyNames, RemoteConfig, Result,
    RetryPolicy,
};

use crate::retry::send_with_retry;
use crate::source::{DocumentFilter, DocumentSource, Page};
use crate::wire::{ListResponse, RawBlock, RawPage, decode};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("docmirror/", env!("CARGO_PKG_VERSION"));

/// Property types the sync engine expects, keyed by configured name.
fn expected_property_types(names: &PropertyNames) -> [(&str, &'static str); 5] {
    [
        (names.title.as_str(), "title"),
        (names.published.as_str(), "checkbox"),
        (names.date.as_str(), "date"),
        (names.slug.as_str(), "rich_text"),
        (names.tags.as_str(), "multi_select"),
    ]
}

// ---------------------------------------------------------------------------
// ConnectionReport
// ---------------------------------------------------------------------------

/// Outcome of [`NotionClient::check_connection`].
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    /// Display name of the integration the token belongs to.
    pub bot_name: String,
    pub database_title: String,
    /// `(name, type)` of every database property, sorted by name.
    pub properties: Vec<(String, String)>,
    /// Missing or wrongly-typed expected properties.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// NotionClient
// ---------------------------------------------------------------------------

/// Remote client with retrying, paginated access to one database.
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: Client,
    api_base: String,
    api_version: String,
    token: String,
    database_id: String,
    page_size: u32,
    retry: RetryPolicy,
    properties: PropertyNames,
}

impl NotionClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MirrorError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_version: config.api_version.clone(),
            token: config.token.clone(),
            database_id: config.database_id.clone(),
            page_size: config.page_size,
            retry: config.retry.clone(),
            properties: config.properties.clone(),
        })
    }

    /// The underlying HTTP client, shared with media downloads.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = send_with_retry(&self.retry, path, || {
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", &self.api_version)
                .query(query)
        })
        .await?;
        read_body(response, path).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = send_with_retry(&self.retry, path, || {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", &self.api_version)
                .json(body)
        })
        .await?;
        read_body(response, path).await
    }

    /// Request body for the database query endpoint.
    fn query_body(&self, filter: DocumentFilter, cursor: Option<&str>) -> Value {
        let mut body = json!({ "page_size": self.page_size });
        if let DocumentFilter::Published = filter {
            body["filter"] = json!({
                "property": self.properties.published,
                "checkbox": { "equals": true },
            });
        }
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        body
    }

    /// Every child of `block_id`, following pagination, recursing into
    /// children that have their own children.
    fn fetch_children<'a>(
        &'a self,
        block_id: &'a str,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Block>>> + Send + 'a>> {
        Box::pin(async move {
            let path = format!("blocks/{block_id}/children");
            let mut blocks = Vec::new();
            let mut cursor: Option<String> = None;

            loop {
                let mut query = vec![("page_size", self.page_size.to_string())];
                if let Some(c) = &cursor {
                    query.push(("start_cursor", c.clone()));
                }

                let body = self.get_json(&path, &query).await?;
                let page: ListResponse<RawBlock> = decode(&path, &body)?;
                let next = page.continuation();

                for raw in page.results {
                    let has_children = raw.has_children;
                    let mut block = raw.into_block();
                    if has_children {
                        let children = self.fetch_children(&block.id, depth + 1).await?;
                        block.children = children;
                    }
                    blocks.push(block);
                }

                match next {
                    Some(c) => cursor = Some(c),
                    None => break,
                }
            }

            debug!(block_id, depth, count = blocks.len(), "fetched children");
            Ok(blocks)
        })
    }

    /// Validate the token and the database schema.
    #[instrument(skip(self), fields(database_id = %self.database_id))]
    pub async fn check_connection(&self) -> Result<ConnectionReport> {
        let me: Value = decode("users/me", &self.get_json("users/me", &[]).await?)?;
        let bot_name = me
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| me.get("id").and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string();
        info!(bot = %bot_name, "token accepted");

        let path = format!("databases/{}", self.database_id);
        let database: Value = decode(&path, &self.get_json(&path, &[]).await?)?;

        let database_title = database
            .get("title")
            .and_then(Value::as_array)
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|s| s.get("plain_text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let schema = database
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut properties: Vec<(String, String)> = schema
            .iter()
            .map(|(name, prop)| {
                let kind = prop.get("type").and_then(Value::as_str).unwrap_or("unknown");
                (name.clone(), kind.to_string())
            })
            .collect();
        properties.sort();

        let mut warnings = Vec::new();
        for (name, expected) in expected_property_types(&self.properties) {
            match schema.get(name).and_then(|p| p.get("type")).and_then(Value::as_str) {
                None => warnings.push(format!("missing property `{name}` ({expected})")),
                Some(actual) if actual != expected => warnings.push(format!(
                    "property `{name}` has type {actual}, expected {expected}"
                )),
                Some(_) => {}
            }
        }
        for w in &warnings {
            warn!("{w}");
        }

        info!(title = %database_title, properties = properties.len(), "database reachable");
        Ok(ConnectionReport {
            bot_name,
            database_title,
            properties,
            warnings,
        })
    }
}

impl DocumentSource for NotionClient {
    #[instrument(skip(self), fields(database_id = %self.database_id))]
    async fn query_documents(
        &self,
        filter: DocumentFilter,
        cursor: Option<&str>,
    ) -> Result<Page<DocumentSummary>> {
        let path = format!("databases/{}/query", self.database_id);
        let body = self.post_json(&path, &self.query_body(filter, cursor)).await?;
        let page: ListResponse<RawPage> = decode(&path, &body)?;
        let next_cursor = page.continuation();

        let items = page
            .results
            .into_iter()
            .map(|raw| raw.into_summary(&self.properties))
            .collect();

        Ok(Page { items, next_cursor })
    }

    #[instrument(skip(self))]
    async fn fetch_properties(&self, id: &str) -> Result<DocumentProperties> {
        let path = format!("pages/{id}");
        let body = self.get_json(&path, &[]).await?;
        let page: RawPage = decode(&path, &body)?;
        Ok(page.into_summary(&self.properties).properties)
    }

    #[instrument(skip(self))]
    async fn fetch_block_tree(&self, id: &str) -> Result<Vec<Block>> {
        self.fetch_children(id, 0).await
    }
}

async fn read_body(response: reqwest::Response, what: &str) -> Result<Vec<u8>> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| MirrorError::unavailable(format!("{what}: body read failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> NotionClient {
        NotionClient::new(&RemoteConfig {
            api_base: server.uri(),
            api_version: "2022-06-28".into(),
            token: "secret-token".into(),
            database_id: "db1".into(),
            page_size: 2,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            properties: PropertyNames::default(),
        })
        .unwrap()
    }

    fn page_json(id: &str, slug: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "created_time": "2024-01-01T00:00:00.000Z",
            "last_edited_time": "2024-01-02T00:00:00.000Z",
            "cover": null,
            "properties": {
                "Title": {"type": "title", "title": [{"plain_text": id}]},
                "Published": {"type": "checkbox", "checkbox": true},
                "Slug": {"type": "rich_text", "rich_text": [{"plain_text": slug}]}
            }
        })
    }

    fn paragraph(id: &str, text: &str, has_children: bool) -> Value {
        json!({
            "object": "block", "id": id, "type": "paragraph", "has_children": has_children,
            "paragraph": {"rich_text": [{"type": "text", "plain_text": text, "annotations": {}}]}
        })
    }

    #[tokio::test]
    async fn query_sends_filter_and_auth_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(header("authorization", "Bearer secret-token"))
            .and(header("notion-version", "2022-06-28"))
            .and(body_partial_json(json!({
                "filter": {"property": "Published", "checkbox": {"equals": true}},
                "page_size": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "results": [page_json("p1", "first"), page_json("p2", "second")],
                "has_more": true,
                "next_cursor": "cur-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let page = client
            .query_documents(DocumentFilter::Published, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].properties.slug, "second");
        assert_eq!(page.next_cursor.as_deref(), Some("cur-2"));
    }

    #[tokio::test]
    async fn block_tree_follows_pagination_and_nesting() {
        let server = MockServer::start().await;

        // Root: two pages of children; the first child has its own children.
        Mock::given(method("GET"))
            .and(path("/blocks/page1/children"))
            .and(query_param("start_cursor", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("b3", "third", false)],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocks/page1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("b1", "first", true), paragraph("b2", "second", false)],
                "has_more": true,
                "next_cursor": "next"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocks/b1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("b1a", "nested", false)],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let tree = client.fetch_block_tree("page1").await.unwrap();

        let ids: Vec<&str> = tree.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].id, "b1a");
    }

    #[tokio::test]
    async fn child_failure_fails_the_tree() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/blocks/page1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [paragraph("b1", "first", true)],
                "has_more": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/blocks/b1/children"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.fetch_block_tree("page1").await.unwrap_err();
        assert!(matches!(err, MirrorError::RemoteUnavailable { .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/pages/p1"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "object": "error", "status": 401, "code": "unauthorized",
                "message": "API token is invalid."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.fetch_properties("p1").await.unwrap_err();
        assert!(matches!(err, MirrorError::RemoteAuth(_)));
    }

    #[tokio::test]
    async fn check_connection_reports_schema_problems() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"object": "user", "id": "bot1", "name": "Blog Sync"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/databases/db1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "database",
                "title": [{"plain_text": "Blog"}],
                "properties": {
                    "Title": {"type": "title"},
                    "Published": {"type": "checkbox"},
                    "Date": {"type": "date"},
                    "Slug": {"type": "title"}
                }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let report = client.check_connection().await.unwrap();
        assert_eq!(report.bot_name, "Blog Sync");
        assert_eq!(report.database_title, "Blog");
        assert_eq!(report.properties.len(), 4);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("Tags")));
        assert!(report.warnings.iter().any(|w| w.contains("`Slug` has type title")));
    }
}
