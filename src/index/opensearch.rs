//! OpenSearch implementation of [`IndexGateway`] over its REST API.
//!
//! Every write uses `refresh=true`, so a chunk is searchable as soon as the
//! call returns. That trades indexing throughput for read-your-writes,
//! which the upload path relies on.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{Chunk, SearchResult};

use super::{
    leading_snippet, IndexGateway, FALLBACK_SNIPPET_CHARS, TOC_BOOST, TOC_TITLE_BOOST,
    TOC_TITLE_PHRASE,
};

pub struct OpenSearchGateway {
    client: reqwest::Client,
    base_url: Url,
    index_name: String,
    username: Option<String>,
    password: Option<String>,
}

impl OpenSearchGateway {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| IndexError::Unavailable(format!("invalid index url {}: {}", config.url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url,
            index_name: config.index_name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::Unavailable(format!("index url cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push(&self.index_name)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }
}

#[async_trait]
impl IndexGateway for OpenSearchGateway {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        let url = self.endpoint(&[])?;
        let exists = self.request(Method::HEAD, url.clone()).send().await?;
        match exists.status() {
            s if s.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            s => {
                return Err(IndexError::Unavailable(format!(
                    "checking index {} returned HTTP {}",
                    self.index_name, s
                )))
            }
        }

        let resp = self
            .request(Method::PUT, url)
            .json(&schema_body())
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!(index = %self.index_name, "created index");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        // Another process created it between our check and our create.
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexError::Write(format!(
            "creating index {} returned HTTP {}: {}",
            self.index_name, status, body
        )))
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), IndexError> {
        let mut url = self.endpoint(&["_doc", &chunk.chunk_id])?;
        url.set_query(Some("refresh=true"));
        let resp = self.request(Method::PUT, url).json(chunk).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(IndexError::Write(format!(
            "upsert {} returned HTTP {}: {}",
            chunk.chunk_id, status, body
        )))
    }

    async fn delete(&self, chunk_id: &str) -> bool {
        let url = match self.endpoint(&["_doc", chunk_id]) {
            Ok(mut url) => {
                url.set_query(Some("refresh=true"));
                url
            }
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "cannot build delete request");
                return false;
            }
        };
        match self.request(Method::DELETE, url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => true,
            Ok(resp) => {
                tracing::warn!(chunk_id, status = %resp.status(), "index delete rejected");
                false
            }
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "index delete failed");
                false
            }
        }
    }

    async fn delete_document(&self, document_id: &str) -> bool {
        let url = match self.endpoint(&["_delete_by_query"]) {
            Ok(mut url) => {
                url.set_query(Some("refresh=true"));
                url
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "cannot build delete-by-query request");
                return false;
            }
        };
        let body = json!({ "query": { "term": { "book_id": document_id } } });
        match self.request(Method::POST, url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND => true,
            Ok(resp) => {
                tracing::warn!(document_id, status = %resp.status(), "index delete-by-query rejected");
                false
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "index delete-by-query failed");
                false
            }
        }
    }

    async fn search(
        &self,
        query: &str,
        owner_user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let url = self.endpoint(&["_search"])?;
        let resp = self
            .request(Method::POST, url)
            .json(&search_body(query, owner_user_id, top_k))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Unavailable(format!(
                "search returned HTTP {}: {}",
                status, body
            )));
        }
        let json: Value = resp.json().await?;
        parse_search_response(&json)
    }
}

/// Index settings and mappings for chunk documents.
///
/// `user_id` and `file_type` also get a `.keyword` sub-field so that
/// term queries addressed to either name match.
pub fn schema_body() -> Value {
    let keyword_with_subfield = json!({
        "type": "keyword",
        "fields": { "keyword": { "type": "keyword" } }
    });
    json!({
        "settings": {
            "index": {
                "number_of_shards": 1,
                "number_of_replicas": 0
            }
        },
        "mappings": {
            "properties": {
                "chunk_id": { "type": "keyword" },
                "book_id": { "type": "keyword" },
                "title": { "type": "text" },
                "content": { "type": "text" },
                "page_start": { "type": "integer" },
                "page_end": { "type": "integer" },
                "file_type": keyword_with_subfield,
                "storage_url": { "type": "keyword" },
                "user_id": keyword_with_subfield,
                "timestamp": { "type": "date" }
            }
        }
    })
}

/// Boolean query: content must match and owner must equal; ToC chunks and
/// ToC-titled chunks are boosted without filtering anything out.
pub fn search_body(query: &str, owner_user_id: &str, top_k: usize) -> Value {
    json!({
        "size": top_k,
        "query": {
            "bool": {
                "must": [
                    { "match": { "content": query } },
                    { "term": { "user_id.keyword": owner_user_id } }
                ],
                "should": [
                    { "term": { "file_type.keyword": { "value": "toc", "boost": TOC_BOOST } } },
                    { "match": { "title": { "query": TOC_TITLE_PHRASE, "boost": TOC_TITLE_BOOST } } }
                ]
            }
        },
        "highlight": {
            "fields": { "content": {} },
            "pre_tags": ["<em>"],
            "post_tags": ["</em>"]
        }
    })
}

/// Convert a `_search` response into results, keeping backend order.
pub fn parse_search_response(json: &Value) -> Result<Vec<SearchResult>, IndexError> {
    let hits = json
        .pointer("/hits/hits")
        .and_then(|h| h.as_array())
        .ok_or_else(|| IndexError::Protocol("missing hits.hits".to_string()))?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let chunk_id = hit
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexError::Protocol("hit without _id".to_string()))?;
        let source = hit.get("_source").cloned().unwrap_or(Value::Null);
        let title = source
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let content = source.get("content").and_then(|v| v.as_str());
        let snippet = hit
            .pointer("/highlight/content/0")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| leading_snippet(content.unwrap_or_default(), FALLBACK_SNIPPET_CHARS));

        results.push(SearchResult {
            chunk_id: chunk_id.to_string(),
            score: hit.get("_score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            source_label: title.clone(),
            title,
            snippet,
            full_content: content.map(str::to_string),
            partial: false,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, Router};
    use std::sync::{Arc, Mutex};

    fn gateway(url: &str) -> OpenSearchGateway {
        let config = IndexConfig {
            url: url.to_string(),
            ..IndexConfig::default()
        };
        OpenSearchGateway::new(&config).unwrap()
    }

    #[test]
    fn owner_is_a_must_clause_not_a_boost() {
        let body = search_body("limits", "user-a", 7);
        assert_eq!(body["size"], 7);
        let must = body.pointer("/query/bool/must").unwrap().as_array().unwrap();
        assert_eq!(must[0]["match"]["content"], "limits");
        assert_eq!(must[1]["term"]["user_id.keyword"], "user-a");
        let should = body.pointer("/query/bool/should").unwrap().as_array().unwrap();
        assert_eq!(should[0]["term"]["file_type.keyword"]["value"], "toc");
        assert_eq!(should[0]["term"]["file_type.keyword"]["boost"], 3.0);
        assert_eq!(should[1]["match"]["title"]["query"], "Table of Contents");
        assert_eq!(should[1]["match"]["title"]["boost"], 2.0);
        assert_eq!(body.pointer("/highlight/pre_tags/0").unwrap(), "<em>");
    }

    #[test]
    fn schema_declares_every_field() {
        let body = schema_body();
        let props = body.pointer("/mappings/properties").unwrap().as_object().unwrap();
        for field in [
            "chunk_id",
            "book_id",
            "title",
            "content",
            "page_start",
            "page_end",
            "file_type",
            "storage_url",
            "user_id",
            "timestamp",
        ] {
            assert!(props.contains_key(field), "missing {}", field);
        }
        assert_eq!(props["user_id"]["type"], "keyword");
        assert_eq!(props["user_id"]["fields"]["keyword"]["type"], "keyword");
        assert_eq!(props["timestamp"]["type"], "date");
    }

    #[test]
    fn hits_use_highlight_or_leading_content() {
        let long = "x".repeat(500);
        let response = json!({
            "hits": { "hits": [
                {
                    "_id": "b1_chunk_0",
                    "_score": 4.5,
                    "_source": { "title": "Book (pages 1-5)", "content": "about the precalculus chapter" },
                    "highlight": { "content": ["about the <em>precalculus</em> chapter"] }
                },
                {
                    "_id": "b1_chunk_1",
                    "_score": 1.25,
                    "_source": { "title": "Book (pages 4-8)", "content": long }
                }
            ] }
        });
        let results = parse_search_response(&response).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "about the <em>precalculus</em> chapter");
        assert_eq!(results[0].source_label, "Book (pages 1-5)");
        assert_eq!(results[0].score, 4.5);
        assert_eq!(results[1].snippet.len(), 200);
        assert_eq!(results[1].full_content.as_deref().map(str::len), Some(500));
    }

    #[test]
    fn malformed_response_is_protocol_error() {
        let err = parse_search_response(&json!({ "error": "boom" })).unwrap_err();
        assert!(matches!(err, IndexError::Protocol(_)));
    }

    #[test]
    fn endpoints_encode_ids() {
        let gw = gateway("https://localhost:9200/");
        let url = gw.endpoint(&["_doc", "a b/c_chunk_0"]).unwrap();
        assert_eq!(url.as_str(), "https://localhost:9200/bookshelf/_doc/a%20b%2Fc_chunk_0");
    }

    #[test]
    fn endpoints_keep_url_prefix() {
        let gw = gateway("http://search.internal/opensearch");
        let url = gw.endpoint(&["_search"]).unwrap();
        assert_eq!(url.as_str(), "http://search.internal/opensearch/bookshelf/_search");
    }

    /// Requests seen by [`FakeBackend`], as `(method, path, query, body)`.
    type Seen = Arc<Mutex<Vec<(String, String, String, String)>>>;

    /// Minimal stand-in for the OpenSearch REST API.
    #[derive(Clone, Default)]
    struct FakeBackend {
        index_exists: bool,
        create_races: bool,
        reject_writes: bool,
        missing: bool,
        seen: Seen,
    }

    async fn fake_handler(
        State(fake): State<FakeBackend>,
        method: axum::http::Method,
        uri: axum::http::Uri,
        body: String,
    ) -> (axum::http::StatusCode, String) {
        use axum::http::StatusCode as S;

        let path = uri.path().to_string();
        fake.seen.lock().unwrap().push((
            method.to_string(),
            path.clone(),
            uri.query().unwrap_or_default().to_string(),
            body,
        ));

        match (method.as_str(), path.as_str()) {
            ("HEAD", "/bookshelf") if fake.index_exists => (S::OK, String::new()),
            ("HEAD", "/bookshelf") => (S::NOT_FOUND, String::new()),
            ("PUT", "/bookshelf") if fake.create_races => (
                S::BAD_REQUEST,
                r#"{"error":{"type":"resource_already_exists_exception"},"status":400}"#.to_string(),
            ),
            ("PUT", "/bookshelf") => (S::OK, r#"{"acknowledged":true}"#.to_string()),
            ("PUT", p) if p.starts_with("/bookshelf/_doc/") && fake.reject_writes => (
                S::BAD_REQUEST,
                r#"{"error":{"type":"mapper_parsing_exception"},"status":400}"#.to_string(),
            ),
            ("PUT", p) if p.starts_with("/bookshelf/_doc/") => {
                (S::CREATED, r#"{"result":"created"}"#.to_string())
            }
            ("DELETE", _) | ("POST", "/bookshelf/_delete_by_query") if fake.missing => {
                (S::NOT_FOUND, r#"{"result":"not_found"}"#.to_string())
            }
            ("DELETE", _) => (S::OK, r#"{"result":"deleted"}"#.to_string()),
            ("POST", "/bookshelf/_delete_by_query") => (S::OK, r#"{"deleted":3}"#.to_string()),
            _ => (S::INTERNAL_SERVER_ERROR, "unexpected request".to_string()),
        }
    }

    async fn spawn_fake(fake: FakeBackend) -> OpenSearchGateway {
        let app = Router::new().fallback(fake_handler).with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        gateway(&format!("http://{}", addr))
    }

    fn methods_and_paths(seen: &Seen) -> Vec<(String, String)> {
        seen.lock()
            .unwrap()
            .iter()
            .map(|(m, p, _, _)| (m.clone(), p.clone()))
            .collect()
    }

    fn pair(method: &str, path: &str) -> (String, String) {
        (method.to_string(), path.to_string())
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            document_id: "calc".to_string(),
            title: "Calculus (pages 1-5)".to_string(),
            content: "limits and continuity".to_string(),
            page_start: 1,
            page_end: 5,
            file_type: crate::models::FileType::Pdf,
            storage_url: String::new(),
            owner_user_id: "alice".to_string(),
            indexed_at: crate::models::normalize_timestamp(Some("2024-09-01T08:00:00Z")),
        }
    }

    #[tokio::test]
    async fn existing_index_is_left_alone() {
        let fake = FakeBackend {
            index_exists: true,
            ..FakeBackend::default()
        };
        let gw = spawn_fake(fake.clone()).await;

        gw.ensure_schema().await.unwrap();
        gw.ensure_schema().await.unwrap();
        assert_eq!(
            methods_and_paths(&fake.seen),
            vec![pair("HEAD", "/bookshelf"), pair("HEAD", "/bookshelf")]
        );
    }

    #[tokio::test]
    async fn missing_index_is_created_with_mappings() {
        let fake = FakeBackend::default();
        let gw = spawn_fake(fake.clone()).await;

        gw.ensure_schema().await.unwrap();
        assert_eq!(
            methods_and_paths(&fake.seen),
            vec![pair("HEAD", "/bookshelf"), pair("PUT", "/bookshelf")]
        );
        let seen = fake.seen.lock().unwrap();
        let sent: Value = serde_json::from_str(&seen[1].3).unwrap();
        assert_eq!(sent, schema_body());
    }

    #[tokio::test]
    async fn concurrent_create_counts_as_success() {
        let fake = FakeBackend {
            create_races: true,
            ..FakeBackend::default()
        };
        let gw = spawn_fake(fake.clone()).await;
        gw.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_puts_by_chunk_id_with_refresh() {
        let fake = FakeBackend::default();
        let gw = spawn_fake(fake.clone()).await;

        gw.upsert(&chunk("calc_chunk_0")).await.unwrap();
        let seen = fake.seen.lock().unwrap();
        let (method, path, query, body) = &seen[0];
        assert_eq!(method, "PUT");
        assert_eq!(path, "/bookshelf/_doc/calc_chunk_0");
        assert_eq!(query, "refresh=true");
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["book_id"], "calc");
        assert_eq!(sent["user_id"], "alice");
    }

    #[tokio::test]
    async fn rejected_upsert_is_write_error() {
        let fake = FakeBackend {
            reject_writes: true,
            ..FakeBackend::default()
        };
        let gw = spawn_fake(fake).await;
        let err = gw.upsert(&chunk("calc_chunk_0")).await.unwrap_err();
        match err {
            IndexError::Write(message) => assert!(message.contains("mapper_parsing_exception")),
            other => panic!("expected write error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn deletes_succeed_when_already_gone() {
        let fake = FakeBackend {
            missing: true,
            ..FakeBackend::default()
        };
        let gw = spawn_fake(fake.clone()).await;

        assert!(gw.delete("calc_chunk_9").await);
        assert!(gw.delete("calc_chunk_9").await);
        assert!(gw.delete_document("calc").await);
        assert_eq!(
            methods_and_paths(&fake.seen),
            vec![
                pair("DELETE", "/bookshelf/_doc/calc_chunk_9"),
                pair("DELETE", "/bookshelf/_doc/calc_chunk_9"),
                pair("POST", "/bookshelf/_delete_by_query"),
            ]
        );
    }

    #[tokio::test]
    async fn delete_document_matches_on_book_id() {
        let fake = FakeBackend::default();
        let gw = spawn_fake(fake.clone()).await;

        assert!(gw.delete_document("calc").await);
        let seen = fake.seen.lock().unwrap();
        let (_, _, query, body) = &seen[0];
        assert_eq!(query, "refresh=true");
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent, json!({ "query": { "term": { "book_id": "calc" } } }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let gw = gateway("http://127.0.0.1:9");
        let err = gw.search("q", "u", 5).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
        assert!(!gw.delete("x_chunk_0").await);
    }
}
