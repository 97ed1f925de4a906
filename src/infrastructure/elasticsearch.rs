//! Elasticsearch-backed search index over HTTP.
//!
//! Documents live in the [`TASK_INDEX_NAME`] index with `id`, `userId`
//! mapped as keywords, so owner filters and id walks are exact.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{SearchDocument, TaskId};
use crate::infrastructure::{IndexError, SearchHit, SearchIndex, TASK_INDEX_NAME};
use crate::search::SearchQuery;

/// Connection settings for an Elasticsearch node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    /// Base URL of the node, e.g. `http://localhost:9200`.
    pub node: String,
    /// Basic auth user name.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

// =============================================================================
// Response Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct MultiGetResponse {
    docs: Vec<MultiGetDocument>,
}

#[derive(Debug, Deserialize)]
struct MultiGetDocument {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: Option<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

// =============================================================================
// Elasticsearch Index
// =============================================================================

/// [`SearchIndex`] backed by an Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

fn map_send_error(error: &reqwest::Error) -> IndexError {
    if error.is_timeout() {
        IndexError::Timeout
    } else {
        IndexError::Unavailable(error.to_string())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, IndexError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(IndexError::Unavailable(format!("HTTP {status}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IndexError::Rejected(format!("HTTP {status}: {body}")));
    }
    response
        .json()
        .await
        .map_err(|error| IndexError::Serialization(error.to_string()))
}

impl ElasticsearchIndex {
    /// Creates a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| IndexError::Unavailable(error.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{TASK_INDEX_NAME}/{path}",
            self.config.node.trim_end_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_deref()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, IndexError> {
        builder.send().await.map_err(|error| map_send_error(&error))
    }

    /// Creates the index with its mapping if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexError`] if the node is unreachable or refuses the
    /// mapping for a reason other than the index already existing.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let mapping = json!({
            "mappings": {
                "properties": {
                    "id": { "type": "keyword" },
                    "userId": { "type": "keyword" },
                    "title": { "type": "text" },
                    "description": { "type": "text" },
                    "completed": { "type": "boolean" },
                    "dueDate": { "type": "date", "format": "yyyy-MM-dd" },
                    "createdAt": { "type": "date" },
                }
            }
        });
        let url = format!(
            "{}/{TASK_INDEX_NAME}",
            self.config.node.trim_end_matches('/')
        );
        let response = self
            .send(self.request(reqwest::Method::PUT, url).json(&mapping))
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(index = TASK_INDEX_NAME, "Created search index");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST
            && body.contains("resource_already_exists_exception")
        {
            return Ok(());
        }
        if status.is_server_error() {
            Err(IndexError::Unavailable(format!("HTTP {status}")))
        } else {
            Err(IndexError::Rejected(format!("HTTP {status}: {body}")))
        }
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError> {
        let url = self.url(&format!("_doc/{}?refresh=wait_for", document.task_id));
        let response = self
            .send(self.request(reqwest::Method::PUT, url).json(document))
            .await?;
        let _: Value = read_json(response).await?;
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, IndexError> {
        let url = self.url(&format!("_doc/{id}?refresh=wait_for"));
        let response = self.send(self.request(reqwest::Method::DELETE, url)).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let _: Value = read_json(response).await?;
        Ok(true)
    }

    async fn get_many(&self, ids: &[TaskId]) -> Result<Vec<SearchDocument>, IndexError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url("_mget"))
                    .json(&json!({ "ids": ids })),
            )
            .await?;
        let body: MultiGetResponse = read_json(response).await?;
        Ok(body
            .docs
            .into_iter()
            .filter(|document| document.found)
            .filter_map(|document| document.source)
            .collect())
    }

    async fn ids_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskId>, IndexError> {
        let query = cursor.map_or_else(
            || json!({ "match_all": {} }),
            |cursor| json!({ "range": { "id": { "gt": cursor.to_string() } } }),
        );
        let body = json!({
            "size": limit,
            "_source": false,
            "query": query,
            "sort": [{ "id": "asc" }],
        });
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url("_search"))
                    .json(&body),
            )
            .await?;
        let parsed: SearchResponse = read_json(response).await?;
        parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                hit.id
                    .parse()
                    .map_err(|error: uuid::Error| IndexError::Serialization(error.to_string()))
            })
            .collect()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.url("_search"))
                    .json(&query.to_elasticsearch()),
            )
            .await?;
        let parsed: SearchResponse = read_json(response).await?;
        Ok(parsed
            .hits
            .hits
            .into_iter()
            .filter_map(|hit| {
                hit.source.map(|document| SearchHit {
                    document,
                    score: hit.score.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let response = self
            .send(self.request(reqwest::Method::GET, self.url("_count")))
            .await?;
        let parsed: CountResponse = read_json(response).await?;
        Ok(parsed.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OwnerId;
    use crate::search::QueryPlanner;
    use rstest::rstest;

    fn config(node: &str) -> ElasticsearchConfig {
        ElasticsearchConfig {
            node: node.to_string(),
            username: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            timeout: Duration::from_millis(200),
        }
    }

    #[rstest]
    fn test_url_trims_trailing_slash() {
        let index = ElasticsearchIndex::new(config("http://localhost:9200/")).unwrap();
        assert_eq!(index.url("_count"), "http://localhost:9200/tasks/_count");
    }

    #[rstest]
    fn test_search_response_parses_hits() {
        let raw = json!({
            "hits": {
                "hits": [{
                    "_id": "0190b5a4-0000-7000-8000-000000000001",
                    "_score": 1.5,
                    "_source": {
                        "id": "0190b5a4-0000-7000-8000-000000000001",
                        "title": "Buy milk",
                        "description": null,
                        "completed": false,
                        "dueDate": null,
                        "userId": "6b1f0b0e-8d0a-4c3e-9a52-1f8b7c0e2d11",
                        "createdAt": "2025-01-01T00:00:00Z"
                    }
                }]
            }
        });

        let parsed: SearchResponse = serde_json::from_value(raw).unwrap();

        assert_eq!(parsed.hits.hits.len(), 1);
        assert_eq!(parsed.hits.hits[0].score, Some(1.5));
        assert_eq!(
            parsed.hits.hits[0].source.as_ref().unwrap().title,
            "Buy milk"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let index = ElasticsearchIndex::new(config("http://127.0.0.1:1")).unwrap();
        let query = QueryPlanner::new()
            .plan("milk", OwnerId::generate(), false)
            .unwrap();

        let result = index.search(&query).await;

        assert!(matches!(
            result,
            Err(IndexError::Unavailable(_) | IndexError::Timeout)
        ));
    }

    #[rstest]
    #[tokio::test]
    #[ignore = "Requires Elasticsearch instance"]
    async fn test_elasticsearch_round_trip() {
        let node = std::env::var("ELASTICSEARCH_NODE").unwrap();
        let index = ElasticsearchIndex::new(ElasticsearchConfig {
            node,
            username: std::env::var("ELASTICSEARCH_USERNAME").ok(),
            password: std::env::var("ELASTICSEARCH_PASSWORD").ok(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        index.ensure_index().await.unwrap();

        let owner = OwnerId::generate();
        let task = crate::domain::Task::create(
            TaskId::generate(),
            owner,
            crate::domain::NewTask::titled("Elastic milk run"),
            crate::domain::Timestamp::now(),
        );
        let document = SearchDocument::from(&task);
        index.upsert(&document).await.unwrap();

        let query = QueryPlanner::new().plan("elastic mil", owner, false).unwrap();
        let hits = index.search(&query).await.unwrap();
        assert_eq!(hits[0].document.task_id, task.task_id);

        assert!(index.delete(&task.task_id).await.unwrap());
    }
}
