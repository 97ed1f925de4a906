//! Query planning: free text plus an owner constraint into a scoped,
//! ranked multi-field query.
//!
//! Planning is pure. Invalid input is rejected here so that the index is
//! never contacted for it.

use serde_json::{Value, json};

use crate::domain::OwnerId;
use crate::search::SearchError;

// =============================================================================
// Limits
// =============================================================================

/// Maximum number of results per search.
pub const MAX_SEARCH_LIMIT: u32 = 100;

/// Number of results when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Longest accepted free text, in characters after trimming.
pub const MAX_QUERY_CHARS: usize = 256;

/// Most tokens a query may contain.
pub const MAX_QUERY_TOKENS: usize = 16;

/// Index fields searched, with their ranking boost.
pub const SEARCH_FIELDS: [(&str, f64); 2] = [("title", 2.0), ("description", 1.0)];

/// Normalizes pagination parameters for search queries.
///
/// `limit` defaults to [`DEFAULT_SEARCH_LIMIT`] and is clamped to
/// `1..=MAX_SEARCH_LIMIT`; `offset` defaults to 0.
#[must_use]
pub const fn normalize_search_pagination(limit: Option<u32>, offset: Option<u32>) -> (u32, u32) {
    let normalized_limit = match limit {
        Some(0) => 1,
        Some(value) if value > MAX_SEARCH_LIMIT => MAX_SEARCH_LIMIT,
        Some(value) => value,
        None => DEFAULT_SEARCH_LIMIT,
    };
    let normalized_offset = match offset {
        Some(value) => value,
        None => 0,
    };
    (normalized_limit, normalized_offset)
}

// =============================================================================
// Normalization
// =============================================================================

/// Splits lowercased text into alphanumeric tokens.
///
/// Shared by the planner and the in-memory index so that queries and
/// documents are tokenized identically.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Normalized free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    key: String,
    tokens: Vec<String>,
}

impl NormalizedQuery {
    /// Tokens joined by single spaces.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Individual tokens in input order.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Normalizes a raw query: trim, lowercase, split on non-alphanumerics.
///
/// Idempotent: `normalize_query(normalize_query(q).key()) == normalize_query(q)`.
#[must_use]
pub fn normalize_query(raw: &str) -> NormalizedQuery {
    let lowered = raw.trim().to_lowercase();
    let tokens: Vec<String> = tokenize(&lowered).collect();
    let key = tokens.join(" ");
    NormalizedQuery { key, tokens }
}

// =============================================================================
// Search Query
// =============================================================================

/// A planned, owner-scoped search.
///
/// Every token must match in `title` or `description`; the last token
/// matches as a prefix. Results are ordered by score descending, then
/// `created_at` descending, then id descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Normalized tokens (never empty).
    pub tokens: Vec<String>,
    /// Exact owner filter; `None` only for privileged requesters.
    pub owner_filter: Option<OwnerId>,
    /// Maximum number of hits.
    pub limit: u32,
    /// Number of hits to skip.
    pub offset: u32,
}

impl SearchQuery {
    /// Returns the query with normalized pagination applied.
    #[must_use]
    pub fn paginate(self, limit: Option<u32>, offset: Option<u32>) -> Self {
        let (limit, offset) = normalize_search_pagination(limit, offset);
        Self {
            limit,
            offset,
            ..self
        }
    }

    /// Returns `true` if `token` at `position` matches `candidate`.
    ///
    /// The last token matches any candidate it is a prefix of; others must be
    /// equal. A `position` past the last token matches nothing.
    #[must_use]
    pub fn token_matches(&self, position: usize, candidate: &str) -> bool {
        let Some(token) = self.tokens.get(position) else {
            return false;
        };
        if position + 1 == self.tokens.len() {
            candidate.starts_with(token.as_str())
        } else {
            candidate == token
        }
    }

    /// Renders the Elasticsearch query DSL body.
    #[must_use]
    pub fn to_elasticsearch(&self) -> Value {
        let fields: Vec<String> = SEARCH_FIELDS
            .iter()
            .map(|(field, boost)| format!("{field}^{boost}"))
            .collect();
        let last = self.tokens.len().saturating_sub(1);

        let must: Vec<Value> = self
            .tokens
            .iter()
            .enumerate()
            .map(|(position, token)| {
                if position == last {
                    json!({
                        "multi_match": {
                            "query": token,
                            "type": "phrase_prefix",
                            "fields": fields,
                        }
                    })
                } else {
                    json!({
                        "multi_match": {
                            "query": token,
                            "fields": fields,
                        }
                    })
                }
            })
            .collect();

        let filter: Vec<Value> = self
            .owner_filter
            .iter()
            .map(|owner| json!({ "term": { "userId": owner.to_string() } }))
            .collect();

        json!({
            "from": self.offset,
            "size": self.limit,
            "track_scores": true,
            "query": {
                "bool": {
                    "must": must,
                    "filter": filter,
                }
            },
            "sort": [
                { "_score": "desc" },
                { "createdAt": "desc" },
                { "id": "desc" },
            ],
        })
    }
}

// =============================================================================
// Query Planner
// =============================================================================

/// Builds [`SearchQuery`] values from free text.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner {
    max_query_chars: usize,
    max_query_tokens: usize,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self {
            max_query_chars: MAX_QUERY_CHARS,
            max_query_tokens: MAX_QUERY_TOKENS,
        }
    }
}

impl QueryPlanner {
    /// Creates a planner with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plans a search of `free_text` for `owner_id`.
    ///
    /// The owner filter is omitted only when `is_privileged` is set.
    /// Pagination starts at the defaults; see [`SearchQuery::paginate`].
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::InvalidQuery`] for empty or whitespace-only
    /// text, text without any alphanumeric token, text longer than
    /// [`MAX_QUERY_CHARS`], or more than [`MAX_QUERY_TOKENS`] tokens.
    pub fn plan(
        &self,
        free_text: &str,
        owner_id: OwnerId,
        is_privileged: bool,
    ) -> Result<SearchQuery, SearchError> {
        let trimmed = free_text.trim();
        if trimmed.is_empty() {
            return Err(SearchError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > self.max_query_chars {
            return Err(SearchError::InvalidQuery(format!(
                "query must be at most {} characters",
                self.max_query_chars
            )));
        }

        let normalized = normalize_query(trimmed);
        if normalized.tokens.is_empty() {
            return Err(SearchError::InvalidQuery(
                "query must contain at least one letter or digit".to_string(),
            ));
        }
        if normalized.tokens.len() > self.max_query_tokens {
            return Err(SearchError::InvalidQuery(format!(
                "query must contain at most {} terms",
                self.max_query_tokens
            )));
        }

        Ok(SearchQuery {
            tokens: normalized.tokens,
            owner_filter: (!is_privileged).then_some(owner_id),
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("  Urgent   Task  ", "urgent task")]
    #[case("buy-milk", "buy milk")]
    #[case("Q3/report, final!", "q3 report final")]
    #[case("already normalized", "already normalized")]
    fn test_normalize_query(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_query(raw).key(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    #[case("--- !!!")]
    fn test_plan_rejects_queries_without_tokens(#[case] raw: &str) {
        let result = QueryPlanner::new().plan(raw, OwnerId::generate(), false);
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[rstest]
    fn test_plan_rejects_long_query() {
        let raw = "a".repeat(MAX_QUERY_CHARS + 1);
        let result = QueryPlanner::new().plan(&raw, OwnerId::generate(), false);
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[rstest]
    fn test_plan_rejects_too_many_tokens() {
        let raw = vec!["word"; MAX_QUERY_TOKENS + 1].join(" ");
        let result = QueryPlanner::new().plan(&raw, OwnerId::generate(), false);
        assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    }

    #[rstest]
    fn test_plan_scopes_unprivileged_requester() {
        let owner = OwnerId::generate();
        let query = QueryPlanner::new().plan("milk", owner, false).unwrap();
        assert_eq!(query.owner_filter, Some(owner));
        assert_eq!(query.limit, DEFAULT_SEARCH_LIMIT);
    }

    #[rstest]
    fn test_plan_leaves_privileged_requester_unscoped() {
        let query = QueryPlanner::new()
            .plan("milk", OwnerId::generate(), true)
            .unwrap();
        assert_eq!(query.owner_filter, None);
    }

    #[rstest]
    #[case(None, None, (DEFAULT_SEARCH_LIMIT, 0))]
    #[case(Some(500), None, (MAX_SEARCH_LIMIT, 0))]
    #[case(Some(0), None, (1, 0))]
    #[case(Some(5), Some(10), (5, 10))]
    fn test_normalize_search_pagination(
        #[case] limit: Option<u32>,
        #[case] offset: Option<u32>,
        #[case] expected: (u32, u32),
    ) {
        assert_eq!(normalize_search_pagination(limit, offset), expected);
    }

    #[rstest]
    fn test_last_token_matches_as_prefix() {
        let query = QueryPlanner::new()
            .plan("buy mil", OwnerId::generate(), false)
            .unwrap();

        assert!(query.token_matches(0, "buy"));
        assert!(!query.token_matches(0, "buying"));
        assert!(query.token_matches(1, "milk"));
        assert!(!query.token_matches(1, "mi"));
    }

    #[rstest]
    fn test_token_position_out_of_range_matches_nothing() {
        let query = QueryPlanner::new()
            .plan("milk", OwnerId::generate(), false)
            .unwrap();

        assert!(!query.token_matches(1, "milk"));
        assert!(!query.token_matches(usize::MAX, ""));
    }

    #[rstest]
    fn test_elasticsearch_body_has_owner_filter_and_tie_break() {
        let owner = OwnerId::generate();
        let body = QueryPlanner::new()
            .plan("weekly report", owner, false)
            .unwrap()
            .paginate(Some(5), Some(10))
            .to_elasticsearch();

        assert_eq!(body["size"], 5);
        assert_eq!(body["from"], 10);
        assert_eq!(body["query"]["bool"]["must"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["query"]["bool"]["must"][1]["multi_match"]["type"],
            "phrase_prefix"
        );
        assert_eq!(
            body["query"]["bool"]["filter"][0]["term"]["userId"],
            owner.to_string()
        );
        assert_eq!(body["sort"][1]["createdAt"], "desc");
    }

    #[rstest]
    fn test_elasticsearch_body_without_owner_filter() {
        let body = QueryPlanner::new()
            .plan("report", OwnerId::generate(), true)
            .unwrap()
            .to_elasticsearch();

        assert!(body["query"]["bool"]["filter"].as_array().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn normalize_query_is_idempotent(raw in "[ -~]{0,80}") {
            let once = normalize_query(&raw);
            let twice = normalize_query(once.key());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn planned_tokens_are_lowercase_alphanumeric(raw in "[ -~]{1,80}") {
            if let Ok(query) = QueryPlanner::new().plan(&raw, OwnerId::generate(), false) {
                prop_assert!(!query.tokens.is_empty());
                for token in &query.tokens {
                    prop_assert!(token.chars().all(|character| character.is_alphanumeric()));
                    prop_assert_eq!(token.clone(), token.to_lowercase());
                }
            }
        }
    }
}
