//! In-memory search index.
//!
//! Documents are tokenized at query time with the same tokenizer the planner
//! uses, so matching is exactly what [`SearchQuery::token_matches`] defines.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{SearchDocument, TaskId};
use crate::infrastructure::search_index::rank_order;
use crate::infrastructure::{IndexError, SearchHit, SearchIndex};
use crate::search::planner::{SEARCH_FIELDS, tokenize};
use crate::search::SearchQuery;

/// In-memory implementation of [`SearchIndex`].
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchIndex {
    documents: Arc<RwLock<BTreeMap<TaskId, SearchDocument>>>,
}

impl InMemorySearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored document for `id`, if any.
    pub async fn get(&self, id: &TaskId) -> Option<SearchDocument> {
        self.documents.read().await.get(id).cloned()
    }
}

/// Scores `document` against `query`, or `None` if some token is unmatched.
///
/// Each occurrence of a token adds the boost of the field it occurs in.
fn score_document(query: &SearchQuery, document: &SearchDocument) -> Option<f64> {
    let field_tokens: Vec<(Vec<String>, f64)> = SEARCH_FIELDS
        .iter()
        .map(|(field, boost)| {
            let text = match *field {
                "title" => document.title.as_str(),
                _ => document.description.as_deref().unwrap_or_default(),
            };
            (tokenize(text).collect(), *boost)
        })
        .collect();

    let mut total = 0.0;
    for position in 0..query.tokens.len() {
        let token_score: f64 = field_tokens
            .iter()
            .map(|(tokens, boost)| {
                let occurrences = tokens
                    .iter()
                    .filter(|candidate| query.token_matches(position, candidate))
                    .count();
                #[allow(clippy::cast_precision_loss)]
                let occurrences = occurrences as f64;
                occurrences * boost
            })
            .sum();
        if token_score == 0.0 {
            return None;
        }
        total += token_score;
    }
    Some(total)
}

#[async_trait]
#[allow(clippy::significant_drop_tightening)]
impl SearchIndex for InMemorySearchIndex {
    async fn upsert(&self, document: &SearchDocument) -> Result<(), IndexError> {
        self.documents
            .write()
            .await
            .insert(document.task_id, document.clone());
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, IndexError> {
        Ok(self.documents.write().await.remove(id).is_some())
    }

    async fn get_many(&self, ids: &[TaskId]) -> Result<Vec<SearchDocument>, IndexError> {
        let guard = self.documents.read().await;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn ids_after(
        &self,
        cursor: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskId>, IndexError> {
        let guard = self.documents.read().await;
        let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(guard
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let guard = self.documents.read().await;
        let mut hits: Vec<SearchHit> = guard
            .values()
            .filter(|document| {
                query
                    .owner_filter
                    .is_none_or(|owner| document.owner_id == owner)
            })
            .filter_map(|document| {
                score_document(query, document).map(|score| SearchHit {
                    document: document.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(rank_order);

        Ok(hits
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.documents.read().await.len() as u64)
    }
}
