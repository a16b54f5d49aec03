use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{SqliteStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticCollection {
    Functions,
    Drifts,
    BizLogic,
    Docs,
}

impl SemanticCollection {
    pub const ALL: [SemanticCollection; 4] = [
        Self::Functions,
        Self::Drifts,
        Self::BizLogic,
        Self::Docs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Functions => "functions",
            Self::Drifts => "drifts",
            Self::BizLogic => "biz_logic",
            Self::Docs => "docs",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticEntry {
    pub entry_id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticHit {
    pub entry_id: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub similarity: f32,
}

/// Similarity index namespaced per repository and collection. Upserting an
/// existing entry id replaces the entry.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn upsert(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        entries: Vec<SemanticEntry>,
    ) -> Result<(), StoreError>;

    async fn search(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        query_embedding: &[f32],
        limit: u32,
    ) -> Result<Vec<SemanticHit>, StoreError>;

    async fn count(&self, repo_id: &str, collection: SemanticCollection)
    -> Result<u64, StoreError>;
}

pub struct SqliteSemanticIndex {
    db_path: PathBuf,
}

impl SqliteSemanticIndex {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn store(&self) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(&self.db_path)
    }
}

#[async_trait]
impl SemanticIndex for SqliteSemanticIndex {
    async fn upsert(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        entries: Vec<SemanticEntry>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let store = self.store()?;
        store.upsert_semantic_entries(repo_id, collection, &entries)
    }

    async fn search(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        query_embedding: &[f32],
        limit: u32,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        self.store()?
            .search_semantic_entries(repo_id, collection, query_embedding, limit)
    }

    async fn count(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
    ) -> Result<u64, StoreError> {
        self.store()?.count_semantic_entries(repo_id, collection)
    }
}

impl SqliteStore {
    pub fn upsert_semantic_entries(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        entries: &[SemanticEntry],
    ) -> Result<(), StoreError> {
        let now = crate::current_unix_timestamp_millis();
        let tx = rusqlite::Transaction::new_unchecked(
            self.connection(),
            rusqlite::TransactionBehavior::Immediate,
        )?;
        for entry in entries {
            tx.execute(
                r#"
                INSERT INTO semantic_entries (
                    repo_id, collection, entry_id, text, metadata_json, embedding_json, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(repo_id, collection, entry_id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding_json = excluded.embedding_json,
                    updated_at = excluded.updated_at
                "#,
                params![
                    repo_id,
                    collection.as_str(),
                    entry.entry_id,
                    entry.text,
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&entry.embedding)?,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Brute-force cosine ranking over one collection, best match first.
    pub fn search_semantic_entries(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
        query_embedding: &[f32],
        limit: u32,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        if query_embedding.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.connection().prepare(
            r#"
            SELECT entry_id, text, metadata_json, embedding_json
            FROM semantic_entries
            WHERE repo_id = ?1 AND collection = ?2
            "#,
        )?;
        let rows = stmt.query_map(params![repo_id, collection.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (entry_id, text, metadata_json, embedding_json) = row?;
            let embedding = serde_json::from_str::<Vec<f32>>(&embedding_json)?;
            let Some(similarity) = cosine_similarity(query_embedding, &embedding) else {
                continue;
            };
            hits.push(SemanticHit {
                entry_id,
                text,
                metadata: serde_json::from_str(&metadata_json)?,
                similarity,
            });
        }

        hits.sort_by(|left, right| {
            right
                .similarity
                .partial_cmp(&left.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| left.entry_id.cmp(&right.entry_id))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }

    pub fn count_semantic_entries(
        &self,
        repo_id: &str,
        collection: SemanticCollection,
    ) -> Result<u64, StoreError> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM semantic_entries WHERE repo_id = ?1 AND collection = ?2",
            params![repo_id, collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// `None` when the vectors differ in length or either has zero norm.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f32> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut left_norm = 0.0f32;
    let mut right_norm = 0.0f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm <= f32::EPSILON || right_norm <= f32::EPSILON {
        return None;
    }
    Some(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn entry(entry_id: &str, text: &str, embedding: Vec<f32>) -> SemanticEntry {
        let mut metadata = Map::new();
        metadata.insert("function".to_owned(), json!(entry_id));
        SemanticEntry {
            entry_id: entry_id.to_owned(),
            text: text.to_owned(),
            metadata,
            embedding,
        }
    }

    #[test]
    fn cosine_similarity_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_within_namespace() {
        let temp = tempdir().expect("tempdir");
        let index = SqliteSemanticIndex::new(temp.path().join("memory.sqlite"));

        index
            .upsert(
                "repo-a",
                SemanticCollection::Drifts,
                vec![
                    entry("near", "tax rounding drift", vec![1.0, 0.1, 0.0]),
                    entry("far", "logging format drift", vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .expect("upsert repo-a");
        index
            .upsert(
                "repo-b",
                SemanticCollection::Drifts,
                vec![entry("other", "tax rounding drift", vec![1.0, 0.0, 0.0])],
            )
            .await
            .expect("upsert repo-b");

        let hits = index
            .search("repo-a", SemanticCollection::Drifts, &[1.0, 0.0, 0.0], 5)
            .await
            .expect("search");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry_id, "near");
        assert!(hits[0].similarity > hits[1].similarity);
        assert_eq!(hits[0].metadata.get("function"), Some(&json!("near")));

        let functions = index
            .count("repo-a", SemanticCollection::Functions)
            .await
            .expect("count");
        assert_eq!(functions, 0);
    }

    #[tokio::test]
    async fn upsert_replaces_entries_with_the_same_id() {
        let temp = tempdir().expect("tempdir");
        let index = SqliteSemanticIndex::new(temp.path().join("memory.sqlite"));

        for text in ["first", "second"] {
            index
                .upsert(
                    "repo-a",
                    SemanticCollection::Functions,
                    vec![entry("fn_repo-a_load", text, vec![0.5, 0.5])],
                )
                .await
                .expect("upsert");
        }

        let count = index
            .count("repo-a", SemanticCollection::Functions)
            .await
            .expect("count");
        assert_eq!(count, 1);

        let hits = index
            .search("repo-a", SemanticCollection::Functions, &[0.5, 0.5], 1)
            .await
            .expect("search");
        assert_eq!(hits[0].text, "second");
    }
}
