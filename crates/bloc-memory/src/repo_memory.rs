use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bloc_config::{BlocConfig, bloc_dir, memory_db_path};
use bloc_core::{
    CallNode, DriftSeverity, PatchChange, RiskWarning, Verdict, content_hash, normalize_path,
    repo_id,
};
use bloc_store::{
    DocRunRecord, DriftPatternRecord, FunctionSignatureRecord, PipelineRunRecord, RepoLock,
    RepoRecord, SemanticCollection, SemanticEntry, SemanticHit, SemanticIndex,
    SqliteSemanticIndex, SqliteStore, current_unix_timestamp_millis,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::MemoryError;
use crate::embedding::{EmbeddingProvider, load_embedding_provider};
use crate::warnings::{
    dedupe_warnings, function_name_for_change, memory_warnings, semantic_warnings,
};

pub const DOC_CHUNK_CHARS: usize = 500;

const LOCKS_DIR_NAME: &str = "locks";
const WARNING_SEARCH_LIMIT: u32 = 3;
const CONTEXT_BIZ_LIMIT: u32 = 5;
const CONTEXT_DOC_LIMIT: u32 = 3;
const CONTEXT_RUN_LIMIT: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFunction {
    pub name: String,
    pub previous_signature: String,
    pub new_signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecordRequest {
    pub session_id: String,
    pub verdict: Option<Verdict>,
    pub preservation_pct: Option<f64>,
    pub critical_drifts: Option<usize>,
    pub risk_score: Option<f64>,
    pub patch_changes: Vec<PatchChange>,
    pub now_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftRecordRequest {
    pub function_name: String,
    pub severity: DriftSeverity,
    pub description: String,
    pub before_output: String,
    pub after_output: String,
    pub now_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocRunRequest {
    pub session_id: String,
    pub qa_score: Option<f64>,
    pub word_count: Option<i64>,
    pub final_markdown: Option<String>,
    pub now_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub repo_id: String,
    pub repo: Option<RepoRecord>,
    pub drift_pattern_count: usize,
    pub tracked_function_count: usize,
    pub semantic_counts: BTreeMap<String, u64>,
}

/// Cross-run memory for one repository. Structured records live in SQLite;
/// the semantic index and embedding provider are injected so callers own
/// their lifecycle. A semantic write that fails after the structured write
/// succeeded is logged and does not fail the operation.
pub struct RepoMemory {
    repo_path: String,
    repo_id: String,
    db_path: PathBuf,
    lock_dir: PathBuf,
    index: Arc<dyn SemanticIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_similarity: f32,
}

impl RepoMemory {
    pub fn open(repo_root: impl AsRef<Path>, config: &BlocConfig) -> Result<Self, MemoryError> {
        let repo_root = repo_root.as_ref();
        let db_path = memory_db_path(repo_root, config);
        let index = Arc::new(SqliteSemanticIndex::new(&db_path));
        let embedder = load_embedding_provider(&config.memory)?;

        let mut memory = Self::with_parts(
            repo_root,
            db_path,
            index,
            embedder,
            config.memory.min_similarity as f32,
        );
        memory.lock_dir = bloc_dir(repo_root).join(LOCKS_DIR_NAME);
        Ok(memory)
    }

    pub fn with_parts(
        repo_root: &Path,
        db_path: PathBuf,
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        min_similarity: f32,
    ) -> Self {
        let canonical = repo_root
            .canonicalize()
            .unwrap_or_else(|_| repo_root.to_path_buf());
        let lock_dir = db_path
            .parent()
            .map(|parent| parent.join(LOCKS_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(LOCKS_DIR_NAME));

        Self {
            repo_path: normalize_path(&canonical.to_string_lossy()),
            repo_id: repo_id(repo_root),
            db_path,
            lock_dir,
            index,
            embedder,
            min_similarity,
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    fn open_store(&self) -> Result<SqliteStore, MemoryError> {
        Ok(SqliteStore::open(&self.db_path)?)
    }

    /// Appends a run verdict. Returns the generated run id.
    pub fn record_run(&self, request: RunRecordRequest) -> Result<String, MemoryError> {
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(MemoryError::InvalidInput(
                "session_id must not be empty".to_owned(),
            ));
        }

        let now = request.now_ms.unwrap_or_else(current_unix_timestamp_millis);
        let run_id = format!(
            "run_{}",
            &content_hash(&format!("{}:{session_id}:{now}", self.repo_id))[..12]
        );
        let record = PipelineRunRecord {
            run_id: run_id.clone(),
            repo_id: self.repo_id.clone(),
            session_id: session_id.to_owned(),
            ran_at: now,
            verdict: request.verdict.map(|verdict| verdict.as_str().to_owned()),
            preservation_pct: request.preservation_pct,
            critical_drifts: request
                .critical_drifts
                .map(|count| i64::try_from(count).unwrap_or(i64::MAX)),
            risk_score: request.risk_score,
            patch_summary: serde_json::to_string(&request.patch_changes)?,
        };

        self.open_store()?
            .record_pipeline_run(&self.repo_path, &record)?;
        tracing::debug!(run_id = %run_id, verdict = ?record.verdict, "recorded pipeline run");
        Ok(run_id)
    }

    /// Records one drift occurrence. Returns how many times the same
    /// function and description have now been seen.
    pub async fn record_drift(&self, request: DriftRecordRequest) -> Result<i64, MemoryError> {
        let function_name = request.function_name.trim();
        let description = request.description.trim();
        if function_name.is_empty() || description.is_empty() {
            return Err(MemoryError::InvalidInput(
                "drift requires a function name and description".to_owned(),
            ));
        }

        let now = request.now_ms.unwrap_or_else(current_unix_timestamp_millis);
        let record = DriftPatternRecord {
            repo_id: self.repo_id.clone(),
            function_name: function_name.to_owned(),
            severity: request.severity.as_str().to_owned(),
            description: description.to_owned(),
            before_output: request.before_output.clone(),
            after_output: request.after_output.clone(),
            first_seen: now,
            last_seen: now,
            times_seen: 1,
        };
        let times_seen = self
            .open_store()?
            .record_drift_pattern(&self.repo_path, &record)?;

        let text = format!(
            "Drift in function: {function_name}\nSeverity: {}\nDescription: {description}\nBefore: {}\nAfter: {}",
            request.severity.as_str(),
            request.before_output,
            request.after_output,
        );
        let mut metadata = Map::new();
        metadata.insert("function_name".to_owned(), json!(function_name));
        metadata.insert("severity".to_owned(), json!(request.severity.as_str()));
        metadata.insert("times_seen".to_owned(), json!(times_seen));
        let entry_id = format!(
            "drift_{}_{function_name}_{}",
            self.repo_id,
            &content_hash(description)[..12]
        );
        self.index_best_effort(
            SemanticCollection::Drifts,
            vec![(entry_id, text, metadata)],
        )
        .await;

        Ok(times_seen)
    }

    /// Upserts a signature snapshot for every node and reports the functions
    /// whose snapshot differs from the stored one. Held under the repository
    /// lock so overlapping runs see a consistent before/after view.
    pub async fn record_functions(
        &self,
        nodes: &[CallNode],
        now_ms: Option<i64>,
    ) -> Result<Vec<ChangedFunction>, MemoryError> {
        let now = now_ms.unwrap_or_else(current_unix_timestamp_millis);
        let mut changed = Vec::new();
        {
            let _lock = RepoLock::acquire(&self.lock_dir, &self.repo_id)?;
            let store = self.open_store()?;
            for node in nodes {
                let record = signature_record(&self.repo_id, node, now);
                let upsert = store.upsert_function_signature(&self.repo_path, &record)?;
                if upsert.changed
                    && let Some(previous) = upsert.previous
                {
                    changed.push(ChangedFunction {
                        name: node.id.clone(),
                        previous_signature: previous.signature,
                        new_signature: record.signature,
                    });
                }
            }
        }

        let entries = nodes
            .iter()
            .map(|node| {
                let effects = node
                    .side_effects
                    .iter()
                    .map(|effect| effect.as_str())
                    .collect::<Vec<_>>();
                let text = format!(
                    "Function: {}\nModule: {}\nKind: {}\nSide effects: {}",
                    node.signature,
                    node.module,
                    node.kind.as_str(),
                    if effects.is_empty() {
                        "none".to_owned()
                    } else {
                        effects.join(", ")
                    },
                );
                let mut metadata = Map::new();
                metadata.insert("name".to_owned(), json!(node.id));
                metadata.insert("module".to_owned(), json!(node.module));
                metadata.insert("line".to_owned(), json!(node.line));
                metadata.insert("has_side_effects".to_owned(), json!(!effects.is_empty()));
                (format!("fn_{}_{}", self.repo_id, node.id), text, metadata)
            })
            .collect::<Vec<_>>();
        self.index_best_effort(SemanticCollection::Functions, entries)
            .await;

        Ok(changed)
    }

    /// Indexes business-logic hints. Blank hints are skipped; returns the
    /// number indexed.
    pub async fn record_biz_logic(&self, hints: &[String]) -> Result<usize, MemoryError> {
        let entries = hints
            .iter()
            .map(|hint| hint.trim())
            .filter(|hint| !hint.is_empty())
            .map(|hint| {
                let mut metadata = Map::new();
                metadata.insert("type".to_owned(), json!("biz_logic"));
                (
                    format!("biz_{}_{}", self.repo_id, &content_hash(hint)[..12]),
                    hint.to_owned(),
                    metadata,
                )
            })
            .collect::<Vec<_>>();
        let count = entries.len();
        self.index_best_effort(SemanticCollection::BizLogic, entries)
            .await;
        Ok(count)
    }

    /// Marks the session's doc runs approved and indexes the markdown in
    /// fixed-size fragments. Returns the fragment count.
    pub async fn record_approved_doc(
        &self,
        session_id: &str,
        markdown: &str,
        now_ms: Option<i64>,
    ) -> Result<usize, MemoryError> {
        let now = now_ms.unwrap_or_else(current_unix_timestamp_millis);
        self.open_store()?
            .update_doc_approval(session_id, "approved", None, now)?;

        let entries = chunk_chars(markdown, DOC_CHUNK_CHARS)
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let mut metadata = Map::new();
                metadata.insert("session_id".to_owned(), json!(session_id));
                metadata.insert("chunk".to_owned(), json!(index));
                (
                    format!("doc_{}_{session_id}_{index}", self.repo_id),
                    chunk,
                    metadata,
                )
            })
            .collect::<Vec<_>>();
        let count = entries.len();
        self.index_best_effort(SemanticCollection::Docs, entries)
            .await;
        Ok(count)
    }

    pub fn record_doc_run(&self, request: DocRunRequest) -> Result<String, MemoryError> {
        let now = request.now_ms.unwrap_or_else(current_unix_timestamp_millis);
        let doc_run_id = format!(
            "doc_{}",
            &content_hash(&format!("{}:{}:{now}", self.repo_id, request.session_id))[..12]
        );
        let record = DocRunRecord {
            doc_run_id: doc_run_id.clone(),
            repo_id: self.repo_id.clone(),
            session_id: request.session_id,
            ran_at: now,
            qa_score: request.qa_score,
            word_count: request.word_count,
            approval_status: "pending".to_owned(),
            reviewer_comment: None,
            reviewed_at: None,
            final_markdown: request.final_markdown,
        };
        self.open_store()?.record_doc_run(&self.repo_path, &record)?;
        Ok(doc_run_id)
    }

    pub fn update_doc_approval(
        &self,
        session_id: &str,
        status: &str,
        comment: Option<&str>,
        now_ms: Option<i64>,
    ) -> Result<usize, MemoryError> {
        let now = now_ms.unwrap_or_else(current_unix_timestamp_millis);
        Ok(self
            .open_store()?
            .update_doc_approval(session_id, status, comment, now)?)
    }

    pub fn past_runs(&self, limit: u32) -> Result<Vec<PipelineRunRecord>, MemoryError> {
        Ok(self.open_store()?.pipeline_history(&self.repo_id, limit)?)
    }

    pub fn known_drifts(&self) -> Result<Vec<DriftPatternRecord>, MemoryError> {
        Ok(self.open_store()?.drift_patterns(&self.repo_id)?)
    }

    pub fn function_signatures(&self) -> Result<Vec<FunctionSignatureRecord>, MemoryError> {
        Ok(self.open_store()?.function_signatures(&self.repo_id)?)
    }

    pub fn doc_history(&self, limit: u32) -> Result<Vec<DocRunRecord>, MemoryError> {
        Ok(self.open_store()?.doc_history(&self.repo_id, limit)?)
    }

    pub fn latest_approved_doc(&self) -> Result<Option<String>, MemoryError> {
        Ok(self.open_store()?.latest_approved_doc(&self.repo_id)?)
    }

    pub async fn stats(&self) -> Result<MemoryStats, MemoryError> {
        let (repo, drift_pattern_count, tracked_function_count) = {
            let store = self.open_store()?;
            (
                store.get_repo(&self.repo_id)?,
                store.drift_patterns(&self.repo_id)?.len(),
                store.function_signatures(&self.repo_id)?.len(),
            )
        };

        let mut semantic_counts = BTreeMap::new();
        for collection in SemanticCollection::ALL {
            let count = match self.index.count(&self.repo_id, collection).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(error = %err, collection = collection.as_str(), "semantic count failed");
                    0
                }
            };
            semantic_counts.insert(collection.as_str().to_owned(), count);
        }

        Ok(MemoryStats {
            repo_id: self.repo_id.clone(),
            repo,
            drift_pattern_count,
            tracked_function_count,
            semantic_counts,
        })
    }

    pub async fn search_functions(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        self.search(SemanticCollection::Functions, query, limit).await
    }

    pub async fn search_drifts(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        self.search(SemanticCollection::Drifts, query, limit).await
    }

    pub async fn search_biz_logic(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        self.search(SemanticCollection::BizLogic, query, limit).await
    }

    pub async fn search_docs(&self, query: &str, limit: u32) -> Result<Vec<SemanticHit>, MemoryError> {
        self.search(SemanticCollection::Docs, query, limit).await
    }

    async fn search(
        &self,
        collection: SemanticCollection,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed_text(query).await?;
        let hits = self
            .index
            .search(&self.repo_id, collection, &embedding, limit)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity >= self.min_similarity)
            .collect())
    }

    /// "Seen this before" warnings for a set of proposed changes: substring
    /// matches against stored drift patterns first, then similarity hits
    /// from the drift index. Semantic lookups that fail are skipped.
    pub async fn proactive_warnings(
        &self,
        changes: &[PatchChange],
    ) -> Result<Vec<RiskWarning>, MemoryError> {
        let known = self.known_drifts()?;
        let mut warnings = memory_warnings(changes, &known);

        for change in changes {
            let function = function_name_for_change(change);
            if function.is_empty() || change.description.trim().is_empty() {
                continue;
            }
            match self
                .search_drifts(&change.description, WARNING_SEARCH_LIMIT)
                .await
            {
                Ok(hits) => {
                    let extra = semantic_warnings(&function, &hits, &warnings);
                    warnings.extend(extra);
                }
                Err(err) => {
                    tracing::warn!(error = %err, function = %function, "drift similarity search failed");
                }
            }
        }

        Ok(dedupe_warnings(warnings))
    }

    /// Plain-text context block of business rules, approved doc fragments,
    /// and recent run history relevant to `topic`. Empty when memory holds
    /// nothing.
    pub async fn memory_context(&self, topic: &str) -> Result<String, MemoryError> {
        let biz = self.search_biz_logic(topic, CONTEXT_BIZ_LIMIT).await?;
        let docs = self.search_docs(topic, CONTEXT_DOC_LIMIT).await?;
        let runs = self.past_runs(CONTEXT_RUN_LIMIT)?;

        let mut lines = Vec::new();
        if !biz.is_empty() {
            lines.push("## Known business logic for this repo".to_owned());
            lines.extend(biz.into_iter().map(|hit| format!("- {}", hit.text)));
        }
        if !docs.is_empty() {
            lines.push(String::new());
            lines.push("## Relevant sections from previously approved docs".to_owned());
            lines.extend(docs.into_iter().map(|hit| hit.text));
        }
        if !runs.is_empty() {
            lines.push(String::new());
            lines.push("## Recent migration history".to_owned());
            for run in runs {
                lines.push(format!(
                    "- Run {}: {}, {}% preserved, {} critical drifts",
                    format_day(run.ran_at),
                    run.verdict.as_deref().unwrap_or("incomplete"),
                    run.preservation_pct
                        .map(|pct| pct.to_string())
                        .unwrap_or_else(|| "?".to_owned()),
                    run.critical_drifts.unwrap_or(0),
                ));
            }
        }

        Ok(lines.join("\n").trim_start().to_owned())
    }

    async fn index_best_effort(
        &self,
        collection: SemanticCollection,
        items: Vec<(String, String, Map<String, Value>)>,
    ) {
        if items.is_empty() {
            return;
        }

        let mut entries = Vec::with_capacity(items.len());
        for (entry_id, text, metadata) in items {
            match self.embedder.embed_text(&text).await {
                Ok(embedding) => entries.push(SemanticEntry {
                    entry_id,
                    text,
                    metadata,
                    embedding,
                }),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        entry_id = %entry_id,
                        collection = collection.as_str(),
                        "embedding failed; entry not indexed"
                    );
                }
            }
        }

        if let Err(err) = self.index.upsert(&self.repo_id, collection, entries).await {
            tracing::warn!(
                error = %err,
                collection = collection.as_str(),
                "semantic index write failed; structured memory is still current"
            );
        }
    }
}

fn signature_record(repo_id: &str, node: &CallNode, now: i64) -> FunctionSignatureRecord {
    let side_effects = node
        .side_effects
        .iter()
        .map(|effect| effect.as_str().to_owned())
        .collect::<Vec<_>>();
    let return_type = node
        .signature
        .rsplit_once(" -> ")
        .map(|(_, ret)| ret.trim().to_owned())
        .unwrap_or_default();
    let snapshot_hash = content_hash(&format!(
        "{}|{return_type}|{}",
        node.signature,
        side_effects.join(",")
    ))[..12]
        .to_owned();

    FunctionSignatureRecord {
        repo_id: repo_id.to_owned(),
        function_name: node.id.clone(),
        signature: node.signature.clone(),
        return_type,
        side_effects,
        snapshot_hash,
        last_seen: now,
    }
}

fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect::<String>())
        .collect()
}

fn format_day(ran_at_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ran_at_ms)
        .map(|time| time.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use bloc_core::SideEffect;

    use super::*;

    #[test]
    fn signature_hash_tracks_effects_and_return_type() {
        let plain = CallNode::new(
            "billing",
            "total",
            3,
            BTreeSet::new(),
            "def total(items) -> float".to_owned(),
        );
        let mut effects = BTreeSet::new();
        effects.insert(SideEffect::FileIo);
        let writes = CallNode::new(
            "billing",
            "total",
            3,
            effects,
            "def total(items) -> float".to_owned(),
        );

        let left = signature_record("repo", &plain, 1);
        let right = signature_record("repo", &writes, 2);
        assert_eq!(left.return_type, "float");
        assert_eq!(left.function_name, "billing.total");
        assert_eq!(left.snapshot_hash.len(), 12);
        assert_ne!(left.snapshot_hash, right.snapshot_hash);
    }

    #[test]
    fn chunks_split_on_characters() {
        let text = "é".repeat(1_001);
        let chunks = chunk_chars(&text, DOC_CHUNK_CHARS);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 1);
        assert!(chunk_chars("", DOC_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn day_format_is_iso_date() {
        assert_eq!(format_day(0), "1970-01-01");
    }
}
