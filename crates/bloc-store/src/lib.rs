use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::Serialize;
use thiserror::Error;

mod lock;
mod semantic;

pub use lock::RepoLock;
pub use semantic::{
    SemanticCollection, SemanticEntry, SemanticHit, SemanticIndex, SqliteSemanticIndex,
    cosine_similarity,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoRecord {
    pub repo_id: String,
    pub path: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub run_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunRecord {
    pub run_id: String,
    pub repo_id: String,
    pub session_id: String,
    pub ran_at: i64,
    pub verdict: Option<String>,
    pub preservation_pct: Option<f64>,
    pub critical_drifts: Option<i64>,
    pub risk_score: Option<f64>,
    pub patch_summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftPatternRecord {
    pub repo_id: String,
    pub function_name: String,
    pub severity: String,
    pub description: String,
    pub before_output: String,
    pub after_output: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub times_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSignatureRecord {
    pub repo_id: String,
    pub function_name: String,
    pub signature: String,
    pub return_type: String,
    pub side_effects: Vec<String>,
    pub snapshot_hash: String,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureUpsert {
    pub changed: bool,
    pub previous: Option<FunctionSignatureRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocRunRecord {
    pub doc_run_id: String,
    pub repo_id: String,
    pub session_id: String,
    pub ran_at: i64,
    pub qa_score: Option<f64>,
    pub word_count: Option<i64>,
    pub approval_status: String,
    pub reviewer_comment: Option<String>,
    pub reviewed_at: Option<i64>,
    pub final_markdown: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structured repository memory in a single SQLite file shared by every
/// pipeline process. Multi-statement writes run in IMMEDIATE transactions.
pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Option<RepoRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT repo_id, path, first_seen, last_seen, run_count
                FROM repos
                WHERE repo_id = ?1
                "#,
                params![repo_id],
                |row| {
                    Ok(RepoRecord {
                        repo_id: row.get(0)?,
                        path: row.get(1)?,
                        first_seen: row.get(2)?,
                        last_seen: row.get(3)?,
                        run_count: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Registers the repository or refreshes `last_seen`.
    pub fn touch_repo(&self, repo_id: &str, path: &str, now: i64) -> Result<(), StoreError> {
        touch_repo(&self.conn, repo_id, path, now)
    }

    /// Appends a run and bumps the repository run counter atomically.
    pub fn record_pipeline_run(
        &self,
        repo_path: &str,
        record: &PipelineRunRecord,
    ) -> Result<(), StoreError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        touch_repo(&tx, &record.repo_id, repo_path, record.ran_at)?;
        tx.execute(
            r#"
            INSERT INTO pipeline_runs (
                run_id, repo_id, session_id, ran_at, verdict, preservation_pct,
                critical_drifts, risk_score, patch_summary
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.run_id,
                record.repo_id,
                record.session_id,
                record.ran_at,
                record.verdict,
                record.preservation_pct,
                record.critical_drifts,
                record.risk_score,
                record.patch_summary,
            ],
        )?;
        tx.execute(
            "UPDATE repos SET run_count = run_count + 1 WHERE repo_id = ?1",
            params![record.repo_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn pipeline_history(
        &self,
        repo_id: &str,
        limit: u32,
    ) -> Result<Vec<PipelineRunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, repo_id, session_id, ran_at, verdict, preservation_pct,
                   critical_drifts, risk_score, patch_summary
            FROM pipeline_runs
            WHERE repo_id = ?1
            ORDER BY ran_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![repo_id, i64::from(limit)], |row| {
            Ok(PipelineRunRecord {
                run_id: row.get(0)?,
                repo_id: row.get(1)?,
                session_id: row.get(2)?,
                ran_at: row.get(3)?,
                verdict: row.get(4)?,
                preservation_pct: row.get(5)?,
                critical_drifts: row.get(6)?,
                risk_score: row.get(7)?,
                patch_summary: row.get(8)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Inserts a new pattern or increments `times_seen` for an existing
    /// `(repo, function, description)` triple. Returns the updated count.
    pub fn record_drift_pattern(
        &self,
        repo_path: &str,
        record: &DriftPatternRecord,
    ) -> Result<i64, StoreError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        touch_repo(&tx, &record.repo_id, repo_path, record.last_seen)?;
        tx.execute(
            r#"
            INSERT INTO drift_patterns (
                repo_id, function_name, severity, description, before_output, after_output,
                first_seen, last_seen, times_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1)
            ON CONFLICT(repo_id, function_name, description) DO UPDATE SET
                times_seen = drift_patterns.times_seen + 1,
                last_seen = excluded.last_seen,
                severity = excluded.severity,
                before_output = excluded.before_output,
                after_output = excluded.after_output
            "#,
            params![
                record.repo_id,
                record.function_name,
                record.severity,
                record.description,
                record.before_output,
                record.after_output,
                record.last_seen,
            ],
        )?;
        let times_seen = tx.query_row(
            r#"
            SELECT times_seen FROM drift_patterns
            WHERE repo_id = ?1 AND function_name = ?2 AND description = ?3
            "#,
            params![record.repo_id, record.function_name, record.description],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(times_seen)
    }

    /// Most frequently seen patterns first.
    pub fn drift_patterns(&self, repo_id: &str) -> Result<Vec<DriftPatternRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT repo_id, function_name, severity, description, before_output, after_output,
                   first_seen, last_seen, times_seen
            FROM drift_patterns
            WHERE repo_id = ?1
            ORDER BY times_seen DESC, last_seen DESC, function_name ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(DriftPatternRecord {
                repo_id: row.get(0)?,
                function_name: row.get(1)?,
                severity: row.get(2)?,
                description: row.get(3)?,
                before_output: row.get(4)?,
                after_output: row.get(5)?,
                first_seen: row.get(6)?,
                last_seen: row.get(7)?,
                times_seen: row.get(8)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Read-modify-write of one function snapshot. The previous row is read
    /// and replaced inside one IMMEDIATE transaction so concurrent writers
    /// never observe a half-applied upsert.
    pub fn upsert_function_signature(
        &self,
        repo_path: &str,
        record: &FunctionSignatureRecord,
    ) -> Result<SignatureUpsert, StoreError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        touch_repo(&tx, &record.repo_id, repo_path, record.last_seen)?;

        let previous = tx
            .query_row(
                r#"
                SELECT repo_id, function_name, signature, return_type, side_effects,
                       snapshot_hash, last_seen
                FROM function_sigs
                WHERE repo_id = ?1 AND function_name = ?2
                "#,
                params![record.repo_id, record.function_name],
                read_signature_row,
            )
            .optional()?
            .map(decode_signature_row)
            .transpose()?;

        tx.execute(
            r#"
            INSERT INTO function_sigs (
                repo_id, function_name, signature, return_type, side_effects, snapshot_hash, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(repo_id, function_name) DO UPDATE SET
                signature = excluded.signature,
                return_type = excluded.return_type,
                side_effects = excluded.side_effects,
                snapshot_hash = excluded.snapshot_hash,
                last_seen = excluded.last_seen
            "#,
            params![
                record.repo_id,
                record.function_name,
                record.signature,
                record.return_type,
                serde_json::to_string(&record.side_effects)?,
                record.snapshot_hash,
                record.last_seen,
            ],
        )?;
        tx.commit()?;

        let changed = previous
            .as_ref()
            .is_some_and(|previous| previous.snapshot_hash != record.snapshot_hash);
        Ok(SignatureUpsert { changed, previous })
    }

    pub fn function_signatures(
        &self,
        repo_id: &str,
    ) -> Result<Vec<FunctionSignatureRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT repo_id, function_name, signature, return_type, side_effects,
                   snapshot_hash, last_seen
            FROM function_sigs
            WHERE repo_id = ?1
            ORDER BY function_name ASC
            "#,
        )?;

        let rows = stmt.query_map(params![repo_id], read_signature_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(decode_signature_row(row?)?);
        }
        Ok(records)
    }

    pub fn record_doc_run(&self, repo_path: &str, record: &DocRunRecord) -> Result<(), StoreError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        touch_repo(&tx, &record.repo_id, repo_path, record.ran_at)?;
        tx.execute(
            r#"
            INSERT INTO doc_runs (
                doc_run_id, repo_id, session_id, ran_at, qa_score, word_count,
                approval_status, reviewer_comment, reviewed_at, final_markdown
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.doc_run_id,
                record.repo_id,
                record.session_id,
                record.ran_at,
                record.qa_score,
                record.word_count,
                record.approval_status,
                record.reviewer_comment,
                record.reviewed_at,
                record.final_markdown,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Returns the number of doc runs updated for the session.
    pub fn update_doc_approval(
        &self,
        session_id: &str,
        status: &str,
        comment: Option<&str>,
        reviewed_at: i64,
    ) -> Result<usize, StoreError> {
        let updated = self.conn.execute(
            r#"
            UPDATE doc_runs
            SET approval_status = ?2, reviewer_comment = ?3, reviewed_at = ?4
            WHERE session_id = ?1
            "#,
            params![session_id, status, comment, reviewed_at],
        )?;
        Ok(updated)
    }

    pub fn doc_history(&self, repo_id: &str, limit: u32) -> Result<Vec<DocRunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT doc_run_id, repo_id, session_id, ran_at, qa_score, word_count,
                   approval_status, reviewer_comment, reviewed_at, final_markdown
            FROM doc_runs
            WHERE repo_id = ?1
            ORDER BY ran_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![repo_id, i64::from(limit)], |row| {
            Ok(DocRunRecord {
                doc_run_id: row.get(0)?,
                repo_id: row.get(1)?,
                session_id: row.get(2)?,
                ran_at: row.get(3)?,
                qa_score: row.get(4)?,
                word_count: row.get(5)?,
                approval_status: row.get(6)?,
                reviewer_comment: row.get(7)?,
                reviewed_at: row.get(8)?,
                final_markdown: row.get(9)?,
            })
        })?;

        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn latest_approved_doc(&self, repo_id: &str) -> Result<Option<String>, StoreError> {
        let markdown = self
            .conn
            .query_row(
                r#"
                SELECT final_markdown FROM doc_runs
                WHERE repo_id = ?1 AND approval_status = 'approved'
                ORDER BY reviewed_at DESC, rowid DESC
                LIMIT 1
                "#,
                params![repo_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(markdown)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub fn current_unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn touch_repo(conn: &Connection, repo_id: &str, path: &str, now: i64) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO repos (repo_id, path, first_seen, last_seen, run_count)
        VALUES (?1, ?2, ?3, ?3, 0)
        ON CONFLICT(repo_id) DO UPDATE SET
            path = excluded.path,
            last_seen = MAX(repos.last_seen, excluded.last_seen)
        "#,
        params![repo_id, path, now],
    )?;
    Ok(())
}

type SignatureRow = (String, String, String, String, String, String, i64);

fn read_signature_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignatureRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_signature_row(row: SignatureRow) -> Result<FunctionSignatureRecord, StoreError> {
    let (repo_id, function_name, signature, return_type, side_effects, snapshot_hash, last_seen) =
        row;
    Ok(FunctionSignatureRecord {
        repo_id,
        function_name,
        signature,
        return_type,
        side_effects: serde_json::from_str(&side_effects)?,
        snapshot_hash,
        last_seen,
    })
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            repo_id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            run_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL REFERENCES repos(repo_id),
            session_id TEXT NOT NULL,
            ran_at INTEGER NOT NULL,
            verdict TEXT,
            preservation_pct REAL,
            critical_drifts INTEGER,
            risk_score REAL,
            patch_summary TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_pipeline_runs_repo
            ON pipeline_runs(repo_id, ran_at);

        CREATE TABLE IF NOT EXISTS drift_patterns (
            repo_id TEXT NOT NULL REFERENCES repos(repo_id),
            function_name TEXT NOT NULL,
            severity TEXT NOT NULL,
            description TEXT NOT NULL,
            before_output TEXT NOT NULL DEFAULT '',
            after_output TEXT NOT NULL DEFAULT '',
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            times_seen INTEGER NOT NULL DEFAULT 1,
            UNIQUE(repo_id, function_name, description)
        );

        CREATE TABLE IF NOT EXISTS function_sigs (
            repo_id TEXT NOT NULL REFERENCES repos(repo_id),
            function_name TEXT NOT NULL,
            signature TEXT NOT NULL,
            return_type TEXT NOT NULL DEFAULT '',
            side_effects TEXT NOT NULL DEFAULT '[]',
            snapshot_hash TEXT NOT NULL,
            last_seen INTEGER NOT NULL,
            PRIMARY KEY(repo_id, function_name)
        );

        CREATE TABLE IF NOT EXISTS doc_runs (
            doc_run_id TEXT PRIMARY KEY,
            repo_id TEXT NOT NULL REFERENCES repos(repo_id),
            session_id TEXT NOT NULL,
            ran_at INTEGER NOT NULL,
            qa_score REAL,
            word_count INTEGER,
            approval_status TEXT NOT NULL DEFAULT 'pending',
            reviewer_comment TEXT,
            reviewed_at INTEGER,
            final_markdown TEXT
        );

        CREATE TABLE IF NOT EXISTS semantic_entries (
            repo_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY(repo_id, collection, entry_id)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    const REPO: &str = "repo-0001";
    const REPO_PATH: &str = "/work/legacy-billing";

    fn run(run_id: &str, ran_at: i64, verdict: &str) -> PipelineRunRecord {
        PipelineRunRecord {
            run_id: run_id.to_owned(),
            repo_id: REPO.to_owned(),
            session_id: format!("session-{run_id}"),
            ran_at,
            verdict: Some(verdict.to_owned()),
            preservation_pct: Some(97.5),
            critical_drifts: Some(0),
            risk_score: Some(0.2),
            patch_summary: "[]".to_owned(),
        }
    }

    fn drift(function_name: &str, description: &str, now: i64) -> DriftPatternRecord {
        DriftPatternRecord {
            repo_id: REPO.to_owned(),
            function_name: function_name.to_owned(),
            severity: "critical".to_owned(),
            description: description.to_owned(),
            before_output: "42".to_owned(),
            after_output: "43".to_owned(),
            first_seen: now,
            last_seen: now,
            times_seen: 1,
        }
    }

    fn signature(function_name: &str, signature: &str, hash: &str) -> FunctionSignatureRecord {
        FunctionSignatureRecord {
            repo_id: REPO.to_owned(),
            function_name: function_name.to_owned(),
            signature: signature.to_owned(),
            return_type: String::new(),
            side_effects: vec!["file_io".to_owned()],
            snapshot_hash: hash.to_owned(),
            last_seen: 1_700_000_000_000,
        }
    }

    #[test]
    fn open_creates_parent_directory_and_schema() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join(".bloc").join("memory.sqlite");

        let store = SqliteStore::open(&db_path).expect("open store");

        assert!(db_path.exists());
        assert_eq!(store.get_repo(REPO).expect("get repo"), None);
    }

    #[test]
    fn pipeline_runs_are_returned_newest_first_and_counted() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path().join("memory.sqlite")).expect("open store");

        store
            .record_pipeline_run(REPO_PATH, &run("a", 100, "SAFE"))
            .expect("record a");
        store
            .record_pipeline_run(REPO_PATH, &run("b", 300, "BLOCKED"))
            .expect("record b");
        store
            .record_pipeline_run(REPO_PATH, &run("c", 200, "RISKY"))
            .expect("record c");

        let history = store.pipeline_history(REPO, 2).expect("history");
        let ids = history
            .iter()
            .map(|record| record.run_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);

        let repo = store.get_repo(REPO).expect("get repo").expect("repo exists");
        assert_eq!(repo.run_count, 3);
        assert_eq!(repo.first_seen, 100);
        assert_eq!(repo.last_seen, 300);
        assert_eq!(repo.path, REPO_PATH);
    }

    #[test]
    fn repeated_drift_increments_times_seen() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path().join("memory.sqlite")).expect("open store");

        let first = store
            .record_drift_pattern(REPO_PATH, &drift("calculate_tax", "output changed", 10))
            .expect("first");
        let second = store
            .record_drift_pattern(REPO_PATH, &drift("calculate_tax", "output changed", 20))
            .expect("second");
        store
            .record_drift_pattern(REPO_PATH, &drift("send_invoice", "output changed", 30))
            .expect("other");

        assert_eq!(first, 1);
        assert_eq!(second, 2);

        let patterns = store.drift_patterns(REPO).expect("patterns");
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].function_name, "calculate_tax");
        assert_eq!(patterns[0].times_seen, 2);
        assert_eq!(patterns[0].first_seen, 10);
        assert_eq!(patterns[0].last_seen, 20);
    }

    #[test]
    fn signature_upsert_reports_previous_snapshot_on_change() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path().join("memory.sqlite")).expect("open store");

        let first = store
            .upsert_function_signature(REPO_PATH, &signature("load", "def load(path)", "h1"))
            .expect("first upsert");
        assert!(!first.changed);
        assert!(first.previous.is_none());

        let same = store
            .upsert_function_signature(REPO_PATH, &signature("load", "def load(path)", "h1"))
            .expect("same upsert");
        assert!(!same.changed);
        assert!(same.previous.is_some());

        let changed = store
            .upsert_function_signature(
                REPO_PATH,
                &signature("load", "def load(path, mode)", "h2"),
            )
            .expect("changed upsert");
        assert!(changed.changed);
        let previous = changed.previous.expect("previous snapshot");
        assert_eq!(previous.signature, "def load(path)");
        assert_eq!(previous.side_effects, vec!["file_io".to_owned()]);

        let stored = store.function_signatures(REPO).expect("signatures");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].snapshot_hash, "h2");
    }

    #[test]
    fn latest_approved_doc_ignores_pending_runs() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path().join("memory.sqlite")).expect("open store");

        let doc = |id: &str, session: &str, markdown: &str| DocRunRecord {
            doc_run_id: id.to_owned(),
            repo_id: REPO.to_owned(),
            session_id: session.to_owned(),
            ran_at: 1,
            qa_score: Some(0.9),
            word_count: Some(120),
            approval_status: "pending".to_owned(),
            reviewer_comment: None,
            reviewed_at: None,
            final_markdown: Some(markdown.to_owned()),
        };

        store
            .record_doc_run(REPO_PATH, &doc("d1", "s1", "# Approved"))
            .expect("doc 1");
        store
            .record_doc_run(REPO_PATH, &doc("d2", "s2", "# Pending"))
            .expect("doc 2");
        assert_eq!(store.latest_approved_doc(REPO).expect("latest"), None);

        let updated = store
            .update_doc_approval("s1", "approved", Some("looks right"), 50)
            .expect("approve");
        assert_eq!(updated, 1);

        assert_eq!(
            store.latest_approved_doc(REPO).expect("latest").as_deref(),
            Some("# Approved")
        );
        assert_eq!(store.doc_history(REPO, 5).expect("history").len(), 2);
    }
}
