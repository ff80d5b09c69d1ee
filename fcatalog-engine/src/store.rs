//! A single catalog's persistent index: one SQLite file holding a `funcs`
//! table (signature-indexed), a `structs` table, and a `meta` table recording
//! the catalog's fixed `N` and signature version.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::signature::{self, SIGNATURE_VERSION};

/// Commit after this many pending `add_function` calls. The original
/// implementation calls this `FUNCTION_BATCH` and fixes it at `0x800`.
pub const DEFAULT_BATCH: u64 = 0x800;

/// One similarity result row, carrying everything `get_similars` knows about
/// a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSimilar {
    pub func_hash: Vec<u8>,
    pub func_name: String,
    pub func_comment: String,
    pub func_sig: Vec<i64>,
    pub func_grade: u32,
}

struct Inner {
    conn: Connection,
    pending: u64,
}

/// A named, file-backed index of functions and structures, opened once and
/// shared by every session that chooses this catalog. Operations serialize
/// through a single async mutex and run the blocking SQLite calls on
/// `spawn_blocking` so one slow disk doesn't stall every other session.
pub struct CatalogStore {
    inner: Arc<Mutex<Inner>>,
    num_hashes: usize,
    batch: u64,
}

impl CatalogStore {
    /// Opens `path`, creating an empty schema with `num_hashes` columns if it
    /// doesn't exist yet. If it does exist, the stored `num_hashes` and
    /// signature version must match this process's, or opening fails.
    pub fn open(path: &Path, num_hashes: usize, batch: u64) -> Result<Self, StoreError> {
        let existed = path.is_file();
        let mut conn = Connection::open(path)?;

        if !existed {
            debug!(path = %path.display(), num_hashes, "creating new catalog");
            build_empty_schema(&conn, num_hashes)?;
        } else {
            let (stored_num_hashes, stored_sig_version) = read_meta(&conn)?;
            if stored_num_hashes != num_hashes {
                return Err(StoreError::NumHashesMismatch {
                    expected: num_hashes,
                    found: stored_num_hashes,
                });
            }
            if stored_sig_version != SIGNATURE_VERSION {
                return Err(StoreError::SignatureVersionMismatch {
                    expected: SIGNATURE_VERSION,
                    found: stored_sig_version,
                });
            }
            debug!(path = %path.display(), num_hashes, "opened existing catalog");
        }

        conn.execute_batch("BEGIN TRANSACTION;")?;

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { conn, pending: 0 })),
            num_hashes,
            batch,
        })
    }

    /// Opens an in-memory-backed temporary catalog, for tests.
    #[cfg(test)]
    pub fn open_temporary(num_hashes: usize) -> Result<(Self, tempfile::TempDir), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalog.sqlite");
        let store = Self::open(&path, num_hashes, DEFAULT_BATCH)?;
        Ok((store, dir))
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Inserts or replaces a function record, keyed by the strong hash of
    /// `data`. Visible to future queries once the pending batch commits
    /// across catalogs.
    pub async fn add_function(
        &self,
        name: String,
        comment: String,
        data: Vec<u8>,
    ) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyFuncName);
        }
        let num_hashes = self.num_hashes;
        let sig = signature::sign(&data, num_hashes);
        let hash = signature::strong_hash(&data).to_vec();

        let inner = Arc::clone(&self.inner);
        let batch = self.batch;
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            match insert_function(&guard.conn, &hash, &name, &comment, &sig) {
                Ok(()) => {
                    guard.pending += 1;
                    if guard.pending > batch {
                        commit_and_reopen(&mut guard)?;
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, func_name = %name, "add_function failed, rolling back");
                    rollback_and_reopen(&mut guard);
                    Err(StoreError::from(e))
                }
            }
        })
        .await
        .expect("blocking task panicked")
    }

    /// Inserts or replaces a structure record. Committed immediately, unlike
    /// function inserts.
    pub async fn add_structure(&self, name: String, dump: Vec<u8>) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyStructName);
        }
        if !name.is_ascii() {
            return Err(StoreError::NonAsciiStructName);
        }

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let result = guard.conn.execute(
                "INSERT OR REPLACE INTO structs (struct_name, struct_dump) VALUES (?1, ?2)",
                rusqlite::params![name, dump],
            );
            match result {
                Ok(_) => {
                    commit_and_reopen(&mut guard)?;
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, struct_name = %name, "add_structure failed, rolling back");
                    rollback_and_reopen(&mut guard);
                    Err(StoreError::Sqlite(e))
                }
            }
        })
        .await
        .expect("blocking task panicked")
    }

    /// All function names, unspecified order. Storage errors yield an empty
    /// list rather than propagating.
    pub async fn get_func_names(&self) -> Vec<String> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.blocking_lock();
            collect_strings(&guard.conn, "SELECT func_name FROM funcs")
        })
        .await
        .expect("blocking task panicked")
    }

    /// All structure names, unspecified order.
    pub async fn get_struct_names(&self) -> Vec<String> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.blocking_lock();
            collect_strings(&guard.conn, "SELECT struct_name FROM structs")
        })
        .await
        .expect("blocking task panicked")
    }

    /// The stored dump for `name`, or `None` if absent or on storage error.
    pub async fn get_struct(&self, name: String) -> Option<Vec<u8>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.blocking_lock();
            guard
                .conn
                .query_row(
                    "SELECT struct_dump FROM structs WHERE struct_name = ?1",
                    rusqlite::params![name],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .ok()
        })
        .await
        .expect("blocking task panicked")
    }

    /// Up to `k` nearest neighbors of `data` by signature grade, with the
    /// exact-match row (if any) preempted to position 0.
    pub async fn get_similars(&self, data: Vec<u8>, k: u32) -> Vec<DbSimilar> {
        let num_hashes = self.num_hashes;
        let sig = signature::sign(&data, num_hashes);
        let hash = signature::strong_hash(&data).to_vec();

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.blocking_lock();
            match query_similars(&guard.conn, num_hashes, &sig, &hash, k) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "get_similars failed");
                    Vec::new()
                }
            }
        })
        .await
        .expect("blocking task panicked")
    }

    /// Commits any pending transaction, rolling back on commit failure, as
    /// done implicitly on process shutdown.
    pub async fn close(self) {
        let inner = self.inner;
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            if let Err(e) = guard.conn.execute_batch("COMMIT;") {
                debug!(error = %e, "final commit failed, rolling back");
                let _ = guard.conn.execute_batch("ROLLBACK;");
            }
        })
        .await
        .expect("blocking task panicked");
    }
}

fn commit_and_reopen(inner: &mut Inner) -> Result<(), StoreError> {
    inner.pending = 0;
    if let Err(e) = inner.conn.execute_batch("COMMIT;") {
        debug!(error = %e, "commit failed, rolling back");
        inner.conn.execute_batch("ROLLBACK;")?;
    }
    inner.conn.execute_batch("BEGIN TRANSACTION;")?;
    Ok(())
}

fn rollback_and_reopen(inner: &mut Inner) {
    let _ = inner.conn.execute_batch("ROLLBACK;");
    let _ = inner.conn.execute_batch("BEGIN TRANSACTION;");
}

fn build_empty_schema(conn: &Connection, num_hashes: usize) -> Result<(), StoreError> {
    let mut cmd = String::from(
        "CREATE TABLE funcs(\n\
             func_hash BLOB PRIMARY KEY,\n\
             func_name TEXT NOT NULL,\n\
             func_comment TEXT NOT NULL",
    );
    for i in 1..=num_hashes {
        cmd.push_str(&format!(",\nc{i} INTEGER NOT NULL"));
    }
    cmd.push_str(");\n");

    for i in 1..=num_hashes {
        cmd.push_str(&format!("CREATE INDEX idx_c{i} ON funcs(c{i});\n"));
    }

    cmd.push_str(
        "CREATE TABLE structs(\n\
             struct_name TEXT NOT NULL PRIMARY KEY,\n\
             struct_dump BLOB NOT NULL);\n",
    );
    cmd.push_str("CREATE TABLE meta(key TEXT PRIMARY KEY, value TEXT NOT NULL);\n");

    conn.execute_batch(&cmd)?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('num_hashes', ?1)",
        rusqlite::params![num_hashes.to_string()],
    )?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('sig_version', ?1)",
        rusqlite::params![SIGNATURE_VERSION.to_string()],
    )?;
    Ok(())
}

fn read_meta(conn: &Connection) -> Result<(usize, u32), StoreError> {
    let num_hashes: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'num_hashes'",
            [],
            |row| row.get(0),
        )
        .map_err(|_| StoreError::CorruptMeta("num_hashes"))?;
    let sig_version: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'sig_version'",
            [],
            |row| row.get(0),
        )
        .map_err(|_| StoreError::CorruptMeta("sig_version"))?;

    let num_hashes: usize = num_hashes
        .parse()
        .map_err(|_| StoreError::CorruptMeta("num_hashes"))?;
    let sig_version: u32 = sig_version
        .parse()
        .map_err(|_| StoreError::CorruptMeta("sig_version"))?;
    Ok((num_hashes, sig_version))
}

fn insert_function(
    conn: &Connection,
    hash: &[u8],
    name: &str,
    comment: &str,
    sig: &[i64],
) -> Result<(), rusqlite::Error> {
    let columns: String = (1..=sig.len()).map(|i| format!(",c{i}")).collect();
    let placeholders: String = (0..sig.len()).map(|_| ",?".to_string()).collect();
    let cmd = format!(
        "INSERT OR REPLACE INTO funcs (func_hash, func_name, func_comment{columns}) \
         VALUES (?, ?, ?{placeholders})"
    );

    let mut stmt = conn.prepare_cached(&cmd)?;
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(hash.to_vec()),
        Box::new(name.to_string()),
        Box::new(comment.to_string()),
    ];
    for c in sig {
        params.push(Box::new(*c));
    }
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    stmt.execute(param_refs.as_slice())?;
    Ok(())
}

fn query_similars(
    conn: &Connection,
    num_hashes: usize,
    sig: &[i64],
    hash: &[u8],
    k: u32,
) -> Result<Vec<DbSimilar>, rusqlite::Error> {
    let selects: Vec<String> = (1..=num_hashes)
        .map(|i| format!("SELECT * FROM funcs WHERE c{i} = ?"))
        .chain(std::iter::once("SELECT * FROM funcs WHERE func_hash = ?".to_string()))
        .collect();
    let union = selects.join("\nUNION\n");

    let sig_cols: String = (1..=num_hashes)
        .map(|i| format!("c{i}"))
        .collect::<Vec<_>>()
        .join(",");
    let grade_expr: String = (1..=num_hashes)
        .map(|i| format!("(c{i}=?)"))
        .collect::<Vec<_>>()
        .join(" + ");

    let cmd = format!(
        "SELECT func_hash, func_name, func_comment, {sig_cols}, ({grade_expr}) AS grade \
         FROM ({union}) ORDER BY grade DESC LIMIT ?"
    );

    let mut stmt = conn.prepare_cached(&cmd)?;

    // `?` occurrence order in `cmd` is: grade_expr's N components, then the
    // union's N per-column branches, then the union's `func_hash = ?`
    // branch, then `LIMIT ?` — params must line up in that same order.
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(num_hashes * 2 + 2);
    for c in sig {
        params.push(Box::new(*c));
    }
    for c in sig {
        params.push(Box::new(*c));
    }
    params.push(Box::new(hash.to_vec()));
    params.push(Box::new(k));
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let mut rows = stmt.query(param_refs.as_slice())?;
    let mut results = Vec::new();
    let mut exact_idx = None;
    while let Some(row) = rows.next()? {
        let func_hash: Vec<u8> = row.get(0)?;
        let func_name: String = row.get(1)?;
        let func_comment: String = row.get(2)?;
        let mut func_sig = Vec::with_capacity(num_hashes);
        for i in 0..num_hashes {
            func_sig.push(row.get::<_, i64>(3 + i)?);
        }
        let func_grade: i64 = row.get(3 + num_hashes)?;

        if func_hash == hash {
            exact_idx = Some(results.len());
        }
        results.push(DbSimilar {
            func_hash,
            func_name,
            func_comment,
            func_sig,
            func_grade: func_grade as u32,
        });
    }

    if let Some(idx) = exact_idx {
        if idx != 0 {
            let exact = results.remove(idx);
            results.insert(0, exact);
        }
    }

    Ok(results)
}

fn collect_strings(conn: &Connection, query: &str) -> Vec<String> {
    let attempt = || -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = conn.prepare_cached(query)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get(0)?);
        }
        Ok(out)
    };
    match attempt() {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, query, "list query failed");
            Vec::new()
        }
    }
}

/// Derives the on-disk path for a catalog name under `root`. Callers are
/// expected to have already validated the name; this is a pure join.
pub fn catalog_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.sqlite"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_catalog_query_returns_no_results() {
        let (store, _dir) = CatalogStore::open_temporary(16).unwrap();
        let results = store.get_similars(b"\x01\x02\x03".to_vec(), 5).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn exact_match_wins_with_full_grade() {
        let (store, _dir) = CatalogStore::open_temporary(16).unwrap();
        let data = b"abcdefgh".repeat(8);
        store
            .add_function("foo".into(), "c".into(), data.clone())
            .await
            .unwrap();

        let results = store.get_similars(data, 3).await;
        assert_eq!(results[0].func_name, "foo");
        assert_eq!(results[0].func_grade, 16);
    }

    #[tokio::test]
    async fn partial_match_is_ranked_below_exact_match() {
        let (store, _dir) = CatalogStore::open_temporary(4).unwrap();
        let data_a = b"abcdefgh".repeat(8);
        let mut data_b = data_a.clone();
        data_b[5] ^= 0xff;

        store
            .add_function("A".into(), "".into(), data_a.clone())
            .await
            .unwrap();
        store
            .add_function("B".into(), "".into(), data_b)
            .await
            .unwrap();

        let results = store.get_similars(data_a, 3).await;
        assert_eq!(results[0].func_name, "A");
        assert_eq!(results[0].func_grade, 4);
        assert!(results.iter().any(|r| r.func_name == "B"));
    }

    #[tokio::test]
    async fn replace_by_hash_drops_the_old_name() {
        let (store, _dir) = CatalogStore::open_temporary(8).unwrap();
        let data = b"identical bytes, identical hash".to_vec();
        store
            .add_function("x".into(), "".into(), data.clone())
            .await
            .unwrap();
        store
            .add_function("y".into(), "".into(), data)
            .await
            .unwrap();

        let names = store.get_func_names().await;
        assert!(names.contains(&"y".to_string()));
        assert!(!names.contains(&"x".to_string()));
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn batch_commit_boundary_is_visible_after_reopen() {
        let (store, dir) = CatalogStore::open_temporary(4).unwrap();
        for i in 0..2049u32 {
            store
                .add_function(format!("f{i}"), "".into(), i.to_le_bytes().repeat(4))
                .await
                .unwrap();
        }
        store.close().await;

        let reopened = CatalogStore::open(&dir.path().join("catalog.sqlite"), 4, DEFAULT_BATCH)
            .unwrap();
        let names = reopened.get_func_names().await;
        assert!(names.len() >= 2048);
    }

    #[tokio::test]
    async fn add_structure_then_get_struct_round_trips() {
        let (store, _dir) = CatalogStore::open_temporary(8).unwrap();
        store
            .add_structure("pixel_t".into(), b"\xde\xad\xbe\xef".to_vec())
            .await
            .unwrap();

        let dump = store.get_struct("pixel_t".into()).await;
        assert_eq!(dump, Some(b"\xde\xad\xbe\xef".to_vec()));
    }

    #[tokio::test]
    async fn get_struct_on_missing_name_is_none() {
        let (store, _dir) = CatalogStore::open_temporary(8).unwrap();
        assert_eq!(store.get_struct("nope".into()).await, None);
    }

    #[tokio::test]
    async fn empty_func_name_is_rejected_without_touching_storage() {
        let (store, _dir) = CatalogStore::open_temporary(4).unwrap();
        let err = store
            .add_function("".into(), "".into(), b"data".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyFuncName));
    }

    #[tokio::test]
    async fn reopening_with_a_different_num_hashes_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");
        CatalogStore::open(&path, 16, DEFAULT_BATCH).unwrap();

        let err = CatalogStore::open(&path, 8, DEFAULT_BATCH).unwrap_err();
        assert!(matches!(
            err,
            StoreError::NumHashesMismatch {
                expected: 8,
                found: 16
            }
        ));
    }
}
