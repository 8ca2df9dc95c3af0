//! SQLite-backed block store.
//!
//! This implementation persists blocks in a single `multi_chain` table
//! keyed by `block_hash`, with a separate `option` table tracking the
//! schema version. The database lives at
//! `<working_dir>/sqlite/multichain.db`.
//!
//! The either-side queries are expressed as two indexed lookups (one per
//! side) combined in Rust; `idx_multi_chain_requester` and
//! `idx_multi_chain_responder` cover them.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::store::{LedgerStore, Side, StoreError};
use crate::types::{Block, BlockId, PublicKey, Signature};

/// Directory under the working directory holding the database file.
pub const DATABASE_DIRECTORY: &str = "sqlite";

/// Database file name.
pub const DATABASE_FILENAME: &str = "multichain.db";

/// Version to keep track if the db schema needs to be updated.
const LATEST_DB_VERSION: u32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS multi_chain(
 block_hash                 BLOB PRIMARY KEY,
 up                         INTEGER NOT NULL,
 down                       INTEGER NOT NULL,
 total_up_requester         INTEGER NOT NULL,
 total_down_requester       INTEGER NOT NULL,
 sequence_number_requester  INTEGER NOT NULL,
 previous_hash_requester    BLOB NOT NULL,
 total_up_responder         INTEGER NOT NULL,
 total_down_responder       INTEGER NOT NULL,
 sequence_number_responder  INTEGER NOT NULL,
 previous_hash_responder    BLOB NOT NULL,
 public_key_requester       BLOB NOT NULL,
 signature_requester        BLOB NOT NULL,
 public_key_responder       BLOB NOT NULL,
 signature_responder        BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_multi_chain_requester
 ON multi_chain(public_key_requester, sequence_number_requester);
CREATE INDEX IF NOT EXISTS idx_multi_chain_responder
 ON multi_chain(public_key_responder, sequence_number_responder);
";

/// Column list shared by every block-returning query; order must match
/// [`read_block`].
const BLOCK_COLUMNS: &str = "up, down, \
 total_up_requester, total_down_requester, sequence_number_requester, previous_hash_requester, \
 total_up_responder, total_down_responder, sequence_number_responder, previous_hash_responder, \
 public_key_requester, signature_requester, public_key_responder, signature_responder";

/// Configuration for [`SqliteStore`].
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    /// Working directory that will contain `sqlite/multichain.db`.
    pub working_dir: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("data"),
        }
    }
}

impl SqliteConfig {
    /// Full path of the database file under the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.working_dir.join(DATABASE_DIRECTORY).join(DATABASE_FILENAME)
    }
}

/// SQLite-backed implementation of [`LedgerStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database under the configured working
    /// directory and ensures the schema is at the supported version.
    pub fn open(cfg: &SqliteConfig) -> Result<Self, StoreError> {
        let dir = cfg.working_dir.join(DATABASE_DIRECTORY);
        fs::create_dir_all(&dir)?;
        Self::open_at(&cfg.database_path())
    }

    /// Opens the database at an explicit file path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        ensure_schema(&conn)?;
        debug!(path = %path.display(), "opened ledger database");
        Ok(SqliteStore { conn })
    }

    /// Opens a private in-memory database. Useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    /// Flushes and closes the underlying connection.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    /// The block in which `public_key` holds its greatest sequence
    /// number, together with the side it occupies. One indexed lookup
    /// per side, combined here.
    fn latest_for(&self, public_key: &PublicKey) -> Result<Option<(Block, Side)>, StoreError> {
        let as_requester = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BLOCK_COLUMNS} FROM multi_chain \
                     WHERE public_key_requester = ?1 \
                     ORDER BY sequence_number_requester DESC LIMIT 1"
                ),
                params![public_key.as_bytes()],
                read_block,
            )
            .optional()?;
        let as_responder = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BLOCK_COLUMNS} FROM multi_chain \
                     WHERE public_key_responder = ?1 \
                     ORDER BY sequence_number_responder DESC LIMIT 1"
                ),
                params![public_key.as_bytes()],
                read_block,
            )
            .optional()?;

        Ok(match (as_requester, as_responder) {
            (None, None) => None,
            (Some(block), None) => Some((block, Side::Requester)),
            (None, Some(block)) => Some((block, Side::Responder)),
            (Some(req), Some(res)) => {
                if req.sequence_number_requester >= res.sequence_number_responder {
                    Some((req, Side::Requester))
                } else {
                    Some((res, Side::Responder))
                }
            }
        })
    }
}

impl LedgerStore for SqliteStore {
    fn insert(&mut self, block: &Block) -> Result<(), StoreError> {
        let id = block.id();
        let result = self.conn.execute(
            &format!(
                "INSERT INTO multi_chain (block_hash, {BLOCK_COLUMNS}) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"
            ),
            params![
                id.as_bytes(),
                block.up,
                block.down,
                block.total_up_requester,
                block.total_down_requester,
                block.sequence_number_requester,
                block.previous_hash_requester.as_bytes(),
                block.total_up_responder,
                block.total_down_responder,
                block.sequence_number_responder,
                block.previous_hash_responder.as_bytes(),
                block.public_key_requester.as_bytes(),
                block.signature_requester.as_bytes(),
                block.public_key_responder.as_bytes(),
                block.signature_responder.as_bytes(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateBlock)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    fn get(&self, id: &BlockId) -> Result<Option<Block>, StoreError> {
        let block = self
            .conn
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM multi_chain WHERE block_hash = ?1 LIMIT 1"),
                params![id.as_bytes()],
                read_block,
            )
            .optional()?;
        Ok(block)
    }

    fn get_by_seq_and_pk(
        &self,
        sequence_number: i32,
        public_key: &PublicKey,
    ) -> Result<Option<Block>, StoreError> {
        let as_requester = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BLOCK_COLUMNS} FROM multi_chain \
                     WHERE public_key_requester = ?1 AND sequence_number_requester = ?2 LIMIT 1"
                ),
                params![public_key.as_bytes(), sequence_number],
                read_block,
            )
            .optional()?;
        if as_requester.is_some() {
            return Ok(as_requester);
        }
        let as_responder = self
            .conn
            .query_row(
                &format!(
                    "SELECT {BLOCK_COLUMNS} FROM multi_chain \
                     WHERE public_key_responder = ?1 AND sequence_number_responder = ?2 LIMIT 1"
                ),
                params![public_key.as_bytes(), sequence_number],
                read_block,
            )
            .optional()?;
        Ok(as_responder)
    }

    fn contains(&self, id: &BlockId) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM multi_chain WHERE block_hash = ?1 LIMIT 1",
                params![id.as_bytes()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn contains_signature(
        &self,
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM multi_chain \
                 WHERE public_key_requester = ?1 AND signature_requester = ?2 LIMIT 1",
                params![public_key.as_bytes(), signature.as_bytes()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn latest_sequence_number(&self, public_key: &PublicKey) -> Result<i64, StoreError> {
        let as_requester: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence_number_requester) FROM multi_chain \
             WHERE public_key_requester = ?1",
            params![public_key.as_bytes()],
            |row| row.get(0),
        )?;
        let as_responder: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence_number_responder) FROM multi_chain \
             WHERE public_key_responder = ?1",
            params![public_key.as_bytes()],
            |row| row.get(0),
        )?;
        Ok(as_requester.into_iter().chain(as_responder).max().unwrap_or(-1))
    }

    fn previous_id(&self, public_key: &PublicKey) -> Result<Option<BlockId>, StoreError> {
        Ok(self.latest_for(public_key)?.map(|(block, _)| block.id()))
    }

    fn totals(&self, public_key: &PublicKey) -> Result<Option<(u32, u32)>, StoreError> {
        Ok(self
            .latest_for(public_key)?
            .map(|(block, side)| side.totals(&block)))
    }

    fn ids(&self) -> Result<Vec<BlockId>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT block_hash FROM multi_chain")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            let bytes = row?;
            let id = BlockId::try_from(bytes.as_slice())
                .map_err(|_| StoreError::Corrupted("block hash length"))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

/// Ensures the proper schema is used by the database.
///
/// A fresh database gets the full schema and the current version. An
/// existing database must not be newer than [`LATEST_DB_VERSION`];
/// older versions are upgraded in place.
fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS option(key TEXT PRIMARY KEY, value BLOB)",
        [],
    )?;
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM option WHERE key = 'database_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        None => {
            conn.execute_batch(SCHEMA)?;
            conn.execute(
                "INSERT INTO option(key, value) VALUES('database_version', ?1)",
                params![LATEST_DB_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(raw) => {
            let found: u32 = raw
                .parse()
                .map_err(|_| StoreError::Corrupted("database_version"))?;
            if found > LATEST_DB_VERSION {
                return Err(StoreError::SchemaVersion(found));
            }
            // Version 1 is current; future upgrades slot in here.
            Ok(())
        }
    }
}

/// Decodes one `multi_chain` row in [`BLOCK_COLUMNS`] order.
fn read_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        up: u32_col(row, 0)?,
        down: u32_col(row, 1)?,
        total_up_requester: u32_col(row, 2)?,
        total_down_requester: u32_col(row, 3)?,
        sequence_number_requester: row.get(4)?,
        previous_hash_requester: hash_col(row, 5)?,
        total_up_responder: u32_col(row, 6)?,
        total_down_responder: u32_col(row, 7)?,
        sequence_number_responder: row.get(8)?,
        previous_hash_responder: hash_col(row, 9)?,
        public_key_requester: PublicKey(row.get(10)?),
        signature_requester: Signature(row.get(11)?),
        public_key_responder: PublicKey(row.get(12)?),
        signature_responder: Signature(row.get(13)?),
    })
}

fn u32_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn hash_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<BlockId> {
    let bytes: Vec<u8> = row.get(idx)?;
    BlockId::try_from(bytes.as_slice()).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Blob,
            Box::from("block hash must be 20 bytes"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{test_block, test_key};
    use tempfile::TempDir;

    #[test]
    fn open_creates_database_under_working_dir() {
        let tmp = TempDir::new().expect("create temp dir");
        let cfg = SqliteConfig {
            working_dir: tmp.path().to_path_buf(),
        };

        let store = SqliteStore::open(&cfg).expect("open");
        assert!(cfg.database_path().exists());
        store.close().expect("close");
    }

    #[test]
    fn blocks_survive_reopen() {
        let tmp = TempDir::new().expect("create temp dir");
        let cfg = SqliteConfig {
            working_dir: tmp.path().to_path_buf(),
        };

        let alice = test_key(1);
        let bob = test_key(2);
        let block = test_block(&alice, &bob, 1, 1, BlockId::GENESIS, BlockId::GENESIS);

        {
            let mut store = SqliteStore::open(&cfg).expect("open");
            store.insert(&block).expect("insert");
            store.close().expect("close");
        }

        let store = SqliteStore::open(&cfg).expect("reopen");
        let fetched = store.get(&block.id()).expect("get").expect("present");
        assert_eq!(fetched, block);
        assert_eq!(store.latest_sequence_number(&alice).expect("latest"), 1);
    }

    #[test]
    fn newer_database_version_is_rejected() {
        let tmp = TempDir::new().expect("create temp dir");
        let cfg = SqliteConfig {
            working_dir: tmp.path().to_path_buf(),
        };

        {
            let store = SqliteStore::open(&cfg).expect("open");
            store
                .conn
                .execute(
                    "UPDATE option SET value = '2' WHERE key = 'database_version'",
                    [],
                )
                .expect("bump version");
            store.close().expect("close");
        }

        match SqliteStore::open(&cfg) {
            Err(StoreError::SchemaVersion(2)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("open should fail on a newer database version"),
        }
    }
}
