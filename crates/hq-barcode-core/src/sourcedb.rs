//! Source DB Connector: pooled, thread-local, read-only access to the
//! external declarations database (ECUS5 in the original system).
//!
//! §6.2 treats the concrete driver as out of scope ("Drivers out of scope;
//! core consumes an interface"), so the core defines [`SourceDbConnector`]
//! as a trait and provides one concrete implementation, [`PooledSourceDb`],
//! backed by `rusqlite`/`r2d2_sqlite` — the same pooled-connection pattern
//! as `examples/other_examples/...heskew-hone.../db/mod.rs`'s
//! `DbPool`/`DbConn` aliases, generalized from a shared pool to a
//! thread-local cache of one checked-out connection per thread
//! ("maintain thread-local connections... before each reuse, probe with
//! `SELECT 1` and recreate on failure").

use std::cell::RefCell;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::model::Declaration;

type Pool = r2d2::Pool<SqliteConnectionManager>;
type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

thread_local! {
    static THREAD_CONN: RefCell<Option<PooledConn>> = const { RefCell::new(None) };
}

/// The narrow read-only interface the rest of the core consumes.
#[async_trait]
pub trait SourceDbConnector: Send + Sync {
    async fn get_declarations(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        tax_codes: Option<&[String]>,
    ) -> Result<Vec<Declaration>>;

    async fn get_company_name(&self, tax_code: &str) -> Result<Option<String>>;

    async fn get_clearance_status(
        &self,
        declaration_number: &str,
        tax_code: &str,
    ) -> Result<Option<String>>;

    async fn test(&self) -> Result<bool>;

    /// Closes the calling thread's cached connection; other threads keep
    /// theirs.
    fn close_current_thread(&self);
}

/// Thread-local-connection-pool backed implementation.
pub struct PooledSourceDb {
    pool: Pool,
    busy_timeout_ms: u32,
}

impl PooledSourceDb {
    /// `connect_timeout_s` bounds the first connection attempt per thread;
    /// every reuse thereafter pays only the `SELECT 1` probe cost.
    pub fn open(database_path: &str, connect_timeout_s: u64) -> Result<Self> {
        let manager = SqliteConnectionManager::file(database_path);
        let pool = r2d2::Pool::builder()
            .connection_timeout(std::time::Duration::from_secs(connect_timeout_s))
            .build(manager)
            .map_err(|e| Error::classified(ErrorKind::Database, e.to_string()))?;
        Ok(Self {
            pool,
            busy_timeout_ms: 30_000,
        })
    }

    /// Context-manager-style acquisition: returns the thread's cached
    /// connection after probing it, or checks out and caches a fresh one on
    /// first use or after a failed probe. The connection is never handed
    /// back across threads, guaranteeing release semantics per thread.
    fn with_connection<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>) -> Result<T> {
        THREAD_CONN.with(|slot| {
            let mut slot = slot.borrow_mut();

            let needs_fresh = match slot.as_ref() {
                None => true,
                Some(conn) => conn.execute_batch("SELECT 1").is_err(),
            };

            if needs_fresh {
                debug!(thread = ?std::thread::current().name(), "source db: (re)creating thread-local connection");
                let conn = self
                    .pool
                    .get()
                    .map_err(|e| Error::classified(ErrorKind::Database, e.to_string()))?;
                conn.busy_timeout(std::time::Duration::from_millis(self.busy_timeout_ms as u64))
                    .map_err(Error::SourceDb)?;
                *slot = Some(conn);
            }

            let conn = slot.as_ref().expect("just ensured present");
            f(conn).map_err(Error::SourceDb)
        })
    }
}

#[async_trait]
impl SourceDbConnector for PooledSourceDb {
    async fn get_declarations(
        &self,
        from_date: NaiveDate,
        to_date: NaiveDate,
        tax_codes: Option<&[String]>,
    ) -> Result<Vec<Declaration>> {
        let tax_codes = tax_codes.map(|t| t.to_vec());
        let from_s = from_date.to_string();
        let to_s = to_date.to_string();
        self.with_connection(|conn| {
            let mut sql = String::from(
                "SELECT declaration_number, tax_code, declaration_date, customs_office_code,
                        transport_method, channel, status, goods_description
                 FROM declarations WHERE declaration_date BETWEEN ?1 AND ?2",
            );
            if let Some(codes) = &tax_codes {
                if !codes.is_empty() {
                    let placeholders = (3..3 + codes.len())
                        .map(|i| format!("?{i}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" AND tax_code IN ({placeholders})"));
                }
            }
            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&from_s, &to_s];
            if let Some(codes) = &tax_codes {
                for c in codes {
                    params.push(c);
                }
            }
            let rows = stmt.query_map(params.as_slice(), |row| {
                Ok(Declaration {
                    declaration_number: row.get(0)?,
                    tax_code: row.get(1)?,
                    declaration_date: row
                        .get::<_, String>(2)?
                        .parse()
                        .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
                    customs_office_code: row.get(3)?,
                    transport_method: row.get(4)?,
                    channel: row.get(5)?,
                    status: row.get(6)?,
                    goods_description: row.get(7)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    async fn get_company_name(&self, tax_code: &str) -> Result<Option<String>> {
        let tax_code = tax_code.to_string();
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT company_name FROM companies WHERE tax_code = ?1",
                [&tax_code],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn get_clearance_status(
        &self,
        declaration_number: &str,
        tax_code: &str,
    ) -> Result<Option<String>> {
        let (declaration_number, tax_code) = (declaration_number.to_string(), tax_code.to_string());
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT status FROM declarations WHERE declaration_number = ?1 AND tax_code = ?2",
                [&declaration_number, &tax_code],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn test(&self) -> Result<bool> {
        match self.with_connection(|conn| conn.execute_batch("SELECT 1")) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "source db test() probe failed");
                Ok(false)
            }
        }
    }

    fn close_current_thread(&self) {
        THREAD_CONN.with(|slot| {
            *slot.borrow_mut() = None;
        });
    }
}

/// Convenience alias for passing the connector around as a shared
/// dependency.
pub type SharedSourceDb = Arc<dyn SourceDbConnector>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_db(path: &str) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE declarations (
                declaration_number TEXT, tax_code TEXT, declaration_date TEXT,
                customs_office_code TEXT, transport_method TEXT, channel TEXT,
                status TEXT, goods_description TEXT
             );
             CREATE TABLE companies (tax_code TEXT, company_name TEXT);
             INSERT INTO declarations VALUES
                ('107785877140', '2300944637', '2025-12-10', '18A3', '1', 'Xanh', 'T', NULL);
             INSERT INTO companies VALUES ('2300944637', 'Example Co');",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn roundtrip_query_and_probe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("source.db");
        seed_db(path.to_str().unwrap());
        let db = PooledSourceDb::open(path.to_str().unwrap(), 5).unwrap();
        assert!(db.test().await.unwrap());
        let decls = db
            .get_declarations(
                NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].tax_code, "2300944637");
        let name = db.get_company_name("2300944637").await.unwrap();
        assert_eq!(name.as_deref(), Some("Example Co"));
        db.close_current_thread();
    }
}
