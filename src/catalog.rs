/// Backend Catalog
///
/// The list of upstream nodes lives in a small SQLite table read once at
/// startup. The table is created on first run; rows are managed out of band
/// (an operator inserts the node URLs before starting the proxy).

use rusqlite::Connection;
use tracing::warn;

use crate::backend::{Backend, BackendKind};
use crate::error::ProxyError;

const MIGRATE_SQL: &str = "CREATE TABLE IF NOT EXISTS backends (
    url     TEXT NOT NULL,
    name    TEXT NOT NULL,
    is_main BOOL NOT NULL DEFAULT FALSE,
    type    TEXT NOT NULL
);";

pub struct BackendCatalog {
    conn: Connection,
}

impl BackendCatalog {
    /// Open the catalog database. Accepts either a plain path or a
    /// `file:`-prefixed URL, with `~` expanded.
    pub fn open(db_url: &str) -> Result<Self, ProxyError> {
        let path = db_url.strip_prefix("file:").unwrap_or(db_url);
        let path = shellexpand::tilde(path).into_owned();
        if let Some(parent) = std::path::Path::new(&path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self, ProxyError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Apply the schema migration.
    pub fn migrate(&self) -> Result<(), ProxyError> {
        self.conn.execute_batch(MIGRATE_SQL)?;
        Ok(())
    }

    /// Read the full backend list. Rows with an unknown `type` are skipped
    /// with a warning rather than failing startup.
    pub fn backends(&self) -> Result<Vec<Backend>, ProxyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT url, name, is_main, type FROM backends")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (url, name, is_main, kind) = row?;
            match BackendKind::from_catalog(&kind) {
                Some(kind) => out.push(Backend {
                    url,
                    name,
                    is_main,
                    kind,
                }),
                None => warn!(%name, %kind, "skipping backend with unknown type"),
            }
        }
        Ok(out)
    }
}
