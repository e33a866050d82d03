use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

/// Metadata scraped from one title page. Values are kept exactly as shown on
/// the site, no numeric parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRecord {
    pub url: String,
    pub title: String,
    pub rating: String,
    pub user_rated: String,
    pub chapters: String,
    pub views: String,
    pub bookmarked: String,
    pub last_update: String,
}

/// A stored row: the record plus its surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: i64,
    pub record: TitleRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saved {
    Inserted,
    Updated,
}

/// Handle on the SQLite file. Each operation opens its own connection.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

const UPSERT_SQL: &str = "INSERT INTO metadata
     (url, title, rating, user_rated, chapters, views, bookmarked, last_update)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(url) DO UPDATE SET
        title = excluded.title,
        rating = excluded.rating,
        user_rated = excluded.user_rated,
        chapters = excluded.chapters,
        views = excluded.views,
        bookmarked = excluded.bookmarked,
        last_update = excluded.last_update";

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).with_context(|| format!("Failed to open {:?}", self.path))
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                url         TEXT UNIQUE,
                title       TEXT,
                rating      TEXT,
                user_rated  TEXT,
                chapters    TEXT,
                views       TEXT,
                bookmarked  TEXT,
                last_update TEXT
            );
            ",
        )?;
        Ok(())
    }

    pub fn exists(&self, url: &str) -> Result<bool> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metadata WHERE url = ?1",
            [url],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Existence check, then UPDATE or INSERT.
    pub fn save_one(&self, r: &TitleRecord) -> Result<Saved> {
        let conn = self.connect()?;
        let found = conn
            .query_row("SELECT 1 FROM metadata WHERE url = ?1", [&r.url], |_| Ok(()))
            .optional()?
            .is_some();

        if found {
            conn.execute(
                "UPDATE metadata SET title = ?1, rating = ?2, user_rated = ?3, chapters = ?4,
                        views = ?5, bookmarked = ?6, last_update = ?7
                 WHERE url = ?8",
                rusqlite::params![
                    r.title, r.rating, r.user_rated, r.chapters, r.views, r.bookmarked,
                    r.last_update, r.url,
                ],
            )?;
            Ok(Saved::Updated)
        } else {
            conn.execute(
                "INSERT INTO metadata
                 (url, title, rating, user_rated, chapters, views, bookmarked, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    r.url, r.title, r.rating, r.user_rated, r.chapters, r.views, r.bookmarked,
                    r.last_update,
                ],
            )?;
            Ok(Saved::Inserted)
        }
    }

    /// Upsert all records in one transaction. Existing rows keep their id.
    pub fn save_batch(&self, rows: &[TitleRecord]) -> Result<usize> {
        let conn = self.connect()?;
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for r in rows {
                count += stmt.execute(rusqlite::params![
                    r.url, r.title, r.rating, r.user_rated, r.chapters, r.views, r.bookmarked,
                    r.last_update,
                ])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let n: usize = conn.query_row("SELECT COUNT(*) FROM metadata", [], |r| r.get(0))?;
        Ok(n)
    }

    pub fn get(&self, url: &str) -> Result<Option<StoredRow>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, url, title, rating, user_rated, chapters, views, bookmarked, last_update
                 FROM metadata WHERE url = ?1",
                [url],
                read_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<StoredRow>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, title, rating, user_rated, chapters, views, bookmarked, last_update
             FROM metadata ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// Columns may be NULL if another tool wrote the row.
fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    let text = |i: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(i)?.unwrap_or_default())
    };
    Ok(StoredRow {
        id: row.get(0)?,
        record: TitleRecord {
            url: text(1)?,
            title: text(2)?,
            rating: text(3)?,
            user_rated: text(4)?,
            chapters: text(5)?,
            views: text(6)?,
            bookmarked: text(7)?,
            last_update: text(8)?,
        },
    })
}

#[cfg(test)]
pub(crate) fn record(url: &str) -> TitleRecord {
    TitleRecord {
        url: url.to_string(),
        title: format!("Title of {}", url),
        rating: "4.5".into(),
        user_rated: "120".into(),
        chapters: "88".into(),
        views: "1.2M".into(),
        bookmarked: "3,400".into(),
        last_update: "3 hours ago".into(),
    }
}
