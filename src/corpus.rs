//! Read-only corpus of known organisation domains.
//!
//! The SQLite corpus is the `websites` table produced by the Wikidata export:
//! one row per organisation website with `item_label` (organisation name) and
//! `domain` (registrable domain) columns.

use crate::error::{AnalysisError, AnalysisResult};
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;

/// Queryable set of known organisation domains.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait DomainCorpus: Send + Sync {
    /// Fails when the corpus cannot be opened at all.
    fn check_available(&self) -> AnalysisResult<()>;

    fn contains(&self, domain: &str) -> AnalysisResult<bool>;

    /// First entry, in corpus order, accepted by `matches`.
    fn find_first(&self, matches: &mut dyn FnMut(&str) -> bool) -> AnalysisResult<Option<String>>;

    /// Domains registered for an organisation name.
    fn domains_for_label(&self, label: &str) -> AnalysisResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct SqliteCorpus {
    db_path: PathBuf,
}

impl SqliteCorpus {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn connect(&self) -> AnalysisResult<Connection> {
        if !self.db_path.exists() {
            return Err(AnalysisError::DataSource(format!(
                "corpus database not found: {}",
                self.db_path.display()
            )));
        }
        Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            AnalysisError::DataSource(format!(
                "failed to open corpus {}: {e}",
                self.db_path.display()
            ))
        })
    }

    /// Creates the corpus schema in a writable database.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS websites (
                item TEXT,
                item_label TEXT,
                website TEXT,
                domain TEXT,
                subdomain TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS websites_domain ON websites(domain)",
            [],
        )?;
        Ok(())
    }
}

impl DomainCorpus for SqliteCorpus {
    fn check_available(&self) -> AnalysisResult<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM websites LIMIT 1", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(())
    }

    fn contains(&self, domain: &str) -> AnalysisResult<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(domain) FROM websites WHERE domain = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn find_first(&self, matches: &mut dyn FnMut(&str) -> bool) -> AnalysisResult<Option<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT domain FROM websites WHERE domain IS NOT NULL AND domain <> '' ORDER BY rowid")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let domain: String = row.get(0)?;
            if matches(&domain) {
                return Ok(Some(domain));
            }
        }
        Ok(None)
    }

    fn domains_for_label(&self, label: &str) -> AnalysisResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT domain FROM websites WHERE item_label = ?1 AND domain IS NOT NULL",
        )?;
        let domains = stmt
            .query_map(params![label], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(domains)
    }
}

/// Corpus held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StaticCorpus {
    entries: Vec<(String, String)>,
}

impl StaticCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: domains
                .into_iter()
                .map(|d| (String::new(), d.into()))
                .collect(),
        }
    }

    pub fn add(mut self, label: impl Into<String>, domain: impl Into<String>) -> Self {
        self.entries.push((label.into(), domain.into()));
        self
    }
}

impl DomainCorpus for StaticCorpus {
    fn check_available(&self) -> AnalysisResult<()> {
        Ok(())
    }

    fn contains(&self, domain: &str) -> AnalysisResult<bool> {
        Ok(self.entries.iter().any(|(_, d)| d == domain))
    }

    fn find_first(&self, matches: &mut dyn FnMut(&str) -> bool) -> AnalysisResult<Option<String>> {
        Ok(self
            .entries
            .iter()
            .find(|(_, d)| matches(d))
            .map(|(_, d)| d.clone()))
    }

    fn domains_for_label(&self, label: &str) -> AnalysisResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, d)| d.clone())
            .collect())
    }
}
