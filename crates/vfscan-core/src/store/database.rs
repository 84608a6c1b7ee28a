//! SQLite store for completion records, directory entries and attributes

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, ScanError};
use crate::vfs::{AddressGlob, EntryKind, Timestamps, VirtualAddress, VirtualDirectoryEntry};

use super::{Attribute, Store};

/// One SQLite database per evidence set
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScanError::StoreUnavailable(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(&db_path).map_err(|e| {
            ScanError::StoreUnavailable(format!(
                "Failed to open database at {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Default database of an evidence set (~/.vfscan/<evidence>.db)
    pub fn default_path(evidence: &str) -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| ScanError::Config("Could not determine home directory".into()))?;
        let file: String = evidence
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        Ok(home.join(".vfscan").join(format!("{}.db", file)))
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                address TEXT PRIMARY KEY,
                parent TEXT,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                kind TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified TEXT,
                accessed TEXT,
                changed TEXT,
                allocated INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_parent
                ON entries(parent);

            CREATE TABLE IF NOT EXISTS completions (
                address TEXT NOT NULL,
                scanner TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (address, scanner)
            );

            CREATE INDEX IF NOT EXISTS idx_completions_scanner
                ON completions(scanner);

            CREATE TABLE IF NOT EXISTS attributes (
                address TEXT NOT NULL,
                scanner TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (address, scanner, key)
            );
            "#,
        )?;
        Ok(())
    }
}

fn address_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<VirtualAddress> {
    let text: String = row.get(idx)?;
    VirtualAddress::parse(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc)))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<VirtualDirectoryEntry> {
    let parent: Option<String> = row.get(1)?;
    let parent = match parent {
        Some(p) => Some(
            VirtualAddress::parse(&p)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };
    let kind: String = row.get(4)?;
    let size: i64 = row.get(5)?;

    Ok(VirtualDirectoryEntry {
        address: address_column(row, 0)?,
        parent,
        name: row.get(2)?,
        path: row.get(3)?,
        kind: EntryKind::parse(&kind).unwrap_or(EntryKind::File),
        size: size as u64,
        timestamps: Timestamps {
            modified: time_column(row, 6)?,
            accessed: time_column(row, 7)?,
            changed: time_column(row, 8)?,
        },
        allocated: row.get(9)?,
    })
}

const ENTRY_COLUMNS: &str =
    "address, parent, name, path, kind, size, modified, accessed, changed, allocated";

impl Store for SqliteStore {
    fn get_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM completions WHERE address = ?1 AND scanner = ?2",
                params![address.as_str(), scanner],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn set_completion(&self, address: &VirtualAddress, scanner: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO completions (address, scanner, completed_at) VALUES (?1, ?2, ?3)",
            params![address.as_str(), scanner, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_completions(&self, glob: &AddressGlob, scanner: &str) -> Result<usize> {
        let cleared = self.conn.lock().execute(
            "DELETE FROM completions WHERE scanner = ?1 AND address GLOB ?2",
            params![scanner, glob.as_str()],
        )?;
        Ok(cleared)
    }

    fn count_completions(&self, scanner: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = match scanner {
            Some(scanner) => conn.query_row(
                "SELECT COUNT(*) FROM completions WHERE scanner = ?1",
                params![scanner],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM completions", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn put_directory_entry(&self, entry: &VirtualDirectoryEntry) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT OR REPLACE INTO entries (
                address, parent, name, path, kind, size,
                modified, accessed, changed, allocated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                entry.address.as_str(),
                entry.parent.as_ref().map(|p| p.as_str()),
                entry.name,
                entry.path,
                entry.kind.as_str(),
                entry.size as i64,
                entry.timestamps.modified.map(|t| t.to_rfc3339()),
                entry.timestamps.accessed.map(|t| t.to_rfc3339()),
                entry.timestamps.changed.map(|t| t.to_rfc3339()),
                entry.allocated,
            ],
        )?;
        Ok(())
    }

    fn get_directory_entry(&self, address: &VirtualAddress) -> Result<Option<VirtualDirectoryEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM entries WHERE address = ?1", ENTRY_COLUMNS),
                params![address.as_str()],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn children(&self, parent: Option<&VirtualAddress>) -> Result<Vec<VirtualDirectoryEntry>> {
        let conn = self.conn.lock();
        let entries = match parent {
            Some(parent) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM entries WHERE parent = ?1 ORDER BY address",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map(params![parent.as_str()], entry_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM entries WHERE parent IS NULL ORDER BY address",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map([], entry_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(entries)
    }

    fn count_directory_entries(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn put_attribute(&self, address: &VirtualAddress, scanner: &str, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO attributes (address, scanner, key, value) VALUES (?1, ?2, ?3, ?4)",
            params![address.as_str(), scanner, key, value],
        )?;
        Ok(())
    }

    fn attributes(&self, address: &VirtualAddress) -> Result<Vec<Attribute>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT scanner, key, value FROM attributes WHERE address = ?1 ORDER BY scanner, key",
        )?;
        let rows = stmt.query_map(params![address.as_str()], |row| {
            Ok(Attribute {
                scanner: row.get(0)?,
                key: row.get(1)?,
                value: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn clear_attributes(&self, glob: &AddressGlob, scanner: &str) -> Result<usize> {
        let cleared = self.conn.lock().execute(
            "DELETE FROM attributes WHERE scanner = ?1 AND address GLOB ?2",
            params![scanner, glob.as_str()],
        )?;
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::DriverTag;
    use tempfile::TempDir;

    fn addr(s: &str) -> VirtualAddress {
        VirtualAddress::parse(s).unwrap()
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/evidence.db");
        let root = addr("42");
        let child = root.derive(DriverTag::Zip, "0");
        let modified = DateTime::parse_from_rfc3339("2020-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let member = VirtualDirectoryEntry::file(child.clone(), "/a.zip", "report.txt", 10)
            .with_parent(root.clone())
            .with_timestamps(Timestamps {
                modified: Some(modified),
                ..Default::default()
            });

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_directory_entry(&member).unwrap();
            store.put_directory_entry(&member).unwrap();
            store.set_completion(&child, "Md5Sum").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.count_directory_entries().unwrap(), 1);
        assert_eq!(store.get_directory_entry(&child).unwrap(), Some(member.clone()));
        assert_eq!(store.children(Some(&root)).unwrap(), vec![member]);
        assert!(store.children(None).unwrap().is_empty());
        assert!(store.get_completion(&child, "Md5Sum").unwrap());
    }

    #[test]
    fn glob_reset_only_touches_one_scanner() {
        let store = SqliteStore::open_in_memory().unwrap();
        for a in ["42", "42|Z0", "42|Z1", "43"] {
            store.set_completion(&addr(a), "Md5Sum").unwrap();
            store.set_completion(&addr(a), "TypeDetect").unwrap();
            store.put_attribute(&addr(a), "Md5Sum", "md5", "00").unwrap();
        }

        let glob = AddressGlob::new("42|*").unwrap();
        assert_eq!(store.clear_completions(&glob, "Md5Sum").unwrap(), 2);
        assert_eq!(store.clear_attributes(&glob, "Md5Sum").unwrap(), 2);

        assert!(store.get_completion(&addr("42"), "Md5Sum").unwrap());
        assert!(!store.get_completion(&addr("42|Z1"), "Md5Sum").unwrap());
        assert_eq!(store.count_completions(Some("TypeDetect")).unwrap(), 4);
        assert_eq!(store.count_completions(None).unwrap(), 6);
        assert!(store.attributes(&addr("42|Z0")).unwrap().is_empty());
        assert_eq!(store.attributes(&addr("43")).unwrap().len(), 1);
    }

    #[test]
    fn default_path_is_per_evidence() {
        let path = SqliteStore::default_path("case 7/disk.img").unwrap();
        assert!(path.ends_with(".vfscan/case_7_disk.img.db"));
    }
}
