//! Offline disk index - SQLite storage for pools that are not mounted

use crate::checksum::{Checksums, from_hex, to_hex};
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A recorded offline disk
#[derive(Debug, Clone, Serialize)]
pub struct DiskSummary {
    pub name: String,
    pub indexed_at: String,
    pub file_count: i64,
}

/// File listings of removable or offline disks, recorded while they were
/// mounted so later scans can include them in the pool.
pub struct OfflineStore {
    conn: Connection,
}

/// Get the default database path (~/.romforge/romforge.db)
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| RomError::invalid("Cannot find home directory"))?;
    Ok(home.join(".romforge").join("romforge.db"))
}

impl OfflineStore {
    /// Open the store at the default location, creating if needed
    pub fn open_default() -> Result<Self> {
        let path = default_db_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(&path)
    }

    /// Open the store at `path`, creating tables if they don't exist
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Record the files of disk `name`, replacing any earlier listing.
    pub fn record_disk(&mut self, name: &str, files: &[FileInformation]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(RomError::invalid("disk name is empty"));
        }

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM disks WHERE name = ?1", [name])?;
        tx.execute(
            "INSERT INTO disks (name, indexed_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        let disk_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO disk_files (disk_id, container_path, container_kind, entry_name,
                    reported_crc32, crc32, md5, sha1, sha256, size, data_block_size, header_size,
                    modified, compression)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for file in files {
                stmt.execute(params![
                    disk_id,
                    file.container_path.to_string_lossy().to_string(),
                    file.container_kind.as_str(),
                    file.entry_name,
                    to_hex(&file.reported_crc32),
                    to_hex(&file.checksums.crc32),
                    to_hex(&file.checksums.md5),
                    to_hex(&file.checksums.sha1),
                    to_hex(&file.checksums.sha256),
                    file.size as i64,
                    file.data_block_size as i64,
                    file.header_size as i64,
                    file.modified.map(|d| d.to_rfc3339()),
                    file.compression,
                ])?;
            }
        }

        tx.commit()?;
        log::info!("Recorded {} files for offline disk '{}'", files.len(), name);
        Ok(())
    }

    /// Files recorded for disk `name`, in recording order.
    pub fn load_disk(&self, name: &str) -> Result<Vec<FileInformation>> {
        let disk_id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM disks WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        let Some(disk_id) = disk_id else {
            return Err(RomError::invalid(format!("no offline disk named '{}'", name)));
        };

        let mut stmt = self.conn.prepare(
            "SELECT container_path, container_kind, entry_name, reported_crc32, crc32, md5, sha1,
                    sha256, size, data_block_size, header_size, modified, compression
             FROM disk_files WHERE disk_id = ?1 ORDER BY id",
        )?;
        let rows: Vec<StoredFile> = stmt
            .query_map([disk_id], StoredFile::from_row)?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter().map(StoredFile::into_file_information).collect()
    }

    pub fn list_disks(&self) -> Result<Vec<DiskSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.name, d.indexed_at, COUNT(f.id)
             FROM disks d LEFT JOIN disk_files f ON f.disk_id = d.id
             GROUP BY d.id ORDER BY d.name",
        )?;
        let disks = stmt
            .query_map([], |row| {
                Ok(DiskSummary {
                    name: row.get(0)?,
                    indexed_at: row.get(1)?,
                    file_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(disks)
    }

    /// Forget disk `name`. Returns false if it was never recorded.
    pub fn remove_disk(&self, name: &str) -> Result<bool> {
        let removed = self.conn.execute("DELETE FROM disks WHERE name = ?1", [name])?;
        Ok(removed > 0)
    }
}

/// Create the database schema
fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

struct StoredFile {
    container_path: String,
    container_kind: String,
    entry_name: String,
    reported_crc32: String,
    checksums: [String; 4],
    size: i64,
    data_block_size: i64,
    header_size: i64,
    modified: Option<String>,
    compression: Option<String>,
}

impl StoredFile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            container_path: row.get(0)?,
            container_kind: row.get(1)?,
            entry_name: row.get(2)?,
            reported_crc32: row.get(3)?,
            checksums: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
            size: row.get(8)?,
            data_block_size: row.get(9)?,
            header_size: row.get(10)?,
            modified: row.get(11)?,
            compression: row.get(12)?,
        })
    }

    fn into_file_information(self) -> Result<FileInformation> {
        let [crc32, md5, sha1, sha256] = &self.checksums;
        let mut file = FileInformation::new(
            self.container_path,
            self.container_kind.parse()?,
            self.entry_name,
            self.size as u64,
        );
        file.reported_crc32 = from_hex(&self.reported_crc32)?;
        file.checksums = Checksums {
            crc32: from_hex(crc32)?,
            md5: from_hex(md5)?,
            sha1: from_hex(sha1)?,
            sha256: from_hex(sha256)?,
        };
        file.data_block_size = self.data_block_size as u64;
        file.header_size = self.header_size as u64;
        file.modified = self
            .modified
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));
        file.compression = self.compression;
        Ok(file)
    }
}
