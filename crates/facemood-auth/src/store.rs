//! CSV-backed user table.
//!
//! The whole table lives in one file with a header row. Reads parse the full
//! file; writes replace it atomically (temp file in the same directory, then
//! rename). Mutations go through [`UserStore::modify`], which serializes
//! load/modify/save under one writer lock. Writers in other processes are not
//! coordinated and remain last-write-wins.

use crate::types::{format_flag, parse_flag, Role, UserRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

const HEADER: [&str; 4] = ["username", "password", "role", "approved"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("user store CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("corrupt user store at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("user store writer lock poisoned")]
    LockPoisoned,
}

/// Raw row as it appears on disk.
#[derive(Debug, Deserialize)]
struct CsvRow {
    username: String,
    password: String,
    role: String,
    approved: String,
}

impl CsvRow {
    fn into_record(self, line: usize) -> Result<UserRecord, StoreError> {
        let role: Role = self
            .role
            .parse()
            .map_err(|reason| StoreError::Corrupt { line, reason })?;
        let approved = parse_flag(&self.approved).ok_or_else(|| StoreError::Corrupt {
            line,
            reason: format!("approved flag {:?} is not boolean", self.approved),
        })?;

        Ok(UserRecord {
            username: self.username,
            password: self.password,
            role,
            approved,
        })
    }
}

#[derive(Serialize)]
struct CsvRowRef<'a> {
    username: &'a str,
    password: &'a str,
    role: &'static str,
    approved: &'static str,
}

impl<'a> From<&'a UserRecord> for CsvRowRef<'a> {
    fn from(record: &'a UserRecord) -> Self {
        Self {
            username: &record.username,
            password: &record.password,
            role: record.role.as_str(),
            approved: format_flag(record.approved),
        }
    }
}

/// File-backed user table.
pub struct UserStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record in file order. A missing file is an empty table.
    pub fn load(&self) -> Result<Vec<UserRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for (idx, row) in reader.deserialize::<CsvRow>().enumerate() {
            // +2: one for the header, one for 1-based lines
            records.push(row?.into_record(idx + 2)?);
        }
        Ok(records)
    }

    /// Replace the file contents with `records`.
    ///
    /// The header row is always written, so an empty table still produces a
    /// valid file.
    pub fn save(&self, records: &[UserRecord]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file());
            writer.write_record(HEADER)?;
            for record in records {
                writer.serialize(CsvRowRef::from(record))?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "user store saved");
        Ok(())
    }

    /// Load, apply `f`, and save if `f` changed anything, all under the
    /// writer lock.
    pub fn modify<T>(&self, f: impl FnOnce(&mut Vec<UserRecord>) -> T) -> Result<T, StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut records = self.load()?;
        let before = records.clone();
        let out = f(&mut records);
        if records != before || !self.path.exists() {
            self.save(&records)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> UserStore {
        UserStore::new(dir.path().join("auth").join("users.csv"))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save(&[UserRecord::pending("alice", "pw1"), UserRecord::admin("root", "s3cret")])
            .unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "username,password,role,approved");
        assert_eq!(lines[1], "alice,pw1,user,False");
        assert_eq!(lines[2], "root,s3cret,admin,True");
    }

    #[test]
    fn test_save_empty_table_keeps_header() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&[]).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.trim(), "username,password,role,approved");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_preserves_order_and_values() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let records = vec![
            UserRecord::pending("bob", "a,b\"c"),
            UserRecord::pending("alice", "pw1"),
        ];
        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);
    }

    #[test]
    fn test_load_accepts_lowercase_flags() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            "username,password,role,approved\ncarol,x,user,true\ndave,y,admin,0\n",
        )
        .unwrap();

        let records = store.load().unwrap();
        assert!(records[0].approved);
        assert_eq!(records[1].role, Role::Admin);
        assert!(!records[1].approved);
    }

    #[test]
    fn test_load_rejects_unknown_role() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            "username,password,role,approved\neve,x,superuser,False\n",
        )
        .unwrap();

        match store.load() {
            Err(StoreError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    #[test]
    fn test_modify_without_change_does_not_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&[UserRecord::pending("alice", "pw1")]).unwrap();
        let before = std::fs::metadata(store.path()).unwrap().modified().unwrap();

        let found = store
            .modify(|records| records.iter().any(|r| r.username == "alice"))
            .unwrap();

        assert!(found);
        let after = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}
