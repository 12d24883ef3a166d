//! Append-only journal of disk cache operations.
//!
//! Replaying it in order restores both the entry set and the recency order, so
//! a restarted cache evicts the same entries it would have evicted before the
//! restart. A missing or unreadable journal is not fatal: the caller rebuilds
//! from the files on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Journal file name inside a cache directory.
pub(super) const JOURNAL_FILE: &str = "journal.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum JournalRecord {
    Insert {
        stem: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        len: u64,
    },
    Touch {
        stem: String,
    },
    Remove {
        stem: String,
    },
}

#[derive(Debug, Clone)]
pub(super) struct Journal {
    path: PathBuf,
}

impl Journal {
    pub(super) fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(JOURNAL_FILE),
        }
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. `Ok(None)` when no journal exists yet.
    pub(super) fn replay(&self) -> Result<Option<Vec<JournalRecord>>, CacheError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                CacheError::Journal(format!("invalid record on line {}: {}", line_no + 1, e))
            })?;
            records.push(record);
        }
        Ok(Some(records))
    }

    pub(super) fn append(&self, record: &JournalRecord) -> Result<(), CacheError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| CacheError::Journal(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Replace the journal with `records`, atomically.
    pub(super) fn rewrite<'a, I>(&self, records: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = &'a JournalRecord>,
    {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)
                    .map_err(|e| CacheError::Journal(e.to_string()))?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
