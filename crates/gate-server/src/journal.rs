/// Append-only JSON-lines journal with a checksum per line.
///
/// Every append is fsync'd before it returns. On open the journal is replayed; a checksum
/// mismatch anywhere is a hard error. A torn final line (crash mid-append) is cut off so the
/// next append starts on a clean line.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{GateError, Result};

const CHECKSUM_DOMAIN: &[u8] = b"gatepass_journal_v1:";

#[derive(Serialize, Deserialize)]
struct JournalLine {
    entry: serde_json::Value,
    checksum: String,
}

fn compute_checksum(entry: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(entry)
        .map_err(|e| GateError::Storage(format!("Failed to encode entry: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN);
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub struct Journal {
    path: PathBuf,
    file: File,
    /// Set when a failed append could not be rolled back; no further writes are accepted.
    poisoned: bool,
}

impl Journal {
    pub fn open<T: DeserializeOwned>(path: &Path) -> Result<(Self, Vec<T>)> {
        let mut entries = Vec::new();
        let mut good_len: u64 = 0;

        if path.exists() {
            let data = std::fs::read(path).map_err(|e| {
                GateError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;

            let mut offset = 0usize;
            while offset < data.len() {
                let end = data[offset..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| offset + p);
                let Some(end) = end else {
                    warn!(
                        "Dropping torn trailing record in {} ({} bytes)",
                        path.display(),
                        data.len() - offset
                    );
                    break;
                };

                let line = &data[offset..end];
                let line_no = entries.len() + 1;
                if !line.iter().all(u8::is_ascii_whitespace) {
                    let parsed: JournalLine = serde_json::from_slice(line).map_err(|e| {
                        GateError::Storage(format!(
                            "{} line {} unreadable: {}",
                            path.display(),
                            line_no,
                            e
                        ))
                    })?;
                    if compute_checksum(&parsed.entry)? != parsed.checksum {
                        return Err(GateError::Storage(format!(
                            "{} line {} checksum mismatch, refusing to continue",
                            path.display(),
                            line_no
                        )));
                    }
                    let entry = serde_json::from_value(parsed.entry).map_err(|e| {
                        GateError::Storage(format!(
                            "{} line {} has unexpected shape: {}",
                            path.display(),
                            line_no,
                            e
                        ))
                    })?;
                    entries.push(entry);
                }

                offset = end + 1;
                good_len = offset as u64;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| GateError::Storage(format!("Failed to open {}: {}", path.display(), e)))?;

        if file
            .metadata()
            .map(|m| m.len() != good_len)
            .unwrap_or(false)
        {
            file.set_len(good_len).map_err(|e| {
                GateError::Storage(format!("Failed to truncate {}: {}", path.display(), e))
            })?;
        }

        if !entries.is_empty() {
            info!("Replayed {} records from {}", entries.len(), path.display());
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                poisoned: false,
            },
            entries,
        ))
    }

    pub fn append<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let entry = serde_json::to_value(entry)
            .map_err(|e| GateError::Storage(format!("Failed to encode entry: {}", e)))?;
        let checksum = compute_checksum(&entry)?;
        let mut line = serde_json::to_vec(&JournalLine { entry, checksum })
            .map_err(|e| GateError::Storage(format!("Failed to encode line: {}", e)))?;
        line.push(b'\n');

        self.commit(&line, |file, bytes| {
            file.write_all(bytes)?;
            file.sync_data()
        })
    }

    /// Write one encoded line. A failed write or sync is cut back to the previous length,
    /// so a line is either fully durable or absent.
    fn commit<F>(&mut self, line: &[u8], write: F) -> Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        if self.poisoned {
            return Err(GateError::Storage(format!(
                "{} is poisoned by an earlier failed append",
                self.path.display()
            )));
        }

        let prev_len = self
            .file
            .metadata()
            .map_err(|e| GateError::Storage(format!("Failed to stat {}: {}", self.path.display(), e)))?
            .len();

        let Err(e) = write(&mut self.file, line) else {
            return Ok(());
        };

        let rollback = self
            .file
            .set_len(prev_len)
            .and_then(|_| self.file.sync_data());
        if let Err(rollback_err) = rollback {
            error!(
                "Could not roll back failed append to {}: {}",
                self.path.display(),
                rollback_err
            );
            self.poisoned = true;
        } else {
            warn!(
                "Rolled back failed append to {} ({} bytes)",
                self.path.display(),
                prev_len
            );
        }

        Err(GateError::Storage(format!(
            "Failed to append to {}: {}",
            self.path.display(),
            e
        )))
    }
}
