//! On-disk record store
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── records/
//!     ├── example.com.json      # domain, email, PEM pair, timestamps
//!     └── www.example.com.json
//! ```
//!
//! Every record is written to a temporary file in `records/`, synced, and
//! renamed over the previous one. The rename is the commit point; a crash
//! before it leaves the old record in place and a stray temp file that is
//! removed on the next open.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use snicert_common::DomainName;

use super::{CertificateRecord, RecordStore};
use crate::error::StoreError;
use crate::material::CertificateMaterial;

const RECORDS_DIR: &str = "records";
const TEMP_PREFIX: &str = ".tmp";

/// Serialized form of a record
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    domain: String,
    email: String,
    certificate_pem: String,
    private_key_pem: String,
    issued_at: DateTime<Utc>,
    /// Informational; recomputed from the certificate on load
    not_after: DateTime<Utc>,
}

impl From<&CertificateRecord> for PersistedRecord {
    fn from(record: &CertificateRecord) -> Self {
        Self {
            domain: record.domain().to_string(),
            email: record.email().to_string(),
            certificate_pem: record.material().certificate_pem.clone(),
            private_key_pem: record.material().private_key_pem.clone(),
            issued_at: record.issued_at(),
            not_after: record.not_after(),
        }
    }
}

/// Record store backed by one JSON file per domain
///
/// All records are held in memory after [`FileRecordStore::open`]; reads never
/// touch the disk.
#[derive(Debug)]
pub struct FileRecordStore {
    base_path: PathBuf,
    records_path: PathBuf,
    index: RwLock<HashMap<DomainName, Arc<CertificateRecord>>>,
    /// Serializes rename + index update so both happen in the same order
    commit: Mutex<()>,
    read_only: bool,
}

impl FileRecordStore {
    /// Open (or create) a store rooted at `base_path`
    ///
    /// Creates the directory structure with 0700 permissions on Unix and
    /// loads every readable record. Unreadable files are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the directories cannot be
    /// created or listed.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        let records_path = base_path.join(RECORDS_DIR);

        fs::create_dir_all(&records_path)
            .map_err(|e| StoreError::io(format!("creating {}", records_path.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(&base_path, perms.clone())
                .map_err(|e| StoreError::io(format!("securing {}", base_path.display()), e))?;
            fs::set_permissions(&records_path, perms)
                .map_err(|e| StoreError::io(format!("securing {}", records_path.display()), e))?;
        }

        let index = load_index(&records_path, true)?;

        info!(
            storage_path = %base_path.display(),
            records = index.len(),
            "Opened certificate record store"
        );

        Ok(Self {
            base_path,
            records_path,
            index: RwLock::new(index),
            commit: Mutex::new(()),
            read_only: false,
        })
    }

    /// Load an existing store without changing anything on disk
    ///
    /// Permissions are left alone and temporary files of a running writer
    /// are ignored rather than removed. A missing `records/` directory reads
    /// as empty. [`put`](RecordStore::put) always fails.
    pub fn open_read_only(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        let records_path = base_path.join(RECORDS_DIR);

        let index = if records_path.exists() {
            load_index(&records_path, false)?
        } else {
            HashMap::new()
        };
        debug!(
            storage_path = %base_path.display(),
            records = index.len(),
            "Opened certificate record store read-only"
        );

        Ok(Self {
            base_path,
            records_path,
            index: RwLock::new(index),
            commit: Mutex::new(()),
            read_only: true,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, domain: &DomainName) -> PathBuf {
        self.records_path.join(format!("{domain}.json"))
    }

    fn write_atomically(&self, domain: &DomainName, contents: &[u8]) -> Result<(), StoreError> {
        let target = self.record_path(domain);

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".json")
            .tempfile_in(&self.records_path)
            .map_err(|e| StoreError::io("creating temporary record", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io("securing temporary record", e))?;
        }

        tmp.write_all(contents)
            .map_err(|e| StoreError::io("writing temporary record", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io("syncing temporary record", e))?;

        tmp.persist(&target)
            .map_err(|e| StoreError::io(format!("replacing {}", target.display()), e.error))?;

        sync_dir(&self.records_path);
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, domain: &DomainName) -> Result<Option<Arc<CertificateRecord>>, StoreError> {
        let found = self.index.read().get(domain).cloned();
        if found.is_none() {
            trace!(domain = %domain, "No stored certificate found");
        }
        Ok(found)
    }

    fn put(&self, record: CertificateRecord) -> Result<Arc<CertificateRecord>, StoreError> {
        if self.read_only {
            return Err(StoreError::Unavailable(format!(
                "{} is opened read-only",
                self.base_path.display()
            )));
        }
        let contents = serde_json::to_vec_pretty(&PersistedRecord::from(&record))
            .map_err(|e| StoreError::Unavailable(format!("encoding record: {e}")))?;

        let record = Arc::new(record);
        let _commit = self.commit.lock();
        self.write_atomically(record.domain(), &contents)?;
        self.index
            .write()
            .insert(record.domain().clone(), Arc::clone(&record));

        info!(
            domain = %record.domain(),
            not_after = %record.not_after(),
            "Saved certificate to storage"
        );
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<Arc<CertificateRecord>>, StoreError> {
        Ok(self.index.read().values().cloned().collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.index.read().len())
    }
}

fn load_index(
    records_path: &Path,
    remove_temp_files: bool,
) -> Result<HashMap<DomainName, Arc<CertificateRecord>>, StoreError> {
    let entries = fs::read_dir(records_path)
        .map_err(|e| StoreError::io(format!("listing {}", records_path.display()), e))?;

    let mut index = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io("reading directory entry", e))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.starts_with(TEMP_PREFIX) {
            if remove_temp_files {
                debug!(path = %path.display(), "Removing leftover temporary record");
                let _ = fs::remove_file(&path);
            }
            continue;
        }
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };

        match load_record(&path, stem) {
            Ok(record) => {
                debug!(
                    domain = %record.domain(),
                    not_after = %record.not_after(),
                    "Loaded stored certificate"
                );
                index.insert(record.domain().clone(), Arc::new(record));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable certificate record");
            }
        }
    }
    Ok(index)
}

fn load_record(path: &Path, stem: &str) -> Result<CertificateRecord, StoreError> {
    let unreadable = |reason: String| StoreError::Unreadable {
        domain: stem.to_string(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let persisted: PersistedRecord =
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
    let domain = DomainName::parse(&persisted.domain).map_err(|e| unreadable(e.to_string()))?;
    if domain.as_str() != stem {
        return Err(unreadable(format!("file holds a record for {domain}")));
    }

    let material = CertificateMaterial::new(persisted.certificate_pem, persisted.private_key_pem);
    CertificateRecord::from_parts(domain, persisted.email, material, persisted.issued_at)
        .map_err(|e| unreadable(e.to_string()))
}

#[cfg(unix)]
fn sync_dir(path: &Path) {
    if let Err(e) = fs::File::open(path).and_then(|dir| dir.sync_all()) {
        debug!(path = %path.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) {}
