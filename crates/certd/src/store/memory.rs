use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use snicert_common::DomainName;

use super::{CertificateRecord, RecordStore};
use crate::error::StoreError;

/// Record store without persistence
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<DomainName, Arc<CertificateRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, domain: &DomainName) -> Result<Option<Arc<CertificateRecord>>, StoreError> {
        Ok(self.records.read().get(domain).cloned())
    }

    fn put(&self, record: CertificateRecord) -> Result<Arc<CertificateRecord>, StoreError> {
        let record = Arc::new(record);
        self.records
            .write()
            .insert(record.domain().clone(), Arc::clone(&record));
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<Arc<CertificateRecord>>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().len())
    }
}
