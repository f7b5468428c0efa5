use super::{IdempotencyRecord, IdempotencyStore, RecordState, Reservation};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-process idempotency cache (no expiry)
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
    fail_reserves: AtomicU32,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, idempotency_key: &str) -> Option<IdempotencyRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(idempotency_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_next_reserves(&self, n: u32) {
        self.fail_reserves.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(&self, record: &IdempotencyRecord) -> Result<Reservation> {
        if self
            .fail_reserves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("injected idempotency store failure");
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = records.get(&record.idempotency_key) {
            return Ok(Reservation::Existing(existing.clone()));
        }
        records.insert(record.idempotency_key.clone(), record.clone());
        Ok(Reservation::Reserved)
    }

    async fn promote(&self, record: &IdempotencyRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = records.get_mut(&record.idempotency_key) {
            existing.state = RecordState::Accepted;
        }
        Ok(())
    }

    async fn release(&self, idempotency_key: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(idempotency_key);
        Ok(())
    }
}
