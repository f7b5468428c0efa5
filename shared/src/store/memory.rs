use super::MessageStore;
use anyhow::{Result, bail};
use async_trait::async_trait;
use courier_types::{MessageEnvelope, ReceiptState};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
struct Tables {
    /// idempotency_key → row
    messages: HashMap<String, MessageEnvelope>,
    /// message ids in insertion order
    insert_order: Vec<String>,
    receipts: HashSet<(String, String, ReceiptState)>,
}

/// In-process message store with the same uniqueness rules as Postgres.
///
/// Fault hooks:
/// - `fail_next_inserts`: the insert fails without writing (timeout)
/// - `fail_after_write`: the row is written, then an error is returned,
///   as when a commit lands but the reply is lost
/// - `fail_receipts_for`: receipts for one recipient fail
#[derive(Default)]
pub struct InMemoryMessageStore {
    tables: Mutex<Tables>,
    fail_inserts: AtomicU32,
    fail_after_write: AtomicU32,
    failing_recipients: Mutex<HashSet<String>>,
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    pub fn fail_after_write(&self, n: u32) {
        self.fail_after_write.store(n, Ordering::SeqCst);
    }

    pub fn fail_receipts_for(&self, recipient_id: &str) {
        self.failing_recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(recipient_id.to_string());
    }

    pub fn heal_receipts(&self) {
        self.failing_recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn message_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).messages.len()
    }

    /// Contents of persisted messages in insertion order
    pub fn persisted_contents(&self) -> Vec<String> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .insert_order
            .iter()
            .filter_map(|id| tables.messages.values().find(|m| &m.message_id == id))
            .map(|m| m.metadata.content.clone())
            .collect()
    }

    pub fn receipt_count(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).receipts.len()
    }

    pub fn has_receipt(&self, message_id: &str, recipient_id: &str, state: ReceiptState) -> bool {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .receipts
            .contains(&(message_id.to_string(), recipient_id.to_string(), state))
    }

    fn write(&self, envelope: &MessageEnvelope) -> bool {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let id_taken = tables
            .messages
            .values()
            .any(|m| m.message_id == envelope.message_id);
        if id_taken || tables.messages.contains_key(&envelope.idempotency_key) {
            return false;
        }
        tables
            .messages
            .insert(envelope.idempotency_key.clone(), envelope.clone());
        tables.insert_order.push(envelope.message_id.clone());
        true
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_if_absent(&self, envelope: &MessageEnvelope) -> Result<bool> {
        if take(&self.fail_inserts) {
            bail!("injected store timeout");
        }
        let inserted = self.write(envelope);
        if take(&self.fail_after_write) {
            bail!("injected failure after commit");
        }
        Ok(inserted)
    }

    async fn record_receipt(&self, message_id: &str, recipient_id: &str, state: ReceiptState) -> Result<bool> {
        if self
            .failing_recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(recipient_id)
        {
            bail!("injected receipt failure for recipient");
        }
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .receipts
            .insert((message_id.to_string(), recipient_id.to_string(), state)))
    }
}
