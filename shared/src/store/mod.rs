// ============================================================================
// Message Store
// ============================================================================
//
// Durable write side of the pipeline. Both operations are idempotent and
// report duplicates as `false`, never as errors:
//
//   insert_if_absent(envelope)          → was_inserted
//   record_receipt(message, user, state) → applied
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::InMemoryMessageStore;
pub use postgres::{DbPool, PgMessageStore, create_pool, run_migrations};

use anyhow::Result;
use async_trait::async_trait;
use courier_types::{MessageEnvelope, ReceiptState};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_if_absent(&self, envelope: &MessageEnvelope) -> Result<bool>;

    async fn record_receipt(&self, message_id: &str, recipient_id: &str, state: ReceiptState) -> Result<bool>;
}
