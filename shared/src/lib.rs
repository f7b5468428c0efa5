// ============================================================================
// Courier Shared - Delivery Core
// ============================================================================
//
// Producer → Partitioned Log → Stream Consumer → Delivery Pipeline
//   → (Message Store | Presence fanout | Push queue) → ack back to the log
//
// Every collaborator is a trait with a Redis/Postgres implementation and an
// in-memory one; `context::DeliveryServices` wires them together once at
// startup.
//
// ============================================================================

pub mod consumer;
pub mod context;
pub mod dead_letter;
pub mod idempotency;
pub mod lease;
pub mod log;
pub mod partition;
pub mod pipeline;
pub mod presence;
pub mod producer;
pub mod push;
pub mod retry;
pub mod server;
pub mod store;
pub mod utils;
pub mod worker;

pub use consumer::StreamConsumer;
pub use context::{DeliveryServices, InMemoryServices};
pub use pipeline::{DeliveryPipeline, Disposition};
pub use producer::MessageProducer;
pub use server::{metrics_handler, shutdown_signal};
pub use worker::PartitionWorker;
