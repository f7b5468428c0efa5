// ============================================================================
// Courier Types - Core Data Types
// ============================================================================
//
// Data structures shared by the producer, the delivery pipeline and the
// service binaries. No dependencies on Redis, Postgres or business logic.
//
// Contents:
// - MessageEnvelope (the unit moved through the log and pipeline)
// - SendRequest / Acknowledgment (ingress boundary)
// - DeliveryReceipt (per-recipient state transitions)
// - DeadLetterRecord (terminal record for failed entries)
// - PushJob (queued device notification)
//
// ============================================================================

pub mod dead_letter;
pub mod envelope;
pub mod push;
pub mod receipt;
pub mod request;

pub use dead_letter::*;
pub use envelope::*;
pub use push::*;
pub use receipt::*;
pub use request::*;
