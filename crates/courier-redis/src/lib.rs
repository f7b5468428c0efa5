//! # Courier Redis
//!
//! Low-level Redis client for the courier delivery pipeline.
//!
//! ## Design Principles
//!
//! - **No business logic** - Pure infrastructure layer
//! - **No dependencies** on other courier-* crates
//! - **Generic operations** - Can be used by any service
//!
//! ## Features
//!
//! - Connection management with automatic reconnection
//! - Key-value operations with NX/expiry
//! - Lua scripts
//! - Redis Streams with consumer groups (XREADGROUP, XAUTOCLAIM, XPENDING, XACK)
//! - Pub/Sub publish and set membership (presence)
//!
//! ## Example
//!
//! ```rust,no_run
//! use courier_redis::RedisClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!
//!     // Set only if absent, with expiry
//!     let created = client.set_nx_ex("key", "value", 3600).await?;
//!     assert!(created);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod streams;

pub use client::RedisClient;
pub use streams::{ClaimedEntries, GroupInfo, PendingEntry, StreamEntryBinary, StreamReadOptions};

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
