//! # Courier Redis
//!
//! Low-level Redis client for the courier messaging server.
//!
//! ## Design Principles
//!
//! - **No business logic** - pure infrastructure layer
//! - **No dependencies** on other courier-* crates
//! - **Generic operations** - key/value, sets, streams, pub/sub, scripts
//!
//! ## Example
//!
//! ```rust,no_run
//! use courier_redis::RedisClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = RedisClient::connect("redis://localhost:6379").await?;
//!     client.set_ex("key", "value", 3600).await?;
//!     let value: Option<String> = client.get("key").await?;
//!     Ok(())
//! }
//! ```

mod client;

pub use client::RedisClient;

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for Redis operations
pub type Result<T> = std::result::Result<T, RedisError>;
