//! Remote blob store access for RelayDrive.
//!
//! [`RemoteStore`] is the narrow interface to the size-capped, rate-limited
//! object relay. [`HttpRemoteStore`] speaks its bot-style HTTP API and
//! `MemoryRemoteStore` is an in-process stand-in with scriptable faults,
//! built only for tests or with the `test-util` feature.
//! [`TransportClient`] layers per-shard retries, rate-limit waits and
//! cancellation on top of either.

pub mod client;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use client::{RetryPolicy, ShardEvent, TransportClient, sleep_or_cancel};
pub use error::{RemoteError, TransportError};
pub use http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HttpRemoteStore, HttpStoreConfig,
};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{Fault, MemoryRemoteStore};
pub use store::{RemoteStore, StoreFuture, StoredObject, object_name};

/// Default bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
