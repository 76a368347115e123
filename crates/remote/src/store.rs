use std::future::Future;
use std::pin::Pin;

use crate::RemoteError;

/// Boxed future returned by [`RemoteStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Identifiers the store assigns to an accepted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Message carrying the object; used for deletion.
    pub message_id: i64,
    /// Object identifier; used for retrieval.
    pub remote_id: String,
}

/// Abstraction over the remote blob store.
///
/// Each call is a single attempt; retries live in
/// [`TransportClient`](crate::TransportClient).
pub trait RemoteStore: Send + Sync {
    /// Uploads one object under `name`.
    fn put_object<'a>(&'a self, name: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, StoredObject>;

    /// Resolves an object id to a transient retrieval path.
    fn resolve<'a>(&'a self, remote_id: &'a str) -> StoreFuture<'a, String>;

    /// Fetches the bytes behind a retrieval path.
    fn fetch<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Deletes the message carrying an object.
    fn delete_object(&self, message_id: i64) -> StoreFuture<'_, ()>;
}

/// Remote object name for shard `sequence` of `file_name`: `<name>.partNNN`,
/// 1-based.
pub fn object_name(file_name: &str, sequence: u32) -> String {
    format!("{file_name}.part{:03}", sequence + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_one_based_and_padded() {
        assert_eq!(object_name("movie.mkv", 0), "movie.mkv.part001");
        assert_eq!(object_name("movie.mkv", 41), "movie.mkv.part042");
        assert_eq!(object_name("x", 1234), "x.part1235");
    }
}
