//! substreams-sink-cursor: pluggable cursor backends for Substreams sinks.
//!
//! Backends:
//! - [`file`]: a single flat file holding the raw token (atomic overwrite)
//! - [`http`]: an HTTP key/value resource (GET / PUT, optional Basic-Auth)
//!
//! [`writer::CursorWriter`] serializes write-back so persisted cursors always
//! follow the order in which the stream produced them.

pub mod file;
pub mod http;
pub mod retry;
pub mod writer;

use std::sync::Arc;

use substreams_sink_core::checkpoint::CursorStore;
use substreams_sink_core::config::{CursorBackend, CursorLocation};
use substreams_sink_core::error::CursorError;

pub use file::FileCursorStore;
pub use http::HttpCursorStore;
pub use retry::{RetryConfig, RetryPolicy};
pub use writer::{CursorWriter, WriterStats};

/// Build the store selected by the location's backend.
pub fn open(location: &CursorLocation) -> Result<Arc<dyn CursorStore>, CursorError> {
    let store: Arc<dyn CursorStore> = match location.backend {
        CursorBackend::File => Arc::new(FileCursorStore::new(&location.location)),
        CursorBackend::Http => Arc::new(HttpCursorStore::new(location)?),
    };
    tracing::debug!(backend = %location.backend, location = store.location(), "cursor store opened");
    Ok(store)
}
