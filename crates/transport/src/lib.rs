mod error;
mod http;
mod stream;

use serde::Deserialize;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use stream::{
    BoxFuture, ChatEvent, ChatEventStream, ChatStreamHandle, TransportWorker, make_event_stream,
};

// Snafu context selectors, re-exported so other transport implementations
// (in-memory fakes included) can construct the same error taxonomy.
pub use error::{ConnectSnafu, PayloadParseSnafu, StatusSnafu, StreamReadSnafu, UnavailableSnafu};

/// Server response to a successful document upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    pub internal_id: String,
    pub filename: String,
    #[serde(default)]
    pub indexing_summary: Option<String>,
}

/// Outbound surface of the remote retrieval service.
///
/// All four operations are single-attempt: implementations perform no
/// retries and impose no timeouts, and callers treat any failure as final
/// for that attempt.
pub trait RagTransport: Send + Sync {
    /// Raw composite filenames (`<internalId>_<filename>`) currently known
    /// to the server.
    fn list_documents(&self) -> BoxFuture<'_, TransportResult<Vec<String>>>;

    fn upload_document(
        &self,
        file_bytes: Vec<u8>,
        filename: String,
    ) -> BoxFuture<'_, TransportResult<UploadReceipt>>;

    fn delete_document(&self, internal_id: String) -> BoxFuture<'_, TransportResult<()>>;

    /// Opens a streamed chat query. The returned handle carries the event
    /// stream and the worker future that feeds it; the caller spawns the
    /// worker. Failing to even build the request is the only error path
    /// here; connection failures surface as a terminal
    /// [`ChatEvent::Error`] on the stream.
    fn send_chat_query(&self, query: String, top_k: u32) -> TransportResult<ChatStreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_receipt_parses_the_wire_shape() {
        let receipt: UploadReceipt = serde_json::from_str(
            r#"{"internal_id":"abc123","filename":"report.pdf","indexing_summary":"12 chunks indexed"}"#,
        )
        .expect("receipt parses");

        assert_eq!(receipt.internal_id, "abc123");
        assert_eq!(receipt.filename, "report.pdf");
        assert_eq!(receipt.indexing_summary.as_deref(), Some("12 chunks indexed"));
    }

    #[test]
    fn upload_receipt_tolerates_a_missing_summary() {
        let receipt: UploadReceipt =
            serde_json::from_str(r#"{"internal_id":"abc123","filename":"report.pdf"}"#)
                .expect("receipt parses");

        assert_eq!(receipt.indexing_summary, None);
    }
}
