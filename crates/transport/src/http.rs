use futures::StreamExt;
use serde::Deserialize;
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ConnectSnafu, StatusSnafu, TransportError, TransportResult};
use crate::stream::{BoxFuture, ChatEvent, ChatStreamHandle, TransportWorker, make_event_stream};
use crate::{RagTransport, UploadReceipt};

/// Multipart field name the upload endpoint expects.
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
struct DocumentListing {
    #[serde(default)]
    documents: Vec<String>,
}

/// Single-attempt HTTP client for the remote retrieval service.
///
/// No retries and no imposed timeouts: every failure is final for that call
/// and the session layer decides how to degrade.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Best-effort error body for status failures; an unreadable body must
    /// not mask the status itself.
    async fn read_error_body(response: reqwest::Response) -> String {
        response.text().await.unwrap_or_default()
    }

    async fn run_chat_worker(
        request: reqwest::RequestBuilder,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                tracing::warn!(error = %source, "chat request could not be sent");
                let _ = event_tx.send(ChatEvent::Error(format!(
                    "chat request could not be sent: {source}"
                )));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = Self::read_error_body(response).await;
            tracing::warn!(status = status.as_u16(), body = %body, "chat endpoint rejected query");
            let _ = event_tx.send(ChatEvent::Error(format!(
                "chat endpoint returned status {}",
                status.as_u16()
            )));
            return;
        }

        let mut body = response.bytes_stream();
        let mut carry = Utf8Carry::default();
        let mut cancelled = false;
        let mut failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!("chat stream cancelled");
                    break;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(bytes)) => {
                            let text = carry.push(&bytes);
                            if !text.is_empty() && event_tx.send(ChatEvent::Fragment(text)).is_err() {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            failed = true;
                            tracing::warn!(error = %source, "chat stream failed mid-flight");
                            let _ = event_tx.send(ChatEvent::Error(format!(
                                "chat stream read failed: {source}"
                            )));
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !failed {
            let tail = carry.finish();
            if !tail.is_empty() {
                let _ = event_tx.send(ChatEvent::Fragment(tail));
            }
            let _ = event_tx.send(ChatEvent::Done);
        }
    }
}

impl RagTransport for HttpTransport {
    fn list_documents(&self) -> BoxFuture<'_, TransportResult<Vec<String>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.endpoint("/documents"))
                .send()
                .await
                .context(ConnectSnafu {
                    stage: "list-documents-send",
                    endpoint: "/documents",
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = Self::read_error_body(response).await;
                return StatusSnafu {
                    stage: "list-documents-status",
                    endpoint: "/documents",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            let listing: DocumentListing =
                response
                    .json()
                    .await
                    .map_err(|source| TransportError::PayloadParse {
                        stage: "list-documents-parse",
                        details: source.to_string(),
                    })?;

            Ok(listing.documents)
        })
    }

    fn upload_document(
        &self,
        file_bytes: Vec<u8>,
        filename: String,
    ) -> BoxFuture<'_, TransportResult<UploadReceipt>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(file_bytes).file_name(filename);
            let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

            let response = self
                .client
                .post(self.endpoint("/upload"))
                .multipart(form)
                .send()
                .await
                .context(ConnectSnafu {
                    stage: "upload-document-send",
                    endpoint: "/upload",
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = Self::read_error_body(response).await;
                return StatusSnafu {
                    stage: "upload-document-status",
                    endpoint: "/upload",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            response
                .json()
                .await
                .map_err(|source| TransportError::PayloadParse {
                    stage: "upload-document-parse",
                    details: source.to_string(),
                })
        })
    }

    fn delete_document(&self, internal_id: String) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(self.endpoint(&format!("/documents/{internal_id}")))
                .send()
                .await
                .context(ConnectSnafu {
                    stage: "delete-document-send",
                    endpoint: "/documents/{id}",
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = Self::read_error_body(response).await;
                return StatusSnafu {
                    stage: "delete-document-status",
                    endpoint: "/documents/{id}",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            Ok(())
        })
    }

    fn send_chat_query(&self, query: String, top_k: u32) -> TransportResult<ChatStreamHandle> {
        let request = self
            .client
            .post(self.endpoint("/chat"))
            .query(&[("query", query.as_str())])
            .query(&[("top_k", top_k.to_string().as_str())]);

        let (event_tx, stream, cancel_rx) = make_event_stream();
        let worker: TransportWorker = Box::pin(Self::run_chat_worker(request, event_tx, cancel_rx));

        Ok(ChatStreamHandle { stream, worker })
    }
}

/// Incremental UTF-8 decoder for chunked bodies.
///
/// HTTP chunk boundaries are byte boundaries, so a multi-byte sequence can be
/// split across chunks; the incomplete tail is carried into the next push
/// instead of being emitted as replacement characters.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let valid_len = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // error_len() == None: the buffer merely ends mid-sequence.
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => {
                // Genuinely invalid bytes: emit lossily rather than stalling
                // the stream on data that will never become valid.
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return text;
            }
        };

        let tail = self.pending.split_off(valid_len);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    fn finish(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_carry_passes_complete_chunks_through() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"hello "), "hello ");
        assert_eq!(carry.push("wörld".as_bytes()), "wörld");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn utf8_carry_reassembles_split_multibyte_sequences() {
        // "ä" is 0xC3 0xA4; split it across two chunks.
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[b'a', 0xC3]), "a");
        assert_eq!(carry.push(&[0xA4, b'b']), "äb");
    }

    #[test]
    fn utf8_carry_flushes_incomplete_tail_on_finish() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&[b'x', 0xE2, 0x82]), "x");
        // The dangling sequence is surfaced lossily rather than dropped.
        assert_eq!(carry.finish(), "\u{FFFD}");
    }

    #[test]
    fn utf8_carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        let text = carry.push(&[b'a', 0xFF, b'b']);
        assert!(text.starts_with('a'));
        assert!(text.ends_with('b'));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn endpoint_join_strips_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:9000/");
        assert_eq!(transport.endpoint("/documents"), "http://localhost:9000/documents");
    }
}
