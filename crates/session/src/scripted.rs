use std::collections::VecDeque;
use std::sync::Mutex;

use agrichat_transport::{
    BoxFuture, ChatEvent, ChatStreamHandle, RagTransport, TransportError, TransportResult,
    TransportWorker, UploadReceipt, make_event_stream,
};

/// Scripted behavior for one chat query.
#[derive(Debug, Clone)]
pub enum ScriptedChat {
    /// Deliver the fragments in order, then a clean end-of-stream.
    Fragments(Vec<String>),
    /// Refuse to open the stream at all.
    FailOpen(String),
    /// Deliver the fragments, then fail mid-flight.
    FailMidStream {
        fragments: Vec<String>,
        message: String,
    },
    /// Deliver the fragments, then hold the stream open until cancelled.
    Stall(Vec<String>),
}

/// Deterministic in-memory transport for tests and the QA runner.
///
/// Outcomes are queued up front and consumed one per call, in order. A call
/// with nothing scripted fails with [`TransportError::Unavailable`] so a
/// scenario that drifts from its script fails loudly instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    listings: Mutex<VecDeque<TransportResult<Vec<String>>>>,
    uploads: Mutex<VecDeque<TransportResult<UploadReceipt>>>,
    deletes: Mutex<VecDeque<TransportResult<()>>>,
    chats: Mutex<VecDeque<ScriptedChat>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_listing(&self, outcome: TransportResult<Vec<String>>) {
        lock_clean(&self.listings).push_back(outcome);
    }

    pub fn push_upload(&self, outcome: TransportResult<UploadReceipt>) {
        lock_clean(&self.uploads).push_back(outcome);
    }

    pub fn push_delete(&self, outcome: TransportResult<()>) {
        lock_clean(&self.deletes).push_back(outcome);
    }

    pub fn push_chat(&self, script: ScriptedChat) {
        lock_clean(&self.chats).push_back(script);
    }

    fn unscripted(stage: &'static str) -> TransportError {
        TransportError::Unavailable {
            stage,
            reason: "no scripted outcome left for this call".to_string(),
        }
    }
}

impl RagTransport for ScriptedTransport {
    fn list_documents(&self) -> BoxFuture<'_, TransportResult<Vec<String>>> {
        Box::pin(async move {
            lock_clean(&self.listings)
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted("scripted-list-documents")))
        })
    }

    fn upload_document(
        &self,
        _file_bytes: Vec<u8>,
        _filename: String,
    ) -> BoxFuture<'_, TransportResult<UploadReceipt>> {
        Box::pin(async move {
            lock_clean(&self.uploads)
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted("scripted-upload-document")))
        })
    }

    fn delete_document(&self, _internal_id: String) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            lock_clean(&self.deletes)
                .pop_front()
                .unwrap_or_else(|| Err(Self::unscripted("scripted-delete-document")))
        })
    }

    fn send_chat_query(&self, _query: String, _top_k: u32) -> TransportResult<ChatStreamHandle> {
        let script = lock_clean(&self.chats)
            .pop_front()
            .ok_or_else(|| Self::unscripted("scripted-send-chat-query"))?;

        if let ScriptedChat::FailOpen(reason) = script {
            return Err(TransportError::Unavailable {
                stage: "scripted-chat-open",
                reason,
            });
        }

        let (event_tx, stream, mut cancel_rx) = make_event_stream();
        let worker: TransportWorker = Box::pin(async move {
            match script {
                ScriptedChat::FailOpen(_) => {}
                ScriptedChat::Fragments(fragments) => {
                    for fragment in fragments {
                        if event_tx.send(ChatEvent::Fragment(fragment)).is_err() {
                            return;
                        }
                    }
                    let _ = event_tx.send(ChatEvent::Done);
                }
                ScriptedChat::FailMidStream { fragments, message } => {
                    for fragment in fragments {
                        if event_tx.send(ChatEvent::Fragment(fragment)).is_err() {
                            return;
                        }
                    }
                    let _ = event_tx.send(ChatEvent::Error(message));
                }
                ScriptedChat::Stall(fragments) => {
                    for fragment in fragments {
                        if event_tx.send(ChatEvent::Fragment(fragment)).is_err() {
                            return;
                        }
                    }
                    // Hold the stream open until the caller cancels.
                    let _ = (&mut cancel_rx).await;
                }
            }
        });

        Ok(ChatStreamHandle { stream, worker })
    }
}

/// Mutex access that shrugs off poisoning; a panicked test thread must not
/// cascade into unrelated scenarios sharing the fixture.
fn lock_clean<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
