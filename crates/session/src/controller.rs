use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use agrichat_transport::{ChatEvent, ChatStreamHandle, RagTransport, TransportResult};

use crate::coalescer::{Absorbed, ResponseCoalescer};
use crate::registry::{Document, DocumentRegistry};
use crate::settings::SessionSettings;
use crate::transcript::{Message, MessageId, Transcript};

/// Cadence cap for in-flight transcript updates while a stream is live.
pub const FLUSH_INTERVAL_MS: u64 = 50;

/// Reply body when the chat request never reaches the server.
pub const CONNECT_ERROR_REPLY: &str = "Sorry, I could not connect to the server.";

/// Reply body when an open stream fails before finishing cleanly.
pub const GENERATION_ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Reply body when a stream ends cleanly without producing visible text.
pub const EMPTY_REPLY: &str = "No relevant documents found.";

/// Reply body when a turn is cancelled before any text arrived.
pub const STOPPED_REPLY: &str = "Generation stopped.";

/// Observable phase of the session's current turn.
///
/// Terminal phases surface as the [`TurnOutcome`] return value; the session
/// itself rests at `Idle` between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    AwaitingFirstToken,
    Streaming,
}

/// Terminal result of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Whitespace-only input; the transcript was not touched.
    Ignored,
    /// Stream ended cleanly (possibly with the empty-response reply).
    Answered,
    /// Transport failed somewhere before a clean end; the fallback reply
    /// was recorded.
    Failed,
    /// The caller cancelled; fragments stopped applying at that point.
    Cancelled,
}

/// Sending half of a turn's cancellation pair. Cloneable across tasks is
/// intentionally not offered: one turn, one cancel.
pub struct CancelHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Signals cancellation. Returns false when the turn already ended or
    /// cancel was already called.
    pub fn cancel(&mut self) -> bool {
        self.tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

/// Receiving half passed into [`ChatSession::submit_cancellable`].
pub struct CancelSignal {
    rx: oneshot::Receiver<()>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = oneshot::channel();
        (CancelHandle { tx: Some(tx) }, CancelSignal { rx })
    }

    async fn cancelled(self) {
        match self.rx.await {
            Ok(()) => {}
            // A dropped handle means this turn can no longer be cancelled.
            Err(_) => std::future::pending().await,
        }
    }
}

/// How the drive loop left the stream.
enum TurnEnd {
    Completed,
    Errored(String),
    ChannelClosed,
    Cancelled,
}

/// Client-side chat session: owns the transcript, the document registry,
/// the transport handle, and the per-turn stream lifecycle.
///
/// Every non-ignored submission produces exactly one user message and
/// exactly one terminal assistant message, whatever the transport does.
/// Turns borrow the session mutably and therefore serialize; transcript
/// order is arrival order.
pub struct ChatSession {
    transport: Arc<dyn RagTransport>,
    settings: SessionSettings,
    transcript: Transcript,
    registry: DocumentRegistry,
    thinking: bool,
    deleting_document: Option<String>,
    turn_state: TurnState,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn RagTransport>, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
            transcript: Transcript::new(),
            registry: DocumentRegistry::new(),
            thinking: false,
            deleting_document: None,
            turn_state: TurnState::Idle,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn documents(&self) -> &[Document] {
        self.registry.documents()
    }

    /// True between accepting a submission and the first visible fragment
    /// (or the turn's terminal reply).
    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    /// Internal id of the document a delete call is currently in flight
    /// for, so a presentation layer can disable the matching control.
    /// Advisory only; the registry performs no overlapping-delete detection.
    pub fn deleting_document(&self) -> Option<&str> {
        self.deleting_document.as_deref()
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Submits a query and drives the turn to its terminal state.
    pub async fn submit(&mut self, text: &str) -> TurnOutcome {
        let (_handle, signal) = CancelSignal::pair();
        self.submit_cancellable(text, signal).await
    }

    /// [`Self::submit`] with an externally held cancel handle. Cancelling
    /// stops fragment application immediately; the underlying request may
    /// run on server-side.
    pub async fn submit_cancellable(&mut self, text: &str, cancel: CancelSignal) -> TurnOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return TurnOutcome::Ignored;
        }

        self.turn_state = TurnState::Sending;
        self.transcript.append_user(text);
        self.thinking = true;
        let assistant_id = self.transcript.begin_assistant_reply();

        let handle = match self
            .transport
            .send_chat_query(trimmed.to_string(), self.settings.top_k)
        {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(error = %error, "chat query could not be issued");
                return self.close_turn(assistant_id, CONNECT_ERROR_REPLY, TurnOutcome::Failed);
            }
        };

        self.drive_stream(assistant_id, handle, cancel).await
    }

    async fn drive_stream(
        &mut self,
        assistant_id: MessageId,
        handle: ChatStreamHandle,
        cancel: CancelSignal,
    ) -> TurnOutcome {
        let ChatStreamHandle { mut stream, worker } = handle;
        let _worker = tokio::spawn(worker);
        self.turn_state = TurnState::AwaitingFirstToken;

        let mut coalescer = ResponseCoalescer::new();
        let mut flush_tick = tokio::time::interval(Duration::from_millis(FLUSH_INTERVAL_MS));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let cancel_fut = cancel.cancelled();
        tokio::pin!(cancel_fut);

        let end = loop {
            tokio::select! {
                _ = &mut cancel_fut => break TurnEnd::Cancelled,
                _ = flush_tick.tick(), if coalescer.flush_pending() => {
                    if let Some(content) = coalescer.take_flush() {
                        self.transcript.update_assistant(assistant_id, content);
                    }
                }
                event = stream.recv() => match event {
                    Some(ChatEvent::Fragment(fragment)) => {
                        if let Absorbed::AppendNow(content) = coalescer.absorb(&fragment) {
                            self.transcript.append_assistant(assistant_id, content);
                            self.thinking = false;
                            self.turn_state = TurnState::Streaming;
                        }
                    }
                    Some(ChatEvent::Done) => break TurnEnd::Completed,
                    Some(ChatEvent::Error(message)) => break TurnEnd::Errored(message),
                    // Worker went away without a terminal event; treat as failure.
                    None => break TurnEnd::ChannelClosed,
                },
            }
        };

        match end {
            TurnEnd::Completed => match coalescer.finish() {
                Some(content) => self.finalize_turn(assistant_id, content, TurnOutcome::Answered),
                None => self.close_turn(assistant_id, EMPTY_REPLY, TurnOutcome::Answered),
            },
            TurnEnd::Errored(message) => {
                tracing::warn!(error = %message, "chat stream failed; recording fallback reply");
                self.close_turn(assistant_id, GENERATION_ERROR_REPLY, TurnOutcome::Failed)
            }
            TurnEnd::ChannelClosed => {
                tracing::warn!("chat stream ended before a terminal event");
                self.close_turn(assistant_id, GENERATION_ERROR_REPLY, TurnOutcome::Failed)
            }
            TurnEnd::Cancelled => {
                stream.cancel();
                match coalescer.finish() {
                    Some(content) => {
                        self.finalize_turn(assistant_id, content, TurnOutcome::Cancelled)
                    }
                    None => self.close_turn(assistant_id, STOPPED_REPLY, TurnOutcome::Cancelled),
                }
            }
        }
    }

    /// Finalizes the in-flight reply with its complete text.
    fn finalize_turn(
        &mut self,
        assistant_id: MessageId,
        content: String,
        outcome: TurnOutcome,
    ) -> TurnOutcome {
        self.transcript.finalize_assistant(assistant_id, content, None);
        self.settle();
        outcome
    }

    /// Records a terminal reply for a turn whose stream produced nothing
    /// usable; finalizes the in-flight message when one exists, otherwise
    /// appends the reply fresh under the reserved id.
    fn close_turn(
        &mut self,
        assistant_id: MessageId,
        reply: &str,
        outcome: TurnOutcome,
    ) -> TurnOutcome {
        self.transcript.append_assistant_final(assistant_id, reply);
        self.settle();
        outcome
    }

    fn settle(&mut self) {
        self.thinking = false;
        self.turn_state = TurnState::Idle;
    }

    /// Best-effort registry refresh; transport failure degrades to an empty
    /// registry and is never surfaced.
    pub async fn refresh_documents(&mut self) {
        self.registry.refresh(self.transport.as_ref()).await;
    }

    /// Uploads a file and optimistically appends its registry entry.
    pub async fn upload_document(
        &mut self,
        file_bytes: Vec<u8>,
        filename: &str,
    ) -> TransportResult<Document> {
        self.registry
            .upload(self.transport.as_ref(), file_bytes, filename)
            .await
    }

    /// Deletes by internal id, holding the advisory deleting marker for the
    /// duration of the call.
    pub async fn delete_document(&mut self, internal_id: &str) -> TransportResult<()> {
        self.deleting_document = Some(internal_id.to_string());
        let outcome = self
            .registry
            .delete(self.transport.as_ref(), internal_id)
            .await;
        self.deleting_document = None;
        outcome
    }
}
