use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One event on an open chat stream.
///
/// Fragments arrive in delivery order and carry raw answer text with no
/// message or sentence alignment. A well-behaved worker emits exactly one
/// terminal event (`Done` or `Error`) and nothing after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Fragment(String),
    Done,
    Error(String),
}

/// Receiving half of a chat stream plus its cancellation signal.
pub struct ChatEventStream {
    events: mpsc::UnboundedReceiver<ChatEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// A started chat query: the event stream for the caller and the worker
/// future that feeds it. The caller spawns the worker on its runtime.
pub struct ChatStreamHandle {
    pub stream: ChatEventStream,
    pub worker: TransportWorker,
}

impl ChatEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<ChatEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }

    /// Signals the worker to stop reading the remote body. Returns false when
    /// the worker already finished or was signalled before.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Builds the channel trio backing one chat stream: the sender the worker
/// writes events into, the caller-facing stream, and the cancel receiver the
/// worker must honor.
pub fn make_event_stream() -> (
    mpsc::UnboundedSender<ChatEvent>,
    ChatEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (event_tx, ChatEventStream::new(event_rx, cancel_tx), cancel_rx)
}
