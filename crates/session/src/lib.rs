pub mod coalescer;
pub mod controller;
pub mod registry;
pub mod scripted;
pub mod settings;
pub mod transcript;

pub use coalescer::{Absorbed, ResponseCoalescer};
pub use controller::{
    CONNECT_ERROR_REPLY, CancelHandle, CancelSignal, ChatSession, EMPTY_REPLY, FLUSH_INTERVAL_MS,
    GENERATION_ERROR_REPLY, STOPPED_REPLY, TurnOutcome, TurnState,
};
pub use registry::{Document, DocumentRegistry, RAW_NAME_SEPARATOR};
pub use scripted::{ScriptedChat, ScriptedTransport};
pub use settings::{
    DEFAULT_BASE_URL, DEFAULT_TOP_K, SessionSettings, SettingsError, SettingsStore,
};
pub use transcript::{Message, MessageId, MessageState, Role, Transcript};
