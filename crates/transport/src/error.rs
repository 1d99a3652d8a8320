use snafu::Snafu;

pub type TransportResult<T> = Result<T, TransportError>;

/// Failures surfaced by a [`crate::RagTransport`] implementation.
///
/// Every variant is final for the attempt it describes: this layer performs
/// no retries and imposes no timeouts, so callers decide how to degrade.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("request to '{endpoint}' could not be sent: {source}"))]
    Connect {
        stage: &'static str,
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("'{endpoint}' returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("response stream read failed: {source}"))]
    StreamRead {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to parse server payload: {details}"))]
    PayloadParse {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("transport unavailable: {reason}"))]
    Unavailable {
        stage: &'static str,
        reason: String,
    },
}
