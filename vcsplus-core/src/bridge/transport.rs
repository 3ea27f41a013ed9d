use std::io::Read;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::{fmt, io};
use thiserror::Error;

pub const IDENTITY_HEADER: &str = "PlusStore-ID";
pub const CONTENT_TYPE: &str = "application/octet-stream";

// A response is one length byte followed by at most 255 payload bytes; anything past that is
// never looked at
const RESPONSE_LIMIT: u64 = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server responded with HTTP status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("error reading response body: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("no transport is attached to this bridge")]
    Unavailable,
}

impl From<ureq::Error> for TransportError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Status(status, _) => Self::Status(status),
            ureq::Error::Transport(transport) => {
                let timed_out = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<io::Error>())
                    .is_some_and(|err| {
                        matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
                    });
                if timed_out {
                    Self::Timeout
                } else {
                    Self::Network(transport.to_string())
                }
            }
        }
    }
}

/// One outbound exchange, produced by a flush of the outbound buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub sequence: u64,
    pub url: String,
    pub identity: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct Completion {
    pub sequence: u64,
    pub result: Result<Vec<u8>, TransportError>,
}

/// Hands the outcome of a request back to the bridge that issued it. If the bridge has been
/// dropped in the meantime the outcome is discarded.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    sequence: u64,
    sender: mpsc::Sender<Completion>,
}

impl CompletionSender {
    pub(crate) fn new(sequence: u64, sender: mpsc::Sender<Completion>) -> Self {
        Self { sequence, sender }
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn complete(self, result: Result<Vec<u8>, TransportError>) {
        let sequence = self.sequence;
        if self.sender.send(Completion { sequence, result }).is_err() {
            log::debug!("PlusROM request #{sequence} finished after its cartridge was removed");
        }
    }
}

/// Carries bridge requests to the outside world. `submit` must not block; the outcome is
/// reported later through the completion sender.
pub trait Transport: Send + Sync {
    fn submit(&self, request: BridgeRequest, completion: CompletionSender);
}

/// HTTP transport: one POST per request, each performed on its own short-lived thread.
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl Transport for HttpTransport {
    fn submit(&self, request: BridgeRequest, completion: CompletionSender) {
        let agent = self.agent.clone();
        let sequence = request.sequence;

        let spawn_result = thread::Builder::new()
            .name(format!("plusrom-request-{sequence}"))
            .spawn(move || {
                log::debug!(
                    "Sending PlusROM request #{} ({} bytes) to '{}'",
                    request.sequence,
                    request.payload.len(),
                    request.url
                );
                completion.complete(post(&agent, &request));
            });

        // The completion sender went down with the closure, so the bridge will time the
        // request out on its own
        if let Err(err) = spawn_result {
            log::error!("Unable to spawn thread for PlusROM request #{sequence}: {err}");
        }
    }
}

fn post(agent: &ureq::Agent, request: &BridgeRequest) -> Result<Vec<u8>, TransportError> {
    let response = agent
        .post(&request.url)
        .set(IDENTITY_HEADER, &request.identity)
        .set("Content-Type", CONTENT_TYPE)
        .send_bytes(&request.payload)?;

    if response.status() != 200 {
        return Err(TransportError::Status(response.status()));
    }

    let mut body = Vec::new();
    response.into_reader().take(RESPONSE_LIMIT).read_to_end(&mut body)?;

    Ok(body)
}
