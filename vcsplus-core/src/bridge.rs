mod identity;
mod ring;
mod transport;

use crate::address;
use crate::config::BridgeConfig;
use crate::scanner::{self, EndpointLocation, PlusEndpoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use vcsplus_proc_macros::NamedVariants;

pub use identity::{
    generate_identity, resolve_identity, IdentityProvider, MemoryIdentityStore, IDENTITY_DIGITS,
    NICKNAME_MAX_CHARS,
};
pub use ring::{RingBuffer, RING_BUFFER_LEN};
pub use transport::{
    BridgeRequest, Completion, CompletionSender, HttpTransport, Transport, TransportError,
    CONTENT_TYPE, IDENTITY_HEADER,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How the receive ports behave. The two flavors differ only in the read-side ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, NamedVariants)]
pub enum PortFlavor {
    /// Receive port advances while the cursors differ; length port applies the +255 wraparound
    /// correction
    Standard,
    /// Receive port advances only while the read cursor is numerically behind the write cursor;
    /// length port returns the raw cursor difference
    Legacy,
}

/// Runtime collaborators of a bridge. Never persisted; carried over from the previous cartridge
/// when a save state is loaded.
#[derive(Clone)]
pub struct BridgeRuntime {
    pub transport: Option<Arc<dyn Transport>>,
    pub timeout: Duration,
}

impl BridgeRuntime {
    #[must_use]
    pub fn new(transport: Option<Arc<dyn Transport>>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

impl Default for BridgeRuntime {
    fn default() -> Self {
        Self { transport: None, timeout: DEFAULT_TIMEOUT }
    }
}

impl std::fmt::Debug for BridgeRuntime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRuntime")
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

struct BridgeLink {
    runtime: BridgeRuntime,
    completion_sender: mpsc::Sender<Completion>,
    completion_receiver: mpsc::Receiver<Completion>,
    // Sequence number -> time the request was issued
    pending: BTreeMap<u64, Instant>,
    next_sequence: u64,
}

impl BridgeLink {
    fn new(runtime: BridgeRuntime) -> Self {
        let (completion_sender, completion_receiver) = mpsc::channel();
        Self {
            runtime,
            completion_sender,
            completion_receiver,
            pending: BTreeMap::new(),
            next_sequence: 0,
        }
    }
}

impl Default for BridgeLink {
    fn default() -> Self {
        Self::new(BridgeRuntime::default())
    }
}

impl std::fmt::Debug for BridgeLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeLink")
            .field("runtime", &self.runtime)
            .field("pending", &self.pending.len())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

/// The PlusROM network peripheral: four ports in the cartridge window backed by two ring buffers
/// and an asynchronous request/response exchange.
///
/// Requests are handed to the transport and the bridge returns immediately. Outcomes come back
/// over a channel owned by the bridge and are only applied by `poll`, which runs on the bus
/// thread; dropping the bridge drops the channel, so late outcomes go nowhere.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlusBridge {
    flavor: PortFlavor,
    endpoint: PlusEndpoint,
    identity: String,
    outbound: RingBuffer,
    inbound: RingBuffer,
    #[serde(skip)]
    link: BridgeLink,
}

impl PlusBridge {
    #[must_use]
    pub fn new(
        flavor: PortFlavor,
        endpoint: PlusEndpoint,
        identity: String,
        runtime: BridgeRuntime,
    ) -> Self {
        Self {
            flavor,
            endpoint,
            identity,
            outbound: RingBuffer::new(),
            inbound: RingBuffer::new(),
            link: BridgeLink::new(runtime),
        }
    }

    /// Scan `image` for an endpoint and build a bridge if one is found. The identity provider is
    /// only consulted when the scan succeeds.
    pub fn detect(
        image: &[u8],
        location: EndpointLocation,
        flavor: PortFlavor,
        config: &BridgeConfig,
        identity: &mut dyn IdentityProvider,
        runtime: BridgeRuntime,
    ) -> Option<Self> {
        if !config.enabled {
            log::debug!("PlusROM functions disabled by config");
            return None;
        }

        let endpoint = match scanner::scan(image, location, &config.scheme) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                log::debug!("No PlusROM endpoint found ({location} scan): {err}");
                return None;
            }
        };

        let identity = resolve_identity(identity);

        log::info!("PlusROM functions enabled, endpoint {endpoint} ({flavor} ports)");

        Some(Self::new(flavor, endpoint, identity, runtime))
    }

    #[must_use]
    pub fn flavor(&self) -> PortFlavor {
        self.flavor
    }

    #[must_use]
    pub fn endpoint(&self) -> &PlusEndpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn outbound(&self) -> &RingBuffer {
        &self.outbound
    }

    #[must_use]
    pub fn inbound(&self) -> &RingBuffer {
        &self.inbound
    }

    /// Number of requests issued whose outcome has not been applied or abandoned yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.link.pending.len()
    }

    #[must_use]
    pub fn runtime(&self) -> BridgeRuntime {
        self.link.runtime.clone()
    }

    /// Replace the runtime collaborators. Any exchange still in flight is orphaned.
    pub fn attach(&mut self, runtime: BridgeRuntime) {
        self.link = BridgeLink::new(runtime);
    }

    /// Handle a read of `masked_address`, returning `None` if the address is not a bridge port.
    pub fn read(&mut self, masked_address: u16) -> Option<u8> {
        match masked_address {
            address::PLUS_RECEIVE_BUFFER => {
                self.poll();
                Some(match self.flavor {
                    PortFlavor::Standard => self.inbound.pop(),
                    PortFlavor::Legacy => self.inbound.pop_while_behind(),
                })
            }
            address::PLUS_RECEIVE_LENGTH => {
                self.poll();
                Some(self.receive_length())
            }
            _ => None,
        }
    }

    /// Side-effect-free version of `read`.
    #[must_use]
    pub fn peek(&self, masked_address: u16) -> Option<u8> {
        match masked_address {
            address::PLUS_RECEIVE_BUFFER => Some(self.inbound.front()),
            address::PLUS_RECEIVE_LENGTH => Some(self.receive_length()),
            _ => None,
        }
    }

    /// Handle a write to `masked_address`, returning whether the address was a bridge port.
    pub fn write(&mut self, masked_address: u16, value: u8) -> bool {
        match masked_address {
            address::PLUS_WRITE_TO_BUFFER => {
                self.outbound.push(value);
                true
            }
            address::PLUS_WRITE_AND_SEND => {
                let payload = self.outbound.push_and_drain(value);
                self.send(payload);
                true
            }
            _ => false,
        }
    }

    fn receive_length(&self) -> u8 {
        match self.flavor {
            PortFlavor::Standard => self.inbound.available(),
            PortFlavor::Legacy => self.inbound.available_uncorrected(),
        }
    }

    fn send(&mut self, payload: Vec<u8>) {
        let sequence = self.link.next_sequence;
        self.link.next_sequence += 1;

        let Some(transport) = self.link.runtime.transport.clone() else {
            log::warn!(
                "Dropping PlusROM request #{sequence} ({} bytes): {}",
                payload.len(),
                TransportError::Unavailable
            );
            return;
        };

        self.link.pending.insert(sequence, Instant::now());

        let request = BridgeRequest {
            sequence,
            url: self.endpoint.url().into(),
            identity: self.identity.clone(),
            payload,
        };
        let completion = CompletionSender::new(sequence, self.link.completion_sender.clone());
        transport.submit(request, completion);
    }

    /// Apply every outcome that has arrived so far and abandon requests that have been pending
    /// longer than the timeout. Never blocks.
    pub fn poll(&mut self) {
        while let Ok(completion) = self.link.completion_receiver.try_recv() {
            self.apply(completion);
        }

        let timeout = self.link.runtime.timeout;
        self.link.pending.retain(|&sequence, issued| {
            let expired = issued.elapsed() >= timeout;
            if expired {
                log::warn!("PlusROM request #{sequence} timed out after {timeout:?}, abandoning");
            }
            !expired
        });
    }

    fn apply(&mut self, completion: Completion) {
        let Completion { sequence, result } = completion;

        if self.link.pending.remove(&sequence).is_none() {
            log::debug!("Ignoring outcome of abandoned PlusROM request #{sequence}");
            return;
        }

        let body = match result {
            Ok(body) => body,
            Err(err) => {
                log::error!("PlusROM request #{sequence} to '{}' failed: {err}", self.endpoint);
                return;
            }
        };

        match parse_response(&body) {
            Some(payload) => {
                log::debug!("PlusROM request #{sequence} returned {} bytes", payload.len());
                self.inbound.extend(payload);
            }
            None => {
                log::warn!(
                    "Dropping malformed response to PlusROM request #{sequence} ({} bytes)",
                    body.len()
                );
            }
        }
    }
}

/// Split a response body into its length-prefixed payload. Bytes beyond the declared length are
/// ignored; a body shorter than declared is malformed.
fn parse_response(body: &[u8]) -> Option<&[u8]> {
    let (&len, rest) = body.split_first()?;
    rest.get(..usize::from(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedTransport;

    fn endpoint() -> PlusEndpoint {
        PlusEndpoint::new("https", "plus.example.com", "api")
    }

    fn bridge(flavor: PortFlavor, transport: &Arc<ScriptedTransport>) -> PlusBridge {
        let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
        PlusBridge::new(
            flavor,
            endpoint(),
            "tester WE0000".into(),
            BridgeRuntime::new(Some(transport), DEFAULT_TIMEOUT),
        )
    }

    #[test]
    fn flush_sends_accumulated_bytes_with_identity() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        assert!(bridge.write(address::PLUS_WRITE_TO_BUFFER, 0x01));
        assert!(bridge.write(address::PLUS_WRITE_TO_BUFFER, 0x02));
        assert!(bridge.write(address::PLUS_WRITE_AND_SEND, 0x03));

        let requests = transport.take_requests();
        assert_eq!(1, requests.len());

        let (request, _) = &requests[0];
        assert_eq!(vec![0x01, 0x02, 0x03], request.payload);
        assert_eq!("https://plus.example.com/api", request.url);
        assert_eq!("tester WE0000", request.identity);
        assert_eq!(0, bridge.outbound().write_cursor());
        assert_eq!(1, bridge.in_flight());
    }

    #[test]
    fn legacy_flush_sends_full_payload() {
        // The PLS send loop this flavor descends from never executed its body and posted an
        // empty payload; the bytes written since the last flush are sent instead
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Legacy, &transport);

        bridge.write(address::PLUS_WRITE_TO_BUFFER, 0x10);
        bridge.write(address::PLUS_WRITE_AND_SEND, 0x20);

        let requests = transport.take_requests();
        assert_eq!(vec![0x10, 0x20], requests[0].0.payload);
    }

    #[test]
    fn response_is_applied_only_on_poll() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        let (_, completion) = transport.take_requests().pop().unwrap();
        completion.complete(Ok(vec![3, 24, 59, 60, 0xFF]));

        // Nothing applied until the bus thread polls
        assert_eq!(0, bridge.inbound().write_cursor());

        assert_eq!(Some(3), bridge.read(address::PLUS_RECEIVE_LENGTH));
        assert_eq!(Some(24), bridge.read(address::PLUS_RECEIVE_BUFFER));
        assert_eq!(Some(59), bridge.read(address::PLUS_RECEIVE_BUFFER));
        assert_eq!(Some(60), bridge.read(address::PLUS_RECEIVE_BUFFER));
        assert_eq!(Some(0), bridge.read(address::PLUS_RECEIVE_LENGTH));
        assert_eq!(0, bridge.in_flight());
    }

    #[test]
    fn failed_request_leaves_buffers_alone() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        let (_, completion) = transport.take_requests().pop().unwrap();
        completion.complete(Err(TransportError::Status(500)));

        bridge.poll();
        assert_eq!(0, bridge.inbound().write_cursor());
        assert_eq!(Some(0), bridge.read(address::PLUS_RECEIVE_LENGTH));
        assert_eq!(0, bridge.in_flight());
    }

    #[test]
    fn malformed_responses_are_dropped() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        for body in [vec![], vec![4, 1, 2]] {
            bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
            let (_, completion) = transport.take_requests().pop().unwrap();
            completion.complete(Ok(body));
        }

        bridge.poll();
        assert_eq!(0, bridge.inbound().write_cursor());
    }

    #[test]
    fn concurrent_requests_may_complete_out_of_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0xA0);
        bridge.write(address::PLUS_WRITE_AND_SEND, 0xB0);
        assert_eq!(2, bridge.in_flight());

        let mut requests = transport.take_requests();
        let (_, second) = requests.pop().unwrap();
        let (_, first) = requests.pop().unwrap();

        second.complete(Ok(vec![1, 0xBB]));
        first.complete(Ok(vec![1, 0xAA]));

        bridge.poll();
        assert_eq!(Some(0xBB), bridge.read(address::PLUS_RECEIVE_BUFFER));
        assert_eq!(Some(0xAA), bridge.read(address::PLUS_RECEIVE_BUFFER));
    }

    #[test]
    fn expired_requests_are_abandoned() {
        let transport = Arc::new(ScriptedTransport::new());
        let runtime = BridgeRuntime::new(
            Some(Arc::clone(&transport) as Arc<dyn Transport>),
            Duration::ZERO,
        );
        let mut bridge = PlusBridge::new(PortFlavor::Standard, endpoint(), "id".into(), runtime);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        bridge.poll();
        assert_eq!(0, bridge.in_flight());

        // A response arriving after abandonment is ignored
        let (_, completion) = transport.take_requests().pop().unwrap();
        completion.complete(Ok(vec![1, 0x55]));
        bridge.poll();
        assert_eq!(0, bridge.inbound().write_cursor());
    }

    #[test]
    fn completion_after_bridge_dropped_is_harmless() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        drop(bridge);

        let (_, completion) = transport.take_requests().pop().unwrap();
        completion.complete(Ok(vec![1, 0x55]));
    }

    #[test]
    fn attach_orphans_in_flight_requests() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        let (_, completion) = transport.take_requests().pop().unwrap();

        bridge.attach(bridge.runtime());
        completion.complete(Ok(vec![1, 0x55]));
        bridge.poll();

        assert_eq!(0, bridge.in_flight());
        assert_eq!(0, bridge.inbound().write_cursor());
    }

    #[test]
    fn missing_transport_drops_request() {
        let mut bridge =
            PlusBridge::new(PortFlavor::Standard, endpoint(), "id".into(), BridgeRuntime::default());

        assert!(bridge.write(address::PLUS_WRITE_AND_SEND, 0x00));
        assert_eq!(0, bridge.in_flight());
        assert_eq!(0, bridge.outbound().write_cursor());
    }

    #[test]
    fn response_wraps_around_inbound_buffer() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        // Advance both inbound cursors to 250
        for _ in 0..5 {
            bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
            let (_, completion) = transport.take_requests().pop().unwrap();
            let mut body = vec![50];
            body.extend_from_slice(&[0; 50]);
            completion.complete(Ok(body));
            bridge.poll();
            for _ in 0..50 {
                bridge.read(address::PLUS_RECEIVE_BUFFER);
            }
        }
        assert_eq!(250, bridge.inbound().read_cursor());

        bridge.write(address::PLUS_WRITE_AND_SEND, 0x00);
        let (_, completion) = transport.take_requests().pop().unwrap();
        let mut body = vec![10];
        body.extend(1..=10);
        completion.complete(Ok(body));
        bridge.poll();

        assert_eq!(4, bridge.inbound().write_cursor());
        // Standard length port: 4 - 250 + 255
        assert_eq!(Some(9), bridge.peek(address::PLUS_RECEIVE_LENGTH));

        let received: Vec<_> =
            (0..10).filter_map(|_| bridge.read(address::PLUS_RECEIVE_BUFFER)).collect();
        assert_eq!((1..=10).collect::<Vec<u8>>(), received);
    }

    #[test]
    fn legacy_length_port_omits_wrap_correction() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut standard = bridge(PortFlavor::Standard, &transport);
        let mut legacy = bridge(PortFlavor::Legacy, &transport);

        for bridge in [&mut standard, &mut legacy] {
            bridge.inbound = RingBuffer::with_cursors(250, 4);
        }

        assert_eq!(Some(9), standard.read(address::PLUS_RECEIVE_LENGTH));
        assert_eq!(Some(10), legacy.read(address::PLUS_RECEIVE_LENGTH));
    }

    #[test]
    fn non_port_addresses_are_not_claimed() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut bridge = bridge(PortFlavor::Standard, &transport);

        assert_eq!(None, bridge.read(address::PLUS_WRITE_TO_BUFFER));
        assert_eq!(None, bridge.read(0x0FF4));
        assert!(!bridge.write(address::PLUS_RECEIVE_BUFFER, 0x00));
        assert!(!bridge.write(0x0000, 0x00));
        assert!(transport.take_requests().is_empty());
    }
}
