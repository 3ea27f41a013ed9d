use crate::address;
use crate::bridge::{BridgeRequest, CompletionSender, MemoryIdentityStore, Transport};
use crate::cartridge::CartridgeEnv;
use crate::config::CartridgeConfig;
use std::sync::{Arc, Mutex};

// Where `with_vector_endpoint` places the string table; the NMI vector then reads $1E00
const VECTOR_TABLE_OFFSET: usize = 0x0E00;

/// Records submitted requests so tests can complete them whenever and in whatever order they like.
pub(crate) struct ScriptedTransport {
    requests: Mutex<Vec<(BridgeRequest, CompletionSender)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self { requests: Mutex::new(Vec::new()) }
    }

    pub(crate) fn take_requests(&self) -> Vec<(BridgeRequest, CompletionSender)> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }
}

impl Transport for ScriptedTransport {
    fn submit(&self, request: BridgeRequest, completion: CompletionSender) {
        self.requests.lock().unwrap().push((request, completion));
    }
}

/// Byte stored at `offset` of `bank` in images built by `banked_image`. Distinct per bank for any
/// fixed offset as long as there are at most 16 banks.
pub(crate) fn image_byte(bank: usize, offset: usize) -> u8 {
    ((bank << 4) as u8) ^ (offset as u8)
}

pub(crate) fn banked_image(banks: usize, bank_size: usize) -> Vec<u8> {
    (0..banks)
        .flat_map(|bank| (0..bank_size).map(move |offset| image_byte(bank, offset)))
        .collect()
}

fn write_string_table(image: &mut [u8], start: usize, path: &str, host: &str) {
    let mut table = Vec::new();
    table.extend_from_slice(path.as_bytes());
    table.push(0);
    table.extend_from_slice(host.as_bytes());
    table.push(0);

    image[start..start + table.len()].copy_from_slice(&table);
}

/// Embed an endpoint at image offset 0x0E00 and point the NMI vector at it.
pub(crate) fn with_vector_endpoint(mut image: Vec<u8>, path: &str, host: &str) -> Vec<u8> {
    write_string_table(&mut image, VECTOR_TABLE_OFFSET, path, host);

    let len = image.len();
    let high = len - address::NMI_VECTOR_HIGH_FROM_END;
    image[high - 1] = 0x00;
    image[high] = 0x1E;
    image
}

/// Embed an endpoint at image offset 0.
pub(crate) fn with_fixed_endpoint(mut image: Vec<u8>, path: &str, host: &str) -> Vec<u8> {
    write_string_table(&mut image, 0, path, host);
    image
}

pub(crate) struct TestEnv {
    pub config: CartridgeConfig,
    pub identity: MemoryIdentityStore,
    transport: Arc<ScriptedTransport>,
}

impl TestEnv {
    pub(crate) fn new(config: CartridgeConfig) -> Self {
        Self {
            config,
            identity: MemoryIdentityStore::with_nickname("tester"),
            transport: Arc::new(ScriptedTransport::new()),
        }
    }

    pub(crate) fn env(&mut self) -> CartridgeEnv<'_> {
        let transport: Arc<dyn Transport> = Arc::clone(&self.transport) as Arc<dyn Transport>;
        CartridgeEnv::new(&self.config, &mut self.identity, Some(transport))
    }

    pub(crate) fn transport(&self) -> &ScriptedTransport {
        &self.transport
    }
}
