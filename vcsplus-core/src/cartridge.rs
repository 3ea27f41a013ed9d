mod combined;
mod decoder;
mod extraram;
mod fixed;
mod format;
mod masked;
mod monitored;

use crate::bridge::{BridgeRuntime, IdentityProvider, PlusBridge, PortFlavor, Transport};
use crate::config::CartridgeConfig;
use crate::scanner::EndpointLocation;
use crate::serialize::{self, SaveStateError};
use std::fmt::Formatter;
use std::sync::Arc;
use thiserror::Error;

pub use combined::CombinedBankBridge;
pub use decoder::{MaskedRangeDecoder, BANK_SIZE};
pub use extraram::{ExtraRam, SuperChipMode};
pub use fixed::FixedMirror;
pub use format::{FormatKind, FormatLayout, MaskedRangeLayout};
pub use masked::MaskedRangeBank;
pub use monitored::WriteMonitoredBank;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("cartridge image is empty")]
    EmptyImage,
    #[error("{format} image of {len} bytes exceeds the maximum of {max} bytes")]
    ImageTooLarge { format: FormatKind, len: usize, max: usize },
    #[error("{format} image of {len} bytes is smaller than the minimum of {min} bytes")]
    ImageTooSmall { format: FormatKind, len: usize, min: usize },
    #[error("{format} image of {len} bytes is not a multiple of the {bank_size}-byte bank size")]
    InvalidImageSize { format: FormatKind, len: usize, bank_size: usize },
    #[error("{format} image must be exactly {expected} bytes, was {len}")]
    WrongImageSize { format: FormatKind, len: usize, expected: usize },
}

/// Bus-facing interface shared by every format. Addresses are full 16-bit bus addresses; each
/// format masks them into its own 4K window.
pub trait CartridgeBus {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);

    /// Called by the bus driver for every write anywhere on the bus, before the write itself is
    /// dispatched. Only formats that bank switch on monitored writes do anything here.
    fn monitor_bus_before_write(&mut self, _address: u16, _value: u8) {}

    /// Side-effect-free read: no bank switching and no receive buffer consumption.
    fn peek(&self, address: u16) -> u8;
}

/// Everything a cartridge needs from its host at construction time.
pub struct CartridgeEnv<'a> {
    pub config: &'a CartridgeConfig,
    pub identity: &'a mut dyn IdentityProvider,
    pub transport: Option<Arc<dyn Transport>>,
}

impl<'a> CartridgeEnv<'a> {
    pub fn new(
        config: &'a CartridgeConfig,
        identity: &'a mut dyn IdentityProvider,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        Self { config, identity, transport }
    }

    #[must_use]
    pub fn runtime(&self) -> BridgeRuntime {
        BridgeRuntime::new(self.transport.clone(), self.config.bridge.timeout())
    }

    fn detect_bridge(
        &mut self,
        image: &[u8],
        location: EndpointLocation,
        flavor: PortFlavor,
    ) -> Option<PlusBridge> {
        let runtime = self.runtime();
        PlusBridge::detect(
            image,
            location,
            flavor,
            &self.config.bridge,
            &mut *self.identity,
            runtime,
        )
    }
}

impl std::fmt::Debug for CartridgeEnv<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartridgeEnv")
            .field("config", self.config)
            .field("transport", &self.transport.as_ref().map(|_| "<transport>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Cartridge {
    FixedMirror(FixedMirror),
    MaskedRangeBank(MaskedRangeBank),
    WriteMonitoredBank(WriteMonitoredBank),
    CombinedBankBridge(CombinedBankBridge),
}

macro_rules! for_each_variant {
    ($cartridge:expr, $inner:ident => $body:expr) => {
        match $cartridge {
            Cartridge::FixedMirror($inner) => $body,
            Cartridge::MaskedRangeBank($inner) => $body,
            Cartridge::WriteMonitoredBank($inner) => $body,
            Cartridge::CombinedBankBridge($inner) => $body,
        }
    };
}

impl Cartridge {
    /// Build a cartridge of the given format from a ROM image. Endpoint discovery runs here; the
    /// identity provider is only consulted if an endpoint is found.
    ///
    /// # Errors
    ///
    /// Returns an error if the image size is not valid for the format.
    pub fn new(
        format: FormatKind,
        image: Vec<u8>,
        env: &mut CartridgeEnv<'_>,
    ) -> Result<Self, CartridgeError> {
        log::info!("Creating {format} cartridge from {}-byte image", image.len());

        let cartridge = match format.layout() {
            FormatLayout::FixedMirror => Self::FixedMirror(FixedMirror::new(&image, env)?),
            FormatLayout::MaskedRange(layout) => {
                Self::MaskedRangeBank(MaskedRangeBank::new(format, layout, image, env)?)
            }
            FormatLayout::WriteMonitored => {
                Self::WriteMonitoredBank(WriteMonitoredBank::new(image, env)?)
            }
            FormatLayout::CombinedBankBridge => {
                Self::CombinedBankBridge(CombinedBankBridge::new(image, env)?)
            }
        };

        Ok(cartridge)
    }

    #[must_use]
    pub fn format(&self) -> FormatKind {
        match self {
            Self::FixedMirror(_) => FormatKind::Fixed4K,
            Self::MaskedRangeBank(cartridge) => cartridge.format(),
            Self::WriteMonitoredBank(_) => FormatKind::Tigervision3E,
            Self::CombinedBankBridge(_) => FormatKind::PlusRom,
        }
    }

    /// Size of the stored ROM. For 4K images this is the mirrored window size.
    #[must_use]
    pub fn rom_len(&self) -> usize {
        match self {
            Self::FixedMirror(_) => crate::address::CARTRIDGE_WINDOW_SIZE,
            Self::MaskedRangeBank(cartridge) => cartridge.rom_len(),
            Self::WriteMonitoredBank(cartridge) => cartridge.rom_len(),
            Self::CombinedBankBridge(cartridge) => cartridge.rom_len(),
        }
    }

    /// Bank currently mapped into the switchable part of the window.
    #[must_use]
    pub fn current_bank(&self) -> usize {
        match self {
            Self::FixedMirror(_) => 0,
            Self::MaskedRangeBank(cartridge) => cartridge.current_bank(),
            Self::WriteMonitoredBank(cartridge) => cartridge.current_bank(),
            Self::CombinedBankBridge(cartridge) => cartridge.current_bank(),
        }
    }

    #[must_use]
    pub fn bridge(&self) -> Option<&PlusBridge> {
        for_each_variant!(self, cartridge => cartridge.bridge())
    }

    pub(crate) fn bridge_mut(&mut self) -> Option<&mut PlusBridge> {
        for_each_variant!(self, cartridge => cartridge.bridge_mut())
    }

    /// Apply any bridge responses that have arrived and abandon timed-out requests.
    ///
    /// Bus drivers must call this once per frame. Port reads also poll, but a program that stops
    /// reading the receive ports would otherwise let completed responses and pending requests
    /// accumulate without bound.
    pub fn poll_bridge(&mut self) {
        if let Some(bridge) = self.bridge_mut() {
            bridge.poll();
        }
    }

    /// Transport and timeout supplied by the host at construction, kept whether or not an
    /// endpoint was found.
    pub(crate) fn bridge_runtime(&self) -> BridgeRuntime {
        for_each_variant!(self, cartridge => cartridge.runtime().clone())
    }

    pub(crate) fn attach_runtime(&mut self, runtime: BridgeRuntime) {
        for_each_variant!(self, cartridge => cartridge.attach(runtime));
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for_each_variant!(self, cartridge => cartridge.validate())
    }

    /// Serialize the complete cartridge state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        serialize::encode(self)
    }

    /// Reconstruct a cartridge from a save state without re-scanning any image. The bridge, if
    /// any, is attached to `runtime`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be decoded, names an unknown format, or is internally
    /// inconsistent.
    pub fn from_save_state(bytes: &[u8], runtime: BridgeRuntime) -> Result<Self, SaveStateError> {
        serialize::decode(bytes, runtime)
    }

    /// Replace this cartridge with the one described by `bytes`, keeping the host transport and
    /// timeout this cartridge was built with. On error this cartridge is left unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`Cartridge::from_save_state`].
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let restored = serialize::decode(bytes, self.bridge_runtime())?;
        log::debug!("Replacing {} cartridge with restored {}", self.format(), restored.format());
        *self = restored;
        Ok(())
    }
}

impl CartridgeBus for Cartridge {
    fn read(&mut self, address: u16) -> u8 {
        for_each_variant!(self, cartridge => cartridge.read(address))
    }

    fn write(&mut self, address: u16, value: u8) {
        for_each_variant!(self, cartridge => cartridge.write(address, value));
    }

    fn monitor_bus_before_write(&mut self, address: u16, value: u8) {
        for_each_variant!(self, cartridge => cartridge.monitor_bus_before_write(address, value));
    }

    fn peek(&self, address: u16) -> u8 {
        for_each_variant!(self, cartridge => cartridge.peek(address))
    }
}
