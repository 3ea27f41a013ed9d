use crate::address;
use crate::bridge::{BridgeRuntime, PlusBridge, PortFlavor};
use crate::cartridge::decoder::{MaskedRangeDecoder, BANK_SIZE};
use crate::cartridge::extraram::ExtraRam;
use crate::cartridge::{CartridgeBus, CartridgeEnv, CartridgeError, FormatKind, SuperChipMode};
use crate::scanner::EndpointLocation;
use serde::{Deserialize, Serialize};

pub const BANK_SWITCH_BASE: u16 = 0x0FF4;
pub const MAX_IMAGE_SIZE: usize = 8 * BANK_SIZE;
pub const EXTRA_RAM_SIZE: usize = 128;

/// The PLS layout: masked-range banking from 0xFF4 combined with a bridge whose endpoint is stored
/// at the start of the image. Full 32K images also carry 128 bytes of always-on extra RAM.
#[derive(Debug, Serialize, Deserialize)]
pub struct CombinedBankBridge {
    rom: Vec<u8>,
    decoder: MaskedRangeDecoder,
    extra_ram: Option<ExtraRam>,
    bridge: Option<PlusBridge>,
    #[serde(skip)]
    runtime: BridgeRuntime,
}

impl CombinedBankBridge {
    pub(crate) fn new(image: Vec<u8>, env: &mut CartridgeEnv<'_>) -> Result<Self, CartridgeError> {
        const FORMAT: FormatKind = FormatKind::PlusRom;

        if image.is_empty() {
            return Err(CartridgeError::EmptyImage);
        }

        let len = image.len();
        if len > MAX_IMAGE_SIZE {
            return Err(CartridgeError::ImageTooLarge { format: FORMAT, len, max: MAX_IMAGE_SIZE });
        }
        if len % BANK_SIZE != 0 {
            return Err(CartridgeError::InvalidImageSize { format: FORMAT, len, bank_size: BANK_SIZE });
        }

        let decoder = MaskedRangeDecoder::new(BANK_SWITCH_BASE, len / BANK_SIZE);
        let extra_ram =
            (len == MAX_IMAGE_SIZE).then(|| ExtraRam::new(EXTRA_RAM_SIZE, SuperChipMode::On));

        log::debug!(
            "PLS: {} banks, extra RAM {}",
            len / BANK_SIZE,
            if extra_ram.is_some() { "present" } else { "absent" }
        );

        let runtime = env.runtime();
        let bridge = env.detect_bridge(&image, EndpointLocation::FixedOffset, PortFlavor::Legacy);
        if bridge.is_none() {
            log::warn!("PLS image has no valid endpoint at offset 0, online functions disabled");
        }

        Ok(Self { rom: image, decoder, extra_ram, bridge, runtime })
    }

    #[must_use]
    pub fn current_bank(&self) -> usize {
        self.decoder.current_bank()
    }

    #[must_use]
    pub fn has_extra_ram(&self) -> bool {
        self.extra_ram.is_some()
    }

    pub(crate) fn bridge(&self) -> Option<&PlusBridge> {
        self.bridge.as_ref()
    }

    pub(crate) fn bridge_mut(&mut self) -> Option<&mut PlusBridge> {
        self.bridge.as_mut()
    }

    pub(crate) fn runtime(&self) -> &BridgeRuntime {
        &self.runtime
    }

    pub(crate) fn attach(&mut self, runtime: BridgeRuntime) {
        if let Some(bridge) = &mut self.bridge {
            bridge.attach(runtime.clone());
        }
        self.runtime = runtime;
    }

    pub(crate) fn rom_len(&self) -> usize {
        self.rom.len()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let len = self.rom.len();
        if len == 0 || len > MAX_IMAGE_SIZE || len % BANK_SIZE != 0 {
            return Err(format!("ROM of {len} bytes is not a valid PLS image"));
        }

        let expected = MaskedRangeDecoder::new(BANK_SWITCH_BASE, len / BANK_SIZE);
        if self.decoder.bank_switch_range() != expected.bank_switch_range() {
            return Err("bank switch range does not match the image size".into());
        }

        match &self.extra_ram {
            Some(ram) if len != MAX_IMAGE_SIZE || ram.len() != EXTRA_RAM_SIZE => {
                return Err(format!("unexpected {}-byte extra RAM", ram.len()));
            }
            None if len == MAX_IMAGE_SIZE => {
                return Err("32K image is missing its extra RAM".into());
            }
            _ => {}
        }

        self.decoder.validate(len)
    }

    fn read_ram_or_rom(&self, masked: u16) -> u8 {
        let masked = usize::from(masked);
        if let Some(ram) = &self.extra_ram {
            if (EXTRA_RAM_SIZE..2 * EXTRA_RAM_SIZE).contains(&masked) {
                return ram.read_raw(masked - EXTRA_RAM_SIZE);
            }
        }

        self.rom[self.decoder.bank_offset() + masked]
    }
}

impl CartridgeBus for CombinedBankBridge {
    fn read(&mut self, address: u16) -> u8 {
        let masked = self.decoder.decode(address);
        if let Some(value) = self.bridge.as_mut().and_then(|bridge| bridge.read(masked)) {
            return value;
        }
        self.read_ram_or_rom(masked)
    }

    fn write(&mut self, address: u16, value: u8) {
        let masked = self.decoder.decode(address);
        if let Some(bridge) = &mut self.bridge {
            if bridge.write(masked, value) {
                return;
            }
        }

        if let Some(ram) = &mut self.extra_ram {
            if usize::from(masked) < EXTRA_RAM_SIZE {
                ram.write(usize::from(masked), value);
            }
        }
    }

    fn peek(&self, address: u16) -> u8 {
        let masked = address::mask(address);
        self.bridge
            .as_ref()
            .and_then(|bridge| bridge.peek(masked))
            .unwrap_or_else(|| self.read_ram_or_rom(masked))
    }
}
