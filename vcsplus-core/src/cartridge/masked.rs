use crate::address;
use crate::bridge::{BridgeRuntime, PlusBridge, PortFlavor};
use crate::cartridge::decoder::{MaskedRangeDecoder, BANK_SIZE};
use crate::cartridge::extraram::ExtraRam;
use crate::cartridge::{
    CartridgeBus, CartridgeEnv, CartridgeError, FormatKind, FormatLayout, MaskedRangeLayout,
    SuperChipMode,
};
use crate::scanner::EndpointLocation;
use serde::{Deserialize, Serialize};

/// n * 4K banks selected by touching the bank switch range, with an optional SuperChip-style RAM
/// overlay: writes go to `0..size`, reads come from `size..2 * size`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskedRangeBank {
    format: FormatKind,
    rom: Vec<u8>,
    decoder: MaskedRangeDecoder,
    extra_ram: ExtraRam,
    bridge: Option<PlusBridge>,
    #[serde(skip)]
    runtime: BridgeRuntime,
}

impl MaskedRangeBank {
    pub(crate) fn new(
        format: FormatKind,
        layout: MaskedRangeLayout,
        image: Vec<u8>,
        env: &mut CartridgeEnv<'_>,
    ) -> Result<Self, CartridgeError> {
        if image.is_empty() {
            return Err(CartridgeError::EmptyImage);
        }

        if image.len() != layout.image_size {
            return Err(CartridgeError::WrongImageSize {
                format,
                len: image.len(),
                expected: layout.image_size,
            });
        }

        let bank_count = image.len() / BANK_SIZE;
        let decoder = MaskedRangeDecoder::new(layout.bank_switch_base, bank_count);

        let super_chip = env.config.super_chip.resolve(layout.super_chip);
        let extra_ram = ExtraRam::new(layout.extra_ram_size, super_chip);

        let (base, top) = decoder.bank_switch_range();
        log::debug!(
            "{format}: {bank_count} banks switched at {base:03X}-{top:03X}, {} bytes extra RAM ({super_chip})",
            layout.extra_ram_size
        );

        let runtime = env.runtime();
        let bridge =
            env.detect_bridge(&image, EndpointLocation::VectorDerived, PortFlavor::Standard);

        Ok(Self { format, rom: image, decoder, extra_ram, bridge, runtime })
    }

    pub(crate) fn format(&self) -> FormatKind {
        self.format
    }

    #[must_use]
    pub fn current_bank(&self) -> usize {
        self.decoder.current_bank()
    }

    #[must_use]
    pub fn super_chip_mode(&self) -> SuperChipMode {
        self.extra_ram.mode()
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
        let FormatLayout::MaskedRange(layout) = self.format.layout() else {
            return Err(format!("{} is not a masked-range format", self.format));
        };

        if self.rom.len() != layout.image_size {
            return Err(format!("ROM is {} bytes, expected {}", self.rom.len(), layout.image_size));
        }

        if self.extra_ram.len() != layout.extra_ram_size {
            return Err(format!(
                "extra RAM is {} bytes, expected {}",
                self.extra_ram.len(),
                layout.extra_ram_size
            ));
        }

        let expected = MaskedRangeDecoder::new(layout.bank_switch_base, layout.image_size / BANK_SIZE);
        if self.decoder.bank_switch_range() != expected.bank_switch_range() {
            return Err("bank switch range does not match the format".into());
        }

        self.decoder.validate(self.rom.len())
    }

    fn read_ram_or_rom(&self, masked: u16) -> u8 {
        let masked = usize::from(masked);
        let ram_len = self.extra_ram.len();
        if (ram_len..2 * ram_len).contains(&masked) {
            if let Some(value) = self.extra_ram.read(masked - ram_len) {
                return value;
            }
        }

        self.rom[self.decoder.bank_offset() + masked]
    }
}

impl CartridgeBus for MaskedRangeBank {
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

        if usize::from(masked) < self.extra_ram.len() {
            self.extra_ram.write(usize::from(masked), value);
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
