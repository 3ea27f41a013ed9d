use crate::address;
use crate::bridge::{BridgeRuntime, PlusBridge, PortFlavor};
use crate::cartridge::extraram::ExtraRam;
use crate::cartridge::{CartridgeBus, CartridgeEnv, CartridgeError, FormatKind, SuperChipMode};
use crate::scanner::EndpointLocation;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const SLICE_SIZE: usize = 2048;
pub const EXTRA_RAM_BANK_SIZE: usize = 1024;
pub const MIN_IMAGE_SIZE: usize = 8 * 1024;
pub const MAX_IMAGE_SIZE: usize = 512 * 1024;

const FIXED_SLICE_START: u16 = 0x0800;
const RAM_READ_END: u16 = 0x0400;
const RAM_WRITE_WINDOW: RangeInclusive<u16> = 0x0400..=0x07FF;

/// Tigervision-style banking: the low 2K slice is selected by writes to monitored bus addresses
/// outside the cartridge window, the high 2K slice is fixed to the end of the image. Selecting a
/// RAM bank overlays the low slice with 1K of RAM (read at 0x000-0x3FF, written at 0x400-0x7FF)
/// until the next ROM bank selection.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteMonitoredBank {
    rom: Vec<u8>,
    bank_offset: usize,
    selectable_max_bank: usize,
    fixed_slice_offset: usize,
    ram_bank_offset: Option<usize>,
    extra_ram: ExtraRam,
    bridge: Option<PlusBridge>,
    #[serde(skip)]
    runtime: BridgeRuntime,
}

impl WriteMonitoredBank {
    pub(crate) fn new(image: Vec<u8>, env: &mut CartridgeEnv<'_>) -> Result<Self, CartridgeError> {
        const FORMAT: FormatKind = FormatKind::Tigervision3E;

        if image.is_empty() {
            return Err(CartridgeError::EmptyImage);
        }

        let len = image.len();
        if len < MIN_IMAGE_SIZE {
            return Err(CartridgeError::ImageTooSmall { format: FORMAT, len, min: MIN_IMAGE_SIZE });
        }
        if len > MAX_IMAGE_SIZE {
            return Err(CartridgeError::ImageTooLarge { format: FORMAT, len, max: MAX_IMAGE_SIZE });
        }
        if len % SLICE_SIZE != 0 {
            return Err(CartridgeError::InvalidImageSize {
                format: FORMAT,
                len,
                bank_size: SLICE_SIZE,
            });
        }

        let selectable_max_bank = selectable_max_bank(len);
        let fixed_slice_offset = fixed_slice_offset(len);

        log::debug!(
            "3E: {} slices, selectable 0-{selectable_max_bank}, fixed slice at {fixed_slice_offset:06X}",
            len / SLICE_SIZE
        );

        let runtime = env.runtime();
        let bridge =
            env.detect_bridge(&image, EndpointLocation::VectorDerived, PortFlavor::Standard);

        Ok(Self {
            rom: image,
            bank_offset: 0,
            selectable_max_bank,
            fixed_slice_offset,
            ram_bank_offset: None,
            extra_ram: ExtraRam::new(EXTRA_RAM_BANK_SIZE, SuperChipMode::On),
            bridge,
            runtime,
        })
    }

    #[must_use]
    pub fn current_bank(&self) -> usize {
        self.bank_offset / SLICE_SIZE
    }

    #[must_use]
    pub fn selectable_max_bank(&self) -> usize {
        self.selectable_max_bank
    }

    /// Selected RAM bank, if RAM currently overlays the low slice.
    #[must_use]
    pub fn current_ram_bank(&self) -> Option<usize> {
        self.ram_bank_offset.map(|offset| offset / EXTRA_RAM_BANK_SIZE)
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
        if !(MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&len) || len % SLICE_SIZE != 0 {
            return Err(format!("ROM of {len} bytes is not a valid 3E image"));
        }

        if self.selectable_max_bank != selectable_max_bank(len) {
            return Err(format!("selectable max bank {} is wrong", self.selectable_max_bank));
        }

        if self.fixed_slice_offset != fixed_slice_offset(len) {
            return Err(format!("fixed slice offset {} is wrong", self.fixed_slice_offset));
        }

        if self.bank_offset % SLICE_SIZE != 0
            || self.bank_offset > self.selectable_max_bank * SLICE_SIZE
        {
            return Err(format!("bank offset {} is out of range", self.bank_offset));
        }

        if self.extra_ram.len() != EXTRA_RAM_BANK_SIZE {
            return Err(format!("extra RAM is {} bytes", self.extra_ram.len()));
        }

        Ok(())
    }

    fn read_banked(&self, masked: u16) -> u8 {
        if masked >= FIXED_SLICE_START {
            return self.rom[self.fixed_slice_offset + usize::from(masked)];
        }

        match self.ram_bank_offset {
            Some(ram_offset) if masked < RAM_READ_END => {
                self.extra_ram.read_raw(ram_offset + usize::from(masked))
            }
            _ => self.rom[self.bank_offset + usize::from(masked)],
        }
    }
}

fn selectable_max_bank(len: usize) -> usize {
    (len - SLICE_SIZE) / SLICE_SIZE - 1
}

// Offset such that masked addresses 0x800-0xFFF land on the last 2K of the image
fn fixed_slice_offset(len: usize) -> usize {
    len - 2 * SLICE_SIZE
}

impl CartridgeBus for WriteMonitoredBank {
    fn read(&mut self, address: u16) -> u8 {
        let masked = address::mask(address);
        if let Some(value) = self.bridge.as_mut().and_then(|bridge| bridge.read(masked)) {
            return value;
        }
        self.read_banked(masked)
    }

    fn write(&mut self, address: u16, value: u8) {
        let masked = address::mask(address);
        if let Some(bridge) = &mut self.bridge {
            if bridge.write(masked, value) {
                return;
            }
        }

        let Some(ram_offset) = self.ram_bank_offset else { return };
        if RAM_WRITE_WINDOW.contains(&masked) {
            let offset = ram_offset + usize::from(masked - RAM_WRITE_WINDOW.start());
            if !self.extra_ram.write_raw(offset, value) {
                log::trace!("Dropping write to unallocated extra RAM offset {offset:05X}");
            }
        }
    }

    fn monitor_bus_before_write(&mut self, address: u16, value: u8) {
        match address {
            address::MONITORED_ROM_BANK_SELECT => {
                let bank = usize::from(value);
                if bank <= self.selectable_max_bank {
                    log::trace!("Selecting ROM slice {bank}");
                    self.bank_offset = bank * SLICE_SIZE;
                    self.ram_bank_offset = None;
                } else {
                    log::trace!(
                        "Ignoring ROM slice {bank}, highest selectable is {}",
                        self.selectable_max_bank
                    );
                }
            }
            address::MONITORED_RAM_BANK_SELECT => {
                let bank = usize::from(value);
                log::trace!("Selecting RAM bank {bank}");
                self.ram_bank_offset = Some(bank * EXTRA_RAM_BANK_SIZE);
            }
            _ => {}
        }
    }

    fn peek(&self, address: u16) -> u8 {
        let masked = address::mask(address);
        self.bridge
            .as_ref()
            .and_then(|bridge| bridge.peek(masked))
            .unwrap_or_else(|| self.read_banked(masked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartridgeConfig;
    use crate::testutil::{banked_image, image_byte, TestEnv};

    fn cartridge(banks: usize) -> WriteMonitoredBank {
        let mut env = TestEnv::new(CartridgeConfig::default());
        WriteMonitoredBank::new(banked_image(banks, SLICE_SIZE), &mut env.env()).unwrap()
    }

    #[test]
    fn selects_bank_and_ignores_out_of_range() {
        let mut cartridge = cartridge(8);
        assert_eq!(6, cartridge.selectable_max_bank());

        cartridge.monitor_bus_before_write(0x003F, 3);
        let selected: Vec<_> = (0x1000..0x1800).map(|address| cartridge.read(address)).collect();
        let expected: Vec<_> = (0..0x800).map(|offset| image_byte(3, offset)).collect();
        assert_eq!(expected, selected);

        cartridge.monitor_bus_before_write(0x003F, 99);
        let after: Vec<_> = (0x1000..0x1800).map(|address| cartridge.read(address)).collect();
        assert_eq!(selected, after);

        // One past the highest selectable slice is also ignored
        cartridge.monitor_bus_before_write(0x003F, 7);
        assert_eq!(3, cartridge.current_bank());
    }

    #[test]
    fn high_slice_is_fixed_to_last_bank() {
        let mut cartridge = cartridge(8);

        for bank in [0, 2, 5] {
            cartridge.monitor_bus_before_write(0x003F, bank);
            assert_eq!(image_byte(7, 0x000), cartridge.read(0x1800));
            assert_eq!(image_byte(7, 0x7FC), cartridge.read(0x1FFC));
        }
    }

    #[test]
    fn writes_inside_cartridge_window_do_not_switch() {
        let mut cartridge = cartridge(8);

        // Only monitored writes switch, and only at their exact unmasked address
        cartridge.write(0x103F, 3);
        cartridge.monitor_bus_before_write(0x103F, 3);
        assert_eq!(0, cartridge.current_bank());
    }

    #[test]
    fn ram_bank_overlays_low_slice() {
        let mut cartridge = cartridge(8);
        cartridge.monitor_bus_before_write(0x003F, 2);

        // No RAM selected: writes are dropped
        cartridge.write(0x1400, 0x11);
        assert_eq!(image_byte(2, 0x000), cartridge.read(0x1000));

        cartridge.monitor_bus_before_write(0x003E, 0);
        assert_eq!(Some(0), cartridge.current_ram_bank());

        cartridge.write(0x1400, 0x11);
        cartridge.write(0x17FF, 0x22);
        assert_eq!(0x11, cartridge.read(0x1000));
        assert_eq!(0x22, cartridge.read(0x13FF));
        // 0x400-0x7FF still reads the selected ROM slice
        assert_eq!(image_byte(2, 0x400), cartridge.read(0x1400));

        // Selecting a ROM slice deselects RAM
        cartridge.monitor_bus_before_write(0x003F, 1);
        assert_eq!(None, cartridge.current_ram_bank());
        assert_eq!(image_byte(1, 0x000), cartridge.read(0x1000));
    }

    #[test]
    fn unallocated_ram_banks_fail_safe() {
        let mut cartridge = cartridge(8);
        cartridge.monitor_bus_before_write(0x003E, 200);

        cartridge.write(0x1400, 0x33);
        assert_eq!(0, cartridge.read(0x1000));
        assert_eq!(0, cartridge.peek(0x13FF));
    }

    #[test]
    fn image_size_limits() {
        let mut env = TestEnv::new(CartridgeConfig::default());
        assert!(matches!(
            WriteMonitoredBank::new(vec![0; 4096], &mut env.env()),
            Err(CartridgeError::ImageTooSmall { .. })
        ));
        assert!(matches!(
            WriteMonitoredBank::new(vec![0; 9000], &mut env.env()),
            Err(CartridgeError::InvalidImageSize { bank_size: 2048, .. })
        ));
        assert!(matches!(
            WriteMonitoredBank::new(vec![0; MAX_IMAGE_SIZE + SLICE_SIZE], &mut env.env()),
            Err(CartridgeError::ImageTooLarge { .. })
        ));

        let cartridge = WriteMonitoredBank::new(vec![0; MAX_IMAGE_SIZE], &mut env.env()).unwrap();
        assert_eq!(254, cartridge.selectable_max_bank());
    }
}
