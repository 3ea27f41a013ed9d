use serde::{Deserialize, Serialize};
use vcsplus_proc_macros::NamedVariants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, NamedVariants)]
pub enum SuperChipMode {
    Off,
    On,
    /// Off until the first write into the RAM write window, then permanently On
    #[name = "Auto"]
    AutoDetect,
}

/// Small RAM overlay shadowing part of the cartridge window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraRam {
    mode: SuperChipMode,
    data: Vec<u8>,
}

impl ExtraRam {
    pub(crate) fn new(len: usize, mode: SuperChipMode) -> Self {
        Self { mode, data: vec![0; len] }
    }

    #[must_use]
    pub fn mode(&self) -> SuperChipMode {
        self.mode
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mode == SuperChipMode::On
    }

    /// Read through the overlay; `None` while the overlay is not active or when `offset` is out
    /// of range.
    pub(crate) fn read(&self, offset: usize) -> Option<u8> {
        if !self.is_active() {
            return None;
        }
        self.data.get(offset).copied()
    }

    /// Write through the overlay. In auto-detect mode the first write switches the overlay on for
    /// good. Returns whether the value was stored.
    pub(crate) fn write(&mut self, offset: usize, value: u8) -> bool {
        match self.mode {
            SuperChipMode::Off => return false,
            SuperChipMode::AutoDetect => {
                log::debug!("SuperChip RAM detected by write to offset {offset:02X}");
                self.mode = SuperChipMode::On;
            }
            SuperChipMode::On => {}
        }

        self.write_raw(offset, value)
    }

    /// Read regardless of mode. Offsets past the end of the buffer read as 0.
    pub(crate) fn read_raw(&self, offset: usize) -> u8 {
        self.data.get(offset).copied().unwrap_or(0)
    }

    /// Write regardless of mode. Offsets past the end of the buffer are dropped.
    pub(crate) fn write_raw(&mut self, offset: usize, value: u8) -> bool {
        match self.data.get_mut(offset) {
            Some(byte) => {
                *byte = value;
                true
            }
            None => false,
        }
    }
}
