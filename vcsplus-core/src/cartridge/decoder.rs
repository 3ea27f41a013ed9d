use crate::address;
use serde::{Deserialize, Serialize};

pub const BANK_SIZE: usize = 4096;

/// Bank selection by access to a contiguous range of masked addresses: touching
/// `base + n` selects bank `n`, regardless of whether the access is a read or a write and of the
/// value written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedRangeDecoder {
    bank_offset: usize,
    base: u16,
    top: u16,
}

impl MaskedRangeDecoder {
    pub(crate) fn new(base: u16, bank_count: usize) -> Self {
        let top = base + bank_count.saturating_sub(1) as u16;
        Self { bank_offset: 0, base, top }
    }

    /// Mask `address` into the cartridge window, switching banks if it falls in the bank switch
    /// range.
    pub(crate) fn decode(&mut self, address: u16) -> u16 {
        let masked = address::mask(address);
        if (self.base..=self.top).contains(&masked) {
            let bank = usize::from(masked - self.base);
            let bank_offset = bank * BANK_SIZE;
            if bank_offset != self.bank_offset {
                log::trace!("Switching to bank {bank} via access to {masked:03X}");
            }
            self.bank_offset = bank_offset;
        }
        masked
    }

    #[must_use]
    pub fn bank_offset(&self) -> usize {
        self.bank_offset
    }

    #[must_use]
    pub fn current_bank(&self) -> usize {
        self.bank_offset / BANK_SIZE
    }

    #[must_use]
    pub fn bank_switch_range(&self) -> (u16, u16) {
        (self.base, self.top)
    }

    pub(crate) fn validate(&self, image_len: usize) -> Result<(), String> {
        if self.top < self.base || self.top > address::ADDRESS_MASK {
            return Err(format!(
                "bank switch range {:03X}-{:03X} is invalid",
                self.base, self.top
            ));
        }

        let bank_count = usize::from(self.top - self.base) + 1;
        if bank_count * BANK_SIZE > image_len {
            return Err(format!(
                "{bank_count} banks do not fit in a {image_len}-byte image"
            ));
        }

        if self.bank_offset % BANK_SIZE != 0 || self.bank_offset + BANK_SIZE > image_len {
            return Err(format!("bank offset {} is out of range", self.bank_offset));
        }

        Ok(())
    }
}
