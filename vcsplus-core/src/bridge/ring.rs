use crate::serialize;
use serde::{Deserialize, Serialize};

pub const RING_BUFFER_LEN: usize = 256;

/// Fixed 256-byte port buffer with independently wrapping read and write cursors.
///
/// There is no full flag: writing more than 256 bytes without reading silently overwrites the
/// oldest data, same as the hardware buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBuffer {
    #[serde(
        serialize_with = "serialize::serialize_array",
        deserialize_with = "serialize::deserialize_array"
    )]
    data: [u8; RING_BUFFER_LEN],
    write_cursor: u8,
    read_cursor: u8,
}

impl RingBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: [0; RING_BUFFER_LEN],
            write_cursor: 0,
            read_cursor: 0,
        }
    }

    #[must_use]
    pub fn write_cursor(&self) -> u8 {
        self.write_cursor
    }

    #[must_use]
    pub fn read_cursor(&self) -> u8 {
        self.read_cursor
    }

    pub(crate) fn push(&mut self, value: u8) {
        self.data[usize::from(self.write_cursor)] = value;
        self.write_cursor = self.write_cursor.wrapping_add(1);
    }

    pub(crate) fn extend(&mut self, values: &[u8]) {
        for &value in values {
            self.push(value);
        }
    }

    /// Store `value` at the write cursor and take every byte from the start of the buffer up to
    /// and including it, then rewind the write cursor to 0. When the cursor was at 255 this yields
    /// the whole 256-byte buffer.
    pub(crate) fn push_and_drain(&mut self, value: u8) -> Vec<u8> {
        let len = usize::from(self.write_cursor) + 1;
        self.data[len - 1] = value;
        self.write_cursor = 0;

        self.data[..len].to_vec()
    }

    /// The byte at the read cursor, without consuming it.
    #[must_use]
    pub fn front(&self) -> u8 {
        self.data[usize::from(self.read_cursor)]
    }

    /// Return the byte at the read cursor and advance the cursor unless it has caught up with
    /// the write cursor, in which case the same stale byte is returned again.
    pub(crate) fn pop(&mut self) -> u8 {
        let value = self.front();
        if self.read_cursor != self.write_cursor {
            self.read_cursor = self.read_cursor.wrapping_add(1);
        }
        value
    }

    /// Like `pop`, but only advances while the read cursor is numerically behind the write
    /// cursor. Once the write cursor wraps past 255 nothing more can be read until the read
    /// cursor is reset.
    pub(crate) fn pop_while_behind(&mut self) -> u8 {
        let value = self.front();
        if self.read_cursor < self.write_cursor {
            self.read_cursor = self.read_cursor.wrapping_add(1);
        }
        value
    }

    /// Number of readable bytes as reported by the length port.
    ///
    /// When the write cursor has wrapped behind the read cursor the count is corrected by 255,
    /// not 256, so a wrapped buffer reports one byte less than it holds.
    #[must_use]
    pub fn available(&self) -> u8 {
        let write = i32::from(self.write_cursor);
        let read = i32::from(self.read_cursor);
        if read > write {
            (write - read + 255) as u8
        } else {
            (write - read) as u8
        }
    }

    /// Length port without the wraparound correction: the raw cursor difference truncated to a
    /// byte.
    #[must_use]
    pub fn available_uncorrected(&self) -> u8 {
        self.write_cursor.wrapping_sub(self.read_cursor)
    }

    #[cfg(test)]
    pub(crate) fn with_cursors(read_cursor: u8, write_cursor: u8) -> Self {
        Self { data: [0; RING_BUFFER_LEN], write_cursor, read_cursor }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
