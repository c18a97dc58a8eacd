// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// A block of identical per-channel registers laid out at a fixed stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterArray {
    pub base: u64,
    pub stride: u64,
    pub count: usize,
}

impl RegisterArray {
    pub const fn new(base: u64, stride: u64, count: usize) -> Self {
        Self {
            base,
            stride,
            count,
        }
    }

    /// Maps `offset` to `(channel, offset within the channel block)`.
    pub fn decode(&self, offset: u64) -> Option<(usize, u64)> {
        if offset < self.base || self.stride == 0 {
            return None;
        }
        let rel = offset - self.base;
        let index = (rel / self.stride) as usize;
        if index >= self.count {
            return None;
        }
        Some((index, rel % self.stride))
    }

    pub fn offset_of(&self, index: usize, reg: u64) -> u64 {
        self.base + self.stride * index as u64 + reg
    }

    pub fn end(&self) -> u64 {
        self.base + self.stride * self.count as u64
    }
}

/// Accesses ignore the two low address bits.
pub fn word_offset(offset: u64) -> u64 {
    offset & !3
}

/// Extracts `width` bits starting at `shift`.
pub fn field(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & ((1u32 << width) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_strided_block() {
        let arr = RegisterArray::new(0xA0, 0x14, 8);
        assert_eq!(arr.decode(0xA0), Some((0, 0)));
        assert_eq!(arr.decode(0xA0 + 0x14 * 3 + 8), Some((3, 8)));
        assert_eq!(arr.decode(0x9C), None);
        assert_eq!(arr.decode(arr.end()), None);
        assert_eq!(arr.offset_of(2, 0xC), 0xA0 + 0x28 + 0xC);
    }

    #[test]
    fn test_field_extraction() {
        assert_eq!(field(0x00AB_CD00, 8, 16), 0xABCD);
        assert_eq!(word_offset(0x107), 0x104);
    }
}
