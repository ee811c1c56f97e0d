use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

/// A byte-addressed memory over the full 64-bit address space, backed by a
/// sparse map rather than a flat `Vec<u8>`: emulated programs address memory
/// that can span the whole space (stack near the top, code and heap near the
/// bottom), which a contiguous fixed-size buffer cannot represent.
#[derive(Clone, Debug)]
pub struct Memory {
    bytes: BTreeMap<u64, u8>,
    fill_byte: u8,
}

/// Configures how a freshly constructed [`Memory`] answers reads to
/// addresses that were never written.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryConfig {
    pub fill_byte: u8,
}

impl Memory {
    pub fn new(config: MemoryConfig) -> Memory {
        Memory {
            bytes: BTreeMap::new(),
            fill_byte: config.fill_byte,
        }
    }

    pub fn read_byte(&self, address: u64) -> u8 {
        *self.bytes.get(&address).unwrap_or(&self.fill_byte)
    }

    pub fn write_byte(&mut self, address: u64, value: u8) {
        self.bytes.insert(address, value);
    }

    /// Reads `size` little-endian bytes starting at `address` into a u128.
    /// `size` must be between 1 and 16: the widest concrete value the
    /// emulator's register file and memory model carry is 128 bits, even
    /// though the IR's 256-bit width is an admissible operand width (used by
    /// the SMT layer's array theory, not by concrete execution).
    pub fn read_uint(&self, address: u64, size: usize) -> u128 {
        debug_assert!(size >= 1 && size <= 16);
        let mut buf = [0u8; 16];
        for i in 0..size {
            buf[i] = self.read_byte(address + i as u64);
        }
        LittleEndian::read_u128(&buf)
    }

    /// Writes the low `size` bytes of `value` little-endian starting at
    /// `address`.
    pub fn write_uint(&mut self, address: u64, value: u128, size: usize) {
        debug_assert!(size >= 1 && size <= 16);
        let mut buf = [0u8; 16];
        LittleEndian::write_u128(&mut buf, value);
        for i in 0..size {
            self.write_byte(address + i as u64, buf[i]);
        }
    }
}
