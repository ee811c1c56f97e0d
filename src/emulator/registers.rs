use std::collections::HashMap;

use crate::alias::AliasMap;
use crate::ir::{RegisterName, Width};

/// A flat register bank keyed on base register names, with sub-register
/// reads and writes mediated by an [`AliasMap`] so that writing `al` leaves
/// the rest of `eax` untouched — the same masked-write discipline the
/// teacher's `CompositeMemory` fragments use for overlapping address ranges,
/// applied here to overlapping bit ranges within one base register.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    values: HashMap<RegisterName, u128>,
    aliases: AliasMap,
}

impl RegisterFile {
    pub fn new(aliases: AliasMap) -> RegisterFile {
        RegisterFile {
            values: HashMap::new(),
            aliases,
        }
    }

    fn mask(width: Width) -> u128 {
        if width.bits() >= 128 {
            u128::MAX
        } else {
            (1u128 << width.bits()) - 1
        }
    }

    /// Reads `name` as a `width`-bit value, resolving sub-register aliasing.
    pub fn read(&self, name: &str, width: Width) -> u128 {
        let (base, offset, slice_width) = self.aliases.resolve(name, width);
        let base_value = *self.values.get(base).unwrap_or(&0);
        (base_value >> offset) & Self::mask(slice_width)
    }

    /// Writes `value` (truncated to `width` bits) into `name`, preserving
    /// every bit of the backing base register outside of `name`'s slice.
    pub fn write(&mut self, name: &str, value: u128, width: Width) {
        let (base, offset, slice_width) = self.aliases.resolve(name, width);
        let slice_mask = Self::mask(slice_width) << offset;
        let base_value = *self.values.get(base).unwrap_or(&0);
        let cleared = base_value & !slice_mask;
        let inserted = (value & Self::mask(slice_width)) << offset;
        self.values.insert(base.to_string(), cleared | inserted);
    }
}
