//! SSA name bookkeeping for the translator.
//!
//! Every architectural register gets its own version counter, starting at
//! `0`, bumped each time an IR instruction writes it; memory gets a single
//! shared counter, since every `STM` replaces the whole array.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct SsaNames {
    versions: HashMap<String, u32>,
    mem_version: u32,
}

impl SsaNames {
    pub fn new() -> SsaNames {
        SsaNames::default()
    }

    /// The name this register had before any instruction touched it.
    pub fn get_init(&self, name: &str) -> String {
        format!("{}_0", name)
    }

    /// The name currently in scope for `name`, without bumping its version.
    pub fn get_curr(&self, name: &str) -> String {
        let version = self.versions.get(name).copied().unwrap_or(0);
        format!("{}_{}", name, version)
    }

    /// Bumps `name`'s version and returns the freshly minted SSA name.
    pub fn get_next(&mut self, name: &str) -> String {
        let version = self.versions.entry(name.to_string()).or_insert(0);
        *version += 1;
        format!("{}_{}", name, version)
    }

    pub fn mem_init(&self) -> String {
        "MEM_0".to_string()
    }

    pub fn mem_curr(&self) -> String {
        format!("MEM_{}", self.mem_version)
    }

    pub fn mem_next(&mut self) -> String {
        self.mem_version += 1;
        format!("MEM_{}", self.mem_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_bumps_from_zero_to_one() {
        let mut names = SsaNames::new();
        assert_eq!(names.get_curr("eax"), "eax_0");
        assert_eq!(names.get_next("eax"), "eax_1");
        assert_eq!(names.get_curr("eax"), "eax_1");
    }

    #[test]
    fn registers_are_independently_versioned() {
        let mut names = SsaNames::new();
        names.get_next("eax");
        assert_eq!(names.get_curr("ebx"), "ebx_0");
    }

    #[test]
    fn memory_version_starts_at_zero_and_bumps_on_store() {
        let mut names = SsaNames::new();
        assert_eq!(names.mem_curr(), "MEM_0");
        assert_eq!(names.mem_next(), "MEM_1");
        assert_eq!(names.mem_curr(), "MEM_1");
    }
}
