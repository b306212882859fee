// samples.rs — Sample name registry
//
// Resolves mini-notation sample tokens (`bd`, `sd:2`) to the numeric IDs of
// the VM's sample bank. ID 0 is reserved for "no sample".

use std::collections::BTreeMap;

/// Sample name to sample-bank ID.
#[derive(Debug, Clone, Default)]
pub struct SampleRegistry {
    name_to_id: BTreeMap<String, u32>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the standard drum kit.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register_defaults();
        reg
    }

    /// Register `name` as `id`. Returns false if the name is already taken.
    pub fn register(&mut self, name: &str, id: u32) -> bool {
        if self.name_to_id.contains_key(name) {
            return false;
        }
        self.name_to_id.insert(name.to_string(), id);
        true
    }

    /// ID for `name`, or 0 when unknown.
    pub fn id(&self, name: &str) -> u32 {
        self.name_to_id.get(name).copied().unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.name_to_id.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.name_to_id.clear();
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub fn register_defaults(&mut self) {
        const KIT: &[(&str, u32)] = &[
            ("bd", 1),
            ("kick", 1),
            ("sd", 2),
            ("snare", 2),
            ("hh", 3),
            ("hihat", 3),
            ("oh", 4),
            ("cp", 5),
            ("clap", 5),
            ("rim", 6),
            ("tom", 7),
            ("perc", 8),
            ("cymbal", 9),
            ("crash", 10),
            ("cowbell", 11),
            ("shaker", 12),
            ("tambourine", 13),
            ("conga", 14),
            ("bongo", 15),
        ];
        for &(name, id) in KIT {
            self.register(name, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_share_ids_between_aliases() {
        let reg = SampleRegistry::with_defaults();
        assert_eq!(reg.id("bd"), 1);
        assert_eq!(reg.id("kick"), 1);
        assert_eq!(reg.id("clap"), reg.id("cp"));
        assert_eq!(reg.id("bongo"), 15);
        assert_eq!(reg.len(), 19);
    }

    #[test]
    fn unknown_sample_is_zero() {
        let reg = SampleRegistry::with_defaults();
        assert_eq!(reg.id("vox"), 0);
        assert!(!reg.contains("vox"));
    }

    #[test]
    fn register_refuses_duplicates() {
        let mut reg = SampleRegistry::new();
        assert!(reg.register("vox", 40));
        assert!(!reg.register("vox", 41));
        assert_eq!(reg.id("vox"), 40);
        reg.clear();
        assert!(reg.is_empty());
    }
}
