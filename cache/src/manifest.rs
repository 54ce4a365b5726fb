//! On-disk record pairing a library version with the module set known to be
//! present in the sources blob.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized as `{"version": "x.y.z", "modules": {"name": 1, ...}}`.
///
/// The modules map keys on the script name with `1` as the value so
/// membership checks on load stay O(1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub version: String,
    pub modules: BTreeMap<String, u8>,
}

impl CacheManifest {
    pub fn new(version: impl Into<String>, modules: impl IntoIterator<Item = String>) -> Self {
        Self {
            version: version.into(),
            modules: modules.into_iter().map(|name| (name, 1)).collect(),
        }
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Whether this manifest covers the configured version and module set.
    ///
    /// The module set is checked against the *requested* set: extra modules
    /// already present are ignored, but a count mismatch or any missing
    /// requested module forces a re-fetch.
    pub fn satisfies(&self, version: &str, requested: &[String]) -> bool {
        self.version == version
            && self.modules.len() == requested.len()
            && requested.iter().all(|name| self.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_roundtrip_uses_membership_map() {
        let manifest = CacheManifest::new("11.4.8", names(&["highcharts", "stock"]));
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains(r#""highcharts":1"#));

        let back: CacheManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_satisfies_exact_set() {
        let manifest = CacheManifest::new("11.4.8", names(&["highcharts", "stock"]));
        assert!(manifest.satisfies("11.4.8", &names(&["highcharts", "stock"])));
    }

    #[test]
    fn test_version_mismatch_forces_fetch() {
        let manifest = CacheManifest::new("11.4.8", names(&["highcharts"]));
        assert!(!manifest.satisfies("10.3.3", &names(&["highcharts"])));
    }

    #[test]
    fn test_missing_requested_module_forces_fetch() {
        let manifest = CacheManifest::new("11.4.8", names(&["highcharts", "stock"]));
        assert!(!manifest.satisfies("11.4.8", &names(&["highcharts", "map"])));
    }

    #[test]
    fn test_count_mismatch_forces_fetch() {
        let manifest = CacheManifest::new("11.4.8", names(&["highcharts", "stock"]));
        assert!(!manifest.satisfies("11.4.8", &names(&["highcharts"])));
    }
}
