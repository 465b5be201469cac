//! Build options

use serde::{Deserialize, Serialize};

/// Knobs for a single graph build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Merge trivial blocks and regions after lowering
    pub pack: bool,
    /// Upper bound on packing rounds
    pub max_pack_iterations: usize,
    /// Check structural invariants of the frozen graph
    pub verify: bool,
    /// Follow only the statically chosen edge of a constant condition
    /// during reachability
    pub fold_constant_conditions: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            pack: true,
            max_pack_iterations: 64,
            verify: cfg!(debug_assertions),
            fold_constant_conditions: true,
        }
    }
}

impl BuildOptions {
    /// Options that keep the raw lowering, useful when inspecting the
    /// builder output before packing
    pub fn unpacked() -> Self {
        Self {
            pack: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_options_fill_defaults() {
        let options: BuildOptions = serde_json::from_str(r#"{"pack": false}"#).unwrap();
        assert!(!options.pack);
        assert_eq!(options.max_pack_iterations, 64);
        assert!(options.fold_constant_conditions);
    }
}
