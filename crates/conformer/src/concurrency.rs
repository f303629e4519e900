//! Concurrency planning
//!
//! Derives how many files are processed at once from the CPU core count and
//! configuration.

use crate::config::Config;

/// Upper bound on derived file parallelism.
const MAX_DERIVED_FILES: u32 = 8;

/// Cores given to each file in flight when deriving the plan.
const CORES_PER_FILE: u32 = 4;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Logical CPU cores available
    pub total_cores: u32,
    /// Files analysed or rendered at the same time
    pub max_concurrent_files: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// An explicit non-zero `max_concurrent_files` is used as is; otherwise
    /// one file per four cores, between 1 and 8.
    pub fn derive(cfg: &Config) -> Self {
        Self::for_cores(cfg, num_cpus::get() as u32)
    }

    fn for_cores(cfg: &Config, total_cores: u32) -> Self {
        let max_concurrent_files = if cfg.concurrency.max_concurrent_files > 0 {
            cfg.concurrency.max_concurrent_files
        } else {
            derive_max_files(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_files,
        }
    }
}

fn derive_max_files(cores: u32) -> u32 {
    (cores / CORES_PER_FILE).clamp(1, MAX_DERIVED_FILES)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_derived_files_bounded(cores in 1u32..512) {
            let plan = ConcurrencyPlan::for_cores(&Config::default(), cores);
            prop_assert!(plan.max_concurrent_files >= 1);
            prop_assert!(plan.max_concurrent_files <= MAX_DERIVED_FILES);
            prop_assert_eq!(plan.max_concurrent_files, (cores / 4).clamp(1, 8));
            prop_assert_eq!(plan.total_cores, cores);
        }

        #[test]
        fn prop_explicit_value_wins(cores in 1u32..512, explicit in 1u32..64) {
            let cfg = Config {
                concurrency: ConcurrencyConfig {
                    max_concurrent_files: explicit,
                },
                ..Config::default()
            };
            let plan = ConcurrencyPlan::for_cores(&cfg, cores);
            prop_assert_eq!(plan.max_concurrent_files, explicit);
        }
    }

    #[test]
    fn test_small_machines_get_one_file() {
        assert_eq!(derive_max_files(1), 1);
        assert_eq!(derive_max_files(4), 1);
        assert_eq!(derive_max_files(8), 2);
        assert_eq!(derive_max_files(64), 8);
    }

    #[test]
    fn test_derive_plan_detects_cores() {
        let plan = derive_plan(&Config::default());
        assert!(plan.total_cores >= 1);
        assert!(plan.max_concurrent_files >= 1);
    }
}
