//! Engine configuration structures.
//!
//! These structures define the configurable aspects of an Ember engine
//! instance: the backing memory region, transaction reclamation and rule
//! dispatch.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_LOCATORS, DEFAULT_REGION_SIZE, DEFAULT_RULE_WORKERS, MEMORY_ALIGNMENT,
    MIN_REGION_SIZE,
};

/// Main engine configuration.
///
/// # Example
///
/// ```rust
/// use ember_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert!(config.validate().is_ok());
/// assert!(config.rules.log_events);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Memory manager configuration.
    pub memory: MemoryConfig,

    /// Transaction manager configuration.
    pub txn: TxnConfig,

    /// Rule engine configuration.
    pub rules: RulesConfig,
}

impl EngineConfig {
    /// Creates a minimal configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            memory: MemoryConfig {
                region_size: 1024 * 1024, // 1 MB for tests
                max_locators: 16 * 1024,
            },
            txn: TxnConfig::default(),
            rules: RulesConfig {
                log_events: false, // Keeps test stores free of system rows
                ..Default::default()
            },
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.memory.validate()?;
        self.txn.validate()?;
        self.rules.validate()?;
        Ok(())
    }
}

/// Memory manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size of the backing object region in bytes. Must be aligned.
    /// Default: 64 MB
    pub region_size: u64,

    /// Capacity of the locator table.
    /// Default: 1M locators
    pub max_locators: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            region_size: DEFAULT_REGION_SIZE,
            max_locators: DEFAULT_MAX_LOCATORS,
        }
    }
}

impl MemoryConfig {
    /// Validates region size and locator capacity.
    pub fn validate(&self) -> Result<(), String> {
        if self.region_size < MIN_REGION_SIZE {
            return Err(format!(
                "memory.region_size must be at least {MIN_REGION_SIZE} bytes"
            ));
        }

        if self.region_size % MEMORY_ALIGNMENT != 0 {
            return Err(format!(
                "memory.region_size must be a multiple of {MEMORY_ALIGNMENT}"
            ));
        }

        if self.max_locators == 0 {
            return Err("memory.max_locators must be greater than zero".to_string());
        }

        Ok(())
    }
}

/// Transaction manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    /// Whether the reclaimer frees superseded versions.
    /// Default: true
    pub gc_enabled: bool,

    /// Maximum number of timestamps frozen in one reclamation pass.
    /// Default: 4096
    pub reclaim_batch_size: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            gc_enabled: true,
            reclaim_batch_size: 4096,
        }
    }
}

impl TxnConfig {
    /// Validates the reclamation batch size.
    pub fn validate(&self) -> Result<(), String> {
        if self.reclaim_batch_size == 0 {
            return Err("txn.reclaim_batch_size must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// How committed events are handed to rule handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RuleDispatchMode {
    /// Handlers run synchronously on the committing thread.
    #[default]
    Immediate,
    /// Handlers run on a pool of worker threads fed by a blocking queue.
    Background {
        /// Number of worker threads.
        workers: usize,
    },
}

impl RuleDispatchMode {
    /// Background dispatch with the default worker count.
    #[must_use]
    pub const fn background() -> Self {
        Self::Background {
            workers: DEFAULT_RULE_WORKERS,
        }
    }
}

/// Rule engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Dispatch mode.
    /// Default: immediate
    pub dispatch: RuleDispatchMode,

    /// Whether dispatched events are appended to the system event log.
    /// Default: true
    pub log_events: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dispatch: RuleDispatchMode::Immediate,
            log_events: true,
        }
    }
}

impl RulesConfig {
    /// Validates the worker count.
    pub fn validate(&self) -> Result<(), String> {
        if let RuleDispatchMode::Background { workers: 0 } = self.dispatch {
            return Err("rules.dispatch.workers must be greater than zero".to_string());
        }
        Ok(())
    }
}
