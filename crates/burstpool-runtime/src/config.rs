//! Pool configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (`from_env`)
//! 3. Library defaults

use burstpool_core::constants::{
    DEFAULT_ALT_STACK_SIZE, DEFAULT_SPIN_ITERS, DEFAULT_STACK_SIZE, MAX_WORKERS, PAGE_SIZE,
};
use burstpool_core::env::{env_get, env_get_bool, env_get_opt};
use burstpool_core::error::{PoolError, PoolResult};
use burstpool_core::CpuMask;

/// Burst pool configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers (= maximum jobs per dispatch)
    pub capacity: usize,
    /// Primary stack per worker, multiple of the page size
    pub stack_size: usize,
    /// Alternate signal stack per worker, multiple of the page size
    pub alt_stack_size: usize,
    /// Claim-loop spins before falling back to a futex wait
    pub spin_iters: u32,
    /// Affinity mask applied by every worker; None leaves inherited affinity
    pub cpu_mask: Option<CpuMask>,
    /// NUMA node the arena is bound to; None for first-touch
    pub numa_node: Option<u32>,
    /// Request transparent-huge-page backing for the arena
    pub huge_pages: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `BURST_CAPACITY` - worker count
    /// - `BURST_STACK_SIZE` - primary stack bytes
    /// - `BURST_ALT_STACK_SIZE` - alt signal stack bytes
    /// - `BURST_SPIN_ITERS` - claim-loop spin budget
    /// - `BURST_NUMA_NODE` - node to bind the arena to
    /// - `BURST_HUGE_PAGES` - request THP backing (0/1)
    pub fn from_env() -> Self {
        Self {
            capacity: env_get("BURST_CAPACITY", default_capacity()),
            stack_size: env_get("BURST_STACK_SIZE", DEFAULT_STACK_SIZE),
            alt_stack_size: env_get("BURST_ALT_STACK_SIZE", DEFAULT_ALT_STACK_SIZE),
            spin_iters: env_get("BURST_SPIN_ITERS", DEFAULT_SPIN_ITERS),
            cpu_mask: None,
            numa_node: env_get_opt("BURST_NUMA_NODE"),
            huge_pages: env_get_bool("BURST_HUGE_PAGES", false),
        }
    }

    /// Explicit defaults, no environment involved.
    pub fn new() -> Self {
        Self {
            capacity: default_capacity(),
            stack_size: DEFAULT_STACK_SIZE,
            alt_stack_size: DEFAULT_ALT_STACK_SIZE,
            spin_iters: DEFAULT_SPIN_ITERS,
            cpu_mask: None,
            numa_node: None,
            huge_pages: false,
        }
    }

    // Builder methods

    pub fn capacity(mut self, n: usize) -> Self {
        self.capacity = n;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn alt_stack_size(mut self, bytes: usize) -> Self {
        self.alt_stack_size = bytes;
        self
    }

    pub fn spin_iters(mut self, n: u32) -> Self {
        self.spin_iters = n;
        self
    }

    pub fn cpu_mask(mut self, mask: CpuMask) -> Self {
        self.cpu_mask = Some(mask);
        self
    }

    pub fn numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }

    pub fn huge_pages(mut self, enable: bool) -> Self {
        self.huge_pages = enable;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 || self.capacity > MAX_WORKERS {
            return Err(PoolError::InvalidCapacity(self.capacity));
        }
        if self.stack_size == 0 || self.stack_size % PAGE_SIZE != 0 {
            return Err(PoolError::InvalidStackSize(self.stack_size));
        }
        if self.alt_stack_size == 0 || self.alt_stack_size % PAGE_SIZE != 0 {
            return Err(PoolError::InvalidStackSize(self.alt_stack_size));
        }
        if let Some(mask) = &self.cpu_mask {
            if mask.is_empty() {
                return Err(PoolError::EmptyCpuMask);
            }
        }
        if let Some(node) = self.numa_node {
            // The bind nodemask is a single word.
            if node >= 64 {
                return Err(PoolError::UnknownNode(node));
            }
        }
        Ok(())
    }
}

fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let c = PoolConfig::new();
        assert!(c.capacity >= 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let c = PoolConfig::new()
            .capacity(8)
            .stack_size(8192)
            .spin_iters(50)
            .numa_node(1);
        assert_eq!(c.capacity, 8);
        assert_eq!(c.stack_size, 8192);
        assert_eq!(c.spin_iters, 50);
        assert_eq!(c.numa_node, Some(1));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(PoolConfig::new().capacity(0).validate().is_err());
        assert!(PoolConfig::new().capacity(MAX_WORKERS + 1).validate().is_err());
        assert!(PoolConfig::new().stack_size(1000).validate().is_err());
        assert!(PoolConfig::new().alt_stack_size(0).validate().is_err());
        assert!(PoolConfig::new()
            .cpu_mask(CpuMask::empty())
            .validate()
            .is_err());
        assert!(PoolConfig::new().numa_node(64).validate().is_err());
    }
}
