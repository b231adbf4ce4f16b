//! Error types for the burst pool

use core::fmt;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while building or tearing down a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Requested capacity is zero or above the supported maximum
    InvalidCapacity(usize),

    /// Stack size is zero or not a multiple of the page size
    InvalidStackSize(usize),

    /// The CPU mask selects no CPUs
    EmptyCpuMask,

    /// The requested NUMA node does not exist on this machine
    UnknownNode(u32),

    /// Memory setup failed
    Memory(MemoryError),

    /// Worker spawn failed
    Spawn(SpawnError),

    /// Installing the fault handler failed (negated errno)
    FaultHandler(i32),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidCapacity(n) => write!(f, "invalid pool capacity {}", n),
            PoolError::InvalidStackSize(n) => write!(f, "invalid stack size {}", n),
            PoolError::EmptyCpuMask => write!(f, "CPU mask selects no CPUs"),
            PoolError::UnknownNode(n) => write!(f, "NUMA node {} not present", n),
            PoolError::Memory(e) => write!(f, "memory error: {}", e),
            PoolError::Spawn(e) => write!(f, "spawn error: {}", e),
            PoolError::FaultHandler(e) => write!(f, "fault handler install failed: errno {}", e),
        }
    }
}

impl std::error::Error for PoolError {}

/// Memory-related errors. The payload is the negated errno the kernel
/// returned, where one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    MapFailed(i32),

    /// mprotect on a guard page failed
    ProtectFailed(i32),

    /// mbind to the requested node failed
    BindFailed(i32),

    /// The arena is too small for the requested pool
    ArenaExhausted,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::MapFailed(e) => write!(f, "mmap failed: errno {}", e),
            MemoryError::ProtectFailed(e) => write!(f, "mprotect failed: errno {}", e),
            MemoryError::BindFailed(e) => write!(f, "mbind failed: errno {}", e),
            MemoryError::ArenaExhausted => write!(f, "arena exhausted"),
        }
    }
}

impl From<MemoryError> for PoolError {
    fn from(e: MemoryError) -> Self {
        PoolError::Memory(e)
    }
}

/// Worker spawn errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// clone3 returned a negated errno
    CloneFailed { worker: usize, errno: i32 },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::CloneFailed { worker, errno } => {
                write!(f, "clone3 failed for worker {}: errno {}", worker, errno)
            }
        }
    }
}

impl From<SpawnError> for PoolError {
    fn from(e: SpawnError) -> Self {
        PoolError::Spawn(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = PoolError::InvalidCapacity(0);
        assert_eq!(format!("{}", e), "invalid pool capacity 0");

        let e = PoolError::Memory(MemoryError::BindFailed(22));
        assert_eq!(format!("{}", e), "memory error: mbind failed: errno 22");
    }

    #[test]
    fn test_error_conversion() {
        let mem: PoolError = MemoryError::ArenaExhausted.into();
        assert!(matches!(mem, PoolError::Memory(MemoryError::ArenaExhausted)));

        let sp: PoolError = SpawnError::CloneFailed { worker: 3, errno: 11 }.into();
        assert!(matches!(sp, PoolError::Spawn(_)));
    }
}
