//! Architecture-specific syscall surface
//!
//! Raw kernel entry, the pause intrinsic, and thread-pointer reads.
//! Only x86_64 is implemented; other architectures fail at compile time
//! in the crate root.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::*;
    }
}
