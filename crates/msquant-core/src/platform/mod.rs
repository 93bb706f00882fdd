//! Platform-specific process management.

mod process;

pub use process::{group_alive, is_process_alive, signal_group_kill, signal_group_term};
