//! Stealth Layer
//!
//! Everything that makes the automated browser read as a human one:
//! - Synthetic identity generation (seeded, internally consistent)
//! - Evasion scripts and the init-script injector
//! - Binary marker patching (Aho-Corasick based)
//! - Human-behavior timing and movement model

pub mod evasions;
pub mod humanize;
pub mod identity;
pub mod injector;
pub mod patcher;

pub use humanize::{human_delay, random_delay, Human};
pub use identity::{ContextOptions, Identity};
pub use injector::{build_init_script, EvasionToggles, PatchDescriptor};
pub use patcher::{find_chrome, MarkerPatcher};
