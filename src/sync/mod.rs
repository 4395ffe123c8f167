//! Mirror a local file or directory onto the device filesystem.
//!
//! Planning is local and pure ([`planner`]); the engine then asks the device
//! for hashes of every destination in one command, uploads only what
//! differs, and deletes remote files nothing claimed.

pub mod engine;
pub mod hash;
pub mod planner;
pub mod snippets;

pub use engine::{SyncEngine, SyncReport};
pub use hash::{fnv1a, hash_file, Fnv1a, HashStrategy};
pub use planner::{plan, IgnoreSpec, KeepSpec, SyncPlan};

/// Caller-facing knobs for one sync.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Remote paths spared from deletion. `None` keeps `boot.py` and
    /// `webrepl_cfg.py` when syncing to `/`.
    pub keep: Option<KeepSpec>,
    /// `None` applies the default ignore list.
    pub ignore: Option<IgnoreSpec>,
    /// Report what would change without modifying the device.
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn keep(mut self, keep: KeepSpec) -> Self {
        self.keep = Some(keep);
        self
    }

    pub fn ignore(mut self, ignore: IgnoreSpec) -> Self {
        self.ignore = Some(ignore);
        self
    }
}
