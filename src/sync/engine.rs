//! Device side of a sync: inventory, batched hashing, uploads, cleanup.
//!
//! Every step is one command on the executor, in a fixed order:
//!
//! ```text
//! push helpers (once) -> __replink_fs(root) -> discard claimed paths
//!   -> __replink_mkdirs -> __replink_hfs -> uploads -> __replink_del_fs
//! ```

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::literal::{encode_list, Value};
use crate::rpc::Executor;
use crate::sync::hash::hash_file;
use crate::sync::planner::SyncPlan;
use crate::sync::snippets::{snippet_key, sync_snippet};
use crate::sync::HashStrategy;
use crate::transport::Transport;

/// What a sync did, or would do on a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    /// Directories ensured to exist, whether or not they were already there.
    pub created_dirs: Vec<String>,
    pub deleted: Vec<String>,
    pub dry_run: bool,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncEngine {
    strategy: HashStrategy,
}

impl SyncEngine {
    pub fn new(strategy: HashStrategy) -> Self {
        Self { strategy }
    }

    pub fn sync<C: Transport>(
        &self,
        executor: &mut Executor<C>,
        plan: &SyncPlan,
        dry_run: bool,
    ) -> Result<SyncReport> {
        let mut report = SyncReport {
            dry_run,
            ..Default::default()
        };

        executor.ensure_pushed(&snippet_key(self.strategy), &sync_snippet(self.strategy))?;
        executor.exec(&format!(
            "__replink_fs({})",
            Value::from(plan.remote_root.as_str())
        ))?;

        // Whatever is still listed after this is stale.
        let claimed: Vec<&str> = plan
            .dst_files
            .iter()
            .chain(plan.keep.iter())
            .map(String::as_str)
            .collect();
        if !claimed.is_empty() {
            executor.exec(&format!(
                "for x in{}:\n __replink_files.discard(x)",
                encode_list(&claimed)
            ))?;
        }

        if !dry_run && !plan.dst_dirs.is_empty() {
            executor.exec(&format!("__replink_mkdirs({})", encode_list(&plan.dst_dirs)))?;
            report.created_dirs = plan.dst_dirs.clone();
        }

        let remote_hashes = if plan.dst_files.is_empty() {
            Vec::new()
        } else {
            self.remote_hashes(executor, plan)?
        };

        for ((src, dst), remote) in plan.pairs().zip(remote_hashes) {
            let local = hash_file(src)?;
            if remote == Some(local) {
                debug!(path = dst, hash = local, "unchanged");
                report.skipped.push(dst.to_string());
                continue;
            }
            if !dry_run {
                executor.channel_mut().upload(src, dst).map_err(|e| {
                    Error::transport(format!("uploading {} to {}", src.display(), dst), e)
                })?;
            }
            debug!(local = %src.display(), remote = dst, "uploaded");
            report.uploaded.push(dst.to_string());
        }

        let cleanup = if dry_run { "__replink_stale()" } else { "__replink_del_fs()" };
        report.deleted = match executor.exec(cleanup)? {
            Some(value) => path_list(&value, cleanup)?,
            None => {
                return Err(Error::Protocol(format!("{} returned nothing", cleanup)));
            }
        };

        info!(
            remote = %plan.remote_root,
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            deleted = report.deleted.len(),
            dry_run,
            "sync finished"
        );
        Ok(report)
    }

    /// One hash per destination file; `None` when absent on the device.
    fn remote_hashes<C: Transport>(
        &self,
        executor: &mut Executor<C>,
        plan: &SyncPlan,
    ) -> Result<Vec<Option<u32>>> {
        let value = executor
            .exec(&format!("__replink_hfs({})", encode_list(&plan.dst_files)))?
            .ok_or_else(|| Error::Protocol("__replink_hfs returned nothing".to_string()))?;
        let items = value.as_list().ok_or_else(|| {
            Error::Protocol(format!("__replink_hfs returned {}, expected a list", value))
        })?;
        if items.len() != plan.dst_files.len() {
            return Err(Error::Protocol(format!(
                "__replink_hfs returned {} hashes for {} files",
                items.len(),
                plan.dst_files.len()
            )));
        }
        Ok(items
            .iter()
            .map(|v| v.as_i64().and_then(|h| u32::try_from(h).ok()))
            .collect())
    }
}

fn path_list(value: &Value, what: &str) -> Result<Vec<String>> {
    let items = value
        .as_list()
        .ok_or_else(|| Error::Protocol(format!("{} returned {}, expected a list", what, value)))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Protocol(format!("{} returned non-path {}", what, v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::planner::{plan, IgnoreSpec, KeepSpec};
    use crate::transport::ScriptedChannel;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncPlan) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.py"), "a").unwrap();
        fs::write(temp.path().join("b.py"), "bar contents").unwrap();
        let plan = plan(temp.path(), "/", None, None).unwrap();
        (temp, plan)
    }

    #[test]
    fn test_skips_matching_hashes() {
        let (_temp, plan) = setup();
        let mut channel = ScriptedChannel::silent();
        channel.respond_to(
            "__replink_hfs",
            &format!("_REPLINKR[{},{}]\r\n", 0xe40c292cu32, 0x97125654u32),
        );
        channel.respond_to("__replink_del_fs", "_REPLINKR['/old.py']\r\n");
        let mut executor = Executor::new(channel);

        let report = SyncEngine::default().sync(&mut executor, &plan, false).unwrap();
        assert!(report.uploaded.is_empty());
        assert_eq!(report.skipped, ["/a.py", "/b.py"]);
        assert_eq!(report.deleted, ["/old.py"]);
        assert!(executor.channel().uploads().is_empty());
    }

    #[test]
    fn test_helpers_pushed_once() {
        let (_temp, plan) = setup();
        let mut channel = ScriptedChannel::silent();
        channel.respond_to("__replink_hfs", "_REPLINKR[b'\\x00',b'\\x00']\r\n");
        channel.respond_to("__replink_del_fs", "_REPLINKR[]\r\n");
        let mut executor = Executor::new(channel);

        let engine = SyncEngine::new(HashStrategy::Plain);
        engine.sync(&mut executor, &plan, false).unwrap();
        engine.sync(&mut executor, &plan, false).unwrap();

        let pushes = executor
            .channel()
            .sent()
            .iter()
            .filter(|c| c.contains("def __replink_hfs"))
            .count();
        assert_eq!(pushes, 1);
        assert_eq!(executor.channel().uploads().len(), 4);
    }

    #[test]
    fn test_hash_count_mismatch() {
        let (_temp, plan) = setup();
        let mut channel = ScriptedChannel::silent();
        channel.respond_to("__replink_hfs", "_REPLINKR[1]\r\n");
        let mut executor = Executor::new(channel);

        let err = SyncEngine::default().sync(&mut executor, &plan, false).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_empty_plan_skips_hashing() {
        let temp = TempDir::new().unwrap();
        let plan = plan(
            temp.path(),
            "/",
            Some(&IgnoreSpec::Many(vec![])),
            Some(&KeepSpec::Flag(false)),
        )
        .unwrap();
        let mut channel = ScriptedChannel::silent();
        channel.respond_to("__replink_del_fs", "_REPLINKR['/x.py']\r\n");
        let mut executor = Executor::new(channel);

        let report = SyncEngine::default().sync(&mut executor, &plan, false).unwrap();
        assert_eq!(report.deleted, ["/x.py"]);
        assert!(!executor
            .channel()
            .sent()
            .iter()
            .any(|c| c.starts_with("__replink_hfs") || c.starts_with("for x in")));
    }
}
