//! Local side of a sync: which files exist, where they go, what to spare.
//!
//! Nothing here touches the device. The plan is a pure function of the
//! local tree and the options, so it can be inspected or tested on its own.

use glob::Pattern;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Names skipped when no ignore list is given.
pub const DEFAULT_IGNORE: &[&str] = &["*.pyc", "__pycache__", ".DS_Store", ".pytest_cache"];

/// Files spared from deletion when syncing to `/` without a keep list.
pub const DEFAULT_KEEP_AT_ROOT: &[&str] = &["boot.py", "webrepl_cfg.py"];

/// Remote paths to spare from deletion.
///
/// A boolean means "nothing extra", whichever value it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeepSpec {
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

/// Glob patterns matched against local names and relative paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IgnoreSpec {
    One(String),
    Many(Vec<String>),
}

impl From<Vec<String>> for KeepSpec {
    fn from(v: Vec<String>) -> Self {
        KeepSpec::Many(v)
    }
}

impl From<Vec<String>> for IgnoreSpec {
    fn from(v: Vec<String>) -> Self {
        IgnoreSpec::Many(v)
    }
}

/// Everything the engine needs to bring the device in line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub local_root: PathBuf,
    pub remote_root: String,
    /// Local files in walk order.
    pub src_files: Vec<PathBuf>,
    /// Local directories below the root, parents first.
    pub src_dirs: Vec<PathBuf>,
    /// Remote destination of each entry in `src_files`, same order.
    pub dst_files: Vec<String>,
    /// Remote directories to create, parents first.
    pub dst_dirs: Vec<String>,
    pub keep: Vec<String>,
    pub ignore: Vec<String>,
}

impl SyncPlan {
    /// Local/remote pairs in upload order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.src_files
            .iter()
            .map(PathBuf::as_path)
            .zip(self.dst_files.iter().map(String::as_str))
    }
}

/// Absolute, slash-separated, no trailing slash except for `/` itself.
pub fn normalize_remote_root(remote: &str) -> String {
    let parts: Vec<&str> = remote.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

pub fn remote_join(root: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if root == "/" {
        format!("/{}", rel)
    } else {
        format!("{}/{}", root.trim_end_matches('/'), rel)
    }
}

pub fn normalize_keep(keep: Option<&KeepSpec>, remote_root: &str) -> Vec<String> {
    let remote_root = normalize_remote_root(remote_root);
    let names: Vec<&str> = match keep {
        None if remote_root == "/" => DEFAULT_KEEP_AT_ROOT.to_vec(),
        None | Some(KeepSpec::Flag(_)) => Vec::new(),
        Some(KeepSpec::One(name)) => vec![name.as_str()],
        Some(KeepSpec::Many(names)) => names.iter().map(String::as_str).collect(),
    };

    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| remote_join(&remote_root, name))
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

pub fn normalize_ignore(ignore: Option<&IgnoreSpec>) -> Vec<String> {
    match ignore {
        None => DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
        Some(IgnoreSpec::One(p)) => vec![p.clone()],
        Some(IgnoreSpec::Many(ps)) => ps.clone(),
    }
}

fn compile_patterns(ignore: &[String]) -> Result<Vec<Pattern>> {
    ignore
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| Error::Configuration(format!("invalid ignore pattern '{}': {}", p, e)))
        })
        .collect()
}

fn is_ignored(patterns: &[Pattern], rel: &Path) -> bool {
    let name = rel.file_name().map(|n| n.to_string_lossy());
    let rel = rel.to_string_lossy();
    patterns.iter().any(|p| {
        p.matches(&rel) || name.as_deref().is_some_and(|n| p.matches(n))
    })
}

/// `rel` as a slash-separated remote suffix.
fn remote_suffix(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::Configuration(format!("path is not valid UTF-8: {}", rel.display()))
            })?),
            Component::CurDir => {}
            _ => {
                return Err(Error::Configuration(format!(
                    "unexpected path component in {}",
                    rel.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Walk `local`, returning `(src_files, src_dirs, dst_files)`.
///
/// A single file maps to `remote_root/<name>` and yields no directories.
/// Ignored directories are not descended into.
pub fn discover(
    local: &Path,
    remote_root: &str,
    ignore: &[String],
) -> Result<(Vec<PathBuf>, Vec<PathBuf>, Vec<String>)> {
    let remote_root = normalize_remote_root(remote_root);
    let meta = std::fs::metadata(local).map_err(|e| Error::io(local, e))?;

    if meta.is_file() {
        let name = local.file_name().map(Path::new).ok_or_else(|| {
            Error::Configuration(format!("cannot sync {}: no file name", local.display()))
        })?;
        let dst = remote_join(&remote_root, &remote_suffix(name)?);
        return Ok((vec![local.to_path_buf()], Vec::new(), vec![dst]));
    }

    let patterns = compile_patterns(ignore)?;
    let root = local.to_path_buf();
    let filter_root = root.clone();

    let walker = WalkBuilder::new(&root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            match entry.path().strip_prefix(&filter_root) {
                Ok(rel) => !is_ignored(&patterns, rel),
                Err(_) => true,
            }
        })
        .build();

    let mut src_files = Vec::new();
    let mut src_dirs = Vec::new();
    let mut dst_files = Vec::new();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(&root).map_err(|_| {
            Error::Configuration(format!("{} escaped the sync root", path.display()))
        })?;

        match entry.file_type() {
            Some(ft) if ft.is_dir() => {
                trace!(dir = %rel.display(), "discovered directory");
                src_dirs.push(path.to_path_buf());
            }
            Some(ft) if ft.is_file() => {
                dst_files.push(remote_join(&remote_root, &remote_suffix(rel)?));
                src_files.push(path.to_path_buf());
            }
            _ => debug!(path = %path.display(), "skipping non-regular file"),
        }
    }

    Ok((src_files, src_dirs, dst_files))
}

/// Ancestors of `remote_root` (root-to-leaf, never `/`), then each local
/// directory mapped under it.
pub fn generate_dst_dirs(remote_root: &str, local_root: &Path, src_dirs: &[PathBuf]) -> Result<Vec<String>> {
    let remote_root = normalize_remote_root(remote_root);
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    let mut prefix = String::new();
    for part in remote_root.split('/').filter(|p| !p.is_empty()) {
        prefix.push('/');
        prefix.push_str(part);
        if seen.insert(prefix.clone()) {
            out.push(prefix.clone());
        }
    }

    for dir in src_dirs {
        let rel = dir.strip_prefix(local_root).map_err(|_| {
            Error::Configuration(format!(
                "{} is not below {}",
                dir.display(),
                local_root.display()
            ))
        })?;
        let dst = remote_join(&remote_root, &remote_suffix(rel)?);
        if seen.insert(dst.clone()) {
            out.push(dst);
        }
    }
    Ok(out)
}

/// Build the full plan for syncing `local` to `remote`.
pub fn plan(
    local: &Path,
    remote: &str,
    ignore: Option<&IgnoreSpec>,
    keep: Option<&KeepSpec>,
) -> Result<SyncPlan> {
    let remote_root = normalize_remote_root(remote);
    let ignore = normalize_ignore(ignore);
    let keep = normalize_keep(keep, &remote_root);

    let (src_files, src_dirs, dst_files) = discover(local, &remote_root, &ignore)?;
    let dst_dirs = generate_dst_dirs(&remote_root, local, &src_dirs)?;

    debug!(
        local = %local.display(),
        remote = %remote_root,
        files = src_files.len(),
        dirs = dst_dirs.len(),
        "planned sync"
    );

    Ok(SyncPlan {
        local_root: local.to_path_buf(),
        remote_root,
        src_files,
        src_dirs,
        dst_files,
        dst_dirs,
        keep,
        ignore,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn rel(root: &Path, paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_discover_dir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("file1.ext"));
        touch(&root.join("file2.ext"));
        touch(&root.join("folder1/file3.ext"));

        let (files, dirs, dst) = discover(root, "/foo/bar", &normalize_ignore(None)).unwrap();
        assert_eq!(rel(root, &files), ["file1.ext", "file2.ext", "folder1/file3.ext"]);
        assert_eq!(rel(root, &dirs), ["folder1"]);
        assert_eq!(
            dst,
            ["/foo/bar/file1.ext", "/foo/bar/file2.ext", "/foo/bar/folder1/file3.ext"]
        );
    }

    #[test]
    fn test_discover_dir_ignore() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("file1.ext"));
        touch(&root.join("file2.pyc"));
        touch(&root.join("folder1/file3.ext"));

        let (files, dirs, dst) = discover(root, "/foo/bar", &["*.pyc".to_string()]).unwrap();
        assert_eq!(rel(root, &files), ["file1.ext", "folder1/file3.ext"]);
        assert_eq!(rel(root, &dirs), ["folder1"]);
        assert_eq!(dst, ["/foo/bar/file1.ext", "/foo/bar/folder1/file3.ext"]);
    }

    #[test]
    fn test_ignored_directory_not_descended() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("main.py"));
        touch(&root.join("__pycache__/main.cpython-311.pyc"));
        touch(&root.join("lib/__pycache__/x.pyc"));
        touch(&root.join("lib/util.py"));

        let (files, dirs, _) = discover(root, "/", &normalize_ignore(None)).unwrap();
        assert_eq!(rel(root, &files), ["lib/util.py", "main.py"]);
        assert_eq!(rel(root, &dirs), ["lib"]);
    }

    #[test]
    fn test_ignore_matches_relative_path() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("docs/readme.md"));
        touch(&root.join("lib/readme.md"));

        let (files, _, _) = discover(root, "/", &["docs/*".to_string()]).unwrap();
        assert_eq!(rel(root, &files), ["lib/readme.md"]);
    }

    #[test]
    fn test_discover_empty() {
        let temp = TempDir::new().unwrap();
        let (files, dirs, dst) = discover(temp.path(), "/foo/bar", &[]).unwrap();
        assert!(files.is_empty());
        assert!(dirs.is_empty());
        assert!(dst.is_empty());
    }

    #[test]
    fn test_discover_single_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file1.ext");
        touch(&file);

        let (files, dirs, dst) = discover(&file, "/foo/bar", &[]).unwrap();
        assert_eq!(files, [file]);
        assert!(dirs.is_empty());
        assert_eq!(dst, ["/foo/bar/file1.ext"]);
    }

    #[test]
    fn test_discover_missing_local() {
        let err = discover(Path::new("/nonexistent/replink-src"), "/", &[]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        let err = discover(temp.path(), "/", &["[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_keep_defaults() {
        assert_eq!(normalize_keep(None, "/"), ["/boot.py", "/webrepl_cfg.py"]);
        assert!(normalize_keep(None, "/foo").is_empty());
        assert!(normalize_keep(Some(&KeepSpec::Flag(true)), "/").is_empty());
        assert!(normalize_keep(Some(&KeepSpec::Flag(false)), "/").is_empty());
    }

    #[test]
    fn test_keep_names() {
        assert_eq!(normalize_keep(Some(&KeepSpec::One("foo".into())), "/"), ["/foo"]);
        assert_eq!(
            normalize_keep(Some(&KeepSpec::Many(vec!["foo".into()])), "/"),
            ["/foo"]
        );
        assert_eq!(
            normalize_keep(Some(&KeepSpec::Many(vec!["a".into(), "a".into()])), "/lib/"),
            ["/lib/a"]
        );
    }

    #[test]
    fn test_ignore_normalization() {
        assert_eq!(
            normalize_ignore(None),
            ["*.pyc", "__pycache__", ".DS_Store", ".pytest_cache"]
        );
        assert_eq!(
            normalize_ignore(Some(&IgnoreSpec::Many(vec!["foo".into(), "bar".into()]))),
            ["foo", "bar"]
        );
        assert_eq!(normalize_ignore(Some(&IgnoreSpec::One("foo".into()))), ["foo"]);
    }

    #[test]
    fn test_generate_dst_dirs() {
        let src = Path::new("/bloop/bleep");
        let src_dirs: Vec<PathBuf> = [
            "dir1",
            "dir1/dir1_1",
            "dir1/dir1_2",
            "dir2",
            "dir2/dir2_1",
            "dir2/dir2_2",
        ]
        .iter()
        .map(|d| src.join(d))
        .collect();

        assert_eq!(
            generate_dst_dirs("/foo/bar", src, &src_dirs).unwrap(),
            [
                "/foo",
                "/foo/bar",
                "/foo/bar/dir1",
                "/foo/bar/dir1/dir1_1",
                "/foo/bar/dir1/dir1_2",
                "/foo/bar/dir2",
                "/foo/bar/dir2/dir2_1",
                "/foo/bar/dir2/dir2_2",
            ]
        );
    }

    #[test]
    fn test_generate_dst_dirs_at_root() {
        assert!(generate_dst_dirs("/", Path::new("/src"), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_remote_root_normalization() {
        assert_eq!(normalize_remote_root(""), "/");
        assert_eq!(normalize_remote_root("/"), "/");
        assert_eq!(normalize_remote_root("lib/"), "/lib");
        assert_eq!(normalize_remote_root("//a//b/"), "/a/b");
    }

    #[test]
    fn test_plan_single_file_keeps_root_ancestors() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("main.py");
        touch(&file);

        let plan = plan(&file, "/app/src", None, None).unwrap();
        assert_eq!(plan.dst_files, ["/app/src/main.py"]);
        assert_eq!(plan.dst_dirs, ["/app", "/app/src"]);
        assert!(plan.keep.is_empty());
    }

    #[test]
    fn test_keep_spec_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            a: KeepSpec,
            b: KeepSpec,
            c: KeepSpec,
        }
        let doc: Doc = toml::from_str("a = true\nb = \"boot.py\"\nc = [\"x\", \"y\"]\n").unwrap();
        assert_eq!(doc.a, KeepSpec::Flag(true));
        assert_eq!(doc.b, KeepSpec::One("boot.py".into()));
        assert_eq!(doc.c, KeepSpec::Many(vec!["x".into(), "y".into()]));
    }
}
