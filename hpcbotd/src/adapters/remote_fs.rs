// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Recursive transfer shared by the SFTP and WebDAV transports.
//!
//! A backend only provides single-entry primitives; directory walking,
//! parent creation and basename resolution live here so both transports
//! behave the same way.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::{Context, Result};
use tokio::fs as tokiofs;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

pub(crate) trait RemoteFs: Send + Sync {
    /// `Ok(true)` for a directory, `Ok(false)` for anything else.
    /// An error means the path could not be inspected, usually because it
    /// does not exist.
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;

    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<RemoteEntry>>>;

    fn upload_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>>;

    fn download_file<'a>(&'a self, remote: &'a str, local: &'a Path) -> BoxFuture<'a, Result<()>>;
}

/// Prefixes of `remote_dir`, shortest first. Absolute paths keep their root.
pub(crate) fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let absolute = remote_dir.starts_with('/');
    let mut paths = Vec::new();
    let mut cur = String::new();
    for seg in remote_dir.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if cur.is_empty() {
            cur = if absolute {
                format!("/{seg}")
            } else {
                seg.to_string()
            };
        } else {
            cur = format!("{cur}/{seg}");
        }
        paths.push(cur.clone());
    }
    paths
}

pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return Some("/");
    }
    Some(&trimmed[..idx])
}

pub(crate) fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub(crate) fn join_remote(base: &str, child: &str) -> String {
    if base.is_empty() {
        return child.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), child.trim_start_matches('/'))
}

/// Creates every missing segment of `remote_dir`. Existing directories are
/// left alone, so calling it twice is harmless.
pub(crate) async fn mkdir_recursive(fs: &dyn RemoteFs, remote_dir: &str) -> Result<()> {
    for cur in build_remote_dir_paths(remote_dir) {
        match fs.stat(&cur).await {
            Ok(true) => {}
            Ok(false) => {
                anyhow::bail!("remote path exists but is not a directory: {cur}");
            }
            Err(e) => {
                tracing::debug!("stat {cur} failed ({e}), creating");
                fs.create_dir(&cur)
                    .await
                    .with_context(|| format!("creating path {cur}"))?;
            }
        }
    }
    Ok(())
}

pub(crate) async fn is_remote_dir(fs: &dyn RemoteFs, path: &str) -> bool {
    fs.stat(path).await.unwrap_or(false)
}

/// Uploads `local` as `remote`. When `remote` is an existing directory the
/// local basename is appended first.
pub(crate) async fn put(fs: &dyn RemoteFs, local: &Path, remote: &str) -> Result<()> {
    let target = if is_remote_dir(fs, remote).await {
        let name = local
            .file_name()
            .with_context(|| format!("local path has no file name: {}", local.display()))?;
        join_remote(remote, &name.to_string_lossy())
    } else {
        remote.to_string()
    };
    upload_tree(fs, local, &target).await
}

/// Uploads `local` to exactly `remote`, merging into an existing directory.
pub(crate) async fn upload_tree(fs: &dyn RemoteFs, local: &Path, remote: &str) -> Result<()> {
    let meta = tokiofs::metadata(local)
        .await
        .with_context(|| format!("reading local metadata {}", local.display()))?;
    if !meta.is_dir() {
        if let Some(parent) = remote_parent(remote) {
            mkdir_recursive(fs, parent).await?;
        }
        tracing::debug!("uploading {} -> {remote}", local.display());
        return fs.upload_file(local, remote).await;
    }

    let mut stack: Vec<(PathBuf, String)> = vec![(local.to_path_buf(), remote.to_string())];
    while let Some((local_base, remote_base)) = stack.pop() {
        mkdir_recursive(fs, &remote_base).await?;
        let mut entries = tokiofs::read_dir(&local_base)
            .await
            .with_context(|| format!("listing {}", local_base.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let remote_child = join_remote(&remote_base, &name);
            if entry.file_type().await?.is_dir() {
                stack.push((entry.path(), remote_child));
            } else {
                fs.upload_file(&entry.path(), &remote_child).await?;
            }
        }
    }
    Ok(())
}

/// Downloads `remote` into `local`. When `local` is an existing directory
/// the remote basename is appended first.
pub(crate) async fn get(fs: &dyn RemoteFs, remote: &str, local: &Path) -> Result<()> {
    let target = if tokiofs::metadata(local)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        local.join(remote_basename(remote))
    } else {
        local.to_path_buf()
    };
    download_tree(fs, remote, &target).await
}

pub(crate) async fn download_tree(fs: &dyn RemoteFs, remote: &str, local: &Path) -> Result<()> {
    if !is_remote_dir(fs, remote).await {
        if let Some(parent) = local.parent() {
            tokiofs::create_dir_all(parent).await?;
        }
        return fs.download_file(remote, local).await;
    }

    let mut stack: Vec<(String, PathBuf)> = vec![(
        remote.trim_end_matches('/').to_string(),
        local.to_path_buf(),
    )];
    while let Some((remote_base, local_base)) = stack.pop() {
        tokiofs::create_dir_all(&local_base).await?;
        for entry in fs.list_dir(&remote_base).await? {
            let remote_child = join_remote(&remote_base, &entry.name);
            let local_child = local_base.join(&entry.name);
            if entry.is_dir {
                stack.push((remote_child, local_child));
            } else {
                fs.download_file(&remote_child, &local_child).await?;
            }
        }
    }
    Ok(())
}

/// Remote filesystem backed by a local directory. Used by tests in place of
/// a live server.
#[cfg(test)]
pub(crate) struct LocalDirFs {
    root: PathBuf,
}

#[cfg(test)]
impl LocalDirFs {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

#[cfg(test)]
impl RemoteFs for LocalDirFs {
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(tokiofs::metadata(self.resolve(path)).await?.is_dir()) })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(tokiofs::create_dir(self.resolve(path)).await?) })
    }

    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<RemoteEntry>>> {
        Box::pin(async move {
            let mut out = Vec::new();
            let mut entries = tokiofs::read_dir(self.resolve(path)).await?;
            while let Some(entry) = entries.next_entry().await? {
                out.push(RemoteEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: entry.file_type().await?.is_dir(),
                });
            }
            Ok(out)
        })
    }

    fn upload_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokiofs::copy(local, self.resolve(remote)).await?;
            Ok(())
        })
    }

    fn download_file<'a>(&'a self, remote: &'a str, local: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokiofs::copy(self.resolve(remote), local).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn build_remote_dir_paths_handles_root_and_dot_segments() {
        assert_eq!(
            build_remote_dir_paths("/tmp/./cache//files/"),
            vec!["/tmp", "/tmp/cache", "/tmp/cache/files"]
        );
        assert_eq!(build_remote_dir_paths("calc/a"), vec!["calc", "calc/a"]);
    }

    #[test]
    fn parent_and_basename() {
        assert_eq!(remote_parent("/a/b/c"), Some("/a/b"));
        assert_eq!(remote_parent("/a"), Some("/"));
        assert_eq!(remote_parent("a"), None);
        assert_eq!(remote_basename("/a/b/"), "b");
        assert_eq!(join_remote("/a/", "b"), "/a/b");
    }

    #[tokio::test]
    async fn mkdir_recursive_is_idempotent() {
        let tmp = tempdir().unwrap();
        let fs_ = LocalDirFs::new(tmp.path());
        mkdir_recursive(&fs_, "/x/y/z").await.unwrap();
        assert!(tmp.path().join("x/y/z").is_dir());
        mkdir_recursive(&fs_, "/x/y/z").await.unwrap();
        assert!(tmp.path().join("x/y/z").is_dir());
    }

    #[tokio::test]
    async fn mkdir_recursive_fails_on_file_segment() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("x"), b"file").unwrap();
        let fs_ = LocalDirFs::new(tmp.path());
        assert!(mkdir_recursive(&fs_, "/x/y").await.is_err());
    }

    #[tokio::test]
    async fn put_appends_basename_when_target_is_dir() {
        let local = tempdir().unwrap();
        let remote = tempdir().unwrap();
        let src = local.path().join("run");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.inp"), b"a").unwrap();
        fs::write(src.join("sub/b.out"), b"b").unwrap();
        fs::create_dir_all(remote.path().join("upload")).unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        put(&fs_, &src, "/upload").await.unwrap();

        assert_eq!(fs::read(remote.path().join("upload/run/a.inp")).unwrap(), b"a");
        assert_eq!(fs::read(remote.path().join("upload/run/sub/b.out")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn put_single_file_creates_parents() {
        let local = tempdir().unwrap();
        let remote = tempdir().unwrap();
        let src = local.path().join("w.inp");
        fs::write(&src, b"w").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        put(&fs_, &src, "/deep/er/w.inp").await.unwrap();

        assert_eq!(fs::read(remote.path().join("deep/er/w.inp")).unwrap(), b"w");
    }

    #[tokio::test]
    async fn get_into_existing_dir_uses_remote_basename() {
        let local = tempdir().unwrap();
        let remote = tempdir().unwrap();
        fs::create_dir_all(remote.path().join("up/123_1_w/nested")).unwrap();
        fs::write(remote.path().join("up/123_1_w/w.log"), b"log").unwrap();
        fs::write(remote.path().join("up/123_1_w/nested/x"), b"x").unwrap();

        let fs_ = LocalDirFs::new(remote.path());
        get(&fs_, "/up/123_1_w", local.path()).await.unwrap();

        assert_eq!(fs::read(local.path().join("123_1_w/w.log")).unwrap(), b"log");
        assert_eq!(fs::read(local.path().join("123_1_w/nested/x")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn get_missing_remote_fails() {
        let local = tempdir().unwrap();
        let remote = tempdir().unwrap();
        let fs_ = LocalDirFs::new(remote.path());
        assert!(get(&fs_, "/nope", local.path()).await.is_err());
    }
}
