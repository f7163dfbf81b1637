//! Upload planning shared by the SSH and local executors
//!
//! Destination rules follow `rsync -r SRC DEST`: a directory source is
//! placed at `DEST/<name>` (or merged into `DEST` when written with a
//! trailing slash); a file source lands inside `DEST` when that is an
//! existing directory and becomes `DEST` otherwise. Symlinks inside a
//! directory source are recreated with the same link text, not followed.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ExecError;

/// A single regular file to send
#[derive(Debug, Clone)]
pub struct TransferEntry {
    /// Local file
    pub source: PathBuf,
    /// Remote destination path
    pub target: String,
    /// Permission bits to apply remotely
    pub mode: u32,
    /// File size in bytes
    pub len: u64,
}

/// A symlink to recreate on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLink {
    /// Remote path of the link
    pub target: String,
    /// Link text, copied verbatim
    pub points_to: String,
}

/// Everything one upload creates, in creation order
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    /// Directories, root first
    pub dirs: Vec<String>,
    pub files: Vec<TransferEntry>,
    pub links: Vec<TransferLink>,
}

/// Local source of an upload, inspected before any remote call
#[derive(Debug, Clone)]
pub struct TransferSource {
    path: PathBuf,
    name: String,
    is_dir: bool,
    merge_contents: bool,
}

impl TransferSource {
    /// Inspect a local path
    ///
    /// # Errors
    /// Returns `ExecError::TransferFailed` if the path does not exist
    pub fn inspect(local: &Path) -> Result<Self, ExecError> {
        let metadata = std::fs::metadata(local).map_err(|e| transfer_error(local, &e))?;
        let merge_contents = local.as_os_str().to_string_lossy().ends_with('/');
        let name = local
            .components()
            .next_back()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .filter(|n| n != "." && n != "/")
            .ok_or_else(|| ExecError::TransferFailed {
                path: local.display().to_string(),
                reason: "source has no file name".to_string(),
            })?;

        Ok(Self {
            path: local.to_path_buf(),
            name,
            is_dir: metadata.is_dir(),
            merge_contents,
        })
    }

    /// Whether the source is a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Root of the upload on the remote side
    ///
    /// `remote_is_dir` reports whether `remote` already exists as a directory;
    /// it only matters for file sources.
    #[must_use]
    pub fn target_root(&self, remote: &str, remote_is_dir: bool) -> String {
        if self.is_dir {
            if self.merge_contents {
                remote.to_string()
            } else {
                join_remote(remote, &self.name)
            }
        } else if remote_is_dir {
            join_remote(remote, &self.name)
        } else {
            remote.to_string()
        }
    }

    /// Directories, files and symlinks to create under `root`
    ///
    /// # Errors
    /// Returns `ExecError::TransferFailed` if the source cannot be walked
    pub fn entries(&self, root: &str) -> Result<TransferPlan, ExecError> {
        if !self.is_dir {
            let metadata =
                std::fs::metadata(&self.path).map_err(|e| transfer_error(&self.path, &e))?;
            let entry = TransferEntry {
                source: self.path.clone(),
                target: root.to_string(),
                mode: metadata.permissions().mode() & 0o7777,
                len: metadata.len(),
            };
            return Ok(TransferPlan {
                files: vec![entry],
                ..TransferPlan::default()
            });
        }

        let mut plan = TransferPlan::default();

        for entry in WalkDir::new(&self.path).sort_by_file_name() {
            let entry = entry.map_err(|e| ExecError::TransferFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let target = if relative.is_empty() {
                root.to_string()
            } else {
                join_remote(root, &relative)
            };

            let metadata = entry
                .metadata()
                .map_err(|e| ExecError::TransferFailed {
                    path: entry.path().display().to_string(),
                    reason: e.to_string(),
                })?;

            if entry.file_type().is_symlink() {
                let points_to = std::fs::read_link(entry.path())
                    .map_err(|e| transfer_error(entry.path(), &e))?;
                plan.links.push(TransferLink {
                    target,
                    points_to: points_to.to_string_lossy().into_owned(),
                });
            } else if metadata.is_dir() {
                plan.dirs.push(target);
            } else if metadata.is_file() {
                plan.files.push(TransferEntry {
                    source: entry.path().to_path_buf(),
                    target,
                    mode: metadata.permissions().mode() & 0o7777,
                    len: metadata.len(),
                });
            } else {
                return Err(ExecError::TransferFailed {
                    path: entry.path().display().to_string(),
                    reason: "not a regular file, directory or symlink".to_string(),
                });
            }
        }

        Ok(plan)
    }
}

/// Join two remote path segments with exactly one `/`
#[must_use]
pub fn join_remote(base: &str, rest: &str) -> String {
    if base.is_empty() {
        return rest.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rest.trim_start_matches('/'))
}

/// Parent directory of a remote path, if it has one
#[must_use]
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

fn transfer_error(path: &Path, err: &std::io::Error) -> ExecError {
    ExecError::TransferFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_into_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.xml");
        std::fs::write(&file, "<config/>").unwrap();

        let source = TransferSource::inspect(&file).unwrap();
        assert!(!source.is_dir());
        assert_eq!(source.target_root("/srv", true), "/srv/config.xml");
        assert_eq!(source.target_root("/srv/app.xml", false), "/srv/app.xml");
    }

    #[test]
    fn test_directory_lands_under_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("imagesamenu");
        std::fs::create_dir_all(src.join("static")).unwrap();
        std::fs::write(src.join("bin"), "x").unwrap();
        std::fs::write(src.join("static/logo.png"), "png").unwrap();

        let source = TransferSource::inspect(&src).unwrap();
        let root = source.target_root("/srv/imageserver", false);
        assert_eq!(root, "/srv/imageserver/imagesamenu");

        let plan = source.entries(&root).unwrap();
        assert!(plan.links.is_empty());
        assert_eq!(
            plan.dirs,
            vec![
                "/srv/imageserver/imagesamenu".to_string(),
                "/srv/imageserver/imagesamenu/static".to_string(),
            ]
        );
        let targets: Vec<_> = plan.files.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "/srv/imageserver/imagesamenu/bin",
                "/srv/imageserver/imagesamenu/static/logo.png",
            ]
        );
        assert_eq!(plan.files[1].len, 3);
    }

    #[test]
    fn test_symlinks_kept_as_links() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("imagesamenu");
        std::fs::create_dir_all(src.join("static")).unwrap();
        std::fs::write(src.join("real.bin"), "x").unwrap();
        std::os::unix::fs::symlink("real.bin", src.join("current.bin")).unwrap();
        std::os::unix::fs::symlink("../static", src.join("static/self")).unwrap();

        let source = TransferSource::inspect(&src).unwrap();
        let plan = source.entries("/srv/imageserver/imagesamenu").unwrap();

        let files: Vec<_> = plan.files.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(files, vec!["/srv/imageserver/imagesamenu/real.bin"]);
        assert_eq!(
            plan.links,
            vec![
                TransferLink {
                    target: "/srv/imageserver/imagesamenu/current.bin".to_string(),
                    points_to: "real.bin".to_string(),
                },
                TransferLink {
                    target: "/srv/imageserver/imagesamenu/static/self".to_string(),
                    points_to: "../static".to_string(),
                },
            ]
        );
        assert_eq!(plan.dirs.len(), 2);
    }

    #[test]
    fn test_trailing_slash_merges_contents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("assets");
        std::fs::create_dir(&src).unwrap();

        let with_slash = PathBuf::from(format!("{}/", src.display()));
        let source = TransferSource::inspect(&with_slash).unwrap();
        assert_eq!(source.target_root("/srv/www", true), "/srv/www");
    }

    #[test]
    fn test_missing_source() {
        let result = TransferSource::inspect(Path::new("/nonexistent/imagesamenu"));
        assert!(matches!(result, Err(ExecError::TransferFailed { .. })));
    }

    #[test]
    fn test_remote_path_helpers() {
        assert_eq!(join_remote("/srv/", "/config.xml"), "/srv/config.xml");
        assert_eq!(remote_parent("/srv/config.xml"), Some("/srv"));
        assert_eq!(remote_parent("/srv"), Some("/"));
        assert_eq!(remote_parent("config.xml"), None);
        assert_eq!(remote_parent("~/pisc/file"), Some("~/pisc"));
    }
}
