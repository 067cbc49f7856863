//! Zip generation for local catalog packages.
//!
//! Two sources are supported:
//! - **Git repositories** - `git archive` at a given reference, run with the
//!   network switch disabled and every git transport refused.
//! - **Plain directories** - the tree is walked and zipped with the `zip`
//!   crate, skipping VCS metadata.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use cantata_core::{Error, NetworkSwitch, Result};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Directories never included in a tree archive.
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// What was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Files added.
    pub files: usize,
    /// Uncompressed bytes added.
    pub bytes: u64,
}

/// Whether `path` is a git working tree or bare repository.
#[must_use]
pub fn is_git_repository(path: &Path) -> bool {
    path.join(".git").exists() || (path.join("HEAD").is_file() && path.join("objects").is_dir())
}

/// Zip the tree under `source`, optionally under a `prefix` directory.
///
/// # Errors
/// Returns error if the tree cannot be read or the archive cannot be written.
pub fn zip_directory<W: Write + Seek>(
    writer: W,
    source: &Path,
    prefix: Option<&str>,
) -> Result<ArchiveSummary> {
    let archive_err = |e: &dyn std::fmt::Display| Error::archive(e.to_string(), Some(source.to_path_buf()));
    let mut zip = zip::ZipWriter::new(writer);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut summary = ArchiveSummary { files: 0, bytes: 0 };

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && SKIPPED_DIRS.iter().any(|d| entry.file_name() == *d))
        });
    for entry in walker {
        let entry = entry.map_err(|e| archive_err(&e))?;
        let path = entry.path();
        let relative = path.strip_prefix(source).map_err(|e| archive_err(&e))?;
        let name = match prefix {
            Some(p) => PathBuf::from(p).join(relative),
            None => relative.to_path_buf(),
        };
        let name = name.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(|e| archive_err(&e))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(|e| archive_err(&e))?;
            let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
            summary.bytes += std::io::copy(&mut file, &mut zip).map_err(|e| archive_err(&e))?;
            summary.files += 1;
        }
    }

    zip.finish().map_err(|e| archive_err(&e))?;
    debug!(source = %source.display(), files = summary.files, "zipped tree");
    Ok(summary)
}

/// Write a zip of `repo` at `reference` to `dest` with `git archive`.
///
/// `network` is disabled for the duration of the call, and git is run with
/// every transport protocol refused, so nothing can be fetched. Pass a
/// [`NetworkSwitch::fork`] to keep the rest of the process online.
///
/// # Errors
/// Returns error if `repo` is not a local path, `reference` is not a plain
/// revision name, or git fails.
pub fn git_archive(repo: &Path, reference: &str, dest: &Path, network: &NetworkSwitch) -> Result<()> {
    let repo_str = repo.to_string_lossy();
    if repo_str.contains("://") || repo_str.contains('@') {
        return Err(Error::archive(
            format!("refusing to archive non-local source {repo_str}"),
            Some(repo.to_path_buf()),
        ));
    }
    if !is_revision(reference) {
        return Err(Error::archive(
            format!("invalid reference '{reference}'"),
            Some(repo.to_path_buf()),
        ));
    }

    let _guard = network.disable();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let temp = NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;

    debug!(repo = %repo.display(), reference, "running git archive");
    let output = Command::new("git")
        .arg("-c")
        .arg("protocol.allow=never")
        .arg("-C")
        .arg(repo)
        .arg("archive")
        .arg("--format=zip")
        .arg("--output")
        .arg(temp.path())
        .arg(reference)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .map_err(|e| Error::archive(format!("failed to run git: {e}"), Some(repo.to_path_buf())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::archive(
            format!("git archive failed: {}", stderr.trim()),
            Some(repo.to_path_buf()),
        ));
    }
    temp.persist(dest).map_err(|e| Error::io(dest, e.error))?;
    info!(repo = %repo.display(), reference, dest = %dest.display(), "generated archive");
    Ok(())
}

/// Write a zip of `source` at `reference` to `dest`, using `git archive`
/// for repositories and a tree walk otherwise (where `reference` is
/// ignored).
///
/// # Errors
/// Returns error if the archive cannot be produced.
pub fn archive_source(source: &Path, reference: &str, dest: &Path, network: &NetworkSwitch) -> Result<()> {
    if is_git_repository(source) {
        return git_archive(source, reference, dest, network);
    }
    if !source.is_dir() {
        return Err(Error::archive(
            format!("source {} is not a directory", source.display()),
            Some(source.to_path_buf()),
        ));
    }
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    zip_directory(temp.as_file_mut(), source, None)?;
    temp.persist(dest).map_err(|e| Error::io(dest, e.error))?;
    Ok(())
}

fn is_revision(reference: &str) -> bool {
    !reference.is_empty()
        && !reference.starts_with('-')
        && !reference.contains("..")
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Read};

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("composer.json"), br#"{"name": "acme/foo"}"#).unwrap();
        std::fs::write(dir.path().join("src/Foo.php"), b"<?php class Foo {}").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), b"ref: refs/heads/main").unwrap();
        dir
    }

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
    }

    #[test]
    fn zips_tree_without_vcs_metadata() {
        let dir = tree();
        let mut buffer = Cursor::new(Vec::new());
        let summary = zip_directory(&mut buffer, dir.path(), Some("foo")).unwrap();
        assert_eq!(summary.files, 2);

        let mut archive = zip::ZipArchive::new(Cursor::new(buffer.into_inner())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["foo/composer.json", "foo/src/", "foo/src/Foo.php"]);
        let mut content = String::new();
        archive
            .by_name("foo/src/Foo.php")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<?php class Foo {}");
    }

    #[test]
    fn rejects_remote_sources_and_option_like_references() {
        let dest = tempfile::tempdir().unwrap();
        let network = NetworkSwitch::new();
        for repo in ["https://github.com/acme/foo.git", "git@github.com:acme/foo.git"] {
            assert!(git_archive(Path::new(repo), "main", &dest.path().join("a.zip"), &network).is_err());
        }
        for reference in ["--output=/etc/passwd", "", "a..b", "main;rm"] {
            assert!(git_archive(dest.path(), reference, &dest.path().join("a.zip"), &network).is_err());
        }
        assert!(network.is_enabled());
    }

    #[test]
    fn git_archive_at_reference() {
        if !git_available() {
            return;
        }
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("composer.json"), b"{}").unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .args(["-c", "user.name=t", "-c", "user.email=t@example.com"])
                .arg("-C")
                .arg(repo.path())
                .args(args)
                .output()
                .unwrap();
            assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));
            String::from_utf8(status.stdout).unwrap()
        };
        git(&["init", "-q"]);
        git(&["add", "."]);
        git(&["commit", "-q", "-m", "init"]);
        let head = git(&["rev-parse", "HEAD"]).trim().to_string();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("dist/foo.zip");
        let network = NetworkSwitch::new();
        archive_source(repo.path(), &head, &dest, &network.fork()).unwrap();
        assert!(network.is_enabled());

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert!(archive.file_names().any(|n| n == "composer.json"));
    }

    #[test]
    fn plain_directory_ignores_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"hi").unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("x.zip");
        archive_source(dir.path(), "anything", &dest, &NetworkSwitch::new()).unwrap();
        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn detects_repositories() {
        let dir = tree();
        assert!(is_git_repository(dir.path()));
        assert!(!is_git_repository(&dir.path().join("src")));
    }
}
