//! Artifact copier: recursive copy, recursive delete, scoped mkdir.
//!
//! Plain tree traversal; fails fast on the first I/O error. Entries named
//! `.git` are never copied and never deleted so the working tree of the
//! destination clone stays intact even when the output path is the root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const GIT_DIR: &str = ".git";

/// Create `rel` (and parents) under `root` and return the scoped directory.
pub fn chroot_mkdir(root: &Path, rel: &str) -> io::Result<PathBuf> {
    let dir = root.join(rel);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove `rel` under `root` recursively.
///
/// Already-absent paths are not an error. For the root itself (`.` or
/// empty) every entry except `.git` is removed and the directory is kept.
pub fn remove_recursively(root: &Path, rel: &str) -> io::Result<()> {
    if rel.is_empty() || rel == "." {
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_name() == GIT_DIR {
                continue;
            }
            remove_entry(&entry.path())?;
        }
        return Ok(());
    }
    remove_entry(&root.join(rel))
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy every file below `src` into `dst`, creating directories as needed.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == GIT_DIR {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir_all(&to)?;
            copied += copy_tree(&from, &to)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to)?;
            copied += 1;
        } else {
            fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let target = fs::read_link(from)?;
    remove_entry(to)?;
    std::os::unix::fs::symlink(target, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn recursive_delete_removes_nested_tree() {
        let tmp = TempDir::new().unwrap();
        let nested = chroot_mkdir(tmp.path(), "level1/level2/level3").unwrap();
        write(&nested.join("dummy.txt"), "level3:foobar");
        write(&tmp.path().join("level1/dummy.txt"), "level1:foobar");

        remove_recursively(tmp.path(), "level1").unwrap();
        assert!(!tmp.path().join("level1").exists());
    }

    #[test]
    fn deleting_absent_path_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        remove_recursively(tmp.path(), "never/existed").unwrap();
    }

    #[test]
    fn deleting_root_keeps_git_dir() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join(".git/HEAD"), "ref: refs/heads/develop");
        write(&tmp.path().join("bases/app/template.yaml"), "[]");
        write(&tmp.path().join("README.md"), "hi");

        remove_recursively(tmp.path(), ".").unwrap();

        let left: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![std::ffi::OsString::from(".git")]);
    }

    #[test]
    fn copy_creates_directories_and_skips_git() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("template.yaml"), "a");
        write(&src.path().join("nested/deeper/values.yaml"), "b");
        write(&src.path().join(".git/config"), "[core]");

        let count = copy_tree(src.path(), dst.path()).unwrap();

        assert_eq!(count, 2);
        assert_eq!(fs::read_to_string(dst.path().join("template.yaml")).unwrap(), "a");
        assert_eq!(
            fs::read_to_string(dst.path().join("nested/deeper/values.yaml")).unwrap(),
            "b"
        );
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn copy_overwrites_existing_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("a.txt"), "new");
        write(&dst.path().join("a.txt"), "old");
        copy_tree(src.path(), dst.path()).unwrap();
        assert_eq!(fs::read_to_string(dst.path().join("a.txt")).unwrap(), "new");
    }

    #[test]
    fn copy_from_missing_source_fails() {
        let dst = TempDir::new().unwrap();
        let err = copy_tree(&dst.path().join("missing"), dst.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
