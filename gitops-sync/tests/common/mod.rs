//! Offline git fixtures: a bare "remote" on disk, addressed by path.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{build::TreeUpdateBuilder, FileMode, Oid, Repository, Signature, Time, TreeWalkMode, TreeWalkResult};
use tempfile::TempDir;

use gitops_core::{BranchName, CommitTime, SyncConfig};

pub const FIXED_TIME: &str = "2024-03-01T12:00:00+01:00";

pub struct Remote {
    _dir: TempDir,
    pub path: PathBuf,
    pub repo: Repository,
}

impl Remote {
    /// Bare repository with `develop` holding `files`.
    pub fn with_base(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("remote.git");
        let repo = Repository::init_bare(&path).expect("init bare");
        let remote = Self {
            _dir: dir,
            path,
            repo,
        };
        remote.commit("develop", None, files, "initial");
        remote
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Commit a full snapshot of `files` onto `branch`.
    pub fn commit(&self, branch: &str, parent: Option<Oid>, files: &[(&str, &str)], message: &str) -> Oid {
        let repo = &self.repo;
        let empty = repo.treebuilder(None).expect("treebuilder").write().expect("write");
        let empty = repo.find_tree(empty).expect("tree");
        let mut update = TreeUpdateBuilder::new();
        for (path, content) in files {
            let blob = repo.blob(content.as_bytes()).expect("blob");
            update.upsert(*path, blob, FileMode::Blob);
        }
        let tree_id = update.create_updated(repo, &empty).expect("tree update");
        let tree = repo.find_tree(tree_id).expect("tree");
        let sig = Signature::new("fixture", "fixture@localhost", &Time::new(1_700_000_000, 0)).expect("sig");
        let parents: Vec<_> = parent
            .map(|p| repo.find_commit(p).expect("parent"))
            .into_iter()
            .collect();
        let parent_refs: Vec<_> = parents.iter().collect();
        let oid = repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .expect("commit");
        repo.reference(&format!("refs/heads/{branch}"), oid, true, "fixture")
            .expect("ref");
        oid
    }

    pub fn tip(&self, branch: &str) -> Option<Oid> {
        self.repo.refname_to_id(&format!("refs/heads/{branch}")).ok()
    }

    pub fn files_at(&self, commit: Oid) -> BTreeMap<String, String> {
        files_at(&self.repo, commit)
    }

    pub fn parents(&self, commit: Oid) -> Vec<Oid> {
        self.repo
            .find_commit(commit)
            .expect("commit")
            .parent_ids()
            .collect()
    }
}

/// Every blob reachable from `commit`'s tree, keyed by path.
pub fn files_at(repo: &Repository, commit: Oid) -> BTreeMap<String, String> {
    let tree = repo.find_commit(commit).expect("commit").tree().expect("tree");
    let mut files = BTreeMap::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if let Ok(blob) = entry.to_object(repo).and_then(|o| o.peel_to_blob()) {
            let name = entry.name().unwrap_or_default();
            files.insert(
                format!("{root}{name}"),
                String::from_utf8_lossy(blob.content()).into_owned(),
            );
        }
        TreeWalkResult::Ok
    })
    .expect("walk");
    files
}

/// Artifact input directory.
pub fn input_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("input");
    write_files(dir.path(), files);
    dir
}

/// Replace the content of an input directory.
pub fn rewrite_input(dir: &Path, files: &[(&str, &str)]) {
    for entry in fs::read_dir(dir).expect("read_dir") {
        let path = entry.expect("entry").path();
        if path.is_dir() {
            fs::remove_dir_all(&path).expect("rm dir");
        } else {
            fs::remove_file(&path).expect("rm file");
        }
    }
    write_files(dir, files);
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        fs::write(full, content).expect("write");
    }
}

/// Configuration against `remote` with a fixed head and commit time.
pub fn config(remote: &Remote, input: &Path, output_paths: &[&str]) -> SyncConfig {
    let mut config = SyncConfig::for_repo(remote.url()).expect("config");
    config.input_path = input.to_path_buf();
    config.output_paths = output_paths.iter().map(|p| (*p).to_owned()).collect();
    config.head = BranchName::new("auto/sync/test").expect("head");
    config.commit_time = CommitTime::parse(FIXED_TIME).expect("time");
    config
}
