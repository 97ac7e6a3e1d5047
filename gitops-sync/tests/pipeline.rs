mod common;

use std::sync::Mutex;
use std::thread;

use tokio_util::sync::CancellationToken;

use gitops_core::{BranchName, RepoSlug};
use gitops_github::{CommitInfo, GitHubError, HostingApi, NewPullRequest, PullRequest, User};
use gitops_sync::{run, MergeOutcome, PrOutcome, PushOutcome, SyncError};

use common::{config, input_dir, rewrite_input, Remote};

const HEAD: &str = "auto/sync/test";

#[test]
fn publishes_resyncs_and_updates_a_single_file() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("template.yaml", "a")]);
    let cfg = config(&remote, input.path(), &["bases/app"]);

    let first = run(&cfg, None, CancellationToken::new()).unwrap();
    assert_eq!(first.push, Some(PushOutcome::Pushed));
    assert_eq!(remote.tip(HEAD), Some(first.commit));
    let files = remote.files_at(first.commit);
    assert_eq!(files.len(), 1);
    assert_eq!(files["bases/app/template.yaml"], "a");

    let again = run(&cfg, None, CancellationToken::new()).unwrap();
    assert_eq!(again.commit, first.commit);
    assert_eq!(again.push, Some(PushOutcome::UpToDate));
    assert_eq!(remote.tip(HEAD), Some(first.commit));

    rewrite_input(input.path(), &[("template.yaml", "b")]);
    let changed = run(&cfg, None, CancellationToken::new()).unwrap();
    assert_ne!(changed.commit, first.commit);
    assert_eq!(remote.tip(HEAD), Some(changed.commit));

    let before = remote.files_at(first.commit);
    let after = remote.files_at(changed.commit);
    let differing: Vec<_> = after
        .iter()
        .filter(|(path, content)| before.get(*path) != Some(*content))
        .collect();
    assert_eq!(differing.len(), 1);
    assert_eq!(after["bases/app/template.yaml"], "b");
}

#[test]
fn files_missing_from_input_are_deleted_everywhere() {
    let remote = Remote::with_base(&[("README.md", "hello")]);
    let input = input_dir(&[("keep.yaml", "1"), ("drop.yaml", "2")]);
    let cfg = config(&remote, input.path(), &["eu", "us"]);
    run(&cfg, None, CancellationToken::new()).unwrap();

    rewrite_input(input.path(), &[("keep.yaml", "1")]);
    let result = run(&cfg, None, CancellationToken::new()).unwrap();
    let files = remote.files_at(result.commit);
    assert_eq!(
        files.keys().map(String::as_str).collect::<Vec<_>>(),
        ["README.md", "eu/keep.yaml", "us/keep.yaml"]
    );
}

#[test]
fn output_paths_do_not_leak_into_each_other() {
    let remote = Remote::with_base(&[("overlays/b/own.yaml", "b-only")]);
    let input = input_dir(&[("app/deploy.yaml", "x")]);
    let cfg = config(&remote, input.path(), &["overlays/a"]);
    let result = run(&cfg, None, CancellationToken::new()).unwrap();

    let files = remote.files_at(result.commit);
    assert_eq!(files["overlays/a/app/deploy.yaml"], "x");
    assert_eq!(files["overlays/b/own.yaml"], "b-only");
    assert!(!files.contains_key("overlays/b/app/deploy.yaml"));
    assert!(!files.contains_key("overlays/a/own.yaml"));
}

#[test]
fn sync_to_root_keeps_nothing_stale() {
    let remote = Remote::with_base(&[("old.yaml", "stale")]);
    let input = input_dir(&[("new.yaml", "fresh")]);
    let cfg = config(&remote, input.path(), &["."]);
    let result = run(&cfg, None, CancellationToken::new()).unwrap();

    let files = remote.files_at(result.commit);
    assert_eq!(files.len(), 1);
    assert_eq!(files["new.yaml"], "fresh");
}

#[test]
fn identical_concurrent_syncs_all_succeed() {
    for round in 0..5 {
        let remote = Remote::with_base(&[("README.md", "hello")]);
        let input = input_dir(&[("template.yaml", "same")]);
        let cfg = config(&remote, input.path(), &["bases/app"]);

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let cfg = cfg.clone();
                    scope.spawn(move || run(&cfg, None, CancellationToken::new()).map(|r| (r.commit, r.push)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .collect()
        });

        let tip = remote.tip(HEAD).expect("head pushed");
        let pushed = results
            .iter()
            .filter(|r| matches!(r, Ok((_, Some(PushOutcome::Pushed)))))
            .count();
        for result in &results {
            match result {
                Ok((commit, _)) => assert_eq!(*commit, tip, "round {round}"),
                Err(err) => panic!("round {round}: {err}"),
            }
        }
        assert_eq!(pushed, 1, "round {round}");
    }
}

#[test]
fn missing_base_branch_fails_before_syncing() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.base = BranchName::new("release").unwrap();

    let err = run(&cfg, None, CancellationToken::new()).err().expect("error");
    assert!(matches!(err, SyncError::BaseBranchMissing { ref branch } if branch == "release"));
    assert_eq!(remote.tip(HEAD), None);
}

#[test]
fn dry_run_commits_locally_but_pushes_nothing() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.dry_run = true;

    let result = run(&cfg, None, CancellationToken::new()).unwrap();
    assert_eq!(result.push, None);
    assert_eq!(remote.tip(HEAD), None);
    assert!(result.session.repo().find_commit(result.commit).is_ok());
}

#[test]
fn cancelled_run_stops_before_cloning() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let cfg = config(&remote, input.path(), &["."]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run(&cfg, None, cancel).err().expect("error");
    assert!(matches!(err, SyncError::Cancelled { .. }));
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[test]
fn merge_overwrites_managed_path_and_keeps_the_rest() {
    let remote = Remote::with_base(&[]);
    remote.commit(
        "main",
        None,
        &[("bases/app/template.yaml", "hand edit"), ("docs/notes.md", "keep me")],
        "main history",
    );
    let main_before = remote.tip("main").unwrap();
    let input = input_dir(&[("template.yaml", "synced")]);
    let mut cfg = config(&remote, input.path(), &["bases/app"]);
    cfg.merge_base = Some(BranchName::new("main").unwrap());

    let result = run(&cfg, None, CancellationToken::new()).unwrap();
    let Some(MergeOutcome::Merged { commit, push }) = result.merge else {
        panic!("expected a merge, got {:?}", result.merge);
    };
    assert_eq!(push, PushOutcome::Pushed);
    assert_eq!(remote.tip("main"), Some(commit));
    assert_eq!(remote.parents(commit), vec![main_before, result.commit]);

    let files = remote.files_at(commit);
    assert_eq!(files["bases/app/template.yaml"], "synced");
    assert_eq!(files["docs/notes.md"], "keep me");

    let again = run(&cfg, None, CancellationToken::new()).unwrap();
    assert_eq!(again.merge, Some(MergeOutcome::Skipped));
    assert_eq!(remote.tip("main"), Some(commit));
}

#[test]
fn merge_records_ancestry_even_without_content_changes() {
    let remote = Remote::with_base(&[]);
    let main_before = remote.commit("main", None, &[("bases/app/template.yaml", "a")], "already there");
    let input = input_dir(&[("template.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["bases/app"]);
    cfg.merge_base = Some(BranchName::new("main").unwrap());

    let result = run(&cfg, None, CancellationToken::new()).unwrap();
    let Some(MergeOutcome::Merged { commit, push }) = result.merge else {
        panic!("expected a merge, got {:?}", result.merge);
    };
    assert_eq!(push, PushOutcome::Pushed);
    assert_ne!(commit, main_before);
    assert_eq!(remote.tip("main"), Some(commit));
    assert!(remote.parents(commit).contains(&result.commit));
}

#[test]
fn missing_merge_base_is_reported() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.merge_base = Some(BranchName::new("main").unwrap());

    let err = run(&cfg, None, CancellationToken::new()).err().expect("error");
    assert!(matches!(err, SyncError::BaseBranchMissing { ref branch } if branch == "main"));
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeHub {
    open: Mutex<Vec<PullRequest>>,
    created: Mutex<Vec<NewPullRequest>>,
}

impl HostingApi for FakeHub {
    fn current_user(&self) -> Result<User, GitHubError> {
        Ok(User {
            login: "deploy-bot".into(),
            name: Some("Deploy Bot".into()),
            email: Some("bot@example.com".into()),
        })
    }

    fn commit(&self, _repo: &RepoSlug, sha: &str) -> Result<CommitInfo, GitHubError> {
        Err(GitHubError::Status {
            status: 404,
            endpoint: format!("/commits/{sha}"),
            message: "Not Found".into(),
        })
    }

    fn list_open_pulls(
        &self,
        _repo: &RepoSlug,
        head: &str,
        base: &str,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        assert_eq!((head, base), (HEAD, "develop"));
        Ok(self.open.lock().unwrap().clone())
    }

    fn create_pull(
        &self,
        _repo: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GitHubError> {
        self.created.lock().unwrap().push(request.clone());
        let pr = PullRequest {
            number: 7,
            html_url: "https://github.example/org/repo/pull/7".into(),
            title: request.title.clone(),
            draft: request.draft,
        };
        self.open.lock().unwrap().push(pr.clone());
        Ok(pr)
    }
}

#[test]
fn pull_request_is_opened_once_as_draft() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.pr_base = Some(BranchName::new("develop").unwrap());
    cfg.pr_title = "Deploy a".into();
    let hub = FakeHub::default();

    let first = run(&cfg, Some(&hub), CancellationToken::new()).unwrap();
    assert!(matches!(first.pull_request, Some(PrOutcome::Created(ref pr)) if pr.number == 7));
    assert_eq!(first.pull_request_url(), Some("https://github.example/org/repo/pull/7"));
    {
        let created = hub.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(created[0].draft);
        assert_eq!(created[0].title, "Deploy a");
    }

    let second = run(&cfg, Some(&hub), CancellationToken::new()).unwrap();
    assert!(matches!(second.pull_request, Some(PrOutcome::Existing(_))));
    assert_eq!(second.pull_request_url(), first.pull_request_url());
    assert_eq!(hub.created.lock().unwrap().len(), 1);
}

#[test]
fn pull_request_is_skipped_when_base_already_holds_the_commit() {
    let remote = Remote::with_base(&[("a.yaml", "a")]);
    let base_tip = remote.tip("develop").unwrap();
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.pr_base = Some(BranchName::new("develop").unwrap());
    let hub = FakeHub::default();

    let result = run(&cfg, Some(&hub), CancellationToken::new()).unwrap();
    assert_eq!(result.commit, base_tip);
    assert_eq!(result.pull_request, Some(PrOutcome::Skipped));
    assert_eq!(result.pull_request_url(), None);
    assert!(hub.created.lock().unwrap().is_empty());
    assert_eq!(remote.tip("develop"), Some(base_tip));
}

#[test]
fn api_identity_signs_the_commit() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let cfg = config(&remote, input.path(), &["."]);
    let hub = FakeHub::default();

    let result = run(&cfg, Some(&hub), CancellationToken::new()).unwrap();
    let commit = remote.repo.find_commit(result.commit).unwrap();
    assert_eq!(commit.author().name(), Some("Deploy Bot"));
    assert_eq!(commit.committer().email(), Some("bot@example.com"));
}

#[test]
fn pull_request_without_api_is_rejected_up_front() {
    let remote = Remote::with_base(&[]);
    let input = input_dir(&[("a.yaml", "a")]);
    let mut cfg = config(&remote, input.path(), &["."]);
    cfg.pr_base = Some(BranchName::new("develop").unwrap());

    let err = run(&cfg, None, CancellationToken::new()).err().expect("error");
    assert!(matches!(err, SyncError::MissingApiAuth));
    assert_eq!(remote.tip(HEAD), None);
}
