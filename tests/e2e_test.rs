#![allow(clippy::unwrap_used, clippy::expect_used)]

use git2::{Repository, Signature};
use git_stagehand::linemap::{LayoutOptions, RowType, Side};
use git_stagehand::patch::Selection;
use git_stagehand::status::{EntryKey, RowKind, Section};
use git_stagehand::view::{StageOutcome, StatusView, StatusViewOptions, open_conflict};
use git_stagehand::watcher::{WatchOptions, WatchSignal};
use git_stagehand::{
    Config, DiffRequest, DiffView, Operation, ProcessExecutor, RepoRegistry, RepoState,
    SelectionError, Stagehand, ViewError,
};
use similar_asserts::assert_eq;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture for a git repository
struct Fixture {
    dir: TempDir,
    repo: Repository,
}

impl Fixture {
    /// Create a new empty repo with deterministic config
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("Failed to init repo");

        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        config.set_bool("commit.gpgsign", false).unwrap();

        Self { dir, repo }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn stage_file(&self, name: &str) {
        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    fn commit(&self, message: &str) {
        let sig = Signature::new(
            "Test User",
            "test@example.com",
            &git2::Time::new(1234567890, 0),
        )
        .unwrap();
        let tree_id = self.repo.index().unwrap().write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        if self.repo.head().is_ok() {
            let parent = self.repo.head().unwrap().peel_to_commit().unwrap();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .unwrap();
        } else {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
                .unwrap();
        }
    }

    /// Commit `content` as `name`
    fn commit_file(&self, name: &str, content: &str) {
        self.write_file(name, content);
        self.stage_file(name);
        self.commit(&format!("add {name}"));
    }

    /// Run git in the repo, returning stdout whatever the exit status
    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(self.path())
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .expect("Failed to run git");
        String::from_utf8(output.stdout).unwrap()
    }

    /// Content of `name` in the index
    fn index_content(&self, name: &str) -> String {
        self.git(&["show", &format!(":{name}")])
    }

    fn git_diff_cached(&self, file: &str) -> String {
        self.git(&["diff", "--cached", "--no-ext-diff", "--no-color", "--", file])
    }

    fn git_diff(&self, file: &str) -> String {
        self.git(&["diff", "--no-ext-diff", "--no-color", "--", file])
    }

    async fn repo_state(&self) -> Arc<RepoState<ProcessExecutor>> {
        Arc::new(
            RepoState::discover(ProcessExecutor::default(), self.path())
                .await
                .unwrap(),
        )
    }

    async fn stagehand(&self) -> Stagehand {
        Stagehand::open(&mut RepoRegistry::default(), self.path(), Config::default())
            .await
            .unwrap()
    }
}

fn numbered(lines: impl IntoIterator<Item = String>) -> String {
    lines.into_iter().map(|line| line + "\n").collect()
}

/// 1..=20, one per line
fn twenty() -> String {
    numbered((1..=20).map(|n| n.to_string()))
}

/// `twenty()` without 3, with 10 replaced by "ten" and "twenty-one" appended
fn twenty_edited() -> String {
    let mut lines: Vec<String> = (1..=20)
        .filter(|&n| n != 3)
        .map(|n| if n == 10 { "ten".to_string() } else { n.to_string() })
        .collect();
    lines.push("twenty-one".to_string());
    numbered(lines)
}

const HELLO_BEFORE: &str = "\
local M = {}
function M.run()
  print(\"run\")
end
return M
";

const HELLO_AFTER: &str = "\
local M = {}
function M.greet(name)
  return \"hello \" .. name
end
function M.run()
  print(\"running\")
end
return M
";

#[tokio::test]
async fn stage_rows_from_diff_view() {
    let fixture = Fixture::new();
    fixture.commit_file("hello.lua", HELLO_BEFORE);
    fixture.write_file("hello.lua", HELLO_AFTER);

    let mut view = DiffView::open(
        fixture.repo_state().await,
        DiffRequest::unstaged(),
        LayoutOptions::default(),
    )
    .await
    .unwrap();

    let right = view.buffers().right.rows();
    let start = right
        .iter()
        .position(|row| row.text == "function M.greet(name)")
        .unwrap();
    assert!(right[start..=start + 2].iter().all(|row| row.kind == RowType::Add));
    assert_eq!(right[start + 2].text, "end");

    let patch = view
        .stage_selection(Selection::Rows(start..=start + 2))
        .await
        .unwrap();
    assert_eq!(patch.changed, 3);

    assert_eq!(
        fixture.index_content("hello.lua"),
        "\
local M = {}
function M.greet(name)
  return \"hello \" .. name
end
function M.run()
  print(\"run\")
end
return M
"
    );
    let staged = fixture.git_diff_cached("hello.lua");
    assert!(staged.contains("+function M.greet(name)"));
    assert!(!staged.contains("running"));

    // The view re-read the diff; only the print change is left
    let unstaged = fixture.git_diff("hello.lua");
    assert!(unstaged.contains("-  print(\"run\")"));
    assert!(unstaged.contains("+  print(\"running\")"));
    assert!(!unstaged.contains("greet"));
    assert!(view.spec().files[0].hunks.iter().all(|hunk| {
        hunk.lines
            .iter()
            .filter(|line| line.kind.is_change())
            .all(|line| line.text.contains("print"))
    }));
}

#[tokio::test]
async fn every_line_staged_matches_git_add() {
    let by_line = Fixture::new();
    let by_file = Fixture::new();
    for fixture in [&by_line, &by_file] {
        fixture.commit_file("numbers.txt", &twenty());
        fixture.write_file("numbers.txt", &twenty_edited());
    }

    let changed = by_line
        .stagehand()
        .await
        .apply(
            Operation::Stage,
            &["numbers.txt:-3,-10,9,20".parse().unwrap()],
        )
        .await
        .unwrap();
    assert_eq!(changed, 4);
    by_file.git(&["add", "numbers.txt"]);

    assert_eq!(
        by_line.index_content("numbers.txt"),
        by_file.index_content("numbers.txt")
    );
    assert_eq!(by_line.git_diff("numbers.txt"), "");
}

#[tokio::test]
async fn subset_then_rest_matches_whole_hunk() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());
    let stagehand = fixture.stagehand().await;

    stagehand
        .apply(Operation::Stage, &["numbers.txt:-3".parse().unwrap()])
        .await
        .unwrap();
    let partial = fixture.index_content("numbers.txt");
    assert!(!partial.lines().any(|line| line == "3"));
    assert!(partial.lines().any(|line| line == "10"));

    // Index numbering shifted: old 10 is now line 9
    stagehand
        .apply(Operation::Stage, &["numbers.txt:-9,9,20".parse().unwrap()])
        .await
        .unwrap();

    assert_eq!(fixture.index_content("numbers.txt"), twenty_edited());
    assert_eq!(fixture.git_diff("numbers.txt"), "");
}

#[tokio::test]
async fn unstage_restores_index() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());
    let stagehand = fixture.stagehand().await;

    // The addition of "ten" without the deletion of "10" keeps both
    stagehand
        .apply(Operation::Stage, &["numbers.txt:-3,9".parse().unwrap()])
        .await
        .unwrap();
    let mut expected: Vec<String> = (1..=20).filter(|&n| n != 3).map(|n| n.to_string()).collect();
    expected.insert(9, "ten".to_string());
    assert_eq!(fixture.index_content("numbers.txt"), numbered(expected));

    stagehand
        .apply(Operation::Unstage, &["numbers.txt".parse().unwrap()])
        .await
        .unwrap();

    assert_eq!(fixture.index_content("numbers.txt"), twenty());
    assert_eq!(fixture.git_diff_cached("numbers.txt"), "");
    assert_eq!(
        fs::read_to_string(fixture.path().join("numbers.txt")).unwrap(),
        twenty_edited()
    );
}

#[tokio::test]
async fn unstage_by_cached_line_numbers() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());
    let stagehand = fixture.stagehand().await;

    stagehand
        .apply(Operation::Stage, &["numbers.txt:-3,9".parse().unwrap()])
        .await
        .unwrap();
    // "ten" sits after the kept "10" in the index, one line lower than in the worktree
    assert_eq!(
        stagehand.diff(&[], true).await.unwrap(),
        "numbers.txt:\n  -3:\t3\n  +10:\tten\n"
    );

    let lines = stagehand
        .apply(Operation::Unstage, &["numbers.txt:-3,10".parse().unwrap()])
        .await
        .unwrap();

    assert_eq!(lines, 2);
    assert_eq!(fixture.index_content("numbers.txt"), twenty());
    assert_eq!(fixture.git_diff_cached("numbers.txt"), "");
    assert_eq!(stagehand.diff(&[], true).await.unwrap(), "");
}

#[tokio::test]
async fn registry_shares_state_across_subdirectories() {
    let fixture = Fixture::new();
    fixture.commit_file("sub/notes.txt", "one\n");
    let mut registry = RepoRegistry::default();

    let top = Stagehand::open(&mut registry, fixture.path(), Config::default())
        .await
        .unwrap();
    let nested = Stagehand::open(&mut registry, &fixture.path().join("sub"), Config::default())
        .await
        .unwrap();

    assert!(Arc::ptr_eq(top.repo(), nested.repo()));
    assert_eq!(registry.live(), 1);

    drop(top);
    drop(nested);
    assert_eq!(registry.live(), 0);
}

#[tokio::test]
async fn discard_reverts_worktree_lines() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());

    fixture
        .stagehand()
        .await
        .apply(Operation::Discard, &["numbers.txt:20".parse().unwrap()])
        .await
        .unwrap();

    let worktree = fs::read_to_string(fixture.path().join("numbers.txt")).unwrap();
    assert!(!worktree.contains("twenty-one"));
    assert!(worktree.contains("ten"));
    assert_eq!(fixture.git_diff_cached("numbers.txt"), "");
}

#[tokio::test]
async fn context_row_stages_nothing() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());

    let mut view = DiffView::open(
        fixture.repo_state().await,
        DiffRequest::unstaged(),
        LayoutOptions::default(),
    )
    .await
    .unwrap();
    let row = view
        .buffers()
        .right
        .rows()
        .iter()
        .position(|row| row.kind == RowType::Context)
        .unwrap();

    let result = view.stage_selection(Selection::Row(row)).await;
    assert!(matches!(
        result,
        Err(ViewError::SelectionError(SelectionError::NothingToStage))
    ));
    assert_eq!(fixture.git_diff_cached("numbers.txt"), "");
}

fn conflicted() -> Fixture {
    let fixture = Fixture::new();
    fixture.commit_file("conflict.txt", "base\n");
    fixture.git(&["checkout", "-q", "-b", "side"]);
    fixture.write_file("conflict.txt", "side\n");
    fixture.git(&["commit", "-q", "-am", "side"]);
    fixture.git(&["checkout", "-q", "-"]);
    fixture.write_file("conflict.txt", "main\n");
    fixture.git(&["commit", "-q", "-am", "main"]);
    fixture.git(&["merge", "-q", "side"]);
    fixture
}

fn no_watch() -> StatusViewOptions {
    StatusViewOptions {
        watch: None,
        ..StatusViewOptions::default()
    }
}

#[tokio::test]
async fn conflict_markers_need_confirmation() {
    let fixture = conflicted();
    assert_eq!(fixture.git(&["diff", "--name-only", "--diff-filter=U"]), "conflict.txt\n");

    let mut view = StatusView::open(fixture.repo_state().await, no_watch())
        .await
        .unwrap();
    let key = EntryKey {
        section: Section::Conflicted,
        path: "conflict.txt".to_string(),
    };
    let row = view.tree().entry_row(&key).unwrap();

    let mut prompts = Vec::new();
    let outcome = view
        .stage(row, &mut |prompt: &str| {
            prompts.push(prompt.to_string());
            false
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        StageOutcome::Declined {
            path: "conflict.txt".to_string()
        }
    );
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("conflict markers"));
    assert!(view.tree().entry(&key).is_some());
    assert_eq!(fixture.git(&["diff", "--name-only", "--diff-filter=U"]), "conflict.txt\n");

    let row = view.tree().entry_row(&key).unwrap();
    view.stage(row, &mut |_: &str| true).await.unwrap();
    assert_eq!(fixture.git(&["diff", "--name-only", "--diff-filter=U"]), "");
    assert!(view.tree().entry(&key).is_none());
    assert!(
        view.tree()
            .snapshot()
            .section(Section::Staged)
            .any(|entry| entry.path == "conflict.txt")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn untracked_script_expands_as_executable() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    fixture.commit_file("notes.txt", "one\n");
    fixture.write_file("run.sh", "#!/bin/sh\necho hi\n");
    let script = fixture.path().join("run.sh");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut view = StatusView::open(fixture.repo_state().await, no_watch())
        .await
        .unwrap();
    let key = EntryKey {
        section: Section::Untracked,
        path: "run.sh".to_string(),
    };
    view.toggle_expand(view.tree().entry_row(&key).unwrap())
        .await
        .unwrap();

    let diff = view.tree().entry(&key).unwrap().diff.as_ref().unwrap();
    assert_eq!(diff.new_mode.as_deref(), Some("100755"));
    assert!(view.tree().rows().iter().any(|row| row.text == "+echo hi"));
}

#[tokio::test]
async fn status_view_stages_one_line() {
    let fixture = Fixture::new();
    fixture.commit_file("notes.txt", "one\nfour\n");
    fixture.write_file("notes.txt", "one\ntwo\nthree\nfour\n");

    let mut view = StatusView::open(fixture.repo_state().await, no_watch())
        .await
        .unwrap();
    let key = EntryKey {
        section: Section::Unstaged,
        path: "notes.txt".to_string(),
    };
    view.toggle_expand(view.tree().entry_row(&key).unwrap())
        .await
        .unwrap();
    let row = view
        .tree()
        .rows()
        .iter()
        .position(|row| row.text == "+two")
        .unwrap();

    let outcome = view.stage(row, &mut |_: &str| true).await.unwrap();
    assert_eq!(
        outcome,
        StageOutcome::Patched {
            path: "notes.txt".to_string(),
            lines: 1
        }
    );
    assert_eq!(fixture.index_content("notes.txt"), "one\ntwo\nfour\n");
    assert!(view.tree().is_expanded(&key));
    assert!(!view.tree().rows().iter().any(|row| row.text == "+two"));
    assert!(view.tree().rows().iter().any(|row| row.text == "+three"));
}

#[tokio::test]
async fn stale_then_refresh_keeps_expansion_and_cursor() {
    let fixture = Fixture::new();
    fixture.commit_file("notes.txt", "one\n");
    fixture.write_file("notes.txt", "one\nadded\n");

    let options = StatusViewOptions {
        watch: Some(WatchOptions::default()),
        ..StatusViewOptions::default()
    };
    let mut view = StatusView::open(fixture.repo_state().await, options)
        .await
        .unwrap();
    assert!(view.is_watching());

    let key = EntryKey {
        section: Section::Unstaged,
        path: "notes.txt".to_string(),
    };
    view.toggle_expand(view.tree().entry_row(&key).unwrap())
        .await
        .unwrap();
    let row = view
        .tree()
        .rows()
        .iter()
        .position(|row| row.text == "+added")
        .unwrap();
    view.tree_mut().set_cursor(row);

    fixture.git(&["branch", "feature"]);
    let signal = tokio::time::timeout(Duration::from_secs(10), view.next_signal())
        .await
        .expect("no change noticed")
        .unwrap();
    assert!(matches!(signal, WatchSignal::Stale { .. }));
    view.handle_signal(signal).await.unwrap();
    assert!(view.is_stale());

    view.refresh().await.unwrap();
    assert!(!view.is_stale());
    assert!(view.tree().is_expanded(&key));
    let cursor = view.tree().cursor();
    assert_eq!(view.tree().rows()[cursor].text, "+added");
    assert!(matches!(
        view.tree().rows()[cursor].kind,
        RowKind::HunkLine { .. }
    ));
}

#[tokio::test]
async fn diff_lists_line_numbers_for_selections() {
    let fixture = Fixture::new();
    fixture.commit_file("numbers.txt", &twenty());
    fixture.write_file("numbers.txt", &twenty_edited());
    let stagehand = fixture.stagehand().await;

    assert_eq!(
        stagehand.diff(&[], false).await.unwrap(),
        "numbers.txt:\n  -3:\t3\n  -10:\t10\n  +9:\tten\n  +20:\ttwenty-one\n"
    );
    assert_eq!(stagehand.diff(&[], true).await.unwrap(), "");
}

#[tokio::test]
async fn conflict_sides_align_on_worktree() {
    let fixture = conflicted();
    let repo = fixture.repo_state().await;

    let triple = open_conflict(&repo, "conflict.txt").await.unwrap().unwrap();
    let worktree = fs::read_to_string(fixture.path().join("conflict.txt")).unwrap();
    assert_eq!(triple.get_real_lines(), worktree.lines().collect::<Vec<_>>());
    assert_eq!(triple.ours.get_real_lines(None), vec!["main"]);
    assert_eq!(triple.theirs.get_real_lines(None), vec!["side"]);
}

#[tokio::test]
async fn edited_worktree_side_is_written_back() {
    let fixture = Fixture::new();
    fixture.commit_file("notes.txt", "one\ntwo\n");
    fixture.write_file("notes.txt", "one\ntwo\nthree\n");

    let mut view = DiffView::open(
        fixture.repo_state().await,
        DiffRequest::unstaged(),
        LayoutOptions::default(),
    )
    .await
    .unwrap();
    let row = view
        .buffers()
        .right
        .rows()
        .iter()
        .position(|row| row.text == "three")
        .unwrap();
    view.edit(Side::Right, row..row + 1, vec!["THREE".to_string(), "four".to_string()])
        .unwrap();
    assert!(view.has_pending_edits());

    view.write_back(Side::Right, 0).await.unwrap();

    assert_eq!(
        fs::read_to_string(fixture.path().join("notes.txt")).unwrap(),
        "one\ntwo\nTHREE\nfour\n"
    );
    assert!(!view.has_pending_edits());
    assert_eq!(fixture.index_content("notes.txt"), "one\ntwo\n");
}
