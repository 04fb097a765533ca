// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::descriptor::DepType;

/// Writes a small fixed payload and counts invocations.
#[derive(Debug, Default)]
struct FakeFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(dest.join("src"))?;
        std::fs::write(dest.join("README"), format!("{} at {}\n", dep.name, dep.version))?;
        std::fs::write(dest.join("src/hello.c"), "int main(void) { return 0; }\n")?;
        Ok(())
    }
}

/// Leaves a partial payload behind and then fails.
struct BrokenFetcher;

#[async_trait]
impl Fetcher for BrokenFetcher {
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("partial"), "half")?;
        Err(Error::FetchFailed {
            name: dep.name.clone(),
            message: "connection reset".to_string(),
        })
    }
}

/// Reports success without producing anything.
struct EmptyFetcher;

#[async_trait]
impl Fetcher for EmptyFetcher {
    async fn fetch(&self, _dep: &ExtDep, _dest: &Path) -> Result<()> {
        Ok(())
    }
}

/// Writes a payload large enough that hashing it takes a while.
struct BulkyFetcher;

#[async_trait]
impl Fetcher for BulkyFetcher {
    async fn fetch(&self, dep: &ExtDep, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest.join("blobs"))?;
        std::fs::write(dest.join("README"), format!("{} at {}\n", dep.name, dep.version))?;
        let chunk = vec![0x5a_u8; 64 * 1024];
        for i in 0..512 {
            std::fs::write(dest.join(format!("blobs/{i:04}.bin")), &chunk)?;
        }
        Ok(())
    }
}

/// Writes a payload and then never finishes.
struct StalledFetcher;

#[async_trait]
impl Fetcher for StalledFetcher {
    async fn fetch(&self, _dep: &ExtDep, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("README"), "incomplete\n")?;
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[fixture]
fn tmpdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("sdenv-test-")
        .tempdir()
        .expect("create a temp directory for test files")
}

fn make_dependency(root: &Path, version: &str) -> Dependency {
    Dependency {
        identifier: Some("hello-world".to_string()),
        source_path: root.join("deps/hello_ext_dep.yaml"),
        spec: ExtDep {
            dep_type: DepType::Git,
            name: "HelloWorld".to_string(),
            version: version.to_string(),
            source: "https://github.com/octocat/Hello-World.git".to_string(),
            verify: true,
            var_name: None,
            flags: Default::default(),
        },
    }
}

fn staging_dirs(contents: &Path) -> Vec<String> {
    std::fs::read_dir(contents)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(STAGING_PREFIX))
        .collect()
}

#[rstest]
fn test_layout(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let contents = tmpdir.path().join("deps/HelloWorld_extdep");
    assert_eq!(dep.contents_dir(), contents);
    assert_eq!(dep.payload_dir(), contents.join("HelloWorld"));
    assert_eq!(dep.state_path(), contents.join(STATE_FILENAME));
    assert_eq!(dep.label(), "hello-world");
}

#[rstest]
fn test_label_falls_back_to_name(tmpdir: TempDir) {
    let mut dep = make_dependency(tmpdir.path(), "aaa");
    dep.identifier = None;
    assert_eq!(dep.label(), "HelloWorld");
}

#[rstest]
fn test_from_descriptor() {
    let descriptor = Descriptor::from_yaml(
        crate::descriptor::DescriptorFileKind::ExtDep,
        "id: hello\ntype: nuget\nname: mu_nasm\nversion: 2.16.1\nsource: https://api.nuget.org/v3/index.json\n",
        "/ws/tools/nasm_ext_dep.yaml",
    )
    .unwrap();
    let dep = Dependency::from_descriptor(&descriptor).expect("ext dep descriptor");
    assert_eq!(dep.identifier.as_deref(), Some("hello"));
    assert_eq!(dep.spec.dep_type, DepType::Nuget);
    assert_eq!(
        dep.payload_dir(),
        PathBuf::from("/ws/tools/mu_nasm_extdep/mu_nasm")
    );
}

#[rstest]
fn test_unmaterialized(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    assert_eq!(
        check_dependency(&dep).unwrap(),
        DependencyStatus::Unmaterialized
    );
    assert!(!DependencyStatus::Unmaterialized.passed());
}

#[rstest]
#[tokio::test]
async fn test_update_then_verify_clean(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let fetcher = FakeFetcher::default();
    let locks = DependencyLocks::new();

    let outcome = update_dependency(&dep, &fetcher, &locks, false).await.unwrap();
    let state = match outcome {
        UpdateOutcome::Updated(state) => state,
        other => panic!("Expected an update, got: {other:?}"),
    };
    assert_eq!(state.version, "aaa");
    assert_eq!(state.identifier.as_deref(), Some("hello-world"));
    assert!(state.verify);
    assert!(state.updated.is_some());

    assert!(dep.payload_dir().join("README").is_file());
    let recorded = dep.load_state().unwrap().expect("state written");
    assert_eq!(recorded.fingerprint, state.fingerprint);
    assert_eq!(recorded.version, state.version);
    assert!(staging_dirs(&dep.contents_dir()).is_empty());

    let status = verify_dependency(&dep, &locks).await.unwrap();
    assert_eq!(status, DependencyStatus::Clean);
    assert!(status.passed());
}

#[rstest]
#[tokio::test]
async fn test_update_is_idempotent(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let fetcher = FakeFetcher::default();
    let locks = DependencyLocks::new();

    update_dependency(&dep, &fetcher, &locks, false).await.unwrap();
    let state_before = std::fs::read_to_string(dep.state_path()).unwrap();

    let outcome = update_dependency(&dep, &fetcher, &locks, false).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::UpToDate(DependencyStatus::Clean));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(dep.state_path()).unwrap(), state_before);

    let outcome = update_dependency(&dep, &fetcher, &locks, true).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Updated(_)));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[tokio::test]
async fn test_removed_file_is_drift(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let locks = DependencyLocks::new();
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    std::fs::remove_file(dep.payload_dir().join("README")).unwrap();
    let state_before = std::fs::read_to_string(dep.state_path()).unwrap();

    let status = verify_dependency(&dep, &locks).await.unwrap();
    assert_eq!(status, DependencyStatus::Dirty(DriftReason::ContentsChanged));

    // Verification never repairs or rewrites anything.
    assert!(!dep.payload_dir().join("README").exists());
    assert_eq!(std::fs::read_to_string(dep.state_path()).unwrap(), state_before);

    // A plain update notices the drift and re-materializes.
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();
    assert_eq!(check_dependency(&dep).unwrap(), DependencyStatus::Clean);
}

#[rstest]
#[tokio::test]
async fn test_modified_file_is_drift(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let locks = DependencyLocks::new();
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    std::fs::write(dep.payload_dir().join("src/hello.c"), "changed\n").unwrap();
    assert_eq!(
        check_dependency(&dep).unwrap(),
        DependencyStatus::Dirty(DriftReason::ContentsChanged)
    );
}

#[rstest]
#[tokio::test]
async fn test_missing_payload_is_drift(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let locks = DependencyLocks::new();
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    std::fs::remove_dir_all(dep.payload_dir()).unwrap();
    assert_eq!(
        check_dependency(&dep).unwrap(),
        DependencyStatus::Dirty(DriftReason::PayloadMissing)
    );
}

#[rstest]
#[tokio::test]
async fn test_version_change_is_drift(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let locks = DependencyLocks::new();
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    let bumped = make_dependency(tmpdir.path(), "bbb");
    assert_eq!(
        check_dependency(&bumped).unwrap(),
        DependencyStatus::Dirty(DriftReason::VersionChanged {
            expected: "bbb".to_string(),
            recorded: "aaa".to_string(),
        })
    );

    let outcome = update_dependency(&bumped, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Updated(ref s) if s.version == "bbb"));
    let readme = std::fs::read_to_string(bumped.payload_dir().join("README")).unwrap();
    assert_eq!(readme, "HelloWorld at bbb\n");
    assert!(staging_dirs(&bumped.contents_dir()).is_empty());
}

#[rstest]
#[tokio::test]
async fn test_verify_opt_out_skips_inspection(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let fetcher = FakeFetcher::default();
    let locks = DependencyLocks::new();
    update_dependency(&dep, &fetcher, &locks, false).await.unwrap();

    // Operator opts out by hand and then breaks the payload.
    let mut state = dep.load_state().unwrap().unwrap();
    state.verify = false;
    state.save(dep.state_path()).unwrap();
    std::fs::remove_dir_all(dep.payload_dir()).unwrap();

    let status = verify_dependency(&dep, &locks).await.unwrap();
    assert_eq!(status, DependencyStatus::VerifySkipped);
    assert!(status.passed());

    // Same version: the opt-out is respected by update as well.
    let outcome = update_dependency(&dep, &fetcher, &locks, false).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::UpToDate(DependencyStatus::VerifySkipped));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    // A version change still replaces the payload.
    let bumped = make_dependency(tmpdir.path(), "bbb");
    let outcome = update_dependency(&bumped, &fetcher, &locks, false).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Updated(_)));
}

#[rstest]
fn test_unreadable_state_is_drift(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    std::fs::create_dir_all(dep.contents_dir()).unwrap();
    std::fs::write(dep.state_path(), "name: [unterminated").unwrap();

    assert!(matches!(
        check_dependency(&dep).unwrap(),
        DependencyStatus::Dirty(DriftReason::UnreadableState(_))
    ));
}

#[rstest]
#[tokio::test]
async fn test_failed_fetch_keeps_previous_state(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let locks = DependencyLocks::new();
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();
    let state_before = std::fs::read_to_string(dep.state_path()).unwrap();

    let bumped = make_dependency(tmpdir.path(), "bbb");
    let result = update_dependency(&bumped, &BrokenFetcher, &locks, false).await;
    assert!(matches!(result, Err(Error::FetchFailed { .. })));

    assert_eq!(std::fs::read_to_string(dep.state_path()).unwrap(), state_before);
    assert!(!dep.payload_dir().join("partial").exists());
    assert_eq!(check_dependency(&dep).unwrap(), DependencyStatus::Clean);
    assert!(staging_dirs(&dep.contents_dir()).is_empty());
}

#[rstest]
#[tokio::test]
async fn test_failed_first_fetch_writes_no_state(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let result = update_dependency(&dep, &BrokenFetcher, &DependencyLocks::new(), false).await;
    assert!(result.is_err());
    assert!(!dep.state_path().exists());
    assert_eq!(
        check_dependency(&dep).unwrap(),
        DependencyStatus::Unmaterialized
    );
}

#[rstest]
#[tokio::test]
async fn test_fetch_without_payload_fails(tmpdir: TempDir) {
    let dep = make_dependency(tmpdir.path(), "aaa");
    let result = update_dependency(&dep, &EmptyFetcher, &DependencyLocks::new(), false).await;
    match result {
        Err(Error::FetchFailed { name, message }) => {
            assert_eq!(name, "HelloWorld");
            assert!(message.contains("no payload"), "{message}");
        }
        other => panic!("Expected FetchFailed, got: {other:?}"),
    }
    assert!(!dep.state_path().exists());
}

#[rstest]
fn test_status_display() {
    let status = DependencyStatus::Dirty(DriftReason::VersionChanged {
        expected: "bbb".to_string(),
        recorded: "aaa".to_string(),
    });
    assert_eq!(
        status.to_string(),
        "dirty (version aaa is materialized, bbb is declared)"
    );
    assert_eq!(DependencyStatus::VerifySkipped.to_string(), "verify disabled");
}

#[rstest]
#[tokio::test]
async fn test_dropped_fetch_keeps_previous_payload(tmpdir: TempDir) {
    let locks = DependencyLocks::new();
    let old = make_dependency(tmpdir.path(), "aaa");
    update_dependency(&old, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    let new = make_dependency(tmpdir.path(), "bbb");
    {
        let mut update = std::pin::pin!(update_dependency(&new, &StalledFetcher, &locks, false));
        assert!(futures::poll!(update.as_mut()).is_pending());
    }

    assert_eq!(check_dependency(&old).unwrap(), DependencyStatus::Clean);
    assert!(old.payload_dir().join("src/hello.c").is_file());
    assert!(staging_dirs(&old.contents_dir()).is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_update_leaves_a_consistent_record(tmpdir: TempDir) {
    let locks = DependencyLocks::new();
    let old = make_dependency(tmpdir.path(), "aaa");
    update_dependency(&old, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    let new = make_dependency(tmpdir.path(), "bbb");
    {
        // the first poll fetches and then waits on the blocking fingerprint
        let mut update = std::pin::pin!(update_dependency(&new, &BulkyFetcher, &locks, false));
        let _ = futures::poll!(update.as_mut());
    }

    let recorded = old.load_state().unwrap().expect("state survives").version;
    let declared = if recorded == "aaa" { &old } else { &new };
    assert_eq!(check_dependency(declared).unwrap(), DependencyStatus::Clean);
    if recorded == "aaa" {
        assert!(old.payload_dir().join("src/hello.c").is_file());
    }
}

#[rstest]
#[tokio::test]
async fn test_failed_commit_restores_previous_payload(tmpdir: TempDir) {
    let locks = DependencyLocks::new();
    let old = make_dependency(tmpdir.path(), "aaa");
    update_dependency(&old, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();

    // a directory in place of the state file makes the final write fail
    std::fs::remove_file(old.state_path()).unwrap();
    std::fs::create_dir_all(old.state_path().join("blocker")).unwrap();

    let new = make_dependency(tmpdir.path(), "bbb");
    let result = update_dependency(&new, &FakeFetcher::default(), &locks, true).await;
    assert!(result.is_err());

    let readme = std::fs::read_to_string(old.payload_dir().join("README")).unwrap();
    assert_eq!(readme, "HelloWorld at aaa\n");
    assert!(old.payload_dir().join("src/hello.c").is_file());
    assert!(staging_dirs(&old.contents_dir()).is_empty());
}

#[rstest]
#[tokio::test]
async fn test_dependency_named_like_internal_dirs(tmpdir: TempDir) {
    let locks = DependencyLocks::new();
    let fetcher = FakeFetcher::default();
    let mut dep = make_dependency(tmpdir.path(), "aaa");
    dep.spec.name = "retired".to_string();

    update_dependency(&dep, &fetcher, &locks, false).await.unwrap();
    update_dependency(&dep, &fetcher, &locks, true).await.unwrap();
    dep.spec.version = "bbb".to_string();
    let outcome = update_dependency(&dep, &fetcher, &locks, false).await.unwrap();

    assert!(matches!(outcome, UpdateOutcome::Updated(_)));
    assert_eq!(check_dependency(&dep).unwrap(), DependencyStatus::Clean);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn test_prune_forgets_idle_locks(tmpdir: TempDir) {
    let locks = DependencyLocks::new();
    let dep = make_dependency(tmpdir.path(), "aaa");
    update_dependency(&dep, &FakeFetcher::default(), &locks, false)
        .await
        .unwrap();
    verify_dependency(&dep, &locks).await.unwrap();
    assert_eq!(locks.len(), 1);

    let held = locks.lock_for(&dep);
    locks.prune();
    assert_eq!(locks.len(), 1);

    drop(held);
    locks.prune();
    assert!(locks.is_empty());
}
