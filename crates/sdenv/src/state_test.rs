// Copyright (c) Contributors to the sdenv project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn make_state() -> DependencyState {
    DependencyState {
        api: StateApiVersion::V0,
        identifier: Some("hello".to_string()),
        name: "HelloWorld".to_string(),
        version: "7fd1a60b01f91b314f59955a4e4d4e80d8edf11d".to_string(),
        verify: true,
        fingerprint: "deadbeef".to_string(),
        updated: Some(UpdateMetadata {
            timestamp: Utc::now(),
            sdenv_version: "0.0.0-test".to_string(),
            hostname: "test-host".to_string(),
        }),
    }
}

fn write_payload(dir: &Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("README"), "Hello World!\n").unwrap();
    std::fs::write(dir.join("src/main.c"), "int main(void) { return 0; }\n").unwrap();
}

#[rstest]
fn test_load_missing_state() {
    let tmp = TempDir::new().unwrap();
    let loaded = DependencyState::load(tmp.path().join(STATE_FILENAME)).unwrap();
    assert!(loaded.is_none());
}

#[rstest]
fn test_save_and_load_state() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("HelloWorld_extdep").join(STATE_FILENAME);

    let state = make_state();
    state.save(&path).expect("Should save state");
    let loaded = DependencyState::load(&path).unwrap().expect("state present");

    assert_eq!(loaded, state);
}

#[rstest]
fn test_save_leaves_no_temporary_files() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(STATE_FILENAME);

    make_state().save(&path).unwrap();
    make_state().save(&path).unwrap();

    let names: Vec<PathBuf> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(names, vec![path]);
}

#[rstest]
fn test_hand_edited_state_is_honored() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(STATE_FILENAME);
    std::fs::write(
        &path,
        r#"
fingerprint: abc123
name: HelloWorld
verify: false
version: 7fd1a60b01f91b314f59955a4e4d4e80d8edf11d
"#,
    )
    .unwrap();

    let loaded = DependencyState::load(&path).unwrap().unwrap();
    assert!(!loaded.verify);
    assert_eq!(loaded.api, StateApiVersion::V0);
    assert!(loaded.identifier.is_none());
    assert!(loaded.updated.is_none());
}

#[rstest]
fn test_invalid_state_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(STATE_FILENAME);
    std::fs::write(&path, "name: [unclosed\n").unwrap();

    assert!(matches!(
        DependencyState::load(&path),
        Err(Error::InvalidState { .. })
    ));
}

#[rstest]
fn test_fingerprint_is_stable() {
    let tmp = TempDir::new().unwrap();
    write_payload(tmp.path());

    let first = fingerprint_dir(tmp.path()).unwrap();
    let second = fingerprint_dir(tmp.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
}

#[rstest]
fn test_fingerprint_detects_changes() {
    let tmp = TempDir::new().unwrap();
    write_payload(tmp.path());
    let original = fingerprint_dir(tmp.path()).unwrap();

    std::fs::remove_file(tmp.path().join("README")).unwrap();
    let removed = fingerprint_dir(tmp.path()).unwrap();
    assert_ne!(original, removed);

    std::fs::write(tmp.path().join("README"), "Hello World?\n").unwrap();
    let modified = fingerprint_dir(tmp.path()).unwrap();
    assert_ne!(original, modified);
    assert_ne!(removed, modified);
}

#[rstest]
fn test_fingerprint_ignores_git_metadata() {
    let tmp = TempDir::new().unwrap();
    write_payload(tmp.path());
    let original = fingerprint_dir(tmp.path()).unwrap();

    std::fs::create_dir_all(tmp.path().join(".git/refs")).unwrap();
    std::fs::write(tmp.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
    assert_eq!(fingerprint_dir(tmp.path()).unwrap(), original);
}

#[rstest]
fn test_fingerprint_is_location_independent() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write_payload(a.path());
    write_payload(b.path());

    assert_eq!(
        fingerprint_dir(a.path()).unwrap(),
        fingerprint_dir(b.path()).unwrap()
    );
}
