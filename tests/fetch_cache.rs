//! Download-once cache behaviour against a recording transport.

mod common;

use std::fs;

use common::{files_in, quiet_opts, MockTransport};
use ml_datasets::error::DatasetError;
use ml_datasets::fetch::{materialize, DatasetSource, LoadOptions, NoProgress};

const BASE: &str = "https://data.example.org/sets/";

fn source(dir: &std::path::Path, force: bool) -> DatasetSource {
    let opts = LoadOptions {
        force,
        ..quiet_opts(dir)
    };
    DatasetSource::new(BASE, ["a.bin", "b.txt"], None, &opts)
}

fn transport() -> MockTransport {
    MockTransport::new()
        .with_file("a.bin", (0u8..=255).collect::<Vec<u8>>())
        .with_file("b.txt", "hello\n")
}

#[test]
fn first_load_downloads_every_file_in_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let transport = transport();

    let paths = materialize(&source(tmp.path(), false), &transport, &NoProgress).expect("fetch");

    assert_eq!(paths, vec![tmp.path().join("a.bin"), tmp.path().join("b.txt")]);
    assert_eq!(
        transport.requests(),
        vec![format!("{}a.bin", BASE), format!("{}b.txt", BASE)]
    );
    assert_eq!(fs::read(&paths[0]).expect("read").len(), 256);
    assert_eq!(fs::read_to_string(&paths[1]).expect("read"), "hello\n");
}

#[test]
fn second_load_issues_no_requests() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let first = transport();
    materialize(&source(tmp.path(), false), &first, &NoProgress).expect("first fetch");

    let second = transport();
    let paths = materialize(&source(tmp.path(), false), &second, &NoProgress).expect("cached");

    assert_eq!(second.request_count(), 0);
    assert_eq!(paths.len(), 2);
}

#[test]
fn cached_file_content_is_trusted() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("a.bin"), b"stale").expect("seed cache");
    let transport = transport();

    materialize(&source(tmp.path(), false), &transport, &NoProgress).expect("fetch");

    assert_eq!(transport.requests(), vec![format!("{}b.txt", BASE)]);
    assert_eq!(fs::read(tmp.path().join("a.bin")).expect("read"), b"stale");
}

#[test]
fn force_refetches_and_overwrites() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("a.bin"), b"stale").expect("seed cache");
    fs::write(tmp.path().join("b.txt"), b"stale").expect("seed cache");
    let transport = transport();

    materialize(&source(tmp.path(), true), &transport, &NoProgress).expect("fetch");

    assert_eq!(transport.request_count(), 2);
    assert_eq!(fs::read(tmp.path().join("a.bin")).expect("read").len(), 256);
    assert_eq!(
        fs::read_to_string(tmp.path().join("b.txt")).expect("read"),
        "hello\n"
    );
}

#[test]
fn missing_target_dir_is_created() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let nested = tmp.path().join("deep").join("cache");

    let paths = materialize(&source(&nested, false), &transport(), &NoProgress).expect("fetch");

    assert!(nested.is_dir());
    assert!(paths.iter().all(|p| p.is_file()));
}

#[test]
fn unreachable_file_leaves_nothing_behind() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let transport = MockTransport::new().with_file("a.bin", "only a");

    let err = materialize(&source(tmp.path(), false), &transport, &NoProgress)
        .expect_err("b.txt is missing");

    match err {
        DatasetError::NetworkUnavailable { url, .. } => {
            assert_eq!(url, format!("{}b.txt", BASE));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!tmp.path().join("b.txt").exists());
    assert_eq!(files_in(tmp.path()), vec![tmp.path().join("a.bin")]);
}

#[test]
fn interrupted_body_leaves_no_partial_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let transport = MockTransport::new()
        .with_broken_body("a.bin", vec![1u8; 100], 30)
        .with_file("b.txt", "hello\n");

    let err = materialize(&source(tmp.path(), false), &transport, &NoProgress)
        .expect_err("body fails mid-stream");

    assert!(matches!(err, DatasetError::NetworkUnavailable { .. }));
    assert!(files_in(tmp.path()).is_empty());

    // A later successful attempt downloads normally.
    let retry = MockTransport::new()
        .with_file("a.bin", vec![1u8; 100])
        .with_file("b.txt", "hello\n");
    materialize(&source(tmp.path(), false), &retry, &NoProgress).expect("retry");
    assert_eq!(fs::read(tmp.path().join("a.bin")).expect("read").len(), 100);
}
