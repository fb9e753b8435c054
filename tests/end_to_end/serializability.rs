//! Write skew through the whole stack
//!
//! Two transactions each read both keys and write a different one. Snapshot
//! isolation alone would commit both; the edges reported by the indexes let
//! the planner abort the second.

use crate::common::*;
use txkv::{TxStatus, Value};

fn seeded() -> Cluster {
    let cluster = Cluster::manual();
    cluster.put(b"doctor-a", Value::new("1"));
    cluster.put(b"doctor-z", Value::new("1"));
    cluster
}

#[test]
fn test_write_skew_second_commit_aborted() {
    let c = seeded();
    let t1 = c.begin();
    let t2 = c.begin();

    for t in [&t1, &t2] {
        assert_eq!(c.read(b"doctor-a", t), Some(Value::new("1")));
        assert_eq!(c.read(b"doctor-z", t), Some(Value::new("1")));
    }
    assert!(c.write(b"doctor-a", Value::new("0"), &t1).is_ok());
    assert!(c.write(b"doctor-z", Value::new("0"), &t2).is_ok());
    c.flush_deps();

    let first = c.finish(&t1, &[b"doctor-a"]);
    assert_eq!(first.status, TxStatus::Committed);
    let second = c.finish(&t2, &[b"doctor-z"]);
    assert_eq!(second.status, TxStatus::Aborted);

    assert_eq!(c.get(b"doctor-a"), Some(Value::new("0")));
    assert_eq!(c.get(b"doctor-z"), Some(Value::new("1")));
}

#[test]
fn test_disjoint_read_write_sets_both_commit() {
    let c = seeded();
    let t1 = c.begin();
    let t2 = c.begin();

    assert_eq!(c.read(b"doctor-a", &t1), Some(Value::new("1")));
    assert_eq!(c.read(b"doctor-z", &t2), Some(Value::new("1")));
    assert!(c.write(b"doctor-a", Value::new("2"), &t1).is_ok());
    assert!(c.write(b"doctor-z", Value::new("2"), &t2).is_ok());
    c.flush_deps();

    assert!(c.finish(&t1, &[b"doctor-a"]).is_committed());
    assert!(c.finish(&t2, &[b"doctor-z"]).is_committed());
}

#[tokio::test]
async fn test_early_validation_reports_abort() {
    let c = seeded();
    let t1 = c.begin();
    let t2 = c.begin();
    let validation = c.planner.validate_tx(&t2).unwrap();

    for t in [&t1, &t2] {
        c.read(b"doctor-a", t);
        c.read(b"doctor-z", t);
    }
    assert!(c.write(b"doctor-a", Value::new("0"), &t1).is_ok());
    assert!(c.write(b"doctor-z", Value::new("0"), &t2).is_ok());
    c.flush_deps();
    assert!(c.finish(&t1, &[b"doctor-a"]).is_committed());

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), validation.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, TxStatus::Aborted);
    c.abort(&t2, &[b"doctor-z"]);
}

#[test]
fn test_stale_writer_is_too_late() {
    let c = seeded();
    let stale = c.begin();
    c.put(b"doctor-a", Value::new("5"));
    assert!(matches!(
        c.write(b"doctor-a", Value::new("6"), &stale),
        txkv::TxOpStatus::TooLate(_)
    ));
    c.abort(&stale, &[]);
}
