//! Transactions spanning both transaction indexes

use crate::common::*;
use txkv::{ReadOutcome, TxOpStatus, TxStatus, Value};

#[test]
fn test_keys_route_to_owning_index() {
    let c = Cluster::manual();
    let txid = c.begin();

    let low = &c.indexes["idx-0"];
    let high = &c.indexes["idx-1"];
    assert!(low.write_lock(b"apple", &txid, || {}).is_ok());
    assert!(high.write_lock(b"mango", &txid, || {}).is_ok());
    assert!(matches!(
        low.write_lock(b"mango", &txid, || {}),
        TxOpStatus::PartitionErr(_)
    ));
    assert!(matches!(
        high.read(b"apple", &txid, false, || {}),
        ReadOutcome::Failed(TxOpStatus::PartitionErr(_))
    ));
    c.abort(&txid, &[b"apple", b"mango"]);
}

#[test]
fn test_multi_index_commit_is_atomic_for_readers() {
    let c = Cluster::manual();
    let writer = c.begin();
    let keys: [&[u8]; 2] = [b"apple", b"zucchini"];
    for key in keys {
        assert!(c.write(key, Value::new("ripe"), &writer).is_ok());
    }

    let before = c.begin();
    let outcome = c.finish(&writer, &keys);
    assert!(outcome.is_committed());
    let after = c.begin();

    for key in keys {
        assert_eq!(c.read(key, &before), None);
        assert_eq!(c.read(key, &after), Some(Value::new("ripe")));
    }
    // Both versions carry the one commit timestamp
    let commit_ts = outcome.commit_ts.unwrap();
    for key in keys {
        assert_eq!(c.index_for(key).regions()[0].version_count(key), 1);
    }
    assert_eq!(c.persist_all(), 0);
    c.abort(&before, &[]);
    c.abort(&after, &[]);
    assert_eq!(c.persist_all(), 2);
    for key in keys {
        let entry = c.storage_entry(key, commit_ts);
        assert_eq!(entry, Some(b"ripe".to_vec()));
    }
}

#[test]
fn test_cross_index_dependency_chain() {
    let c = Cluster::manual();
    c.put(b"apple", Value::new("1"));
    c.put(b"zucchini", Value::new("1"));

    // Reader of one index, writer on the other: edges meet in the planner
    let t1 = c.begin();
    let t2 = c.begin();
    c.read(b"apple", &t1);
    c.read(b"zucchini", &t2);
    assert!(c.write(b"zucchini", Value::new("2"), &t1).is_ok());
    assert!(c.write(b"apple", Value::new("2"), &t2).is_ok());
    c.flush_deps();

    let table = c.planner.table();
    assert_eq!(table.out_edges(t1.start_ts), vec![t2.start_ts]);
    assert_eq!(table.out_edges(t2.start_ts), vec![t1.start_ts]);

    assert!(c.finish(&t2, &[b"apple"]).is_committed());
    assert!(!c.finish(&t1, &[b"zucchini"]).is_committed());
}

#[test]
fn test_partly_applied_commit_is_abnormal() {
    let c = Cluster::manual();
    let writer = c.begin();
    assert!(c.write(b"apple", Value::new("ripe"), &writer).is_ok());

    // The planner commits, but the second index holds no intent for the key
    let outcome = c.finish(&writer, &[b"apple", b"zucchini"]);
    assert_eq!(outcome.status, TxStatus::Abnormal);
    assert!(outcome.commit_ts.is_some());

    assert_eq!(c.get(b"apple"), Some(Value::new("ripe")));
    assert_eq!(c.get(b"zucchini"), None);
}
