//! Contended keys turning pessimistic

use crate::common::*;
use txkv::{TxIndexConfig, TxOpStatus, Value};

fn reporting() -> Cluster {
    Cluster::new(TxIndexConfig {
        latch_bucket_num: 8,
        enable_persistor: false,
        metric_period_ms: 20,
        ..TxIndexConfig::default()
    })
}

#[test]
fn test_contended_key_is_locked_up_front() {
    let c = reporting();
    let older = c.begin();
    let younger = c.begin();

    assert!(c.write(b"hot", Value::new("v0"), &younger).is_ok());
    assert!(c.write(b"cold", Value::new("v0"), &younger).is_ok());
    assert!(matches!(
        c.write(b"hot", Value::new("v0"), &older),
        TxOpStatus::Conflict(_)
    ));
    c.abort(&older, &[]);
    c.abort(&younger, &[b"hot", b"cold"]);
    assert_eq!(c.up_front_locks(), 0);

    assert!(wait_until(|| c.planner.partition().is_pessimistic(b"hot")));
    assert!(!c.planner.partition().is_pessimistic(b"cold"));

    let txid = c.begin();
    assert!(c.write(b"hot", Value::new("v1"), &txid).is_ok());
    assert!(c.write(b"cold", Value::new("v1"), &txid).is_ok());
    assert_eq!(c.up_front_locks(), 1);
    assert!(c.finish(&txid, &[b"hot", b"cold"]).is_committed());

    assert_eq!(c.get(b"hot"), Some(Value::new("v1")));
    assert_eq!(c.get(b"cold"), Some(Value::new("v1")));
}
