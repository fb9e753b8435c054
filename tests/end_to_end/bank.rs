//! Randomized transfers between accounts on both indexes
//!
//! Each transfer reads two balances and writes both back. Whatever aborts
//! along the way, the sum over all accounts never changes.

use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::*;
use txkv::{TxIndexConfig, Value};

const ACCOUNTS: [&str; 6] = ["acct-a", "acct-f", "acct-k", "acct-p", "acct-u", "acct-z"];
const INITIAL: i64 = 100;

fn transfer(c: &Cluster, from: &str, to: &str, amount: i64) -> bool {
    let txid = c.begin();
    let (from, to) = (from.as_bytes(), to.as_bytes());
    let balance = |key: &[u8]| c.read(key, &txid).map_or(0, |v| int(&v));
    let (a, b) = (balance(from), balance(to));

    let mut written: Vec<&[u8]> = Vec::new();
    for (key, value) in [(from, a - amount), (to, b + amount)] {
        if !c.write(key, Value::new(value.to_string()), &txid).is_ok() {
            c.abort(&txid, &written);
            return false;
        }
        written.push(key);
    }
    c.finish(&txid, &written).is_committed()
}

#[test]
fn test_transfers_preserve_total() {
    let c = Arc::new(Cluster::new(TxIndexConfig {
        latch_bucket_num: 4,
        persist_period_ms: 2,
        min_ats_period_ms: 2,
        ..TxIndexConfig::default()
    }));
    for account in ACCOUNTS {
        c.put(account.as_bytes(), Value::new(INITIAL.to_string()));
    }

    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut committed = 0;
                for _ in 0..40 {
                    let from = rng.gen_range(0..ACCOUNTS.len());
                    let to = (from + rng.gen_range(1..ACCOUNTS.len())) % ACCOUNTS.len();
                    let amount = rng.gen_range(1..=10);
                    if transfer(&c, ACCOUNTS[from], ACCOUNTS[to], amount) {
                        committed += 1;
                    }
                }
                committed
            })
        })
        .collect();
    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(committed > 0);

    let txid = c.begin();
    let total: i64 = ACCOUNTS
        .iter()
        .map(|a| c.read(a.as_bytes(), &txid).map_or(0, |v| int(&v)))
        .sum();
    assert_eq!(total, INITIAL * ACCOUNTS.len() as i64);
    c.abort(&txid, &[]);
}
