// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Draining the shared pool. Own test binary: it swaps the process-wide
//! pool out from under any concurrently running deferreds.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use pledge::{quiesce, Deferred, PoolError, Value};

#[test]
fn quiesce_waits_for_chains_then_restarts_pool() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..8i64 {
        let seen = seen.clone();
        Deferred::new(move |fulfill, _| {
            thread::sleep(Duration::from_millis(5));
            fulfill.call(i);
            Ok(())
        })
        .then(move |v| {
            seen.lock().unwrap().push(v.as_int().unwrap_or(-1));
            Ok(Value::Null)
        });
    }

    quiesce(Duration::from_secs(5)).unwrap();
    let mut got = seen.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, (0..8).collect::<Vec<_>>());

    // Nothing left to drain.
    quiesce(Duration::from_secs(1)).unwrap();

    // A fresh pool serves new work.
    let (tx, rx) = mpsc::channel();
    Deferred::new(|fulfill, _| {
        fulfill.call(1);
        Ok(())
    })
    .then(move |v| {
        tx.send(v).unwrap();
        Ok(Value::Null)
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Value::Int(1));

    // A resolver blocked past the deadline makes the drain time out.
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocked = Deferred::new(move |fulfill, _| {
        let _ = release_rx.recv();
        fulfill.call("released");
        Ok(())
    });
    match quiesce(Duration::from_millis(20)) {
        Err(PoolError::TerminationTimeout { pending, .. }) => assert!(pending >= 1),
        other => panic!("expected TerminationTimeout, got {:?}", other),
    }
    release_tx.send(()).unwrap();
    assert_eq!(
        blocked.handle().wait_timeout(Duration::from_secs(5)),
        Some(Ok(Value::from("released")))
    );
}
