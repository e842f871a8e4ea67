use std::sync::Arc;

use nimbus_kv::embedded::Embedded;
use nimbus_kv::{KvStore, Ttl};

#[tokio::test]
async fn concurrent_compare_and_swap_exactly_one_winner() {
    let kv = Arc::new(Embedded::open_in_memory().unwrap());
    kv.create("k", b"v1".to_vec(), Ttl::Forever).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..8u8 {
        let kv = kv.clone();
        handles.push(tokio::spawn(async move {
            kv.compare_and_swap("k", vec![n], b"v1", Ttl::Forever).await
        }));
    }
    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn lock_guard_blocks_second_acquirer_until_released() {
    let kv = Arc::new(Embedded::open_in_memory().unwrap());
    let guard = kv.try_acquire_lock("locks/site-a", Ttl::Forever).await.unwrap();

    let waiter_kv = kv.clone();
    let waiter = tokio::spawn(async move {
        waiter_kv.acquire_lock("locks/site-a", Ttl::Forever).await.unwrap()
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    guard.release().await.unwrap();
    let second = tokio::time::timeout(std::time::Duration::from_secs(2), waiter)
        .await
        .expect("waiter should acquire the lock once released")
        .unwrap();
    second.release().await.unwrap();
}
