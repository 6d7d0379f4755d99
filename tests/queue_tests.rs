use std::sync::Arc;
use std::time::Duration;

use self_scan_rs::queue::AdmissionQueue;
use self_scan_rs::types::ScanState;

#[test]
fn repeated_admission_does_not_duplicate() {
    let q = AdmissionQueue::default();
    let first = q.request("192.0.2.1", true).unwrap();
    let second = q.request("192.0.2.1", true).unwrap();

    assert_eq!(first.state, ScanState::Queued);
    assert_eq!(second.state, ScanState::Queued);
    assert_eq!(first.reference_time, second.reference_time);
    assert_eq!(second.position, 1);
    assert_eq!(second.queue_len, 1);
    assert_eq!(q.len(), 1);
}

#[tokio::test]
async fn dequeue_is_fifo() {
    let q = AdmissionQueue::default();
    for a in ["a", "b", "c"] {
        q.request(a, true).unwrap();
    }
    let mut order = Vec::new();
    for _ in 0..3 {
        let (addr, _) = q.dequeue().await;
        order.push(addr.clone());
        q.complete(&addr);
    }
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(q.is_empty());
}

#[tokio::test]
async fn running_report_is_idempotent() {
    let q = AdmissionQueue::default();
    q.request("192.0.2.7", true).unwrap();
    q.request("192.0.2.8", true).unwrap();
    let (addr, started) = q.dequeue().await;
    assert_eq!(addr, "192.0.2.7");

    for _ in 0..5 {
        let a = q.request(&addr, true).unwrap();
        assert_eq!(a.state, ScanState::Running);
        assert_eq!(a.position, 0);
        assert_eq!(a.reference_time, Some(started));
        assert_eq!(a.queue_len, 1);
    }
    assert_eq!(q.len(), 1);
}

#[tokio::test]
async fn never_queued_and_running_at_once() {
    let q = AdmissionQueue::default();
    q.request("x", true).unwrap();
    let (addr, _) = q.dequeue().await;
    q.request(&addr, true).unwrap();

    let snap = q.snapshot();
    assert_eq!(snap.in_flight.len(), 1);
    assert!(snap.queued.iter().all(|e| e.address != addr));

    // once complete it can be queued again
    q.complete(&addr);
    let again = q.request(&addr, true).unwrap();
    assert_eq!(again.state, ScanState::Queued);
    let snap = q.snapshot();
    assert!(snap.in_flight.is_empty());
    assert_eq!(snap.queued.len(), 1);
}

#[tokio::test]
async fn dequeue_waits_for_admission() {
    let q = Arc::new(AdmissionQueue::default());
    let waiter = {
        let q = q.clone();
        tokio::spawn(async move { q.dequeue().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    q.request("late", true).unwrap();
    let (addr, _) = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("consumer woke up")
        .unwrap();
    assert_eq!(addr, "late");
    assert_eq!(q.status("late").state, ScanState::Running);
}

#[test]
fn concurrent_requests_make_one_decision() {
    let q = Arc::new(AdmissionQueue::default());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let q = q.clone();
            std::thread::spawn(move || q.request("198.51.100.4", true).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(q.len(), 1);
    let t = results[0].reference_time;
    assert!(results.iter().all(|a| a.reference_time == t && a.position == 1));
}

#[test]
fn snapshot_does_not_mutate() {
    let q = AdmissionQueue::default();
    q.request("a", true).unwrap();
    q.request("b", true).unwrap();
    let s1 = q.snapshot();
    let s2 = q.snapshot();
    assert_eq!(s1, s2);
    assert_eq!(q.len(), 2);
}
