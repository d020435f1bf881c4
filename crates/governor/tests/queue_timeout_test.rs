//! Queue-timeout watching through a governed pool

use std::sync::{mpsc, Arc};
use std::time::Duration;

use poolwarden_governor::alarm::TriggerDetail;
use poolwarden_governor::prelude::*;

fn governor_with_channel() -> (Governor, tokio::sync::mpsc::Receiver<poolwarden_governor::alarm::DeliveredAlarm>) {
    let (notifier, rx) = ChannelNotifier::new(16);
    let governor = Governor::builder()
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();
    (governor, rx)
}

fn watched_rules() -> Vec<NotifyRule> {
    vec![NotifyRule::new(NotifyRuleKind::QueueTimeout).with_cooldown(Duration::ZERO)]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_started_before_timeout_never_fires() {
    let (governor, mut rx) = governor_with_channel();
    governor
        .register_pool(
            "prompt",
            PoolParams::new(1, 1, 10).with_queue_timeout(Duration::from_millis(300)),
            watched_rules(),
            QueueKind::Resizable,
        )
        .unwrap();

    governor
        .submit("prompt", TaskContext::new(), || {
            std::thread::sleep(Duration::from_millis(20))
        })
        .unwrap();
    let (tx, done) = mpsc::channel();
    governor
        .submit("prompt", TaskContext::new(), move || tx.send(()).unwrap())
        .unwrap();

    done.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(governor.watcher().pending(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(
        governor
            .engine()
            .dispatch_count("prompt", NotifyRuleKind::QueueTimeout),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_still_queued_fires_once() {
    let (governor, mut rx) = governor_with_channel();
    governor
        .register_pool(
            "sluggish",
            PoolParams::new(1, 1, 10).with_queue_timeout(Duration::from_millis(50)),
            watched_rules(),
            QueueKind::Resizable,
        )
        .unwrap();

    let (release, hold) = mpsc::channel::<()>();
    governor
        .submit("sluggish", TaskContext::new(), move || {
            let _ = hold.recv();
        })
        .unwrap();

    let (tx, done) = mpsc::channel();
    let waiting = governor
        .submit(
            "sluggish",
            TaskContext::new().with_correlation_id("slow-req"),
            move || tx.send(()).unwrap(),
        )
        .unwrap();
    assert_eq!(governor.watcher().pending(), 1);

    let alarm = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alarm.payload.pool_name, "sluggish");
    assert_eq!(alarm.payload.rule_kind, NotifyRuleKind::QueueTimeout);
    assert_eq!(alarm.payload.correlation_id.as_deref(), Some("slow-req"));
    match alarm.payload.trigger_detail {
        TriggerDetail::QueueTimeout { task_id, elapsed } => {
            assert_eq!(task_id, waiting);
            assert!(elapsed >= Duration::from_millis(50));
        }
        other => panic!("unexpected trigger {:?}", other),
    }
    assert_eq!(alarm.payload.stats.queue_size, 1);

    // the late task still runs and does not fire again
    drop(release);
    done.recv_timeout(Duration::from_secs(2)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(
        governor
            .engine()
            .dispatch_count("sluggish", NotifyRuleKind::QueueTimeout),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discarded_task_watch_is_cancelled() {
    let (governor, _rx) = governor_with_channel();
    governor
        .register_pool(
            "shedding",
            PoolParams::new(1, 1, 1)
                .with_queue_timeout(Duration::from_millis(200))
                .with_saturation_policy(SaturationPolicy::DiscardOldest),
            watched_rules(),
            QueueKind::Fixed,
        )
        .unwrap();

    let (release, hold) = mpsc::channel::<()>();
    governor
        .submit("shedding", TaskContext::new(), move || {
            let _ = hold.recv();
        })
        .unwrap();
    governor.submit("shedding", TaskContext::new(), || {}).unwrap();
    governor.submit("shedding", TaskContext::new(), || {}).unwrap();

    // the discarded head's watch is gone, the replacement is watched
    assert_eq!(governor.watcher().pending(), 1);
    drop(release);
}
