use std::time::Duration;

use trawler_core::job::{Job, NewJob};
use trawler_core::job_queue::{OutboundMessage, QueueProvider};
use trawler_core::queue::QueueClient;

use crate::common::{queue, setup_test_db};

fn message(entry: &str, delay: Duration) -> OutboundMessage {
    OutboundMessage {
        entry_id: entry.into(),
        body: format!(r#"{{"id":"{entry}","source":"reddit"}}"#),
        delay,
    }
}

#[tokio::test]
async fn send_receive_ack() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    let outcome = queue
        .send_batch(vec![message("a", Duration::ZERO), message("b", Duration::ZERO)])
        .await
        .unwrap();
    assert_eq!(outcome.successful.len(), 2);
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.successful[0].entry_id, "a");

    let first = queue.receive().await.unwrap().expect("first message");
    assert_eq!(first.message_id, outcome.successful[0].message_id);
    assert_eq!(first.receive_count, 1);
    assert!(first.body.contains("\"a\""));

    queue.ack(&first.receipt_handle).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.visible, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn received_message_is_hidden_from_other_consumers() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    queue.send_batch(vec![message("only", Duration::ZERO)]).await.unwrap();

    let claimed = queue.receive().await.unwrap();
    assert!(claimed.is_some());
    assert!(queue.receive().await.unwrap().is_none());
    assert_eq!(queue.stats().await.unwrap().in_flight, 1);
}

#[tokio::test]
async fn concurrent_receivers_claim_distinct_messages() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    let batch = (0..6).map(|i| message(&format!("m{i}"), Duration::ZERO)).collect();
    queue.send_batch(batch).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let q = queue.clone();
        handles.push(tokio::spawn(async move { q.receive().await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        if let Some(msg) = handle.await.unwrap().unwrap() {
            ids.push(msg.message_id);
        }
    }
    while let Some(msg) = queue.receive().await.unwrap() {
        ids.push(msg.message_id);
    }
    let claimed = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), claimed);
    assert_eq!(claimed, 6);
}

#[tokio::test]
async fn delayed_message_is_not_visible_yet() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    queue
        .send_batch(vec![message("later", Duration::from_secs(60))])
        .await
        .unwrap();

    assert!(queue.receive().await.unwrap().is_none());
    assert_eq!(queue.stats().await.unwrap().in_flight, 1);
}

#[tokio::test]
async fn nack_redelivers_with_new_receipt() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    queue.send_batch(vec![message("retry", Duration::ZERO)]).await.unwrap();

    let first = queue.receive().await.unwrap().unwrap();
    queue.nack(&first.receipt_handle, Duration::ZERO).await.unwrap();

    let second = queue.receive().await.unwrap().expect("redelivered");
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.receive_count, 2);
    assert_ne!(second.receipt_handle, first.receipt_handle);

    // The old receipt no longer identifies the message.
    assert!(queue.ack(&first.receipt_handle).await.is_err());
    queue.ack(&second.receipt_handle).await.unwrap();
}

#[tokio::test]
async fn nack_with_delay_keeps_message_hidden() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    queue.send_batch(vec![message("slow", Duration::ZERO)]).await.unwrap();
    let msg = queue.receive().await.unwrap().unwrap();
    queue.nack(&msg.receipt_handle, Duration::from_secs(60)).await.unwrap();

    assert!(queue.receive().await.unwrap().is_none());
}

#[tokio::test]
async fn visibility_timeout_lapses_into_redelivery() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool).with_visibility_timeout(Duration::from_millis(200));

    queue.send_batch(vec![message("lost", Duration::ZERO)]).await.unwrap();
    let first = queue.receive().await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let again = queue.receive().await.unwrap().expect("redelivered after timeout");
    assert_eq!(again.message_id, first.message_id);
    assert_eq!(again.receive_count, 2);
}

#[tokio::test]
async fn exhausted_message_is_dead_lettered_and_redriven() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool).with_max_receives(2);

    queue.send_batch(vec![message("poison", Duration::ZERO)]).await.unwrap();

    for expected in 1..=2 {
        let msg = queue.receive().await.unwrap().unwrap();
        assert_eq!(msg.receive_count, expected);
        queue.nack(&msg.receipt_handle, Duration::ZERO).await.unwrap();
    }

    assert!(queue.receive().await.unwrap().is_none());
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.visible, 0);

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].contains("poison"));

    assert_eq!(queue.redrive().await.unwrap(), 1);
    let revived = queue.receive().await.unwrap().expect("redriven");
    assert_eq!(revived.receive_count, 1);
}

#[tokio::test]
async fn oversized_batch_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let queue = queue(&pool);

    let batch = (0..11).map(|i| message(&format!("m{i}"), Duration::ZERO)).collect();
    assert!(queue.send_batch(batch).await.is_err());
    assert_eq!(queue.stats().await.unwrap().visible, 0);
}

#[tokio::test]
async fn queues_are_isolated_by_name() {
    let (pool, _container) = setup_test_db().await;
    let jobs = queue(&pool);
    let other = trawler_db::PgQueue::new(pool.clone(), "other");

    jobs.send_batch(vec![message("x", Duration::ZERO)]).await.unwrap();

    assert!(other.receive().await.unwrap().is_none());
    assert!(jobs.receive().await.unwrap().is_some());
}

#[tokio::test]
async fn queue_client_batches_through_postgres() {
    let (pool, _container) = setup_test_db().await;
    let client = QueueClient::new(queue(&pool));

    let jobs = (0..25)
        .map(|i| NewJob::new("amazon").with_param("asin", format!("B{i:03}")))
        .collect();
    let report = client.enqueue_batch(jobs).await.unwrap();

    assert_eq!(report.provider_calls, 3);
    assert_eq!(report.accepted.len(), 25);

    let msg = client.provider().receive().await.unwrap().unwrap();
    let job = Job::from_body(&msg.body).unwrap();
    assert_eq!(job.platform(), "amazon");
    assert!(report.accepted.iter().any(|a| a.job_id == job.id));
    assert_eq!(
        job.params.get("asin").and_then(serde_json::Value::as_str).map(|s| s.len()),
        Some(4)
    );
}
