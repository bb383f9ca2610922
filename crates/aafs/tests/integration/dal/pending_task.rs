/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::collections::HashSet;
use std::sync::Arc;

use aafs::models::pending_task::{TaskQuery, TaskStaging};
use aafs::models::TimeRange;
use aafs::{NewPendingTask, StoreError};
use serde_json::json;
use tokio::sync::Barrier;

use crate::fixtures::{all_stores, memory_store, sqlite_store, TestStore};

async fn post(store: &TestStore, opcode: i32, sched_time: i64, event_id: &str) -> uuid::Uuid {
    store
        .dal
        .pending_task()
        .submit_task(NewPendingTask::new(opcode, sched_time).with_event_id(event_id))
        .await
        .expect("Failed to submit task")
        .id
}

#[tokio::test]
async fn test_activation_follows_scheduled_time() {
    for store in all_stores(100_000).await {
        for sched in [30100, 50100, 10100, 40100, 20100] {
            post(&store, 101, sched, "").await;
        }

        let mut order = Vec::new();
        while let Some(task) = store
            .dal
            .pending_task()
            .activate_first_ready_task(100_000)
            .await
            .unwrap()
        {
            assert!(task.is_activated());
            order.push(task.sched_time);
        }
        assert_eq!(
            order,
            vec![10100, 20100, 30100, 40100, 50100],
            "backend {}",
            store.backend_name()
        );
    }
}

#[tokio::test]
async fn test_submit_time_breaks_ties() {
    for store in all_stores(0).await {
        for (submit_time, event) in [(30, "c"), (10, "a"), (20, "b")] {
            store
                .dal
                .pending_task()
                .submit_task(
                    NewPendingTask::new(101, 500)
                        .with_event_id(event)
                        .with_submit_time(submit_time),
                )
                .await
                .unwrap();
        }

        let tasks = store
            .dal
            .pending_task()
            .get_task_range(&TaskQuery::all())
            .await
            .unwrap();
        let events: Vec<&str> = tasks.iter().map(|t| t.event_id.as_str()).collect();
        assert_eq!(events, vec!["a", "b", "c"], "backend {}", store.backend_name());
    }
}

#[tokio::test]
async fn test_future_tasks_are_not_ready() {
    for store in all_stores(1_000).await {
        post(&store, 101, 5_000, "us1").await;

        let pending = store.dal.pending_task();
        assert!(pending.get_first_ready_task(4_999).await.unwrap().is_none());
        assert!(pending.activate_first_ready_task(4_999).await.unwrap().is_none());

        let peeked = pending.get_first_ready_task(5_000).await.unwrap().unwrap();
        assert!(!peeked.is_activated());
        let claimed = pending.activate_first_ready_task(5_000).await.unwrap().unwrap();
        assert_eq!(peeked.id, claimed.id);

        // An activated task is neither ready nor claimable again
        assert!(pending.get_first_ready_task(9_000).await.unwrap().is_none());
        assert!(pending.activate_first_ready_task(9_000).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_stage_round_trip() {
    for store in all_stores(10_000).await {
        let id = post(&store, 102, 1_000, "us6000abcd").await;
        let pending = store.dal.pending_task();
        let task = pending.activate_first_ready_task(10_000).await.unwrap().unwrap();

        let mut staging = TaskStaging::new(20_000, 3);
        staging.event_id = Some("us6000wxyz".to_string());
        staging.details = Some(json!({"attempt": 2}));
        pending.stage_task(&task, staging.clone()).await.unwrap();

        let stored = pending.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.sched_time, 20_000);
        assert_eq!(stored.stage, 3);
        assert_eq!(stored.event_id, "us6000wxyz");
        assert_eq!(stored.details, json!({"attempt": 2}));
        assert_eq!(stored.opcode, 102);
        assert!(!stored.is_activated());

        // The claim is gone, so the stale copy can no longer stage or delete
        let err = pending.stage_task(&task, staging).await.unwrap_err();
        assert!(matches!(err, StoreError::NotClaimed { task_id } if task_id == id));
        assert!(matches!(
            pending.delete_task(&task).await,
            Err(StoreError::NotClaimed { .. })
        ));

        let again = pending.activate_first_ready_task(20_000).await.unwrap().unwrap();
        assert_eq!(again.id, id);
        pending.delete_task(&again).await.unwrap();
        assert!(pending.get_task(id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_unactivated_task_cannot_be_deleted_through_claim() {
    for store in all_stores(0).await {
        let id = post(&store, 101, 0, "").await;
        let pending = store.dal.pending_task();
        let task = pending.get_task(id).await.unwrap().unwrap();

        assert!(matches!(
            pending.delete_task(&task).await,
            Err(StoreError::NotClaimed { .. })
        ));
        assert!(pending.delete_task_by_id(id).await.unwrap());
        assert!(!pending.delete_task_by_id(id).await.unwrap());
    }
}

async fn assert_single_claims(store: &TestStore, workers: usize, tasks: usize) {
    for i in 0..tasks {
        post(store, 101, i as i64, &format!("ev{}", i)).await;
    }

    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let dal = store.reopen().await;
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            while let Some(task) = dal
                .pending_task()
                .activate_first_ready_task(1_000_000)
                .await
                .expect("activation failed")
            {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "task {} claimed twice", id);
            total += 1;
        }
    }
    assert_eq!(total, tasks, "backend {}", store.backend_name());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activation_claims_each_task_once_memory() {
    let store = memory_store(0);
    assert_single_claims(&store, 8, 50).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activation_claims_each_task_once_sqlite() {
    let store = sqlite_store(0).await;
    assert_single_claims(&store, 4, 20).await;
}

#[tokio::test]
async fn test_range_queries_use_half_open_windows() {
    for store in all_stores(0).await {
        for (sched, event) in [(100, "a"), (200, "b"), (300, "a"), (400, "b")] {
            post(&store, 101, sched, event).await;
        }
        let pending = store.dal.pending_task();

        let window = TaskQuery::all().in_range(TimeRange::new(Some(200), Some(400)));
        let times: Vec<i64> = pending
            .get_task_range(&window)
            .await
            .unwrap()
            .iter()
            .map(|t| t.sched_time)
            .collect();
        assert_eq!(times, vec![200, 300]);
        assert_eq!(pending.count_tasks(&window).await.unwrap(), 2);

        let newest_a = pending
            .get_task_range(&TaskQuery::all().for_event("a").descending().limit(1))
            .await
            .unwrap();
        assert_eq!(newest_a.len(), 1);
        assert_eq!(newest_a[0].sched_time, 300);

        assert_eq!(
            pending
                .count_tasks(&TaskQuery::all().in_range(TimeRange::since(300)))
                .await
                .unwrap(),
            2
        );

        let deleted = pending
            .delete_task_range(&TaskQuery::all().for_event("b"))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(pending.count_tasks(&TaskQuery::all()).await.unwrap(), 2);
    }
}

#[tokio::test]
async fn test_cursor_streams_every_task_in_order() {
    for store in all_stores(0).await {
        for i in (0..250).rev() {
            post(&store, 101, i * 10, "").await;
        }

        let mut cursor = store.dal.pending_task().iterate_task_range(TaskQuery::all());
        let mut last = i64::MIN;
        let mut count = 0;
        while let Some(task) = cursor.next().await.unwrap() {
            assert!(task.sched_time >= last);
            last = task.sched_time;
            count += 1;
        }
        assert_eq!(count, 250, "backend {}", store.backend_name());

        cursor.close();
        assert!(cursor.is_closed());
        assert!(cursor.next().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_expired_claims_return_to_queue() {
    for store in all_stores(0).await {
        let id = post(&store, 101, 0, "").await;
        let pending = store.dal.pending_task();

        store.clock.set(1_000);
        pending.activate_first_ready_task(1_000).await.unwrap().unwrap();

        assert_eq!(pending.reset_expired_claims(1_000).await.unwrap(), 0);
        assert_eq!(pending.reset_expired_claims(1_001).await.unwrap(), 1);

        let task = pending.get_task(id).await.unwrap().unwrap();
        assert!(!task.is_activated());
        assert!(pending.activate_first_ready_task(2_000).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_cancel_waiting_tasks_spares_activated_ones() {
    for store in all_stores(0).await {
        post(&store, 104, 0, "").await;
        post(&store, 104, 10, "").await;
        post(&store, 105, 20, "").await;
        post(&store, 101, 30, "").await;
        let pending = store.dal.pending_task();

        let running = pending.activate_first_ready_task(0).await.unwrap().unwrap();
        assert_eq!(running.opcode, 104);

        assert_eq!(pending.cancel_waiting_tasks(&[104, 105]).await.unwrap(), 2);
        assert_eq!(pending.cancel_waiting_tasks(&[]).await.unwrap(), 0);

        let left: Vec<i32> = pending
            .get_task_range(&TaskQuery::all())
            .await
            .unwrap()
            .iter()
            .map(|t| t.opcode)
            .collect();
        assert_eq!(left, vec![104, 101]);
    }
}

#[tokio::test]
async fn test_outage_surfaces_as_retryable_error() {
    let store = memory_store(0);
    post(&store, 101, 0, "").await;
    let memory = store.dal.database().memory_store().unwrap().clone();

    memory.set_available(false);
    let err = store
        .dal
        .pending_task()
        .activate_first_ready_task(0)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    memory.set_available(true);
    assert!(store
        .dal
        .pending_task()
        .activate_first_ready_task(0)
        .await
        .unwrap()
        .is_some());
}
