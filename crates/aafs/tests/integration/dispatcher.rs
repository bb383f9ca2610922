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

use std::sync::Arc;
use std::time::Duration;

use aafs::dispatcher::OPCODE_SHUTDOWN;
use aafs::models::pending_task::TaskQuery;
use aafs::{
    DispatchContext, DispatcherConfig, HandlerError, HandlerRegistry, NewPendingTask,
    PendingTask, TaskDispatcher, TaskOutcome, DAL,
};
use parking_lot::Mutex;
use serde_json::json;

use crate::fixtures::{all_stores, TestStore};

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: String) {
    journal.lock().push(entry);
}

/// Opcodes 101-105 model a forecast pipeline:
/// 101 schedules a forecast, 102 runs it in two stages, 103 sends the
/// product and posts the 105 cleanup, and 104 is reposted once before
/// succeeding.
fn pipeline(journal: Journal) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let j = journal.clone();
    registry.register_fn(101, move |ctx: DispatchContext, task: PendingTask| {
        let j = j.clone();
        async move {
            record(&j, format!("101:{}", task.event_id));
            ctx.post_task(
                NewPendingTask::new(102, task.sched_time + 1_000).with_event_id(task.event_id.clone()),
            )
            .await?;
            Ok(TaskOutcome::Delete)
        }
    });

    let j = journal.clone();
    registry.register_fn(102, move |ctx: DispatchContext, task: PendingTask| {
        let j = j.clone();
        async move {
            record(&j, format!("102/{}:{}", task.stage, task.event_id));
            if task.stage == 0 {
                return Ok(TaskOutcome::stage_with_details(
                    task.sched_time + 500,
                    1,
                    json!({"forecast": "computed"}),
                ));
            }
            ctx.post_task(
                NewPendingTask::new(103, task.sched_time)
                    .with_event_id(task.event_id.clone())
                    .with_details(task.details.clone()),
            )
            .await?;
            Ok(TaskOutcome::Delete)
        }
    });

    let j = journal.clone();
    registry.register_fn(103, move |ctx: DispatchContext, task: PendingTask| {
        let j = j.clone();
        async move {
            record(&j, format!("103:{}:{}", task.event_id, task.details["forecast"]));
            ctx.post_task(NewPendingTask::new(105, task.sched_time).with_event_id(task.event_id.clone()))
                .await?;
            Ok(TaskOutcome::Delete)
        }
    });

    let j = journal.clone();
    registry.register_fn(104, move |_ctx: DispatchContext, task: PendingTask| {
        let j = j.clone();
        async move {
            record(&j, format!("104/{}", task.stage));
            if task.stage == 0 {
                Ok(TaskOutcome::stage(task.sched_time, 1))
            } else if task.sched_time == 0 {
                Ok(TaskOutcome::Repost)
            } else {
                Ok(TaskOutcome::Delete)
            }
        }
    });

    let j = journal;
    registry.register_fn(105, move |_ctx: DispatchContext, task: PendingTask| {
        let j = j.clone();
        async move {
            record(&j, format!("105:{}", task.event_id));
            Ok(TaskOutcome::Delete)
        }
    });

    registry
}

fn dispatcher(store: &TestStore, registry: HandlerRegistry) -> TaskDispatcher {
    TaskDispatcher::new(
        store.dal.clone(),
        registry,
        DispatcherConfig::builder()
            .poll_interval(Duration::from_millis(10))
            .repost_delay(Duration::from_secs(60))
            .submit_id("test-server")
            .build(),
    )
}

async fn remaining(dal: &DAL) -> i64 {
    dal.pending_task().count_tasks(&TaskQuery::all()).await.unwrap()
}

#[tokio::test]
async fn test_pipeline_runs_end_to_end() {
    for store in all_stores(0).await {
        let journal: Journal = Arc::default();
        let dispatcher = dispatcher(&store, pipeline(journal.clone()));

        dispatcher
            .post_task(NewPendingTask::new(101, 10_000).with_event_id("us7000abcd"))
            .await
            .unwrap();

        // Nothing is due yet at the start of the replay
        assert!(!dispatcher.run_next_task(false, false, None).await.unwrap());

        let executed = dispatcher.run_until_idle(Some(100_000)).await.unwrap();
        assert_eq!(executed, 5, "backend {}", store.backend_name());
        assert_eq!(
            *journal.lock(),
            vec![
                "101:us7000abcd",
                "102/0:us7000abcd",
                "102/1:us7000abcd",
                "103:us7000abcd:\"computed\"",
                "105:us7000abcd",
            ]
        );
        assert_eq!(remaining(&store.dal).await, 0);
        // The clock followed the replay
        assert_eq!(store.dal.now_ms(), 11_500);
    }
}

type Invocations = Arc<Mutex<Vec<(i32, String, serde_json::Value)>>>;

fn recording_registry(invocations: Invocations) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for opcode in 101..=105 {
        let seen = invocations.clone();
        registry.register_fn(opcode, move |_ctx: DispatchContext, task: PendingTask| {
            let seen = seen.clone();
            async move {
                seen.lock()
                    .push((task.opcode, task.event_id.clone(), task.details.clone()));
                Ok(TaskOutcome::Delete)
            }
        });
    }
    registry
}

#[tokio::test]
async fn test_each_opcode_runs_once_with_its_details() {
    for store in all_stores(0).await {
        let invocations: Invocations = Arc::default();
        let dispatcher = dispatcher(&store, recording_registry(invocations.clone()));

        let mut posted = Vec::new();
        for (i, opcode) in (101..=105).enumerate() {
            let event_id = format!("us70000{}", i);
            let details = json!({
                "event_id": event_id,
                "magnitude_tenths": 50 + i,
                "regions": [i, i * 2],
                "note": format!("task {} \u{00e9}", opcode),
            });
            // Posted out of order; the queue sorts by scheduled time
            let sched_time = 1_000 * (5 - i as i64);
            dispatcher
                .post_task(
                    NewPendingTask::new(opcode, sched_time)
                        .with_event_id(event_id.clone())
                        .with_details(details.clone()),
                )
                .await
                .unwrap();
            posted.push((opcode, event_id, details));
        }

        let executed = dispatcher.run_until_idle(Some(10_000)).await.unwrap();
        assert_eq!(executed, 5, "backend {}", store.backend_name());
        assert_eq!(remaining(&store.dal).await, 0);

        let seen = invocations.lock().clone();
        let opcodes: Vec<i32> = seen.iter().map(|(opcode, _, _)| *opcode).collect();
        assert_eq!(opcodes, vec![105, 104, 103, 102, 101]);

        for (opcode, event_id, details) in &posted {
            let matching: Vec<_> = seen.iter().filter(|(o, _, _)| o == opcode).collect();
            assert_eq!(matching.len(), 1, "opcode {} on {}", opcode, store.backend_name());
            let (_, seen_event, seen_details) = matching[0];
            assert_eq!(seen_event, event_id);
            assert_eq!(
                serde_json::to_vec(seen_details).unwrap(),
                serde_json::to_vec(details).unwrap()
            );
        }
    }
}

#[tokio::test]
async fn test_posted_tasks_carry_submit_identity() {
    for store in all_stores(5_000).await {
        let dispatcher = dispatcher(&store, HandlerRegistry::new());
        let task = dispatcher
            .post_task(NewPendingTask::new(105, 6_000))
            .await
            .unwrap();
        assert_eq!(task.submit_id, "test-server");
        assert_eq!(task.submit_time, 5_000);
    }
}

#[tokio::test]
async fn test_repost_moves_task_past_repost_delay() {
    for store in all_stores(0).await {
        let journal: Journal = Arc::default();
        let dispatcher = dispatcher(&store, pipeline(journal.clone()));
        let task = dispatcher
            .post_task(NewPendingTask::new(104, 0))
            .await
            .unwrap();

        assert!(dispatcher.run_next_task(false, false, None).await.unwrap());
        assert!(dispatcher.run_next_task(false, false, None).await.unwrap());
        assert!(!dispatcher.run_next_task(false, false, None).await.unwrap());

        let reposted = store.dal.pending_task().get_task(task.id).await.unwrap().unwrap();
        assert_eq!(reposted.sched_time, 60_000);
        assert_eq!(reposted.stage, 1);

        store.clock.set(60_000);
        assert!(dispatcher.run_next_task(false, false, None).await.unwrap());
        assert_eq!(*journal.lock(), vec!["104/0", "104/1", "104/1"]);
    }
}

#[tokio::test]
async fn test_failed_handler_keeps_claim_until_recovery() {
    for store in all_stores(0).await {
        let attempts = Arc::new(Mutex::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = attempts.clone();
        registry.register_fn(101, move |_ctx, _task| {
            let counter = counter.clone();
            async move {
                let mut n = counter.lock();
                *n += 1;
                if *n == 1 {
                    Err(HandlerError::Failed("first attempt fails".into()))
                } else {
                    Ok(TaskOutcome::Delete)
                }
            }
        });
        let dispatcher = dispatcher(&store, registry);
        dispatcher.post_task(NewPendingTask::new(101, 0)).await.unwrap();

        assert!(dispatcher.run_next_task(false, false, None).await.unwrap());
        assert!(!dispatcher.run_next_task(false, false, None).await.unwrap());
        assert_eq!(remaining(&store.dal).await, 1);

        store
            .clock
            .advance(dispatcher.config().claim_timeout().as_millis() as i64 + 1);
        assert_eq!(dispatcher.run_recovery_sweep().await.unwrap(), 1);
        assert!(dispatcher.run_next_task(false, false, None).await.unwrap());
        assert_eq!(*attempts.lock(), 2);
        assert_eq!(remaining(&store.dal).await, 0);
    }
}

#[tokio::test]
async fn test_shutdown_task_ends_replay() {
    for store in all_stores(0).await {
        let journal: Journal = Arc::default();
        let dispatcher = dispatcher(&store, pipeline(journal.clone()));

        dispatcher
            .post_task(NewPendingTask::new(105, 100).with_event_id("a"))
            .await
            .unwrap();
        dispatcher
            .post_task(
                NewPendingTask::new(OPCODE_SHUTDOWN, 200).with_details(json!({"reason": "replay end"})),
            )
            .await
            .unwrap();
        dispatcher
            .post_task(NewPendingTask::new(105, 300).with_event_id("b"))
            .await
            .unwrap();

        assert_eq!(dispatcher.run_until_idle(Some(1_000)).await.unwrap(), 1);
        assert!(dispatcher.is_shut_down());
        assert_eq!(*journal.lock(), vec!["105:a"]);
        assert_eq!(remaining(&store.dal).await, 1);
        assert!(dispatcher.test_check_for_shutdown().await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_dispatchers_share_one_queue() {
    for store in all_stores(0).await {
        let journal: Journal = Arc::default();
        let first = Arc::new(dispatcher(&store, pipeline(journal.clone())));
        let second = Arc::new(TaskDispatcher::new(
            store.reopen().await,
            pipeline(journal.clone()),
            DispatcherConfig::builder()
                .poll_interval(Duration::from_millis(10))
                .build(),
        ));

        for i in 0..20 {
            first
                .post_task(NewPendingTask::new(105, i).with_event_id(format!("ev{}", i)))
                .await
                .unwrap();
        }

        let a = tokio::spawn({
            let d = first.clone();
            async move { d.run_until_idle(Some(1_000)).await.unwrap() }
        });
        let b = tokio::spawn({
            let d = second.clone();
            async move { d.run_until_idle(Some(1_000)).await.unwrap() }
        });
        let total = a.await.unwrap() + b.await.unwrap();

        assert_eq!(total, 20, "backend {}", store.backend_name());
        let mut entries = journal.lock().clone();
        entries.sort();
        entries.dedup();
        assert_eq!(entries.len(), 20);
    }
}
