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

use std::time::Duration;

use aafs::models::TimeRange;
use aafs::{RelayStamp, RelayThread, DAL};
use serde_json::json;

use crate::fixtures::{memory_store, sqlite_store};

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn write(dal: &DAL, relay_id: &str, time: i64) {
    dal.relay_item()
        .submit_relay_item(relay_id, time, json!({}), false, RelayStamp::NONE)
        .await
        .unwrap()
        .expect("write rejected");
}

#[tokio::test]
async fn test_reconciliation_recovers_writes_missed_while_feed_closed() {
    let store = memory_store(0);
    let thread = RelayThread::with_resubscribe_delay(store.dal.clone(), Duration::from_millis(200));
    assert!(thread.start_relay_thread());
    wait_until("first subscription", || thread.take_resync_request()).await;

    write(&store.dal, "pdlc_before", 10).await;
    wait_until("live delivery", || thread.ri_queue_len() == 1).await;

    // Close every subscription and write while the thread is resubscribing
    store.dal.database().memory_store().unwrap().reset_change_feed();
    write(&store.dal, "pdlc_missed_1", 20).await;
    write(&store.dal, "pdlr_missed_2", 30).await;

    wait_until("resubscription", || thread.take_resync_request()).await;
    assert_eq!(thread.ri_queue_len(), 1);

    let reconciled: Vec<String> = thread
        .run_fetch_and_sort(TimeRange::since(15))
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.relay_id)
        .collect();
    assert_eq!(reconciled, vec!["pdlc_missed_1", "pdlr_missed_2"]);

    write(&store.dal, "pdlc_after", 40).await;
    wait_until("delivery after resubscription", || thread.ri_queue_len() == 2).await;
    let queued: Vec<String> = thread
        .ri_queue_drain()
        .into_iter()
        .map(|item| item.relay_id)
        .collect();
    assert_eq!(queued, vec!["pdlc_before", "pdlc_after"]);

    thread.shutdown_relay_thread().await;
}

#[tokio::test]
async fn test_outage_forces_resubscription() {
    let store = memory_store(0);
    let thread = RelayThread::with_resubscribe_delay(store.dal.clone(), Duration::from_millis(20));
    let memory = store.dal.database().memory_store().unwrap().clone();

    memory.set_available(false);
    assert!(thread.start_relay_thread());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!thread.take_resync_request());
    assert!(thread.is_running());

    memory.set_available(true);
    wait_until("subscription after outage", || thread.take_resync_request()).await;
    thread.shutdown_relay_thread().await;
}

#[tokio::test]
async fn test_sqlite_feed_reaches_queue() {
    let store = sqlite_store(0).await;
    let thread = RelayThread::with_resubscribe_delay(store.dal.clone(), Duration::from_millis(20));
    thread.start_relay_thread();
    wait_until("first subscription", || thread.take_resync_request()).await;

    // A second pool on the same file plays the peer server
    let peer = store.reopen().await;
    write(&peer, "anas_us1", 5).await;
    write(&peer, "pdlc_us1", 6).await;

    wait_until("tail delivery", || thread.ri_queue_len() == 2).await;
    assert_eq!(thread.ri_queue_remove().unwrap().relay_id, "anas_us1");
    assert_eq!(thread.ri_queue_remove().unwrap().relay_id, "pdlc_us1");
    assert!(thread.ri_queue_remove().is_none());

    thread.shutdown_relay_thread().await;
    assert!(!thread.is_running());
}

#[tokio::test]
async fn test_sentinel_drop_stops_thread() {
    let store = memory_store(0);
    let thread = RelayThread::new(store.dal.clone());
    thread.start_relay_thread();
    let sentinel = thread.sentinel();
    assert!(thread.is_running());

    drop(sentinel);
    assert!(!thread.is_running());

    // The queue and handle stay usable; the thread can be started again
    assert!(thread.start_relay_thread());
    assert!(thread.is_running());
    thread.shutdown_relay_thread().await;
}
