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

use aafs::models::relay_item::RelayQuery;
use aafs::models::TimeRange;
use aafs::relay::payload::{
    decode_payload, CompletionAction, ForecastStamp, PdlCompletion, PdlRemoval, RelayKind,
    RemovalReason,
};
use aafs::{RelayError, RelayStamp};
use serde_json::json;

use crate::fixtures::{all_stores, memory_store, sqlite_store};

#[tokio::test]
async fn test_register_is_monotonic() {
    for store in all_stores(0).await {
        let relay = store.dal.relay_item();
        let stamp = RelayStamp(5);

        let first = relay
            .submit_relay_item("pdlc_us1", 100, json!({"v": 1}), false, stamp)
            .await
            .unwrap();
        assert!(first.is_some());

        // Older time loses
        assert!(relay
            .submit_relay_item("pdlc_us1", 90, json!({"v": 2}), false, RelayStamp(9))
            .await
            .unwrap()
            .is_none());
        // Same time and stamp loses
        assert!(relay
            .submit_relay_item("pdlc_us1", 100, json!({"v": 3}), false, stamp)
            .await
            .unwrap()
            .is_none());
        // Same time, larger stamp wins
        let newer = relay
            .submit_relay_item("pdlc_us1", 100, json!({"v": 4}), false, RelayStamp(6))
            .await
            .unwrap()
            .unwrap();
        assert!(newer.change_seq > first.unwrap().change_seq);

        let stored = relay.get_relay_item("pdlc_us1").await.unwrap().unwrap();
        assert_eq!(stored.details, json!({"v": 4}), "backend {}", store.backend_name());
        assert_eq!(stored.relay_stamp, RelayStamp(6));
    }
}

#[tokio::test]
async fn test_force_and_unstamped_writes_always_win() {
    for store in all_stores(0).await {
        let relay = store.dal.relay_item();
        relay
            .submit_relay_item("anas_us1", 500, json!({"v": 1}), false, RelayStamp(10))
            .await
            .unwrap();

        let forced = relay
            .submit_relay_item("anas_us1", 100, json!({"v": 2}), true, RelayStamp(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forced.relay_time, 100);

        // Repeating a forced write is idempotent in content
        let again = relay
            .submit_relay_item("anas_us1", 100, json!({"v": 2}), true, RelayStamp(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.details, forced.details);
        assert_eq!(again.relay_time, forced.relay_time);

        let unstamped = relay
            .submit_relay_item("anas_us1", 50, json!({"v": 3}), false, RelayStamp::NONE)
            .await
            .unwrap();
        assert!(unstamped.is_some());
        assert_eq!(
            relay.get_relay_item("anas_us1").await.unwrap().unwrap().details,
            json!({"v": 3})
        );
    }
}

#[tokio::test]
async fn test_typed_payloads_and_kind_queries() {
    for store in all_stores(0).await {
        let relay = store.dal.relay_item();
        for (event, time) in [("us1", 300), ("us2", 100), ("us3", 200)] {
            let completion = PdlCompletion {
                action: CompletionAction::Submitted,
                forecast_stamp: ForecastStamp(time),
                update_time: time,
                server_number: 1,
            };
            relay
                .submit_payload(event, &completion, false, RelayStamp::NONE)
                .await
                .unwrap()
                .unwrap();
        }
        relay
            .submit_payload(
                "us1",
                &PdlRemoval {
                    reason: RemovalReason::Withdrawn,
                    forecast_stamp: ForecastStamp(300),
                    remove_time: 400,
                },
                false,
                RelayStamp::NONE,
            )
            .await
            .unwrap();

        let completions = relay.get_pdl_completion_relay_items(&[]).await.unwrap();
        let ids: Vec<&str> = completions.iter().map(|i| i.relay_id.as_str()).collect();
        assert_eq!(ids, vec!["pdlc_us1", "pdlc_us3", "pdlc_us2"]);

        let subset = relay
            .get_pdl_completion_relay_items(&["us2".to_string(), "us3".to_string()])
            .await
            .unwrap();
        assert_eq!(subset.len(), 2);

        let first = relay
            .get_first_pdl_completion_relay_item(&["us2".to_string(), "us3".to_string()])
            .await
            .unwrap()
            .unwrap();
        let decoded: PdlCompletion = decode_payload(&first).unwrap();
        assert_eq!(decoded.update_time, 200);

        let removal = relay
            .get_first_pdl_removal_relay_item(&["us1".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            decode_payload::<PdlCompletion>(&removal),
            Err(RelayError::PayloadMismatch { .. })
        ));
        assert!(relay
            .get_pdl_foreign_relay_items(&[])
            .await
            .unwrap()
            .is_empty());
        assert!(relay
            .get_first_analyst_selection_relay_item(&[])
            .await
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn test_range_queries_and_deletes() {
    for store in all_stores(0).await {
        let relay = store.dal.relay_item();
        for (id, time) in [("pdlc_a", 10), ("pdlc_b", 20), ("pdlr_a", 20), ("pdlf_a", 30)] {
            relay
                .submit_relay_item(id, time, json!({}), false, RelayStamp::NONE)
                .await
                .unwrap();
        }
        // A literal underscore in the prefix must not act as a wildcard
        relay
            .submit_relay_item("pdlcXb", 20, json!({}), false, RelayStamp::NONE)
            .await
            .unwrap();

        let window = relay
            .get_relay_item_range(&RelayQuery::all().in_range(TimeRange::new(Some(20), Some(30))))
            .await
            .unwrap();
        let ids: Vec<&str> = window.iter().map(|i| i.relay_id.as_str()).collect();
        assert_eq!(ids, vec!["pdlcXb", "pdlc_b", "pdlr_a"]);

        let completions = relay
            .get_relay_item_range(&RelayQuery::all().with_prefix(RelayKind::PdlCompletion.prefix()).descending())
            .await
            .unwrap();
        let ids: Vec<&str> = completions.iter().map(|i| i.relay_id.as_str()).collect();
        assert_eq!(ids, vec!["pdlc_b", "pdlc_a"], "backend {}", store.backend_name());

        assert!(relay.delete_relay_item("pdlf_a").await.unwrap());
        assert!(!relay.delete_relay_item("pdlf_a").await.unwrap());
        assert_eq!(
            relay
                .delete_relay_item_range(&RelayQuery::all().with_prefix("pdlc_"))
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            relay.get_relay_item_range(&RelayQuery::all()).await.unwrap().len(),
            2
        );
    }
}

#[tokio::test]
async fn test_change_feed_delivers_accepted_writes_only() {
    for store in all_stores(0).await {
        let relay = store.dal.relay_item();
        relay
            .submit_relay_item("pdlc_old", 1, json!({}), false, RelayStamp::NONE)
            .await
            .unwrap();

        let mut stream = relay
            .watch_relay_item_changes()
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));

        relay
            .submit_relay_item("pdlc_a", 100, json!({}), false, RelayStamp(3))
            .await
            .unwrap();
        relay
            .submit_relay_item("pdlc_a", 50, json!({}), false, RelayStamp(3))
            .await
            .unwrap();
        relay
            .submit_relay_item("pdlc_b", 10, json!({}), false, RelayStamp::NONE)
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("change feed stalled")
                .unwrap()
                .unwrap();
            seen.push(item.relay_id);
        }
        assert_eq!(seen, vec!["pdlc_a", "pdlc_b"], "backend {}", store.backend_name());

        stream.close();
        assert!(stream.next().await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_memory_feed_reset_closes_subscribers() {
    let store = memory_store(0);
    let mut stream = store.dal.relay_item().watch_relay_item_changes().await.unwrap();

    store.dal.database().memory_store().unwrap().reset_change_feed();
    assert!(stream.next().await.unwrap().is_none());
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_sqlite_change_seq_survives_deletes() {
    let store = sqlite_store(0).await;
    let relay = store.dal.relay_item();

    let first = relay
        .submit_relay_item("pdlc_a", 1, json!({}), false, RelayStamp::NONE)
        .await
        .unwrap()
        .unwrap();
    relay.delete_relay_item("pdlc_a").await.unwrap();
    let second = relay
        .submit_relay_item("pdlc_b", 1, json!({}), false, RelayStamp::NONE)
        .await
        .unwrap()
        .unwrap();

    assert!(second.change_seq > first.change_seq);
    assert_eq!(relay.current_change_seq().await.unwrap(), second.change_seq);
}
