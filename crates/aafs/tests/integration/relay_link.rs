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

use aafs::dispatcher::OPCODE_ROLE_CHANGE;
use aafs::models::pending_task::TaskQuery;
use aafs::relay::link::status::DesignationSource;
use aafs::relay::payload::{
    decode_payload, AnalystSelection, AnalystStateChange, ForeignStatus, LinkMode, LinkRole,
    PdlForeign, RelayKind, ServerState, ServerStatus,
};
use aafs::relay::{RelayLinkConfig, RoleReason};
use aafs::{NewPendingTask, RelayLink, RelayStamp, DAL};

use crate::fixtures::{memory_store, TestStore};

const START: i64 = 1_700_000_000_000;

fn config(server_number: u8, mode: LinkMode) -> RelayLinkConfig {
    RelayLinkConfig::builder()
        .server_number(server_number)
        .mode(mode)
        .configured_primary(1)
        .heartbeat_interval(Duration::from_secs(10))
        .peer_timeout(Duration::from_secs(60))
        // Every poll reads the store, so tests need not wait on the feed
        .resync_interval(Duration::ZERO)
        .primary_only_opcodes(vec![110])
        .secondary_only_opcodes(vec![120])
        .build()
}

async fn link(store: &TestStore, server_number: u8, mode: LinkMode) -> RelayLink {
    RelayLink::new(store.reopen().await, config(server_number, mode))
}

async fn status_of(dal: &DAL, server_number: u8) -> ServerStatus {
    let item = dal
        .relay_item()
        .get_relay_item(&RelayKind::ServerStatus.relay_id(&server_number.to_string()))
        .await
        .unwrap()
        .expect("no status published");
    decode_payload(&item).unwrap()
}

async fn role_changes(dal: &DAL) -> Vec<serde_json::Value> {
    dal.pending_task()
        .get_task_range(&TaskQuery::all().with_opcode(OPCODE_ROLE_CHANGE))
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.details)
        .collect()
}

#[tokio::test]
async fn test_solo_server_is_always_primary() {
    let store = memory_store(START);
    let solo = link(&store, 2, LinkMode::Solo).await;

    let local = solo.init_relay_link().await.unwrap();
    assert_eq!(local.role, LinkRole::Primary);
    assert_eq!(local.reason, RoleReason::Solo);
    assert!(solo.is_primary());

    let published = status_of(&store.dal, 2).await;
    assert_eq!(published.role, LinkRole::Primary);
    assert_eq!(published.state, ServerState::Running);
    assert_eq!(published.heartbeat_time, START);
    solo.shutdown_relay_link().await.unwrap();
}

#[tokio::test]
async fn test_secondary_takes_over_when_primary_goes_silent() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    let two = link(&store, 2, LinkMode::Pair).await;

    let first = one.init_relay_link().await.unwrap();
    assert_eq!(first.role, LinkRole::Primary);
    assert_eq!(first.reason, RoleReason::Designated);

    let second = two.init_relay_link().await.unwrap();
    assert_eq!(second.role, LinkRole::Secondary);
    assert_eq!(second.reason, RoleReason::PeerAlive);
    assert!(two.remote_status().unwrap().alive);

    // Server 1 keeps polling within the timeout: nothing changes
    store.clock.advance(30_000);
    one.poll_relay_link().await.unwrap();
    assert_eq!(two.poll_relay_link().await.unwrap().role, LinkRole::Secondary);
    assert!(role_changes(&store.dal).await.is_empty());

    // Server 1 stops polling
    store.clock.advance(61_000);
    let taken = two.poll_relay_link().await.unwrap();
    assert_eq!(taken.role, LinkRole::Primary);
    assert_eq!(taken.reason, RoleReason::Takeover);
    assert_eq!(taken.primary_since, START + 91_000);
    assert!(!two.remote_status().unwrap().alive);

    let changes = role_changes(&store.dal).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["from"], "secondary");
    assert_eq!(changes[0]["to"], "primary");
    assert_eq!(changes[0]["reason"], "takeover");

    assert_eq!(status_of(&store.dal, 2).await.role, LinkRole::Primary);
}

#[tokio::test]
async fn test_shutdown_hands_over_to_peer() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    let two = link(&store, 2, LinkMode::Pair).await;
    one.init_relay_link().await.unwrap();
    two.init_relay_link().await.unwrap();
    assert!(!two.is_primary());

    one.shutdown_relay_link().await.unwrap();
    assert!(!one.relay_thread().is_running());
    let announced = status_of(&store.dal, 1).await;
    assert_eq!(announced.state, ServerState::ShuttingDown);

    store.clock.advance(1_000);
    let local = two.poll_relay_link().await.unwrap();
    assert_eq!(local.role, LinkRole::Primary);
    assert_eq!(local.reason, RoleReason::Takeover);
}

#[tokio::test]
async fn test_primary_command_overrides_and_cancels_conflicting_tasks() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    let two = link(&store, 2, LinkMode::Pair).await;
    one.init_relay_link().await.unwrap();
    two.init_relay_link().await.unwrap();

    let pending = store.dal.pending_task();
    for opcode in [110, 120, 120, 130] {
        pending
            .submit_task(NewPendingTask::new(opcode, START + 500_000))
            .await
            .unwrap();
    }

    store.clock.advance(1_000);
    let cancelled = two.set_timeline_to_primary().await.unwrap();
    assert_eq!(cancelled, 2);
    let local = two.local_status().unwrap();
    assert_eq!(local.role, LinkRole::Primary);
    assert_eq!(local.reason, RoleReason::Designated);
    assert_eq!(local.designated_primary, 2);

    // Server 1 sees the command and its live peer, and steps down
    let demoted = one.poll_relay_link().await.unwrap();
    assert_eq!(demoted.role, LinkRole::Secondary);
    assert_eq!(demoted.reason, RoleReason::PeerAlive);

    let changes = role_changes(&store.dal).await;
    assert_eq!(changes.len(), 2);

    // Handing the timeline back cancels the primary-only task
    store.clock.advance(1_000);
    assert_eq!(two.set_timeline_to_secondary().await.unwrap(), 1);
    assert_eq!(two.local_status().unwrap().role, LinkRole::Secondary);
    assert_eq!(one.poll_relay_link().await.unwrap().role, LinkRole::Primary);

    let left: Vec<i32> = pending
        .get_task_range(&TaskQuery::all())
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.opcode)
        .filter(|opcode| *opcode != OPCODE_ROLE_CHANGE)
        .collect();
    assert_eq!(left, vec![130]);
}

#[tokio::test]
async fn test_watch_mode_never_takes_over() {
    let store = memory_store(START);
    let watcher = link(&store, 2, LinkMode::Watch).await;

    let local = watcher.init_relay_link().await.unwrap();
    assert_eq!(local.role, LinkRole::Secondary);
    assert_eq!(local.reason, RoleReason::WatchOnly);

    store.clock.advance(600_000);
    assert_eq!(watcher.poll_relay_link().await.unwrap().role, LinkRole::Secondary);
    assert!(role_changes(&store.dal).await.is_empty());
}

#[tokio::test]
async fn test_takeover_yields_when_foreign_products_appear() {
    let store = memory_store(START);
    let two = link(&store, 2, LinkMode::Pair).await;

    let local = two.init_relay_link().await.unwrap();
    assert_eq!(local.reason, RoleReason::Takeover);

    store.clock.advance(5_000);
    store
        .dal
        .relay_item()
        .submit_payload(
            "us7000abcd",
            &PdlForeign {
                status: ForeignStatus::Detected,
                detect_time: START + 5_000,
                detected_by: 2,
            },
            false,
            RelayStamp::NONE,
        )
        .await
        .unwrap();

    let yielded = two.poll_relay_link().await.unwrap();
    assert_eq!(yielded.role, LinkRole::Secondary);
    assert_eq!(yielded.reason, RoleReason::ForeignDetected);
    assert_eq!(role_changes(&store.dal).await.len(), 1);
}

#[tokio::test]
async fn test_light_poll_writes_nothing() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    assert!(one.poll_relay_link_no_prist().is_none());
    one.init_relay_link().await.unwrap();

    store.clock.advance(120_000);
    let local = one.poll_relay_link_no_prist().unwrap();
    assert_eq!(local.role, LinkRole::Primary);
    assert_eq!(status_of(&store.dal, 1).await.heartbeat_time, START);

    // The full poll publishes the overdue heartbeat
    one.poll_relay_link().await.unwrap();
    assert_eq!(status_of(&store.dal, 1).await.heartbeat_time, START + 120_000);
}

#[tokio::test]
async fn test_secondary_command_binds_with_silent_peer() {
    let store = memory_store(START);
    let two = link(&store, 2, LinkMode::Pair).await;
    assert_eq!(two.init_relay_link().await.unwrap().reason, RoleReason::Takeover);

    store
        .dal
        .pending_task()
        .submit_task(NewPendingTask::new(110, START + 500_000))
        .await
        .unwrap();

    store.clock.advance(1_000);
    assert_eq!(two.set_timeline_to_secondary().await.unwrap(), 1);
    let local = two.local_status().unwrap();
    assert_eq!(local.role, LinkRole::Secondary);
    assert_eq!(local.reason, RoleReason::Commanded);
    assert_eq!(local.designated_primary, 1);

    // Still bound long after the peer went quiet
    store.clock.advance(600_000);
    assert_eq!(two.poll_relay_link().await.unwrap().reason, RoleReason::Commanded);

    // Server 1 comes up and shuts down cleanly: the command is released
    let one = link(&store, 1, LinkMode::Pair).await;
    assert_eq!(one.init_relay_link().await.unwrap().role, LinkRole::Primary);
    store.clock.advance(1_000);
    one.shutdown_relay_link().await.unwrap();
    store.clock.advance(1_000);
    let local = two.poll_relay_link().await.unwrap();
    assert_eq!(local.role, LinkRole::Primary);
    assert_eq!(local.reason, RoleReason::Takeover);
}

#[tokio::test]
async fn test_analyst_selection_designates_primary() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    let two = link(&store, 2, LinkMode::Pair).await;
    one.init_relay_link().await.unwrap();
    two.init_relay_link().await.unwrap();

    let relay = store.dal.relay_item();
    let selection = |primary_server, analyst_time| AnalystSelection {
        state_change: AnalystStateChange::Start,
        create_timeline: true,
        analyst_time,
        primary_server,
    };

    // A selection without a role command leaves the roles alone
    store.clock.advance(1_000);
    relay
        .submit_payload("us1", &selection(None, START + 1_000), false, RelayStamp::NONE)
        .await
        .unwrap();
    assert!(one.poll_relay_link().await.unwrap().is_primary());
    assert!(!two.poll_relay_link().await.unwrap().is_primary());

    store.clock.advance(1_000);
    relay
        .submit_payload("us2", &selection(Some(2), START + 2_000), false, RelayStamp::NONE)
        .await
        .unwrap();
    let promoted = two.poll_relay_link().await.unwrap();
    assert_eq!(promoted.role, LinkRole::Primary);
    assert_eq!(promoted.reason, RoleReason::Designated);
    assert_eq!(promoted.designation, DesignationSource::Analyst);

    let demoted = one.poll_relay_link().await.unwrap();
    assert_eq!(demoted.role, LinkRole::Secondary);
    assert_eq!(demoted.designated_primary, 2);
}

#[tokio::test]
async fn test_stale_heartbeat_cannot_replace_shutdown() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    one.init_relay_link().await.unwrap();

    let stored = store
        .dal
        .relay_item()
        .get_relay_item("srvst_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.relay_stamp, RelayStamp::forced(START));

    store.clock.advance(1_000);
    one.shutdown_relay_link().await.unwrap();

    let late = ServerStatus {
        server_number: 1,
        role: LinkRole::Primary,
        state: ServerState::Running,
        mode: LinkMode::Pair,
        heartbeat_time: START - 5_000,
        primary_since: START,
    };
    let written = store
        .dal
        .relay_item()
        .submit_payload("1", &late, false, RelayStamp::forced(START - 5_000))
        .await
        .unwrap();
    assert!(written.is_none());
    assert_eq!(status_of(&store.dal, 1).await.state, ServerState::ShuttingDown);
}

#[tokio::test]
async fn test_resync_forgets_deleted_command() {
    let store = memory_store(START);
    let one = link(&store, 1, LinkMode::Pair).await;
    let two = link(&store, 2, LinkMode::Pair).await;
    one.init_relay_link().await.unwrap();
    two.init_relay_link().await.unwrap();

    store.clock.advance(1_000);
    two.set_timeline_to_primary().await.unwrap();
    assert!(!one.poll_relay_link().await.unwrap().is_primary());

    assert!(store
        .dal
        .relay_item()
        .delete_relay_item(&RelayKind::PrimaryCommand.relay_id("link"))
        .await
        .unwrap());

    store.clock.advance(1_000);
    let restored = one.poll_relay_link().await.unwrap();
    assert_eq!(restored.role, LinkRole::Primary);
    assert_eq!(restored.designation, DesignationSource::Configured);
    assert_eq!(two.poll_relay_link().await.unwrap().role, LinkRole::Secondary);
}
