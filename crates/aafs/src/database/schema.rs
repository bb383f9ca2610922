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

// Diesel table definitions for the SQLite backend.

diesel::table! {
    pending_tasks (id) {
        id -> Text,
        event_id -> Text,
        sched_time -> BigInt,
        submit_time -> BigInt,
        submit_id -> Text,
        opcode -> Integer,
        stage -> Integer,
        details -> Text,
        claim_id -> Nullable<Text>,
        claimed_at -> Nullable<BigInt>,
    }
}

diesel::table! {
    relay_items (relay_id) {
        relay_id -> Text,
        relay_time -> BigInt,
        relay_stamp -> BigInt,
        details -> Text,
        change_seq -> BigInt,
    }
}

diesel::table! {
    relay_feed_state (id) {
        id -> Integer,
        last_seq -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(pending_tasks, relay_items, relay_feed_state);
