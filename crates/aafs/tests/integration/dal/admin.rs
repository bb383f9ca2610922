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

use aafs::dal::DROP_ALL_CONFIRMATION;
use aafs::models::pending_task::TaskQuery;
use aafs::models::relay_item::RelayQuery;
use aafs::{NewPendingTask, RelayStamp, StoreError};
use serde_json::json;

use crate::fixtures::all_stores;

#[tokio::test]
async fn test_drop_all_requires_confirmation() {
    for store in all_stores(0).await {
        store
            .dal
            .pending_task()
            .submit_task(NewPendingTask::new(101, 0))
            .await
            .unwrap();
        store
            .dal
            .relay_item()
            .submit_relay_item("pdlc_a", 1, json!({}), false, RelayStamp::NONE)
            .await
            .unwrap();

        let err = store.dal.admin().drop_all("yes").await.unwrap_err();
        assert!(matches!(err, StoreError::ConfirmationRequired { .. }));
        assert!(err.is_precondition());
        assert_eq!(
            store.dal.pending_task().count_tasks(&TaskQuery::all()).await.unwrap(),
            1
        );

        store.dal.admin().drop_all(DROP_ALL_CONFIRMATION).await.unwrap();
        assert_eq!(
            store.dal.pending_task().count_tasks(&TaskQuery::all()).await.unwrap(),
            0
        );
        assert!(store
            .dal
            .relay_item()
            .get_relay_item_range(&RelayQuery::all())
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_indexes_can_be_rebuilt() {
    for store in all_stores(0).await {
        let admin = store.dal.admin();
        admin.drop_indexes().await.unwrap();
        admin.drop_indexes().await.unwrap();
        admin.make_indexes().await.unwrap();
        admin.make_indexes().await.unwrap();

        // Queries still work after a rebuild
        store
            .dal
            .pending_task()
            .submit_task(NewPendingTask::new(101, 0))
            .await
            .unwrap();
        assert!(store
            .dal
            .pending_task()
            .activate_first_ready_task(0)
            .await
            .unwrap()
            .is_some());
    }
}
