/*
 *  Copyright 2025 Carillon Contributors
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

//! Poll-loop tests: due dispatch, one-time completion, cadence advance.

use std::time::Duration;

use chrono::Utc;
use serial_test::serial;

use carillon::models::NewAgentTask;
use carillon::{
    ExecutionStatus, TaskKind, TaskStatus, TriggerSource, UniversalTimestamp, UniversalUuid,
};

use crate::fixtures::{
    one_time_past, polling_config, scheduled_request, wait_until, InvokerMode, TestFixture,
};

/// A recurring task stored directly with a past `next_run_at`, so the poll
/// loop picks it up without waiting for a real cadence boundary.
fn overdue_recurring(agent_id: UniversalUuid) -> NewAgentTask {
    NewAgentTask {
        agent_id,
        principal_id: UniversalUuid::new_v4(),
        name: "minute digest".to_string(),
        kind: TaskKind::Scheduled,
        instructions: "Summarize the last minute".to_string(),
        allowed_tools: vec![],
        cron_expression: Some("*/1 * * * *".to_string()),
        timezone: Some("UTC".to_string()),
        next_run_at: Some(UniversalTimestamp(Utc::now() - chrono::Duration::minutes(2))),
        trigger_type: None,
        max_executions: None,
        start_date: None,
        end_date: None,
    }
}

#[tokio::test]
#[serial]
async fn test_poll_loop_dispatches_overdue_task_and_advances_cadence() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;
    let task = dal
        .agent_tasks()
        .create(overdue_recurring(UniversalUuid::new_v4()))
        .await
        .unwrap();

    let engine = fixture.engine_with(polling_config()).await;

    assert!(
        wait_until(Duration::from_secs(5), || async {
            fixture.invoker.calls() >= 1
        })
        .await,
        "poll loop never dispatched the overdue task"
    );
    assert!(
        wait_until(Duration::from_secs(5), || async {
            engine
                .get_task(task.id)
                .await
                .map(|t| t.total_executions >= 1 && t.claimed_at.is_none())
                .unwrap_or(false)
        })
        .await,
        "dispatch bookkeeping never landed"
    );

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.successful_executions, 1);
    // Cadence advanced past now; the task is no longer due.
    assert!(after.next_run_at.unwrap().0 > Utc::now());

    let history = engine.list_executions(task.id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trigger_source, TriggerSource::Scheduled);
    assert_eq!(history[0].status, ExecutionStatus::Completed);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_one_time_task_runs_exactly_once_and_completes() {
    let fixture = TestFixture::new();
    let engine = fixture.engine_with(polling_config()).await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "reminder",
            one_time_past(),
        ))
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || async {
            engine
                .get_task(task.id)
                .await
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
        .await,
        "one-time task never completed"
    );

    // Give the loop a few more cycles to prove it does not re-dispatch.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.total_executions, 1);
    assert_eq!(fixture.invoker.calls(), 1);

    let history = engine.list_executions(task.id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_failed_scheduled_run_advances_cadence() {
    let fixture = TestFixture::new();
    fixture.invoker.set_mode(InvokerMode::Fail);
    let dal = fixture.dal().await;
    let task = dal
        .agent_tasks()
        .create(overdue_recurring(UniversalUuid::new_v4()))
        .await
        .unwrap();

    let engine = fixture.engine_with(polling_config()).await;

    assert!(
        wait_until(Duration::from_secs(5), || async {
            engine
                .get_task(task.id)
                .await
                .map(|t| t.failed_executions >= 1 && t.claimed_at.is_none())
                .unwrap_or(false)
        })
        .await,
        "failed dispatch bookkeeping never landed"
    );

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Active);
    // The failed slot is consumed: the task waits for its next cadence
    // boundary instead of retrying on every poll.
    assert!(after.next_run_at.unwrap().0 > Utc::now());
    assert!(after.last_run_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_expired_validity_window_blocks_dispatch() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let mut new_task = overdue_recurring(UniversalUuid::new_v4());
    new_task.start_date = Some(UniversalTimestamp(Utc::now() - chrono::Duration::days(7)));
    new_task.end_date = Some(UniversalTimestamp(Utc::now() - chrono::Duration::hours(1)));
    let task = dal.agent_tasks().create(new_task).await.unwrap();

    let engine = fixture.engine_with(polling_config()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(fixture.invoker.calls(), 0);
    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.total_executions, 0);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_shutdown_stops_polling() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;
    let engine = fixture.engine_with(polling_config()).await;
    engine.shutdown().await;

    // A task that becomes due after shutdown is never picked up.
    dal.agent_tasks()
        .create(overdue_recurring(UniversalUuid::new_v4()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fixture.invoker.calls(), 0);
}
