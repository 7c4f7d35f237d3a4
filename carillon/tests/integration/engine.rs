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

//! Engine facade tests: CRUD, manual dispatch, lifecycle, failure handling.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;

use carillon::{
    EngineConfig, EngineError, ExecutionError, ExecutionStatus, TaskStatus, TriggerSource,
    UniversalUuid, ValidationError,
};

use crate::fixtures::{
    daily_future, manual_config, one_time_past, scheduled_request, InvokerMode, TestFixture,
};

#[tokio::test]
#[serial]
async fn test_create_scheduled_task_compiles_recurrence() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;
    let agent_id = UniversalUuid::new_v4();

    let task = engine
        .create_scheduled_task(scheduled_request(agent_id, "daily digest", daily_future()))
        .await
        .unwrap();

    assert_eq!(task.cron_expression.as_deref(), Some("0 9 * * *"));
    assert_eq!(task.timezone.as_deref(), Some("UTC"));
    assert!(task.next_run_at.is_some());
    assert_eq!(task.status, TaskStatus::Active);

    // One-time recurrences force the execution cap.
    let one_time = engine
        .create_scheduled_task(scheduled_request(agent_id, "reminder", one_time_past()))
        .await
        .unwrap();
    assert_eq!(one_time.max_executions, Some(1));
    assert_eq!(one_time.cron_expression.as_deref(), Some("* * * * *"));

    let listed = engine.list_tasks_for_agent(agent_id, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_run_now_records_manual_execution() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();
    let next_run_before = task.next_run_at;

    let execution = engine.run_now(task.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_source, TriggerSource::Manual);
    assert_eq!(
        execution.output.as_deref(),
        Some(format!("ran task {}", task.id).as_str())
    );
    // Snapshot frozen at dispatch time.
    assert_eq!(execution.instructions, task.instructions);
    assert_eq!(execution.allowed_tools, task.allowed_tools);

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.total_executions, 1);
    assert_eq!(after.successful_executions, 1);
    assert!(after.claimed_at.is_none());
    // Manual runs never alter the cadence.
    assert_eq!(after.next_run_at, next_run_before);

    let history = engine.list_executions(task.id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, execution.id);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_run_now_yields_single_execution() {
    let fixture = TestFixture::new();
    fixture
        .invoker
        .set_mode(InvokerMode::Delay(Duration::from_millis(400)));
    let engine = Arc::new(fixture.engine().await);

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        let task_id = task.id;
        tokio::spawn(async move { engine.run_now(task_id).await })
    };
    // Let the first dispatch take the claim before racing it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = engine.run_now(task.id).await;

    assert!(matches!(
        second,
        Err(EngineError::Execution(ExecutionError::TaskAlreadyRunning(_)))
    ));
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, ExecutionStatus::Completed);

    assert_eq!(fixture.invoker.calls(), 1);
    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.total_executions, 1);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_collaborator_failure_is_recorded_not_raised() {
    let fixture = TestFixture::new();
    fixture.invoker.set_mode(InvokerMode::Fail);
    let engine = fixture.engine().await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let execution = engine.run_now(task.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("simulated failure"));

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.status, TaskStatus::Active);
    assert_eq!(after.failed_executions, 1);
    assert_eq!(after.consecutive_failures, 1);
    assert!(after.claimed_at.is_none());

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_failure_streak_trips_circuit_breaker() {
    let fixture = TestFixture::new();
    fixture.invoker.set_mode(InvokerMode::Fail);
    let config = EngineConfig::builder()
        .enable_polling(false)
        .consecutive_failure_limit(Some(2))
        .execution_timeout(Duration::from_secs(5))
        .claim_lease_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let engine = fixture.engine_with(config).await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    engine.run_now(task.id).await.unwrap();
    engine.run_now(task.id).await.unwrap();

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.consecutive_failures, 2);
    assert_eq!(after.status, TaskStatus::Failed);

    // A failed task is no longer runnable.
    let refused = engine.run_now(task.id).await;
    assert!(matches!(
        refused,
        Err(EngineError::Execution(ExecutionError::TaskNotRunnable { .. }))
    ));

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_execution_timeout_fails_the_attempt() {
    let fixture = TestFixture::new();
    fixture
        .invoker
        .set_mode(InvokerMode::Delay(Duration::from_secs(5)));
    let config = EngineConfig::builder()
        .enable_polling(false)
        .execution_timeout(Duration::from_millis(200))
        .claim_lease_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let engine = fixture.engine_with(config).await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let execution = engine.run_now(task.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("timed out"));

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_pause_resume_cancel_lifecycle() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let paused = engine.pause_task(task.id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);

    // A paused task cannot be dispatched.
    let refused = engine.run_now(task.id).await;
    assert!(matches!(
        refused,
        Err(EngineError::Execution(ExecutionError::TaskNotRunnable { .. }))
    ));

    // Pausing twice is an invalid transition.
    let double = engine.pause_task(task.id).await;
    assert!(matches!(
        double,
        Err(EngineError::Validation(
            ValidationError::InvalidStatusTransition { .. }
        ))
    ));

    let resumed = engine.resume_task(task.id).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::Active);

    let cancelled = engine.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // Terminal states never come back.
    let revive = engine.resume_task(task.id).await;
    assert!(matches!(
        revive,
        Err(EngineError::Validation(
            ValidationError::InvalidStatusTransition { .. }
        ))
    ));

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_cancel_task_cancels_in_flight_execution() {
    let fixture = TestFixture::new();
    fixture
        .invoker
        .set_mode(InvokerMode::Delay(Duration::from_millis(600)));
    let engine = Arc::new(fixture.engine().await);

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let dispatch = {
        let engine = Arc::clone(&engine);
        let task_id = task.id;
        tokio::spawn(async move { engine.run_now(task_id).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let cancelled = engine.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // The collaborator result arrives after cancellation and is discarded.
    let execution = dispatch.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);

    let after = engine.get_task(task.id).await.unwrap();
    assert_eq!(after.total_executions, 0);
    assert_eq!(after.successful_executions, 0);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_reschedule_recompiles_and_rejects_event_tasks() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let task = engine
        .create_scheduled_task(scheduled_request(
            UniversalUuid::new_v4(),
            "daily digest",
            daily_future(),
        ))
        .await
        .unwrap();

    let rescheduled = engine.reschedule_task(task.id, one_time_past()).await.unwrap();
    assert_eq!(rescheduled.cron_expression.as_deref(), Some("* * * * *"));
    assert_ne!(rescheduled.next_run_at, task.next_run_at);

    let (event_task, _) = engine
        .create_event_task(crate::fixtures::webhook_task_request(
            UniversalUuid::new_v4(),
            0,
        ))
        .await
        .unwrap();
    let refused = engine.reschedule_task(event_task.id, daily_future()).await;
    assert!(matches!(
        refused,
        Err(EngineError::Validation(ValidationError::NotScheduled(_)))
    ));

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_restart_recovers_abandoned_state() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    // Simulate a crash: a claimed task with a running execution on disk.
    let task = dal
        .agent_tasks()
        .create(carillon::models::NewAgentTask {
            agent_id: UniversalUuid::new_v4(),
            principal_id: UniversalUuid::new_v4(),
            name: "daily digest".to_string(),
            kind: carillon::TaskKind::Scheduled,
            instructions: "Summarize".to_string(),
            allowed_tools: vec![],
            cron_expression: Some("0 9 * * *".to_string()),
            timezone: Some("UTC".to_string()),
            next_run_at: Some(carillon::UniversalTimestamp::now()),
            trigger_type: None,
            max_executions: None,
            start_date: None,
            end_date: None,
        })
        .await
        .unwrap();
    dal.agent_tasks()
        .claim(task.id, chrono::Utc::now(), chrono::Duration::minutes(10))
        .await
        .unwrap();
    let execution = dal
        .task_executions()
        .create(carillon::models::NewTaskExecution {
            task_id: task.id,
            agent_id: task.agent_id,
            trigger_source: TriggerSource::Scheduled,
            trigger_payload: None,
            instructions: task.instructions.clone(),
            allowed_tools: vec![],
            metadata: None,
        })
        .await
        .unwrap();
    dal.task_executions()
        .mark_running(execution.id, carillon::UniversalTimestamp::now())
        .await
        .unwrap();

    let engine = fixture.engine_with(manual_config()).await;

    let recovered = engine.get_execution(execution.id).await.unwrap();
    assert_eq!(recovered.status, ExecutionStatus::Failed);
    let recovered_task = engine.get_task(task.id).await.unwrap();
    assert!(recovered_task.claimed_at.is_none());

    engine.shutdown().await;
}
