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

//! DAL-level tests: claims, due queries, counters, ledger transitions.

use chrono::{Duration as ChronoDuration, Utc};
use serial_test::serial;

use carillon::models::{
    NewAgentTask, NewEventTrigger, NewTaskExecution, TaskKind, TaskStatus, TaskUpdate,
};
use carillon::{
    ExecutionStatus, TriggerCondition, TriggerSource, TriggerType, UniversalTimestamp,
    UniversalUuid, ValidationError,
};

use crate::fixtures::TestFixture;

fn scheduled_task(agent_id: UniversalUuid, next_run_at: UniversalTimestamp) -> NewAgentTask {
    NewAgentTask {
        agent_id,
        principal_id: UniversalUuid::new_v4(),
        name: "daily digest".to_string(),
        kind: TaskKind::Scheduled,
        instructions: "Summarize yesterday's activity".to_string(),
        allowed_tools: vec!["search".to_string()],
        cron_expression: Some("0 9 * * *".to_string()),
        timezone: Some("UTC".to_string()),
        next_run_at: Some(next_run_at),
        trigger_type: None,
        max_executions: None,
        start_date: None,
        end_date: None,
    }
}

fn event_task(agent_id: UniversalUuid, trigger_type: TriggerType) -> NewAgentTask {
    NewAgentTask {
        agent_id,
        principal_id: UniversalUuid::new_v4(),
        name: "deploy notifier".to_string(),
        kind: TaskKind::EventBased,
        instructions: "Announce the deploy".to_string(),
        allowed_tools: vec![],
        cron_expression: None,
        timezone: None,
        next_run_at: None,
        trigger_type: Some(trigger_type),
        max_executions: None,
        start_date: None,
        end_date: None,
    }
}

fn past() -> UniversalTimestamp {
    UniversalTimestamp(Utc::now() - ChronoDuration::minutes(5))
}

#[tokio::test]
#[serial]
async fn test_create_and_fetch_task() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let agent_id = UniversalUuid::new_v4();
    let created = dal
        .agent_tasks()
        .create(scheduled_task(agent_id, past()))
        .await
        .unwrap();

    assert_eq!(created.status, TaskStatus::Active);
    assert_eq!(created.total_executions, 0);
    assert!(created.claimed_at.is_none());

    let fetched = dal.agent_tasks().get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.name, "daily digest");
    assert_eq!(fetched.kind, TaskKind::Scheduled);
    assert_eq!(fetched.allowed_tools, vec!["search".to_string()]);

    let missing = dal.agent_tasks().get_by_id(UniversalUuid::new_v4()).await;
    assert!(matches!(missing, Err(ValidationError::TaskNotFound(_))));
}

#[tokio::test]
#[serial]
async fn test_due_query_excludes_claimed_paused_and_future() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;
    let agent_id = UniversalUuid::new_v4();
    let lease = ChronoDuration::minutes(10);

    let due = dal
        .agent_tasks()
        .create(scheduled_task(agent_id, past()))
        .await
        .unwrap();
    let claimed = dal
        .agent_tasks()
        .create(scheduled_task(agent_id, past()))
        .await
        .unwrap();
    let paused = dal
        .agent_tasks()
        .create(scheduled_task(agent_id, past()))
        .await
        .unwrap();
    let future = dal
        .agent_tasks()
        .create(scheduled_task(
            agent_id,
            UniversalTimestamp(Utc::now() + ChronoDuration::hours(1)),
        ))
        .await
        .unwrap();

    assert!(dal
        .agent_tasks()
        .claim(claimed.id, Utc::now(), lease)
        .await
        .unwrap());
    assert!(dal
        .agent_tasks()
        .try_transition(paused.id, TaskStatus::Active, TaskStatus::Paused)
        .await
        .unwrap());

    let found = dal.agent_tasks().get_due_tasks(Utc::now(), lease).await.unwrap();
    let ids: Vec<_> = found.iter().map(|t| t.id).collect();
    assert!(ids.contains(&due.id));
    assert!(!ids.contains(&claimed.id));
    assert!(!ids.contains(&paused.id));
    assert!(!ids.contains(&future.id));
}

#[tokio::test]
#[serial]
async fn test_claim_is_exclusive_until_released() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;
    let lease = ChronoDuration::minutes(10);

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();

    assert!(dal.agent_tasks().claim(task.id, Utc::now(), lease).await.unwrap());
    assert!(!dal.agent_tasks().claim(task.id, Utc::now(), lease).await.unwrap());

    dal.agent_tasks().release_claim(task.id).await.unwrap();
    assert!(dal.agent_tasks().claim(task.id, Utc::now(), lease).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_stale_claim_can_be_stolen() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();

    // Claimed long ago relative to a zero-length lease.
    assert!(dal
        .agent_tasks()
        .claim(task.id, Utc::now() - ChronoDuration::minutes(30), ChronoDuration::minutes(10))
        .await
        .unwrap());

    // A fresh dispatcher with a 10 minute lease sees the claim as stale.
    assert!(dal
        .agent_tasks()
        .claim(task.id, Utc::now(), ChronoDuration::minutes(10))
        .await
        .unwrap());
}

#[tokio::test]
#[serial]
async fn test_counters_and_lifecycle_caps() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let mut new_task = scheduled_task(UniversalUuid::new_v4(), past());
    new_task.max_executions = Some(2);
    let task = dal.agent_tasks().create(new_task).await.unwrap();

    let after_success = dal
        .agent_tasks()
        .record_success(task.id, UniversalTimestamp::now())
        .await
        .unwrap();
    assert_eq!(after_success.total_executions, 1);
    assert_eq!(after_success.successful_executions, 1);
    assert_eq!(after_success.consecutive_failures, 0);
    assert!(after_success.last_run_at.is_some());

    // Cap not reached yet.
    assert!(!dal.agent_tasks().complete_if_capped(task.id).await.unwrap());

    let after_failure = dal
        .agent_tasks()
        .record_failure(task.id, UniversalTimestamp::now())
        .await
        .unwrap();
    assert_eq!(after_failure.total_executions, 2);
    assert_eq!(after_failure.failed_executions, 1);
    assert_eq!(after_failure.consecutive_failures, 1);

    assert!(dal.agent_tasks().complete_if_capped(task.id).await.unwrap());
    let completed = dal.agent_tasks().get_by_id(task.id).await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
}

#[tokio::test]
#[serial]
async fn test_failure_streak_disables_task() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();

    for _ in 0..3 {
        dal.agent_tasks()
            .record_failure(task.id, UniversalTimestamp::now())
            .await
            .unwrap();
    }

    assert!(!dal.agent_tasks().fail_if_over_limit(task.id, 5).await.unwrap());
    assert!(dal.agent_tasks().fail_if_over_limit(task.id, 3).await.unwrap());
    let failed = dal.agent_tasks().get_by_id(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
}

#[tokio::test]
#[serial]
async fn test_update_details_validates_merged_window() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let mut new_task = scheduled_task(UniversalUuid::new_v4(), past());
    new_task.end_date = Some(UniversalTimestamp(Utc::now() + ChronoDuration::days(7)));
    let task = dal.agent_tasks().create(new_task).await.unwrap();

    // Start date after the existing end date must be rejected.
    let bad = dal
        .agent_tasks()
        .update_details(
            task.id,
            TaskUpdate {
                start_date: Some(UniversalTimestamp(Utc::now() + ChronoDuration::days(30))),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(bad, Err(ValidationError::InvalidDateRange)));

    let updated = dal
        .agent_tasks()
        .update_details(
            task.id,
            TaskUpdate {
                name: Some("weekly digest".to_string()),
                max_executions: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "weekly digest");
    assert_eq!(updated.max_executions, Some(10));
    // Untouched fields survive.
    assert_eq!(updated.instructions, task.instructions);
}

#[tokio::test]
#[serial]
async fn test_execution_transitions_only_move_forward() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();
    let execution = dal
        .task_executions()
        .create(NewTaskExecution {
            task_id: task.id,
            agent_id: task.agent_id,
            trigger_source: TriggerSource::Manual,
            trigger_payload: None,
            instructions: task.instructions.clone(),
            allowed_tools: task.allowed_tools.clone(),
            metadata: None,
        })
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Pending);

    assert!(dal
        .task_executions()
        .mark_running(execution.id, UniversalTimestamp::now())
        .await
        .unwrap());
    // Already running.
    assert!(!dal
        .task_executions()
        .mark_running(execution.id, UniversalTimestamp::now())
        .await
        .unwrap());

    assert!(dal
        .task_executions()
        .mark_completed(
            execution.id,
            UniversalTimestamp::now(),
            42,
            "done".to_string(),
            None,
        )
        .await
        .unwrap());

    // Terminal rows are never rewritten.
    assert!(!dal
        .task_executions()
        .mark_failed(execution.id, UniversalTimestamp::now(), None, "late".to_string())
        .await
        .unwrap());
    assert!(!dal
        .task_executions()
        .mark_cancelled(execution.id, UniversalTimestamp::now(), "late".to_string())
        .await
        .unwrap());

    let final_row = dal.task_executions().get_by_id(execution.id).await.unwrap();
    assert_eq!(final_row.status, ExecutionStatus::Completed);
    assert_eq!(final_row.output.as_deref(), Some("done"));
    assert_eq!(final_row.duration_ms, Some(42));
}

#[tokio::test]
#[serial]
async fn test_stats_aggregates_ledger() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();

    for (duration, fail) in [(100i64, false), (200, false), (0, true)] {
        let execution = dal
            .task_executions()
            .create(NewTaskExecution {
                task_id: task.id,
                agent_id: task.agent_id,
                trigger_source: TriggerSource::Scheduled,
                trigger_payload: None,
                instructions: task.instructions.clone(),
                allowed_tools: task.allowed_tools.clone(),
                metadata: None,
            })
            .await
            .unwrap();
        dal.task_executions()
            .mark_running(execution.id, UniversalTimestamp::now())
            .await
            .unwrap();
        if fail {
            dal.task_executions()
                .mark_failed(
                    execution.id,
                    UniversalTimestamp::now(),
                    None,
                    "boom".to_string(),
                )
                .await
                .unwrap();
        } else {
            dal.task_executions()
                .mark_completed(
                    execution.id,
                    UniversalTimestamp::now(),
                    duration,
                    "ok".to_string(),
                    None,
                )
                .await
                .unwrap();
        }
    }

    let stats = dal.task_executions().stats(task.id).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.average_duration_ms, Some(150.0));
}

#[tokio::test]
#[serial]
async fn test_startup_recovery_sweeps_and_clears() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();
    dal.agent_tasks()
        .claim(task.id, Utc::now(), ChronoDuration::minutes(10))
        .await
        .unwrap();
    let execution = dal
        .task_executions()
        .create(NewTaskExecution {
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
        .mark_running(execution.id, UniversalTimestamp::now())
        .await
        .unwrap();

    let swept = dal
        .task_executions()
        .sweep_abandoned("Abandoned by engine restart")
        .await
        .unwrap();
    assert_eq!(swept, 1);
    let cleared = dal.agent_tasks().clear_all_claims().await.unwrap();
    assert_eq!(cleared, 1);

    let recovered = dal.task_executions().get_by_id(execution.id).await.unwrap();
    assert_eq!(recovered.status, ExecutionStatus::Failed);
    assert_eq!(
        recovered.error_message.as_deref(),
        Some("Abandoned by engine restart")
    );
    let task = dal.agent_tasks().get_by_id(task.id).await.unwrap();
    assert!(task.claimed_at.is_none());
}

#[tokio::test]
#[serial]
async fn test_trigger_type_must_match_task() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(event_task(
            UniversalUuid::new_v4(),
            TriggerType::WebhookReceived,
        ))
        .await
        .unwrap();

    let mismatched = dal
        .event_triggers()
        .create(NewEventTrigger {
            task_id: task.id,
            trigger_type: TriggerType::InboundMessageReceived,
            label: "wrong type".to_string(),
            conditions: TriggerCondition::default_for(TriggerType::InboundMessageReceived),
            active: true,
            cooldown_minutes: 0,
        })
        .await;
    assert!(matches!(
        mismatched,
        Err(ValidationError::TriggerTypeMismatch { .. })
    ));

    // Scheduled tasks cannot carry triggers at all.
    let scheduled = dal
        .agent_tasks()
        .create(scheduled_task(UniversalUuid::new_v4(), past()))
        .await
        .unwrap();
    let on_scheduled = dal
        .event_triggers()
        .create(NewEventTrigger {
            task_id: scheduled.id,
            trigger_type: TriggerType::WebhookReceived,
            label: "misplaced".to_string(),
            conditions: TriggerCondition::default_for(TriggerType::WebhookReceived),
            active: true,
            cooldown_minutes: 0,
        })
        .await;
    assert!(matches!(
        on_scheduled,
        Err(ValidationError::TriggerTypeMismatch { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_claim_fire_is_exclusive_per_observation() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(event_task(
            UniversalUuid::new_v4(),
            TriggerType::WebhookReceived,
        ))
        .await
        .unwrap();
    let trigger = dal
        .event_triggers()
        .create(NewEventTrigger {
            task_id: task.id,
            trigger_type: TriggerType::WebhookReceived,
            label: "github pushes".to_string(),
            conditions: TriggerCondition::default_for(TriggerType::WebhookReceived),
            active: true,
            cooldown_minutes: 5,
        })
        .await
        .unwrap();

    let fired_at = UniversalTimestamp::now();
    // Two dispatchers that both observed "never fired": one wins.
    assert!(dal
        .event_triggers()
        .claim_fire(trigger.id, None, fired_at)
        .await
        .unwrap());
    assert!(!dal
        .event_triggers()
        .claim_fire(trigger.id, None, fired_at)
        .await
        .unwrap());

    let updated = dal.event_triggers().get_by_id(trigger.id).await.unwrap();
    assert_eq!(updated.trigger_count, 1);
    assert_eq!(updated.last_triggered_at, Some(fired_at));

    // Claiming against the now-current observation succeeds again.
    assert!(dal
        .event_triggers()
        .claim_fire(trigger.id, Some(fired_at), UniversalTimestamp::now())
        .await
        .unwrap());
}

#[tokio::test]
#[serial]
async fn test_delete_cascades_to_ledger_and_triggers() {
    let fixture = TestFixture::new();
    let dal = fixture.dal().await;

    let task = dal
        .agent_tasks()
        .create(event_task(
            UniversalUuid::new_v4(),
            TriggerType::WebhookReceived,
        ))
        .await
        .unwrap();
    let trigger = dal
        .event_triggers()
        .create(NewEventTrigger {
            task_id: task.id,
            trigger_type: TriggerType::WebhookReceived,
            label: "github pushes".to_string(),
            conditions: TriggerCondition::default_for(TriggerType::WebhookReceived),
            active: true,
            cooldown_minutes: 0,
        })
        .await
        .unwrap();
    let execution = dal
        .task_executions()
        .create(NewTaskExecution {
            task_id: task.id,
            agent_id: task.agent_id,
            trigger_source: TriggerSource::Event,
            trigger_payload: None,
            instructions: task.instructions.clone(),
            allowed_tools: vec![],
            metadata: None,
        })
        .await
        .unwrap();

    dal.agent_tasks().delete(task.id).await.unwrap();

    assert!(matches!(
        dal.event_triggers().get_by_id(trigger.id).await,
        Err(ValidationError::TriggerNotFound(_))
    ));
    assert!(matches!(
        dal.task_executions().get_by_id(execution.id).await,
        Err(ValidationError::ExecutionNotFound(_))
    ));
}
