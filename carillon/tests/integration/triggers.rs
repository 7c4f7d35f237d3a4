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

//! Event-path tests: condition matching, cooldown suppression, fan-out.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use serial_test::serial;

use carillon::{
    AgentEvent, ExecutionStatus, NewEventTrigger, TriggerCondition, TriggerSource, TriggerType,
    UniversalTimestamp, UniversalUuid,
};

use crate::fixtures::{webhook_task_request, TestFixture};

fn push_event() -> AgentEvent {
    AgentEvent::new(
        TriggerType::WebhookReceived,
        json!({"source": "github", "event": "push", "ref": "main"}),
    )
}

#[tokio::test]
#[serial]
async fn test_matching_event_fires_and_freezes_payload() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, triggers) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 5))
        .await
        .unwrap();
    assert_eq!(triggers.len(), 1);

    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 1);
    assert_eq!(outcome.suppressed, 0);
    assert_eq!(outcome.unmatched, 0);
    assert_eq!(outcome.executions.len(), 1);

    let execution = &outcome.executions[0];
    assert_eq!(execution.task_id, task.id);
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_source, TriggerSource::Event);
    assert_eq!(
        execution.trigger_payload.as_ref().unwrap()["ref"],
        json!("main")
    );

    let updated = engine.list_triggers(task.id).await.unwrap();
    assert_eq!(updated[0].trigger_count, 1);
    assert!(updated[0].last_triggered_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_non_matching_event_is_unmatched() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 0))
        .await
        .unwrap();

    // Right type, wrong source.
    let outcome = engine
        .handle_event(&AgentEvent::new(
            TriggerType::WebhookReceived,
            json!({"source": "gitlab", "event": "push"}),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.fired, 0);
    assert_eq!(outcome.unmatched, 1);

    // Different type entirely: no candidates at all.
    let outcome = engine
        .handle_event(&AgentEvent::new(
            TriggerType::FileUploaded,
            json!({"filename": "report.pdf"}),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.fired, 0);
    assert_eq!(outcome.unmatched, 0);

    assert_eq!(fixture.invoker.calls(), 0);
    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_cooldown_suppression_is_hard() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, _) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 5))
        .await
        .unwrap();

    let first = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(first.fired, 1);

    // Same event inside the 5 minute window: dropped, not queued.
    let second = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(second.fired, 0);
    assert_eq!(second.suppressed, 1);

    assert_eq!(fixture.invoker.calls(), 1);
    let history = engine.list_executions(task.id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_elapsed_cooldown_allows_refire() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;
    let dal = fixture.dal().await;

    let (task, triggers) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 10))
        .await
        .unwrap();

    // A fire recorded 11 minutes ago, outside the 10 minute window.
    assert!(dal
        .event_triggers()
        .claim_fire(
            triggers[0].id,
            None,
            UniversalTimestamp(Utc::now() - ChronoDuration::minutes(11)),
        )
        .await
        .unwrap());

    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 1);
    assert_eq!(outcome.suppressed, 0);

    let updated = engine.list_triggers(task.id).await.unwrap();
    assert_eq!(updated[0].trigger_count, 2);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_zero_cooldown_allows_immediate_refire() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, _) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 0))
        .await
        .unwrap();

    assert_eq!(engine.handle_event(&push_event()).await.unwrap().fired, 1);
    assert_eq!(engine.handle_event(&push_event()).await.unwrap().fired, 1);

    let history = engine.list_executions(task.id, 10, 0).await.unwrap();
    assert_eq!(history.len(), 2);
    let updated = engine.list_triggers(task.id).await.unwrap();
    assert_eq!(updated[0].trigger_count, 2);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_deactivated_trigger_is_skipped() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, triggers) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 0))
        .await
        .unwrap();

    engine
        .set_trigger_active(triggers[0].id, false)
        .await
        .unwrap();

    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 0);
    assert_eq!(outcome.unmatched, 0);

    // Reactivation is the on switch; the trigger record survives.
    engine
        .set_trigger_active(triggers[0].id, true)
        .await
        .unwrap();
    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 1);

    let listed = engine.list_triggers(task.id).await.unwrap();
    assert_eq!(listed.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_paused_task_triggers_do_not_fire() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, _) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 0))
        .await
        .unwrap();
    engine.pause_task(task.id).await.unwrap();

    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 0);
    assert_eq!(fixture.invoker.calls(), 0);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_event_fans_out_to_multiple_tasks() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;
    let agent_id = UniversalUuid::new_v4();

    let (first, _) = engine
        .create_event_task(webhook_task_request(agent_id, 0))
        .await
        .unwrap();
    let (second, _) = engine
        .create_event_task(webhook_task_request(agent_id, 0))
        .await
        .unwrap();

    let outcome = engine.handle_event(&push_event()).await.unwrap();
    assert_eq!(outcome.fired, 2);
    let task_ids: Vec<_> = outcome.executions.iter().map(|e| e.task_id).collect();
    assert!(task_ids.contains(&first.id));
    assert!(task_ids.contains(&second.id));

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_agent_scoped_event_only_reaches_that_agent() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let target_agent = UniversalUuid::new_v4();
    let other_agent = UniversalUuid::new_v4();
    let (target_task, _) = engine
        .create_event_task(webhook_task_request(target_agent, 0))
        .await
        .unwrap();
    engine
        .create_event_task(webhook_task_request(other_agent, 0))
        .await
        .unwrap();

    let outcome = engine
        .handle_event(&push_event().for_agent(target_agent))
        .await
        .unwrap();
    assert_eq!(outcome.fired, 1);
    assert_eq!(outcome.executions[0].task_id, target_task.id);

    engine.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_additional_trigger_widens_matching() {
    let fixture = TestFixture::new();
    let engine = fixture.engine().await;

    let (task, _) = engine
        .create_event_task(webhook_task_request(UniversalUuid::new_v4(), 0))
        .await
        .unwrap();

    // Release events from a different source, via a second trigger.
    engine
        .add_trigger(NewEventTrigger {
            task_id: task.id,
            trigger_type: TriggerType::WebhookReceived,
            label: "gitlab releases".to_string(),
            conditions: TriggerCondition::Webhook {
                source: Some("gitlab".to_string()),
                event_name: Some("release".to_string()),
            },
            active: true,
            cooldown_minutes: 0,
        })
        .await
        .unwrap();

    let outcome = engine
        .handle_event(&AgentEvent::new(
            TriggerType::WebhookReceived,
            json!({"source": "gitlab", "event": "release"}),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.fired, 1);
    assert_eq!(outcome.unmatched, 1);

    engine.shutdown().await;
}
