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

//! # Agent Digest Demo
//!
//! This demo runs a small Carillon deployment end to end:
//!
//! - A one-time scheduled task that fires on the first poll
//! - A recurring per-minute digest task
//! - An event-based task wired to a webhook trigger with a cooldown
//! - A toy agent invoker that just logs and echoes its instructions
//!
//! It feeds a couple of webhook events through the engine (one of which is
//! suppressed by the cooldown), lets the poll loop run for a bit, then prints
//! the execution ledger and statistics before shutting down.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use serde_json::json;
use tracing::info;

use carillon::{
    AgentEvent, AgentInvoker, EngineConfig, EventTaskRequest, InvocationError, InvocationRequest,
    InvocationResult, OneTimeSpec, RecurrenceSpec, RecurrenceUnit, RecurringSpec,
    ScheduledTaskRequest, TaskEngine, TriggerCondition, TriggerSpec, TriggerType, UniversalUuid,
};

/// A toy collaborator that logs each invocation and echoes the instructions.
struct EchoInvoker;

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult, InvocationError> {
        info!(
            task_id = %request.task_id,
            source = %request.trigger_source,
            "Agent invoked: {}",
            request.instructions
        );
        // Pretend to do a little work.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(InvocationResult {
            output: format!("did: {}", request.instructions),
            tool_outputs: vec![],
            duration_ms: 200,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("agent_digest_demo=info,carillon=debug")
        .init();

    info!("Starting Agent Digest Demo");

    let config = EngineConfig::builder()
        .poll_interval(Duration::from_secs(2))
        .execution_timeout(Duration::from_secs(30))
        .claim_lease_timeout(Duration::from_secs(120))
        .build()?;
    let engine = TaskEngine::with_config("agent-digest.db", Arc::new(EchoInvoker), config).await?;

    let agent_id = UniversalUuid::new_v4();
    let principal_id = UniversalUuid::new_v4();

    // A one-time reminder anchored in the past: due on the first poll.
    let reminder = engine
        .create_scheduled_task(ScheduledTaskRequest {
            agent_id,
            principal_id,
            name: "welcome reminder".to_string(),
            instructions: "Post the welcome message".to_string(),
            allowed_tools: vec!["post-message".to_string()],
            recurrence: RecurrenceSpec::OneTime(OneTimeSpec {
                date: (Utc::now() - chrono::Duration::days(1)).date_naive(),
                time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                timezone: "UTC".to_string(),
            }),
            max_executions: None,
            start_date: None,
        })
        .await?;
    info!("Created one-time task {} ({})", reminder.name, reminder.id);

    // A recurring digest, every minute on the minute.
    let digest = engine
        .create_scheduled_task(ScheduledTaskRequest {
            agent_id,
            principal_id,
            name: "minute digest".to_string(),
            instructions: "Summarize activity from the last minute".to_string(),
            allowed_tools: vec!["search".to_string(), "post-message".to_string()],
            recurrence: RecurrenceSpec::Recurring(RecurringSpec {
                interval: 1,
                unit: RecurrenceUnit::Minute,
                anchor_date: Utc::now().date_naive(),
                anchor_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                timezone: "UTC".to_string(),
                end_date: None,
            }),
            max_executions: None,
            start_date: None,
        })
        .await?;
    info!(
        "Created recurring task {} ({}), next run {:?}",
        digest.name, digest.id, digest.next_run_at
    );

    // An event-based task: deploy announcements from GitHub pushes, with a
    // one-minute cooldown.
    let (deploy, _triggers) = engine
        .create_event_task(EventTaskRequest {
            agent_id,
            principal_id,
            name: "deploy notifier".to_string(),
            instructions: "Announce the deploy in the team channel".to_string(),
            allowed_tools: vec!["post-message".to_string()],
            trigger_type: TriggerType::WebhookReceived,
            triggers: vec![TriggerSpec {
                label: "github pushes".to_string(),
                conditions: TriggerCondition::Webhook {
                    source: Some("github".to_string()),
                    event_name: Some("push".to_string()),
                },
                cooldown_minutes: 1,
            }],
            max_executions: None,
            start_date: None,
            end_date: None,
        })
        .await?;
    info!("Created event task {} ({})", deploy.name, deploy.id);

    // Feed two push events back to back. The second lands inside the
    // cooldown window and is suppressed.
    for push in 1..=2 {
        let outcome = engine
            .handle_event(&AgentEvent::new(
                TriggerType::WebhookReceived,
                json!({"source": "github", "event": "push", "ref": "main", "seq": push}),
            ))
            .await?;
        info!(
            "Push event {}: fired={} suppressed={} unmatched={}",
            push, outcome.fired, outcome.suppressed, outcome.unmatched
        );
    }

    info!("Letting the poll loop run; press Ctrl+C to stop early");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(75)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // Print the ledger for each task.
    for task_id in [reminder.id, digest.id, deploy.id] {
        let task = engine.get_task(task_id).await?;
        let stats = engine.execution_stats(task_id).await?;
        info!(
            "Task '{}': status={} total={} completed={} failed={} avg_ms={:?}",
            task.name,
            task.status,
            stats.total,
            stats.completed,
            stats.failed,
            stats.average_duration_ms
        );
        for execution in engine.list_executions(task_id, 10, 0).await? {
            info!(
                "  {} {} [{}] {}",
                execution.created_at,
                execution.status,
                execution.trigger_source,
                execution.output.as_deref().unwrap_or("-")
            );
        }
    }

    info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}
