use crate::config::DemoAgentConfig;
use async_trait::async_trait;
use inkflow_agents::{Agent, AgentEvent, AgentStatus, TaskContext, TaskResult};
use inkflow_core::{EventBus, InkflowError, InkflowResult};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

/// Stand-in for a model-backed writing agent: sleeps through a fixed number
/// of steps, reporting progress, and produces placeholder text.
pub struct SimulatedAgent {
    id: String,
    name: String,
    step_delay: Duration,
    steps: u8,
    fail_task_types: Vec<String>,
    status: Mutex<AgentStatus>,
    events: EventBus<AgentEvent>,
}

impl SimulatedAgent {
    pub fn from_config(config: &DemoAgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.display_name().to_string(),
            step_delay: Duration::from_millis(config.delay_ms),
            steps: config.steps.max(1),
            fail_task_types: config.fail_task_types.clone(),
            status: Mutex::new(AgentStatus::Idle),
            events: EventBus::new(64),
        }
    }

    fn set_status(&self, status: AgentStatus) {
        *self.status.lock() = status;
        self.events.publish(AgentEvent::StatusChanged {
            agent_id: self.id.clone(),
            status,
        });
    }

    fn finish(&self, ctx: &TaskContext, success: bool) {
        self.events.publish(AgentEvent::TaskCompleted {
            agent_id: self.id.clone(),
            task_id: ctx.task_id,
            success,
        });
        self.set_status(if success {
            AgentStatus::Idle
        } else {
            AgentStatus::Error
        });
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> AgentStatus {
        *self.status.lock()
    }

    async fn execute(&self, ctx: TaskContext) -> InkflowResult<TaskResult> {
        let started = Instant::now();
        self.set_status(AgentStatus::Busy);

        for step in 1..=self.steps {
            if ctx.is_cancelled() {
                debug!(agent = %self.id, task_id = %ctx.task_id, step, "Stopping at checkpoint");
                self.set_status(AgentStatus::Idle);
                return Ok(TaskResult::failure("cancelled"));
            }
            tokio::time::sleep(self.step_delay).await;
            let percent = u32::from(step) * 100 / u32::from(self.steps);
            ctx.report_progress(u8::try_from(percent).unwrap_or(100));
        }

        if self.fail_task_types.iter().any(|t| *t == ctx.task_type) {
            self.finish(&ctx, false);
            return Err(InkflowError::Agent(format!(
                "{} cannot handle '{}'",
                self.name, ctx.task_type
            )));
        }

        let subject = ctx.param_str("title").unwrap_or("untitled");
        let text = format!("[{}] {} for '{}'", self.name, ctx.task_type, subject);
        self.finish(&ctx, true);
        Ok(TaskResult::success(text)
            .with_data("steps", self.steps)
            .with_duration_ms(started.elapsed().as_millis() as u64))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<AgentEvent>> {
        Some(self.events.subscribe())
    }
}
