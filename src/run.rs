use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::assistant::AssistantBackend;
use crate::error::TurnError;
use crate::models::{AssistantText, RunSpec, RunStatus};
use crate::tools::ToolDispatcher;

// A terminal run plus the assistant text it produced.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: String,
    pub text: AssistantText,
}

#[derive(Clone)]
pub struct RunController {
    backend: Arc<dyn AssistantBackend>,
    dispatcher: ToolDispatcher,
    poll_interval: Duration,
    run_deadline: Duration,
}

impl RunController {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        dispatcher: ToolDispatcher,
        poll_interval: Duration,
        run_deadline: Duration,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            poll_interval,
            run_deadline,
        }
    }

    // Drives one run to a terminal state and returns the newest assistant
    // message. `submit -> poll -> act -> poll -> ... -> terminal`.
    pub async fn run_to_completion(
        &self,
        thread_id: &str,
        spec: &RunSpec,
    ) -> Result<CompletedRun, TurnError> {
        let started = Instant::now();
        let mut run = self.backend.create_run(thread_id, spec).await?;
        tracing::debug!("run {} created on thread {thread_id}", run.id);

        loop {
            match run.status {
                RunStatus::Completed => break,
                status if status.is_failure() => {
                    let message = run
                        .last_error
                        .unwrap_or_else(|| "assistant run failed".to_string());
                    tracing::warn!("run {} ended {:?}: {message}", run.id, status);
                    return Err(TurnError::RunFailed(message));
                }
                RunStatus::RequiresAction => {
                    // All pending calls must be answered in one submission;
                    // the backend will not resume the run otherwise.
                    let mut outputs = Vec::with_capacity(run.pending_tool_calls.len());
                    for call in &run.pending_tool_calls {
                        tracing::debug!("dispatching tool call {} ({})", call.id, call.name);
                        outputs.push(self.dispatcher.dispatch(call).await);
                    }
                    self.backend
                        .submit_tool_outputs(thread_id, &run.id, &outputs)
                        .await?;
                }
                _ => {}
            }

            if started.elapsed() >= self.run_deadline {
                tracing::warn!("run {} exceeded deadline {:?}", run.id, self.run_deadline);
                return Err(TurnError::RunTimedOut(self.run_deadline));
            }

            sleep(self.poll_interval).await;
            run = self.backend.get_run(thread_id, &run.id).await?;
        }

        let messages = self.backend.list_messages(thread_id).await?;
        let Some(message) = messages.into_iter().find(|m| m.role == "assistant") else {
            return Err(TurnError::NoResponse);
        };

        Ok(CompletedRun {
            run_id: run.id,
            text: message.text,
        })
    }
}
