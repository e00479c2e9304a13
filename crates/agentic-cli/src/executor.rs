use agentic_config::LlmConfig;
use agentic_cron::{ExecutionError, ExecutionOutput, TaskExecutor};
use agentic_llm::{LlmClient, client_for};
use agentic_tools::ToolDispatcher;
use agentic_types::ChatMessage;
use async_trait::async_trait;
use tracing::info;

/// Executes a scheduled prompt with one model call, then runs any tool calls
/// the model asked for.
pub struct LlmTaskExecutor {
    llm: LlmConfig,
    dispatcher: ToolDispatcher,
}

impl LlmTaskExecutor {
    pub fn new(llm: LlmConfig, dispatcher: ToolDispatcher) -> Self {
        Self { llm, dispatcher }
    }

    pub(crate) async fn execute_with(
        &self,
        client: &dyn LlmClient,
        prompt: &str,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let messages = [ChatMessage::user(prompt)];
        let response = client
            .chat(&messages, &self.dispatcher.schemas())
            .await
            .map_err(|e| ExecutionError(e.to_string()))?;

        for call in &response.tool_calls {
            info!(tool = %call.name, "Executing tool");
        }
        let tool_outcomes = self.dispatcher.dispatch_all(&response.tool_calls).await;

        Ok(ExecutionOutput {
            text: response.content,
            tool_outcomes,
        })
    }
}

#[async_trait]
impl TaskExecutor for LlmTaskExecutor {
    async fn execute(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let client =
            client_for(provider, &self.llm, model).map_err(|e| ExecutionError(e.to_string()))?;
        self.execute_with(client.as_ref(), prompt).await
    }
}
