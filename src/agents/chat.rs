//! Chat capability — plain conversational replies.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::agents::{AgentKind, Capability, CapabilityResult};
use crate::context::AgentContext;
use crate::error::Error;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for a conversational reply.
const CHAT_MAX_TOKENS: u32 = 512;

const CHAT_TEMPERATURE: f32 = 0.7;

/// Conversational capability module.
pub struct ChatAgent {
    llm: Arc<dyn LlmProvider>,
    history_window: usize,
}

impl ChatAgent {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            history_window: 10,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    async fn run(&self, ctx: &AgentContext) -> Result<CapabilityResult, Error> {
        let start = Instant::now();

        let mut messages = vec![ChatMessage::system(build_chat_prompt(ctx))];
        for turn in ctx.recent_history(self.history_window) {
            match turn.role.as_str() {
                "user" => messages.push(ChatMessage::user(&turn.content)),
                "assistant" => messages.push(ChatMessage::assistant(&turn.content)),
                _ => {}
            }
        }
        messages.push(ChatMessage::user(&ctx.input));

        let request = CompletionRequest::new(messages)
            .with_temperature(CHAT_TEMPERATURE)
            .with_max_tokens(CHAT_MAX_TOKENS);
        let response = self.llm.complete(request).await?;

        Ok(CapabilityResult::ok(AgentKind::Chat)
            .with_fragment(response.content)
            .with_tokens(response.input_tokens + response.output_tokens)
            .with_elapsed(start.elapsed()))
    }
}

#[async_trait]
impl Capability for ChatAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Chat
    }

    fn capabilities(&self) -> &[&str] {
        &["conversation"]
    }

    fn can_handle(&self, _ctx: &AgentContext) -> f32 {
        0.5
    }

    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
        match self.run(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Chat capability failed");
                CapabilityResult::failure(AgentKind::Chat, e.to_string())
            }
        }
    }
}

/// Persona prompt, personalized with what the context knows.
fn build_chat_prompt(ctx: &AgentContext) -> String {
    let mut prompt = String::from(
        "You are a warm, concise personal assistant. Answer in a couple of \
         sentences; no bullet lists unless asked.",
    );
    if let Some(ref profile) = ctx.profile {
        prompt.push_str(&format!("\nThe user's name is {}.", profile.display_name));
    }
    if !ctx.preferences.is_empty() {
        let prefs = ctx
            .preferences
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        prompt.push_str(&format!("\nKnown preferences: {prefs}."));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::LlmError;
    use crate::llm::{
        CompletionResponse, FinishReason, ToolCompletionRequest, ToolCompletionResponse,
    };

    struct EchoLlm;

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let last = request.messages.last().unwrap().content.clone();
            Ok(CompletionResponse {
                content: format!("echo: {last}"),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            })
        }
        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn produces_conversational_fragment() {
        let agent = ChatAgent::new(Arc::new(EchoLlm));
        let ctx = AgentContext::new("u1", "good morning!");

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.fragments[0], "echo: good morning!");
        assert!(result.tokens_used > 0);
    }

    #[test]
    fn prompt_includes_known_preferences() {
        let mut ctx = AgentContext::new("u1", "hi");
        ctx.preferences.insert("tone".into(), "brief".into());
        let prompt = build_chat_prompt(&ctx);
        assert!(prompt.contains("tone=brief"));
    }
}
