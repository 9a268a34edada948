//! Agent executor — the bounded think-act-observe tool loop.
//!
//! Each iteration asks the model for a completion with tool definitions
//! attached. A requested tool call is validated and executed behind the
//! `safe_execute` boundary and its observation fed back; a plain text
//! completion ends the run. The loop is bounded by the smaller of the
//! executor's and the context's iteration budgets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::AgentContext;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCompletionRequest,
};
use crate::tools::{ToolRegistry, ToolResult};

/// Default executor-side iteration cap.
const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Default trailing history window included in prompts.
const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Reply when the loop runs out of iterations.
const EXHAUSTED_MESSAGE: &str =
    "I couldn't finish this within the allotted steps. Here's what I got done so far.";

/// State of an executor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Waiting on a model decision.
    Thinking,
    /// A requested tool call is being validated and executed.
    ToolExecuting,
    /// The model produced a final text answer.
    Done,
    /// A transport or protocol failure ended the run.
    Failed,
    /// The iteration budget ran out before a final answer.
    Exhausted,
}

/// One recorded think-act-observe step. Append-only per run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub seq: u32,
    /// Text the model produced alongside the tool request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Requested tool name and arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<(String, Value)>,
    /// Observation from `safe_execute`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one executor run.
#[derive(Debug)]
pub struct ExecutorRun {
    pub success: bool,
    pub response: String,
    pub steps: Vec<ExecutionStep>,
    pub tool_calls_made: u32,
    pub total_tokens: u32,
    pub error: Option<String>,
    pub state: ExecutorState,
}

/// The tool-calling loop driving one conversational turn.
pub struct AgentExecutor {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_iterations: usize,
    history_window: usize,
}

impl AgentExecutor {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            system_prompt: default_system_prompt(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Run the loop to completion. Never returns `Err`: transport failures
    /// come back as a `Failed` run with the steps taken so far.
    pub async fn run(&self, input: &str, ctx: &AgentContext) -> ExecutorRun {
        self.run_inner(input, ctx, None).await
    }

    /// Streaming variant. Tool calls are resolved synchronously — side
    /// effects complete before text describing their outcome streams out.
    /// When no tools are registered the final answer is delivered through
    /// the provider's native stream; after tool turns, the final turn
    /// arrives whole from the tool-completion call and is forwarded as one
    /// chunk.
    pub async fn run_streaming(
        &self,
        input: &str,
        ctx: &AgentContext,
        sink: mpsc::Sender<String>,
    ) -> ExecutorRun {
        if self.tools.is_empty() {
            return self.stream_plain(input, ctx, sink).await;
        }
        self.run_inner(input, ctx, Some(sink)).await
    }

    async fn run_inner(
        &self,
        input: &str,
        ctx: &AgentContext,
        sink: Option<mpsc::Sender<String>>,
    ) -> ExecutorRun {
        let limit = self.max_iterations.min(ctx.max_iterations);
        let mut steps: Vec<ExecutionStep> = Vec::new();
        let mut transcript: Vec<ChatMessage> = Vec::new();
        let mut tool_calls_made = 0u32;
        let mut total_tokens = 0u32;

        for iteration in 1..=limit {
            let messages = self.build_messages(input, ctx, &transcript);
            let request = ToolCompletionRequest::new(messages, self.tools.definitions());

            let response = match self.llm.complete_with_tools(request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(iteration, error = %e, "Executor iteration failed");
                    return ExecutorRun {
                        success: false,
                        response: String::new(),
                        steps,
                        tool_calls_made,
                        total_tokens,
                        error: Some(e.to_string()),
                        state: ExecutorState::Failed,
                    };
                }
            };
            total_tokens += response.input_tokens + response.output_tokens;

            let Some(call) = response.tool_calls.first().cloned() else {
                // Final answer.
                let text = response.content.unwrap_or_default();
                if let Some(ref sink) = sink {
                    let _ = sink.send(text.clone()).await;
                }
                return ExecutorRun {
                    success: true,
                    response: text,
                    steps,
                    tool_calls_made,
                    total_tokens,
                    error: None,
                    state: ExecutorState::Done,
                };
            };

            // Only the first requested tool call is executed per turn; any
            // extras are dropped.
            if response.tool_calls.len() > 1 {
                debug!(
                    requested = response.tool_calls.len(),
                    "Model requested multiple tool calls; executing the first only"
                );
            }

            debug!(tool = %call.name, iteration, "Executing requested tool");

            let result = match self.tools.get(&call.name) {
                Some(tool) => tool.safe_execute(call.arguments.clone(), ctx).await,
                None => ToolResult::fail(format!("Unknown tool: {}", call.name)),
            };
            tool_calls_made += 1;

            steps.push(ExecutionStep {
                seq: iteration as u32,
                thought: response.content.clone().filter(|c| !c.is_empty()),
                tool_call: Some((call.name.clone(), call.arguments.clone())),
                result: Some(result.clone()),
                timestamp: Utc::now(),
            });

            // Re-inject the turn: the assistant's tool request, then the
            // observation as its own message.
            transcript.push(ChatMessage::assistant_with_tool_calls(
                response.content,
                vec![call.clone()],
            ));
            transcript.push(ChatMessage::tool_result(
                call.id,
                call.name,
                result.to_observation(),
            ));
        }

        debug!(limit, "Executor iteration budget exhausted");
        let text = EXHAUSTED_MESSAGE.to_string();
        if let Some(ref sink) = sink {
            let _ = sink.send(text.clone()).await;
        }
        ExecutorRun {
            success: false,
            response: text,
            steps,
            tool_calls_made,
            total_tokens,
            error: None,
            state: ExecutorState::Exhausted,
        }
    }

    /// Pure-conversational streaming path (no tools registered).
    async fn stream_plain(
        &self,
        input: &str,
        ctx: &AgentContext,
        sink: mpsc::Sender<String>,
    ) -> ExecutorRun {
        let messages = self.build_messages(input, ctx, &[]);
        let request = CompletionRequest::new(messages);

        let mut stream = match self.llm.stream(request).await {
            Ok(s) => s,
            Err(e) => {
                return ExecutorRun {
                    success: false,
                    response: String::new(),
                    steps: Vec::new(),
                    tool_calls_made: 0,
                    total_tokens: 0,
                    error: Some(e.to_string()),
                    state: ExecutorState::Failed,
                };
            }
        };

        use futures::StreamExt;
        let mut response = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    response.push_str(&text);
                    let _ = sink.send(text).await;
                }
                Err(e) => {
                    return ExecutorRun {
                        success: false,
                        response,
                        steps: Vec::new(),
                        tool_calls_made: 0,
                        total_tokens: 0,
                        error: Some(e.to_string()),
                        state: ExecutorState::Failed,
                    };
                }
            }
        }

        ExecutorRun {
            success: true,
            response,
            steps: Vec::new(),
            tool_calls_made: 0,
            total_tokens: 0,
            error: None,
            state: ExecutorState::Done,
        }
    }

    /// Assemble the iteration's message list: system prompt, trailing
    /// history window, current input, then this run's tool transcript.
    fn build_messages(
        &self,
        input: &str,
        ctx: &AgentContext,
        transcript: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(transcript.len() + self.history_window + 2);
        messages.push(ChatMessage::system(&self.system_prompt));

        for turn in ctx.recent_history(self.history_window) {
            match turn.role.as_str() {
                "user" => messages.push(ChatMessage::user(&turn.content)),
                "assistant" => messages.push(ChatMessage::assistant(&turn.content)),
                _ => {}
            }
        }

        messages.push(ChatMessage::user(input));
        messages.extend(transcript.iter().cloned());
        messages
    }
}

fn default_system_prompt() -> String {
    "You are a personal assistant working on the user's request. You have \
     access to tools; use them when they help, and answer in plain text when \
     you are done. Be concise and concrete."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::{LlmError, ToolError};
    use crate::llm::{CompletionResponse, ToolCall, ToolCompletionResponse};
    use crate::tools::{Tool, ToolParameter};

    /// Scripted LLM: pops one canned response per call; repeats the last.
    struct ScriptedLlm {
        script: std::sync::Mutex<Vec<ToolCompletionResponse>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedLlm {
        fn always_tool(name: &str, args: Value) -> Self {
            Self {
                script: std::sync::Mutex::new(vec![tool_response(name, args)]),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn sequence(responses: Vec<ToolCompletionResponse>) -> Self {
            Self {
                script: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                script: std::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    fn tool_response(name: &str, args: Value) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: name.into(),
                arguments: args,
            }],
            input_tokens: 100,
            output_tokens: 10,
        }
    }

    fn text_response(text: &str) -> ToolCompletionResponse {
        ToolCompletionResponse {
            content: Some(text.into()),
            tool_calls: Vec::new(),
            input_tokens: 100,
            output_tokens: 20,
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: "plain completion".into(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: crate::llm::FinishReason::Stop,
            })
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "transport down".into(),
                });
            }
            let script = self.script.lock().unwrap();
            let idx = n.min(script.len().saturating_sub(1));
            Ok(script[idx].clone())
        }
    }

    /// Tool that counts invocations.
    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "get_tasks"
        }
        fn description(&self) -> &str {
            "List tasks"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _args: Value, _ctx: &AgentContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"tasks": []}))
        }
    }

    fn registry_with_counter() -> (Arc<ToolRegistry>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(CountingTool {
                calls: calls.clone(),
            }))
            .unwrap();
        (Arc::new(registry), calls)
    }

    #[tokio::test]
    async fn scenario_c_exhausts_at_context_budget() {
        let llm = Arc::new(ScriptedLlm::always_tool("get_tasks", serde_json::json!({})));
        let (registry, tool_calls) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry).with_max_iterations(10);
        let ctx = AgentContext::new("u1", "show my tasks").with_max_iterations(3);

        let run = executor.run("show my tasks", &ctx).await;
        assert_eq!(run.state, ExecutorState::Exhausted);
        assert!(!run.success);
        assert_eq!(run.steps.len(), 3);
        assert_eq!(run.tool_calls_made, 3);
        assert_eq!(tool_calls.load(Ordering::SeqCst), 3);
        assert!(!run.response.is_empty());
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn executor_cap_binds_when_smaller() {
        let llm = Arc::new(ScriptedLlm::always_tool("get_tasks", serde_json::json!({})));
        let (registry, _) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry).with_max_iterations(2);
        let ctx = AgentContext::new("u1", "x").with_max_iterations(100);

        let run = executor.run("x", &ctx).await;
        assert_eq!(run.state, ExecutorState::Exhausted);
        assert_eq!(run.steps.len(), 2);
    }

    #[tokio::test]
    async fn tool_then_final_answer() {
        let llm = Arc::new(ScriptedLlm::sequence(vec![
            tool_response("get_tasks", serde_json::json!({})),
            text_response("You have no open tasks."),
        ]));
        let (registry, tool_calls) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry);
        let ctx = AgentContext::new("u1", "show my tasks");

        let run = executor.run("show my tasks", &ctx).await;
        assert_eq!(run.state, ExecutorState::Done);
        assert!(run.success);
        assert_eq!(run.response, "You have no open tasks.");
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.tool_calls_made, 1);
        assert_eq!(tool_calls.load(Ordering::SeqCst), 1);
        assert!(run.total_tokens > 0);
    }

    #[tokio::test]
    async fn only_first_tool_call_executed_per_turn() {
        let mut response = tool_response("get_tasks", serde_json::json!({}));
        response.tool_calls.push(ToolCall {
            id: "call_2".into(),
            name: "get_tasks".into(),
            arguments: serde_json::json!({}),
        });
        let llm = Arc::new(ScriptedLlm::sequence(vec![
            response,
            text_response("done"),
        ]));
        let (registry, tool_calls) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry);
        let ctx = AgentContext::new("u1", "x");

        let run = executor.run("x", &ctx).await;
        assert_eq!(run.state, ExecutorState::Done);
        // Two calls were requested in one turn; one ran.
        assert_eq!(run.tool_calls_made, 1);
        assert_eq!(tool_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_observation_not_crash() {
        let llm = Arc::new(ScriptedLlm::sequence(vec![
            tool_response("teleport", serde_json::json!({})),
            text_response("I can't do that."),
        ]));
        let (registry, _) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry);
        let ctx = AgentContext::new("u1", "x");

        let run = executor.run("x", &ctx).await;
        assert_eq!(run.state, ExecutorState::Done);
        let step = &run.steps[0];
        let result = step.result.as_ref().unwrap();
        assert!(!result.success());
        assert!(result.error().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn transport_failure_fails_run_with_steps() {
        let llm = Arc::new(ScriptedLlm::failing());
        let (registry, _) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry);
        let ctx = AgentContext::new("u1", "x");

        let run = executor.run("x", &ctx).await;
        assert_eq!(run.state, ExecutorState::Failed);
        assert!(!run.success);
        assert!(run.error.is_some());
        assert!(run.steps.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_is_reactable_observation() {
        struct StrictTool {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Tool for StrictTool {
            fn name(&self) -> &str {
                "create_task"
            }
            fn description(&self) -> &str {
                "Create a task"
            }
            fn parameters(&self) -> Vec<ToolParameter> {
                vec![ToolParameter::string("title").required()]
            }
            async fn execute(
                &self,
                _args: Value,
                _ctx: &AgentContext,
            ) -> Result<Value, ToolError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(StrictTool {
                calls: calls.clone(),
            }))
            .unwrap();

        let llm = Arc::new(ScriptedLlm::sequence(vec![
            tool_response("create_task", serde_json::json!({})),
            text_response("The tool needs a title."),
        ]));
        let executor = AgentExecutor::new(llm, Arc::new(registry));
        let ctx = AgentContext::new("u1", "x");

        let run = executor.run("x", &ctx).await;
        assert_eq!(run.state, ExecutorState::Done);
        let result = run.steps[0].result.as_ref().unwrap();
        assert_eq!(result.error(), Some("Missing required parameter: title"));
        // The tool body never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_forwards_final_text() {
        let llm = Arc::new(ScriptedLlm::sequence(vec![
            tool_response("get_tasks", serde_json::json!({})),
            text_response("All caught up."),
        ]));
        let (registry, _) = registry_with_counter();

        let executor = AgentExecutor::new(llm, registry);
        let ctx = AgentContext::new("u1", "x");

        let (tx, mut rx) = mpsc::channel(8);
        let run = executor.run_streaming("x", &ctx, tx).await;
        assert_eq!(run.state, ExecutorState::Done);

        let mut streamed = String::new();
        while let Some(chunk) = rx.recv().await {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, "All caught up.");
        // The tool resolved before any text streamed.
        assert_eq!(run.steps.len(), 1);
    }

    #[tokio::test]
    async fn streaming_without_tools_uses_provider_stream() {
        let llm = Arc::new(ScriptedLlm::sequence(vec![]));
        let executor = AgentExecutor::new(llm, Arc::new(ToolRegistry::new()));
        let ctx = AgentContext::new("u1", "hello");

        let (tx, mut rx) = mpsc::channel(8);
        let run = executor.run_streaming("hello", &ctx, tx).await;
        assert_eq!(run.state, ExecutorState::Done);

        let mut streamed = String::new();
        while let Some(chunk) = rx.recv().await {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, "plain completion");
        assert_eq!(run.response, "plain completion");
    }

    #[test]
    fn message_assembly_order() {
        let llm = Arc::new(ScriptedLlm::sequence(vec![]));
        let executor = AgentExecutor::new(llm, Arc::new(ToolRegistry::new()))
            .with_history_window(2);

        let mut ctx = AgentContext::new("u1", "current");
        for i in 0..4 {
            ctx.history
                .push(crate::storage::ChatTurn::new("user", format!("old {i}")));
        }

        let transcript = vec![ChatMessage::assistant_with_tool_calls(
            None,
            vec![ToolCall {
                id: "c1".into(),
                name: "get_tasks".into(),
                arguments: serde_json::json!({}),
            }],
        )];
        let messages = executor.build_messages("current", &ctx, &transcript);

        // system + 2 history + input + 1 transcript
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, crate::llm::Role::System);
        assert_eq!(messages[1].content, "old 2");
        assert_eq!(messages[2].content, "old 3");
        assert_eq!(messages[3].content, "current");
        assert_eq!(messages[4].tool_calls.len(), 1);
    }
}
