//! Orchestrator — one conversational turn, end to end.
//!
//! Route → hydrate context → memory capability first → parallel capability
//! fan-out → synthesis → learning hand-off. Every failure mode degrades to
//! a returned string; `process` never fails and never panics through.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentKind, AgentRegistry, CapabilityResult, MemoryAgent};
use crate::config::AssistantConfig;
use crate::context::AgentContext;
use crate::error::Error;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::router::{IntentRouter, RoutingDecision};
use crate::storage::{EntityRecord, ProjectItem, Storage, TaskItem};

/// Generic, non-leaking reply for any failure that escapes the pipeline.
const APOLOGY: &str =
    "Sorry, something went wrong on my end while handling that. Please try again.";

/// Fragment count at or below which a templated reply is used.
const TEMPLATE_FRAGMENT_LIMIT: usize = 5;

/// Suggestions included in a templated reply.
const TEMPLATE_SUGGESTION_LIMIT: usize = 2;

/// Max tokens for the synthesis call.
const SYNTHESIS_MAX_TOKENS: u32 = 1024;

const SYNTHESIS_TEMPERATURE: f32 = 0.4;

/// Max tokens for the no-fragment conversational fallback.
const FALLBACK_MAX_TOKENS: u32 = 384;

const FALLBACK_TEMPERATURE: f32 = 0.7;

/// Orchestrates capability modules for one request at a time.
pub struct Orchestrator {
    config: AssistantConfig,
    llm: Arc<dyn LlmProvider>,
    storage: Arc<dyn Storage>,
    router: IntentRouter,
    agents: Arc<AgentRegistry>,
    memory: Arc<MemoryAgent>,
}

impl Orchestrator {
    pub fn new(
        config: AssistantConfig,
        llm: Arc<dyn LlmProvider>,
        storage: Arc<dyn Storage>,
        router: IntentRouter,
        agents: Arc<AgentRegistry>,
        memory: Arc<MemoryAgent>,
    ) -> Self {
        Self {
            config,
            llm,
            storage,
            router,
            agents,
            memory,
        }
    }

    /// Handle one conversational turn. Never fails: the response deadline,
    /// panics, and pipeline errors all land on the same apology string.
    pub async fn process(&self, input: &str, user_id: &str) -> String {
        let deadline = self.config.response_timeout;
        let pipeline =
            std::panic::AssertUnwindSafe(self.process_inner(input, user_id)).catch_unwind();

        match tokio::time::timeout(deadline, pipeline).await {
            Ok(Ok(Ok(reply))) => reply,
            Ok(Ok(Err(e))) => {
                error!(error = %e, "Pipeline failed");
                APOLOGY.to_string()
            }
            Ok(Err(_)) => {
                error!("Pipeline panicked");
                APOLOGY.to_string()
            }
            Err(_) => {
                warn!(
                    timeout_secs = deadline.as_secs(),
                    "Response deadline exceeded"
                );
                APOLOGY.to_string()
            }
        }
    }

    async fn process_inner(&self, input: &str, user_id: &str) -> Result<String, Error> {
        let decision = self.router.route(input).await;
        info!(
            intent = %decision.intent,
            capabilities = ?decision.required_agents,
            priority = ?decision.priority,
            confidence = decision.confidence,
            "Routed request"
        );

        let mut ctx = self.build_context(input, user_id, &decision).await;
        let mut results: Vec<CapabilityResult> = Vec::new();

        // The memory capability runs first, alone: the fan-out below must
        // observe its enrichment.
        if let Some(memory) = self.agents.get(AgentKind::Memory) {
            let result = memory.execute(&ctx).await;
            merge_enrichment(&mut ctx, &result);
            results.push(result);
        }

        // Remaining required capabilities share one read-only snapshot and
        // run concurrently. Results are collected in invocation order; a
        // crashed capability is excluded, not fatal.
        let mut kinds: Vec<AgentKind> = Vec::new();
        for kind in &decision.required_agents {
            if *kind != AgentKind::Memory && !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        if !decision.optional_agents.is_empty() {
            debug!(optional = ?decision.optional_agents, "Optional capabilities noted");
        }

        let snapshot = Arc::new(ctx.clone());
        let mut handles = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match self.agents.get(kind) {
                Some(agent) => {
                    let ctx = Arc::clone(&snapshot);
                    handles.push((
                        kind,
                        tokio::spawn(async move { agent.execute(&ctx).await }),
                    ));
                }
                None => {
                    warn!(capability = %kind, "Required capability not registered, skipping")
                }
            }
        }
        for (kind, handle) in handles {
            match handle.await {
                Ok(result) => {
                    debug!(
                        capability = %kind,
                        success = result.success,
                        fragments = result.fragments.len(),
                        "Capability finished"
                    );
                    results.push(result);
                }
                Err(e) => {
                    warn!(
                        capability = %kind,
                        error = %e,
                        "Capability crashed, excluding from synthesis"
                    );
                }
            }
        }

        let reply = self.synthesize(&ctx, &results).await?;

        // Learning is fire-and-forget; its failures are logged only.
        if self.config.learning_enabled {
            let memory = Arc::clone(&self.memory);
            let user_id = user_id.to_string();
            let input = input.to_string();
            let reply_copy = reply.clone();
            tokio::spawn(async move {
                memory.learn(&user_id, &input, &reply_copy).await;
            });
        }

        Ok(reply)
    }

    /// Hydrate the per-request context. Storage failures degrade to empty
    /// values rather than failing the turn.
    async fn build_context(
        &self,
        input: &str,
        user_id: &str,
        decision: &RoutingDecision,
    ) -> AgentContext {
        let mut ctx = AgentContext::new(user_id, input)
            .with_max_iterations(self.config.max_iterations);
        ctx.intent = Some(decision.intent.clone());
        ctx.topic = decision.topic.clone();
        ctx.mentions = decision.mentions.clone();

        match self.storage.get_user_profile(user_id).await {
            Ok(profile) => ctx.profile = profile,
            Err(e) => warn!(error = %e, "Profile hydration failed"),
        }
        match self.storage.get_preferences(user_id).await {
            Ok(prefs) => ctx.preferences = prefs.into_iter().collect(),
            Err(e) => warn!(error = %e, "Preference hydration failed"),
        }
        match self
            .storage
            .get_chat_history(user_id, self.config.history_window)
            .await
        {
            Ok(history) => ctx.history = history,
            Err(e) => warn!(error = %e, "History hydration failed"),
        }

        ctx
    }

    /// Merge capability results into one reply.
    async fn synthesize(
        &self,
        ctx: &AgentContext,
        results: &[CapabilityResult],
    ) -> Result<String, Error> {
        let successful: Vec<&CapabilityResult> = results.iter().filter(|r| r.success).collect();
        let fragments: Vec<&str> = successful
            .iter()
            .flat_map(|r| r.fragments.iter().map(String::as_str))
            .collect();
        let suggestions: Vec<&str> = successful
            .iter()
            .flat_map(|r| r.suggestions.iter().map(String::as_str))
            .collect();

        if fragments.is_empty() {
            return self.conversational_fallback(ctx).await;
        }

        if fragments.len() <= TEMPLATE_FRAGMENT_LIMIT && suggestions.is_empty() {
            return Ok(template_reply(&fragments, &suggestions));
        }

        // Full synthesis: one model call over the per-capability results.
        let payload = successful
            .iter()
            .map(|r| serde_json::to_string(r).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_synthesis_prompt(ctx)),
            ChatMessage::user(format!(
                "User request: {}\n\nCapability results (JSON, one per line):\n{}",
                ctx.input, payload
            )),
        ])
        .with_temperature(SYNTHESIS_TEMPERATURE)
        .with_max_tokens(SYNTHESIS_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(response) => Ok(response.content),
            Err(e) => {
                warn!(error = %e, "Synthesis call failed, using templated reply");
                Ok(template_reply(&fragments, &suggestions))
            }
        }
    }

    /// No capability had anything to say: one short conversational call.
    async fn conversational_fallback(&self, ctx: &AgentContext) -> Result<String, Error> {
        let mut messages = vec![ChatMessage::system(build_synthesis_prompt(ctx))];
        for turn in ctx.recent_history(self.config.history_window) {
            match turn.role.as_str() {
                "user" => messages.push(ChatMessage::user(&turn.content)),
                "assistant" => messages.push(ChatMessage::assistant(&turn.content)),
                _ => {}
            }
        }
        messages.push(ChatMessage::user(&ctx.input));

        let request = CompletionRequest::new(messages)
            .with_temperature(FALLBACK_TEMPERATURE)
            .with_max_tokens(FALLBACK_MAX_TOKENS);
        let response = self.llm.complete(request).await?;
        Ok(response.content)
    }
}

/// Merge memory-capability enrichment data back into the context.
fn merge_enrichment(ctx: &mut AgentContext, result: &CapabilityResult) {
    if !result.success {
        return;
    }
    if let Some(prefs) = result.data.get("preferences").and_then(|v| v.as_object()) {
        for (key, value) in prefs {
            if let Some(s) = value.as_str() {
                ctx.preferences.insert(key.clone(), s.to_string());
            }
        }
    }
    if let Some(entities) = result.data.get("related_entities")
        && let Ok(list) = serde_json::from_value::<Vec<EntityRecord>>(entities.clone())
    {
        ctx.related_entities = list;
    }
    if let Some(tasks) = result.data.get("related_tasks")
        && let Ok(list) = serde_json::from_value::<Vec<TaskItem>>(tasks.clone())
    {
        ctx.related_tasks = list;
    }
    if let Some(projects) = result.data.get("related_projects")
        && let Ok(list) = serde_json::from_value::<Vec<ProjectItem>>(projects.clone())
    {
        ctx.related_projects = list;
    }
}

/// Assemble the templated reply: fixed lead-in, fragments, up to two
/// suggestions.
fn template_reply(fragments: &[&str], suggestions: &[&str]) -> String {
    let mut reply = if fragments.len() == 1 {
        fragments[0].to_string()
    } else {
        let mut s = String::from("Here's where things stand:");
        for fragment in fragments {
            s.push_str("\n- ");
            s.push_str(fragment);
        }
        s
    };
    for suggestion in suggestions.iter().take(TEMPLATE_SUGGESTION_LIMIT) {
        reply.push_str("\n\n");
        reply.push_str(suggestion);
    }
    reply
}

/// Fixed persona prompt for synthesis and the conversational fallback.
fn build_synthesis_prompt(ctx: &AgentContext) -> String {
    let mut prompt = String::from(
        "You are a warm, concise personal assistant. Merge what you are \
         given into one coherent reply in the assistant's own voice. Keep it \
         short, mention concrete outcomes, and include at most two \
         follow-up suggestions.",
    );
    if let Some(ref profile) = ctx.profile {
        prompt.push_str(&format!("\nThe user's name is {}.", profile.display_name));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::agents::Capability;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionResponse, FinishReason, ToolCompletionRequest, ToolCompletionResponse,
    };
    use crate::router::IntentRouter;
    use crate::storage::MemoryStorage;

    /// Mock LLM with a call counter; returns a fixed reply.
    struct CountingLlm {
        reply: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: self.reply.clone(),
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

    /// Configurable stub capability.
    struct StubAgent {
        kind: AgentKind,
        fragments: Vec<String>,
        suggestions: Vec<String>,
        panics: bool,
        delay: Option<Duration>,
        /// When set, only emit fragments if this preference key is visible
        /// in the context (proves enrichment ordering).
        needs_pref: Option<String>,
    }

    impl StubAgent {
        fn with_fragment(kind: AgentKind, fragment: &str) -> Self {
            Self {
                kind,
                fragments: vec![fragment.to_string()],
                suggestions: Vec::new(),
                panics: false,
                delay: None,
                needs_pref: None,
            }
        }
    }

    #[async_trait]
    impl Capability for StubAgent {
        fn kind(&self) -> AgentKind {
            self.kind
        }
        fn capabilities(&self) -> &[&str] {
            &["stub"]
        }
        fn can_handle(&self, _ctx: &AgentContext) -> f32 {
            0.5
        }
        async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panics {
                panic!("stub capability crash");
            }
            if let Some(ref key) = self.needs_pref
                && !ctx.preferences.contains_key(key)
            {
                return CapabilityResult::failure(self.kind, "enrichment not visible");
            }
            let mut result = CapabilityResult::ok(self.kind);
            for fragment in &self.fragments {
                result = result.with_fragment(fragment.clone());
            }
            for suggestion in &self.suggestions {
                result = result.with_suggestion(suggestion.clone());
            }
            result
        }
    }

    /// Memory stub that returns enrichment data.
    struct EnrichingMemory;

    #[async_trait]
    impl Capability for EnrichingMemory {
        fn kind(&self) -> AgentKind {
            AgentKind::Memory
        }
        fn capabilities(&self) -> &[&str] {
            &["stub-memory"]
        }
        fn can_handle(&self, _ctx: &AgentContext) -> f32 {
            0.9
        }
        async fn execute(&self, _ctx: &AgentContext) -> CapabilityResult {
            CapabilityResult::ok(AgentKind::Memory).with_data(serde_json::json!({
                "preferences": { "tone": "brief" },
                "related_entities": [],
                "related_tasks": [],
            }))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        llm_calls: Arc<AtomicUsize>,
    }

    fn fixture(agents: AgentRegistry, config: AssistantConfig, llm_reply: &str) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm: Arc<dyn LlmProvider> = Arc::new(CountingLlm {
            reply: llm_reply.to_string(),
            calls: calls.clone(),
        });
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let memory = Arc::new(MemoryAgent::new(storage.clone(), llm.clone()));
        let router = IntentRouter::new(llm.clone());
        Fixture {
            orchestrator: Orchestrator::new(config, llm, storage, router, Arc::new(agents), memory),
            llm_calls: calls,
        }
    }

    fn no_learning() -> AssistantConfig {
        AssistantConfig {
            learning_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scenario_e_panicking_sibling_excluded() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();
        agents
            .register(Arc::new(StubAgent::with_fragment(
                AgentKind::Task,
                "Added the task.",
            )))
            .unwrap();
        agents
            .register(Arc::new(StubAgent {
                kind: AgentKind::Habit,
                fragments: vec!["never seen".into()],
                suggestions: Vec::new(),
                panics: true,
                delay: None,
                needs_pref: None,
            }))
            .unwrap();

        // No fast-path match: the classifier (mock LLM) selects both the
        // task and habit capabilities, and the habit one panics mid-run.
        let f = fixture(
            agents,
            no_learning(),
            r#"{"intent": "plan", "capabilities": ["task", "habit"], "confidence": 0.9}"#,
        );
        let reply = f.orchestrator.process("plan my evening zzz", "u1").await;

        assert!(reply.contains("Added the task."));
        assert!(!reply.contains("never seen"));
    }

    #[tokio::test]
    async fn process_never_fails_even_if_everything_fails() {
        // No agents registered at all; unmatched input and a working LLM
        // still produce a conversational reply.
        let f = fixture(AgentRegistry::new(), no_learning(), "Hello there!");
        let reply = f
            .orchestrator
            .process("completely unroutable gibberish zzz", "u1")
            .await;
        assert!(!reply.is_empty());
    }

    #[tokio::test]
    async fn fan_out_observes_memory_enrichment() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();
        agents
            .register(Arc::new(StubAgent {
                kind: AgentKind::Task,
                fragments: vec!["Saw the preference.".into()],
                suggestions: Vec::new(),
                panics: false,
                delay: None,
                needs_pref: Some("tone".into()),
            }))
            .unwrap();

        let f = fixture(agents, no_learning(), "unused");
        let reply = f.orchestrator.process("create a task to test", "u1").await;
        assert!(reply.contains("Saw the preference."));
    }

    #[tokio::test]
    async fn template_used_for_few_fragments_without_suggestions() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();
        agents
            .register(Arc::new(StubAgent::with_fragment(
                AgentKind::Task,
                "Created the task.",
            )))
            .unwrap();

        let f = fixture(agents, no_learning(), "model reply");
        let reply = f.orchestrator.process("add a task to water plants", "u1").await;

        assert_eq!(reply, "Created the task.");
        // Fast-path routing + templated synthesis: zero model calls.
        assert_eq!(f.llm_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn suggestions_trigger_synthesis_call() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();
        agents
            .register(Arc::new(StubAgent {
                kind: AgentKind::Task,
                fragments: vec!["Created the task.".into()],
                suggestions: vec!["Want a due date?".into()],
                panics: false,
                delay: None,
                needs_pref: None,
            }))
            .unwrap();

        let f = fixture(agents, no_learning(), "synthesized reply");
        let reply = f.orchestrator.process("add a task to water plants", "u1").await;

        assert_eq!(reply, "synthesized reply");
        assert_eq!(f.llm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_fragments_falls_back_to_conversation() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();

        let f = fixture(agents, no_learning(), "Just chatting!");
        let reply = f.orchestrator.process("hello there", "u1").await;

        assert_eq!(reply, "Just chatting!");
        assert_eq!(f.llm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn response_deadline_produces_apology() {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(EnrichingMemory)).unwrap();
        agents
            .register(Arc::new(StubAgent {
                kind: AgentKind::Task,
                fragments: vec!["too late".into()],
                suggestions: Vec::new(),
                panics: false,
                delay: Some(Duration::from_secs(5)),
                needs_pref: None,
            }))
            .unwrap();

        let config = AssistantConfig {
            response_timeout: Duration::from_millis(50),
            learning_enabled: false,
            ..Default::default()
        };
        let f = fixture(agents, config, "unused");
        let reply = f.orchestrator.process("create a task to wait", "u1").await;
        assert_eq!(reply, APOLOGY);
    }

    #[test]
    fn template_reply_shapes() {
        assert_eq!(template_reply(&["one"], &[]), "one");
        let multi = template_reply(&["a", "b"], &["s1", "s2", "s3"]);
        assert!(multi.starts_with("Here's where things stand:"));
        assert!(multi.contains("\n- a"));
        assert!(multi.contains("s1"));
        assert!(multi.contains("s2"));
        // Third suggestion trimmed.
        assert!(!multi.contains("s3"));
    }

    #[test]
    fn merge_enrichment_ignores_failures() {
        let mut ctx = AgentContext::new("u1", "x");
        let failed = CapabilityResult::failure(AgentKind::Memory, "nope").with_data(
            serde_json::json!({ "preferences": { "tone": "brief" } }),
        );
        merge_enrichment(&mut ctx, &failed);
        assert!(ctx.preferences.is_empty());
    }
}
