//! Memory capability — context enrichment, entity recall, and turn learning.
//!
//! Runs before every other capability: the orchestrator merges the
//! preference and related-entity data it returns into the context the
//! parallel fan-out observes. After the reply is sent, `learn` extracts
//! durable facts from the turn and persists them.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agents::{AgentKind, Capability, CapabilityResult};
use crate::context::AgentContext;
use crate::error::Error;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::router::first_json_object;
use crate::storage::{ChatTurn, Storage, TaskStatus};

/// Max tokens for the learning extraction call.
const LEARN_MAX_TOKENS: u32 = 512;

/// Temperature for extraction (deterministic-ish).
const LEARN_TEMPERATURE: f32 = 0.1;

/// Memory capability module.
pub struct MemoryAgent {
    storage: Arc<dyn Storage>,
    llm: Arc<dyn LlmProvider>,
}

impl MemoryAgent {
    pub fn new(storage: Arc<dyn Storage>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { storage, llm }
    }

    async fn enrich(&self, ctx: &AgentContext) -> Result<CapabilityResult, Error> {
        let start = Instant::now();
        let mut result = CapabilityResult::ok(AgentKind::Memory);

        // Look up remembered entities for the topic and any mentions.
        let mut queries: Vec<&str> = Vec::new();
        if let Some(ref topic) = ctx.topic {
            queries.push(topic);
        }
        queries.extend(ctx.mentions.iter().map(String::as_str));

        let mut entities = Vec::new();
        for query in queries {
            for entity in self.storage.find_entities(&ctx.user_id, query).await? {
                if !entities
                    .iter()
                    .any(|e: &crate::storage::EntityRecord| e.id == entity.id)
                {
                    entities.push(entity);
                }
            }
        }

        // Open tasks and projects touching the topic, for downstream
        // capabilities.
        let mut related_tasks = Vec::new();
        let mut related_projects = Vec::new();
        if let Some(ref topic) = ctx.topic {
            let needle = topic.to_lowercase();
            related_tasks = self
                .storage
                .get_tasks(&ctx.user_id, Some(TaskStatus::Open))
                .await?
                .into_iter()
                .filter(|t| t.title.to_lowercase().contains(&needle))
                .collect();
            related_projects = self
                .storage
                .get_projects(&ctx.user_id)
                .await?
                .into_iter()
                .filter(|p| p.name.to_lowercase().contains(&needle))
                .collect();
        }

        let preferences = self.storage.get_preferences(&ctx.user_id).await?;

        // Recall fragments only when the request is about memory itself.
        let is_recall = matches!(ctx.intent.as_deref(), Some("person") | Some("memory"));
        if is_recall {
            if entities.is_empty() {
                if let Some(ref topic) = ctx.topic {
                    result = result
                        .with_fragment(format!(
                            "I don't have anything saved about {topic} yet."
                        ))
                        .with_suggestion(format!(
                            "Tell me about {topic} and I'll remember it."
                        ));
                }
            } else {
                for entity in &entities {
                    result = result.with_fragment(format!(
                        "{} ({}): {}",
                        entity.name, entity.entity_kind, entity.notes
                    ));
                }
            }
        }

        let data = serde_json::json!({
            "preferences": preferences
                .iter()
                .cloned()
                .collect::<std::collections::HashMap<String, String>>(),
            "related_entities": entities,
            "related_tasks": related_tasks,
            "related_projects": related_projects,
        });

        Ok(result.with_data(data).with_elapsed(start.elapsed()))
    }

    /// Extract durable facts from a completed turn and persist them.
    ///
    /// Called after the reply is sent; every failure is logged, never
    /// surfaced.
    pub async fn learn(&self, user_id: &str, user_input: &str, reply: &str) {
        // Persist the turn itself first.
        for turn in [
            ChatTurn::new("user", user_input),
            ChatTurn::new("assistant", reply),
        ] {
            if let Err(e) = self.storage.save_chat(user_id, &turn).await {
                warn!(error = %e, "Failed to persist chat turn");
            }
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_prompt()),
            ChatMessage::user(format!("User: {user_input}\nAssistant: {reply}")),
        ])
        .with_temperature(LEARN_TEMPERATURE)
        .with_max_tokens(LEARN_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Learning extraction call failed");
                return;
            }
        };

        let Some(extraction) = parse_extraction(&response.content) else {
            debug!(raw = %response.content, "No parseable extraction in learning response");
            return;
        };

        for pref in extraction.preferences {
            if pref.key.is_empty() || pref.value.is_empty() {
                continue;
            }
            if let Err(e) = self
                .storage
                .save_preference(user_id, &pref.key, &pref.value)
                .await
            {
                warn!(key = %pref.key, error = %e, "Failed to save learned preference");
            }
        }

        for entity in extraction.entities {
            if entity.name.is_empty() {
                continue;
            }
            let kind = if entity.kind.is_empty() {
                "thing".to_string()
            } else {
                entity.kind
            };
            if let Err(e) = self
                .storage
                .save_entity(user_id, &entity.name, &kind, &entity.notes)
                .await
            {
                warn!(name = %entity.name, error = %e, "Failed to save learned entity");
            }
        }
    }
}

#[async_trait]
impl Capability for MemoryAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Memory
    }

    fn capabilities(&self) -> &[&str] {
        &["recall", "preferences", "entity-lookup", "learning"]
    }

    fn can_handle(&self, ctx: &AgentContext) -> f32 {
        match ctx.intent.as_deref() {
            Some("person") | Some("memory") => 0.9,
            _ => 0.3,
        }
    }

    async fn execute(&self, ctx: &AgentContext) -> CapabilityResult {
        match self.enrich(ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Memory enrichment failed");
                CapabilityResult::failure(AgentKind::Memory, e.to_string())
            }
        }
    }
}

fn build_extraction_prompt() -> String {
    "You extract durable facts from one assistant conversation turn.\n\
     Find user preferences and named entities worth remembering long-term.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"preferences\": [{\"key\": \"snake_case_key\", \"value\": \"...\"}], \
     \"entities\": [{\"name\": \"...\", \"kind\": \"person|place|thing\", \"notes\": \"...\"}]}\n\n\
     Rules:\n\
     - Only durable facts; skip one-off requests and small talk\n\
     - Empty arrays are fine when there is nothing to remember"
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
struct Extraction {
    #[serde(default)]
    preferences: Vec<ExtractedPreference>,
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Deserialize)]
struct ExtractedPreference {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    notes: String,
}

fn parse_extraction(raw: &str) -> Option<Extraction> {
    let json_str = first_json_object(raw)?;
    serde_json::from_str(json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    use crate::error::LlmError;
    use crate::llm::{
        CompletionResponse, FinishReason, ToolCompletionRequest, ToolCompletionResponse,
    };

    struct CannedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
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

    fn agent_with(storage: Arc<MemoryStorage>, response: &str) -> MemoryAgent {
        MemoryAgent::new(
            storage,
            Arc::new(CannedLlm {
                response: response.into(),
            }),
        )
    }

    #[tokio::test]
    async fn recall_known_entity_produces_fragment() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_entity("u1", "john", "person", "likes espresso")
            .await
            .unwrap();

        let agent = agent_with(storage, "{}");
        let mut ctx = AgentContext::new("u1", "who is john");
        ctx.intent = Some("person".into());
        ctx.topic = Some("john".into());

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.fragments.len(), 1);
        assert!(result.fragments[0].contains("espresso"));
        assert_eq!(result.data["related_entities"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recall_unknown_entity_suggests_teaching() {
        let storage = Arc::new(MemoryStorage::new());
        let agent = agent_with(storage, "{}");
        let mut ctx = AgentContext::new("u1", "who is maria");
        ctx.intent = Some("person".into());
        ctx.topic = Some("maria".into());

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert!(result.fragments[0].contains("maria"));
        assert_eq!(result.suggestions.len(), 1);
    }

    #[tokio::test]
    async fn enrichment_includes_preferences_and_related_tasks() {
        let storage = Arc::new(MemoryStorage::new());
        storage.save_preference("u1", "tone", "brief").await.unwrap();
        storage
            .create_task(
                "u1",
                crate::storage::NewTask {
                    title: "review code for release".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let agent = agent_with(storage, "{}");
        let mut ctx = AgentContext::new("u1", "create a task to review code");
        ctx.intent = Some("task".into());
        ctx.topic = Some("review code".into());

        let result = agent.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.data["preferences"]["tone"], "brief");
        assert_eq!(result.data["related_tasks"].as_array().unwrap().len(), 1);
        // Enrichment for a task request adds no reply fragments.
        assert!(result.fragments.is_empty());
    }

    #[tokio::test]
    async fn learn_persists_turn_and_extractions() {
        let storage = Arc::new(MemoryStorage::new());
        let agent = agent_with(
            storage.clone(),
            r#"{"preferences": [{"key": "coffee", "value": "espresso"}],
                "entities": [{"name": "Rex", "kind": "thing", "notes": "the office dog"}]}"#,
        );

        agent
            .learn("u1", "remember I drink espresso", "Noted!")
            .await;

        let prefs = storage.get_preferences("u1").await.unwrap();
        assert_eq!(prefs, vec![("coffee".to_string(), "espresso".to_string())]);
        let entities = storage.find_entities("u1", "rex").await.unwrap();
        assert_eq!(entities.len(), 1);
        let history = storage.get_chat_history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn learn_tolerates_garbage_output() {
        let storage = Arc::new(MemoryStorage::new());
        let agent = agent_with(storage.clone(), "no json here");
        // Must not panic or error.
        agent.learn("u1", "hello", "hi").await;
        assert!(storage.get_preferences("u1").await.unwrap().is_empty());
    }
}
