//! Intent routing — fast pattern matching with an LLM classifier fallback.
//!
//! The fast path runs before any model call and short-circuits on the first
//! matching pattern. The fallback issues exactly one classification call and
//! parses it defensively; any failure degrades to a memory-only,
//! low-confidence decision. `route` never fails.

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::agents::AgentKind;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

/// Confidence assigned to fast-path matches.
const FAST_PATH_CONFIDENCE: f32 = 0.85;

/// Confidence assigned to the fallback decision.
const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Max tokens for the classification call (runs on every unmatched message).
const CLASSIFY_MAX_TOKENS: u32 = 256;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Priority tier of a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Classification output selecting which capability modules run.
///
/// Produced once, consumed once, immutable. The memory capability is always
/// present in `required_agents`.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub intent: String,
    pub topic: Option<String>,
    /// Non-empty, ordered. Always contains `AgentKind::Memory`.
    pub required_agents: Vec<AgentKind>,
    pub optional_agents: Vec<AgentKind>,
    pub priority: Priority,
    pub mentions: Vec<String>,
    /// Classifier confidence in [0,1].
    pub confidence: f32,
}

impl RoutingDecision {
    /// The minimal decision used whenever classification fails.
    fn fallback(mentions: Vec<String>) -> Self {
        Self {
            intent: "general".to_string(),
            topic: None,
            required_agents: vec![AgentKind::Memory],
            optional_agents: Vec::new(),
            priority: Priority::Normal,
            mentions,
            confidence: FALLBACK_CONFIDENCE,
        }
    }

    /// Force-append the memory capability if missing.
    fn ensure_memory(mut self) -> Self {
        if !self.required_agents.contains(&AgentKind::Memory) {
            self.required_agents.push(AgentKind::Memory);
        }
        self
    }
}

/// One fast-path routing pattern.
struct RoutePattern {
    regex: Regex,
    intent: &'static str,
    agents: &'static [AgentKind],
    priority: Priority,
}

/// Router from free text to a `RoutingDecision`.
pub struct IntentRouter {
    patterns: Vec<RoutePattern>,
    llm: Arc<dyn LlmProvider>,
}

impl IntentRouter {
    /// Create a router with the default pattern table.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            patterns: default_patterns(),
            llm,
        }
    }

    /// Classify a request. Never fails; the memory capability is always in
    /// the required set.
    pub async fn route(&self, input: &str) -> RoutingDecision {
        let lowered = input.to_lowercase();
        let mentions = extract_mentions(input);

        // Fast path: first match wins, no model call.
        for pattern in &self.patterns {
            if let Some(captures) = pattern.regex.captures(&lowered) {
                let topic = captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|t| !t.is_empty());
                debug!(
                    intent = pattern.intent,
                    topic = topic.as_deref().unwrap_or(""),
                    "Fast-path route matched"
                );
                return RoutingDecision {
                    intent: pattern.intent.to_string(),
                    topic,
                    required_agents: pattern.agents.to_vec(),
                    optional_agents: Vec::new(),
                    priority: pattern.priority,
                    mentions,
                    confidence: FAST_PATH_CONFIDENCE,
                }
                .ensure_memory();
            }
        }

        // Fallback: one classification call, parsed defensively.
        match self.classify(input).await {
            Some(decision) => decision.ensure_memory(),
            None => RoutingDecision::fallback(mentions).ensure_memory(),
        }
    }

    async fn classify(&self, input: &str) -> Option<RoutingDecision> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classifier_prompt()),
            ChatMessage::user(input),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Classification call failed, using fallback route");
                return None;
            }
        };

        match parse_classifier_response(&response.content) {
            Some(decision) => Some(decision),
            None => {
                warn!(
                    raw_response = %response.content,
                    "Failed to parse classifier response, using fallback route"
                );
                None
            }
        }
    }
}

fn default_patterns() -> Vec<RoutePattern> {
    vec![
        RoutePattern {
            regex: Regex::new(
                r"(?:create|add|make)\s+(?:a\s+|new\s+)?(?:task|todo)(?:\s+(?:to|for|about)\s+(.+))?",
            )
            .unwrap(),
            intent: "task",
            agents: &[AgentKind::Task],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"(?:show|list|what(?:'s| is| are)?\s+on)\s+(?:my\s+)?(?:tasks|todos|to-dos|list)")
                .unwrap(),
            intent: "task",
            agents: &[AgentKind::Task],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"(?:mark|check\s+off|finished|i'?m\s+done\s+with)\s+(.+?)(?:\s+as\s+done)?$")
                .unwrap(),
            intent: "task",
            agents: &[AgentKind::Task],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"\b(?:habit|habits|streak)\b").unwrap(),
            intent: "habit",
            agents: &[AgentKind::Habit],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"\bprojects?\b").unwrap(),
            intent: "project",
            agents: &[AgentKind::Project],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"who\s+is\s+([a-z][a-z'\-]*)").unwrap(),
            intent: "person",
            agents: &[],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"\b(?:remember|my\s+favou?rite|i\s+prefer)\b").unwrap(),
            intent: "memory",
            agents: &[],
            priority: Priority::Normal,
        },
        RoutePattern {
            regex: Regex::new(r"^(?:hi|hey|hello|good\s+(?:morning|afternoon|evening))\b").unwrap(),
            intent: "greeting",
            agents: &[AgentKind::Chat],
            priority: Priority::Low,
        },
    ]
}

/// Build the fixed classification prompt enumerating capability labels.
fn build_classifier_prompt() -> String {
    let labels: Vec<&str> = AgentKind::all().iter().map(|k| k.label()).collect();
    format!(
        "You are an intent classifier for a personal assistant.\n\
         Available capabilities: {}.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"intent\": \"...\", \"topic\": \"...\", \"capabilities\": [\"...\"], \
         \"priority\": \"low|normal|high\", \"mentions\": [\"...\"], \"confidence\": 0.0}}\n\n\
         Rules:\n\
         - intent is a single lowercase word\n\
         - capabilities lists only the capabilities needed for this message\n\
         - mentions lists named people, places, or things\n\
         - confidence is between 0.0 and 1.0",
        labels.join(", ")
    )
}

/// LLM classifier response structure.
#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    intent: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    mentions: Vec<String>,
    #[serde(default)]
    confidence: f32,
}

/// Parse the classifier reply into a decision. Returns `None` on any
/// malformed input.
fn parse_classifier_response(raw: &str) -> Option<RoutingDecision> {
    let json_str = first_json_object(raw)?;
    let response: ClassifierResponse = serde_json::from_str(json_str).ok()?;

    let intent = response.intent.trim().to_lowercase();
    if intent.is_empty() {
        return None;
    }

    let required_agents: Vec<AgentKind> = response
        .capabilities
        .iter()
        .filter_map(|label| AgentKind::parse(label))
        .collect();

    let priority = match response.priority.as_str() {
        "low" => Priority::Low,
        "high" => Priority::High,
        _ => Priority::Normal,
    };

    Some(RoutingDecision {
        intent,
        topic: if response.topic.trim().is_empty() {
            None
        } else {
            Some(response.topic.trim().to_string())
        },
        required_agents,
        optional_agents: Vec::new(),
        priority,
        mentions: response.mentions,
        confidence: response.confidence.clamp(0.0, 1.0),
    })
}

/// Find the first balanced-brace substring in free text.
///
/// Explicit depth counter, aware of strings and escapes, tolerating
/// surrounding prose and markdown fences.
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract capitalized-word entity mentions from the raw input.
fn extract_mentions(input: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    for (i, word) in input.split_whitespace().enumerate() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphabetic() || *c == '\'')
            .collect();
        // Skip the sentence-initial word and the pronoun "I".
        if i == 0 || cleaned == "I" {
            continue;
        }
        let mut chars = cleaned.chars();
        let is_capitalized = chars
            .next()
            .is_some_and(|c| c.is_uppercase() && chars.all(|c| c.is_lowercase()));
        if is_capitalized && !mentions.contains(&cleaned) {
            mentions.push(cleaned);
        }
    }
    mentions
}
