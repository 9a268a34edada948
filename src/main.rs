use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use aide::agents::{AgentRegistry, ChatAgent, HabitAgent, MemoryAgent, ProjectAgent, TaskAgent};
use aide::config::AssistantConfig;
use aide::llm::{LlmBackend, LlmConfig, create_provider};
use aide::notify::WebhookNotifier;
use aide::orchestrator::Orchestrator;
use aide::router::IntentRouter;
use aide::storage::{LibSqlStorage, Storage};
use aide::tools::ToolRegistry;
use aide::tools::builtin::register_builtin_tools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. With AIDE_LOG_DIR set, logs go to a daily rolling
    // file instead of stderr; the guard must outlive the REPL loop.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = if let Ok(dir) = std::env::var("AIDE_LOG_DIR") {
        let appender = tracing_appender::rolling::daily(dir, "aide.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .init();
        None
    };

    // Read API key from environment
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: ANTHROPIC_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    let model =
        std::env::var("AIDE_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    let db_path = std::env::var("AIDE_DB_PATH").unwrap_or_else(|_| "./data/aide.db".to_string());

    eprintln!("🤖 Aide v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    eprintln!("   Database: {}", db_path);
    eprintln!("   Type a message and press Enter. /quit to exit.\n");

    // Create LLM provider
    let llm_config = LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: secrecy::SecretString::from(api_key),
        model,
    };
    let llm = create_provider(&llm_config)?;

    // ── Storage ─────────────────────────────────────────────────────
    let storage: Arc<dyn Storage> = Arc::new(
        LibSqlStorage::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    // ── Tools ───────────────────────────────────────────────────────
    let mut tools = ToolRegistry::new();
    register_builtin_tools(&mut tools, storage.clone())?;
    let tools = Arc::new(tools);

    // ── Capabilities ────────────────────────────────────────────────
    let memory = Arc::new(MemoryAgent::new(storage.clone(), llm.clone()));

    let mut task_agent = TaskAgent::new(llm.clone(), tools.clone());
    if let Ok(endpoint) = std::env::var("AIDE_PUSH_ENDPOINT") {
        task_agent = task_agent.with_notifier(Arc::new(WebhookNotifier::new(endpoint)));
    }

    let mut agents = AgentRegistry::new();
    agents.register(memory.clone())?;
    agents.register(Arc::new(task_agent))?;
    agents.register(Arc::new(HabitAgent::new(storage.clone())))?;
    agents.register(Arc::new(ProjectAgent::new(storage.clone())))?;
    agents.register(Arc::new(ChatAgent::new(llm.clone())))?;

    // ── Orchestrator ────────────────────────────────────────────────
    let router = IntentRouter::new(llm.clone());
    let orchestrator = Orchestrator::new(
        AssistantConfig::default(),
        llm,
        storage,
        router,
        Arc::new(agents),
        memory,
    );

    let user_id = std::env::var("AIDE_USER").unwrap_or_else(|_| "local-user".to_string());

    // ── REPL ────────────────────────────────────────────────────────
    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let reply = orchestrator.process(line, &user_id).await;
        println!("\n{}\n", reply);
        eprint!("> ");
    }

    eprintln!("Bye.");
    Ok(())
}
