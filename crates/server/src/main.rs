//! Parley server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use parley_config::{load_settings, AgentRegistry, Settings};
use parley_core::AgentDefinition;
use parley_server::{create_router, init_metrics, AppState};
use parley_tools::{KnowledgeLookupTool, StaticKnowledgeBackend, ToolRegistry, SWITCH_AGENT_TOOL};
use parley_transport::WsTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("PARLEY_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&config);
    tracing::info!("Starting parley server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config_env = env.as_deref().unwrap_or("default"),
        model_endpoint = %config.model.endpoint,
        "Configuration loaded"
    );

    let metrics_handle = init_metrics()?;
    tracing::info!("Initialized Prometheus metrics at /metrics");

    let agents = Arc::new(load_agents(&config));
    tracing::info!(agents = ?agents.agent_ids(), "Agent registry loaded");

    let tools = Arc::new(build_tools());
    let transport = Arc::new(WsTransport::new(config.model.endpoint.clone()));

    let state = AppState::new(
        config.clone(),
        agents,
        tools,
        transport,
        metrics_handle,
    );
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Load the agent registry, falling back to the built-in demo personas when
/// the configured file is absent
fn load_agents(config: &Settings) -> AgentRegistry {
    match AgentRegistry::from_file(&config.agents_path) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::warn!(
                path = %config.agents_path,
                error = %e,
                "Agent registry not loaded from file, using demo agents"
            );
            demo_agents()
        }
    }
}

fn demo_agents() -> AgentRegistry {
    let agents = vec![
        AgentDefinition::new(
            "concierge",
            "You are a friendly concierge. Greet the caller, find out what \
             they need, and hand them to the right specialist.",
        )
        .with_tools(["knowledge_lookup", SWITCH_AGENT_TOOL]),
        AgentDefinition::new(
            "support",
            "You are a patient support specialist. Resolve the caller's \
             problem step by step.",
        )
        .with_tools(["knowledge_lookup", SWITCH_AGENT_TOOL]),
        AgentDefinition::new(
            "sales",
            "You are an enthusiastic sales specialist. Understand what the \
             caller wants and recommend a plan.",
        )
        .with_tools([SWITCH_AGENT_TOOL]),
    ];

    match AgentRegistry::new(agents) {
        Ok(registry) => registry,
        // The demo set has unique ids; new() only rejects duplicates
        Err(e) => {
            tracing::error!(error = %e, "Demo agent registry invalid");
            std::process::exit(1);
        }
    }
}

fn build_tools() -> ToolRegistry {
    let backend = StaticKnowledgeBackend::new()
        .with_entry("hours", "We are open 9am to 6pm, Monday through Friday.")
        .with_entry("refund", "Refunds are processed within 5 business days.")
        .with_entry(
            "pricing",
            "The starter plan is $10/month, the pro plan is $40/month.",
        );

    let mut registry = ToolRegistry::new();
    registry.register(KnowledgeLookupTool::new(backend));
    registry
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "parley={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
