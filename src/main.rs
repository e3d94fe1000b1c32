//! carewatch service: arms the enabled agents and serves the HTTP API.

use std::sync::Arc;

use anyhow::Context;

use carewatch::agent::AgentContext;
use carewatch::api::{self, AppState};
use carewatch::config::{ConfigStore, ServiceSettings};
use carewatch::db::{PostgrestBackend, QueryBackend, ReadOnlyDb, SqliteBackend};
use carewatch::events::JsonlEventStore;
use carewatch::llm::OpenRouterClient;
use carewatch::logging::init_tracing;
use carewatch::notify::WebhookNotifier;
use carewatch::registry;
use carewatch::scheduler::Scheduler;

/// Wire the external collaborators named in the environment.
fn build_context(
    config: Arc<ConfigStore>,
    settings: &ServiceSettings,
) -> anyhow::Result<AgentContext> {
    let mut ctx = AgentContext::new(Arc::clone(&config));

    let source = (&settings.sqlite_path, &settings.supabase_url);
    let backend: Option<Arc<dyn QueryBackend>> = match source {
        (Some(path), _) => Some(Arc::new(
            SqliteBackend::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        (None, Some(url)) => {
            let key = settings
                .supabase_readonly_key
                .as_deref()
                .context("SUPABASE_URL is set but SUPABASE_READONLY_KEY is not")?;
            Some(Arc::new(PostgrestBackend::new(url, key)?))
        }
        (None, None) => {
            tracing::warn!("No data source configured; data-driven agents will fail");
            None
        }
    };
    if let Some(backend) = backend {
        tracing::info!("Data source: {}", backend.name());
        let db = ReadOnlyDb::new(backend, &ctx.logger);
        ctx = ctx.with_db(db);
    }

    match &settings.notify_webhook_url {
        Some(url) => ctx = ctx.with_notifier(Arc::new(WebhookNotifier::new(url.as_str())?)),
        None => tracing::info!("No delivery channel configured; live sends will fail"),
    }

    match &settings.openrouter_api_key {
        Some(key) => {
            let client = OpenRouterClient::new(key.as_str(), settings.llm_model.as_str())?;
            tracing::info!("Language model: {}", client.model());
            ctx = ctx.with_llm(Arc::new(client));
        }
        None => tracing::info!("No language model configured; briefings use templates"),
    }

    if let Some(path) = &settings.events_path {
        tracing::info!("Event log: {}", path.display());
        ctx = ctx.with_events(Arc::new(JsonlEventStore::new(path)));
    }

    Ok(ctx)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ConfigStore::from_env(&registry::agent_names()));
    init_tracing(config.log_level());

    let settings = config.service_settings();
    let ctx = build_context(Arc::clone(&config), &settings)?;

    let scheduler = Arc::new(Scheduler::new(ctx));
    scheduler.start();

    let status = scheduler.status();
    tracing::info!(
        "carewatch {} started: simulation_mode={}, {} of {} agent(s) enabled [{}], jobs [{}]",
        env!("CARGO_PKG_VERSION"),
        status.simulation_mode,
        status.enabled_agents.len(),
        status.total_agents,
        status.enabled_agents.join(", "),
        scheduler.job_names().join(", ")
    );
    if status.simulation_mode {
        tracing::warn!("Simulation mode is on: no alerts, emails or notifications will be sent");
    }

    api::serve(Arc::new(AppState { scheduler }), settings.listen).await
}
