use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use himmi_cache::{RedisSemanticCache, SemanticCache};
use himmi_config::{ConfigLoader, GatewayConfig};
use himmi_db::{GatewayStore, MemStore, PgStore, Vault, keys};
use himmi_pipeline::Pipeline;
use himmi_upstream::{
    AnthropicProvider, GeminiProvider, OllamaProvider, OpenAiCompatProvider, SimulatorProvider,
    UpstreamClient,
};

#[derive(Parser)]
#[command(name = "himmi", version, about = "Multi-tenant inference gateway for LLM APIs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Serve {
        /// Path to himmi.toml (default: ./himmi.toml or $HIMMI_CONFIG).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Listen address override.
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Mint an API key pair and print it — the raw key is shown exactly once.
    Keygen,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve { config, listen } => serve(config, listen).await,
        Command::Keygen => keygen(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn keygen() -> anyhow::Result<()> {
    let (raw_key, key_hash) = keys::generate_api_key();
    println!("api key:  {raw_key}");
    println!("prefix:   {}", keys::display_prefix(&raw_key));
    println!("sha-256:  {key_hash}");
    Ok(())
}

async fn serve(config_path: Option<PathBuf>, listen: Option<String>) -> anyhow::Result<()> {
    let mut config = ConfigLoader::load(config_path.as_deref())?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    init_tracing(&config);

    let store = build_store(&config).await?;
    let upstream = build_upstream(&config);
    let mut pipeline = Pipeline::new(store, Arc::new(upstream))
        .with_shadow_target(config.shadow.model.clone(), config.shadow.provider.clone());

    if let Some(ref key) = config.security.encryption_key {
        pipeline = pipeline.with_vault(Arc::new(Vault::from_base64_key(key)?));
    }
    if let Some(cache) = build_cache(&config).await {
        pipeline = pipeline.with_cache(cache);
    }

    himmi_server::start_server(Arc::new(pipeline), &config.server.listen, config.server.cors)
        .await?;
    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(config: &GatewayConfig) -> anyhow::Result<Arc<dyn GatewayStore>> {
    if let Some(ref url) = config.database.url {
        let store = PgStore::connect(url, config.database.max_connections).await?;
        return Ok(Arc::new(store));
    }
    if config.simulator {
        return Ok(seed_simulator_store());
    }
    anyhow::bail!("DATABASE_URL is required unless simulator mode is enabled");
}

/// An ephemeral in-memory store for running the simulator without a
/// database: one demo tenant, one key (printed at startup), a small catalog.
fn seed_simulator_store() -> Arc<dyn GatewayStore> {
    let store = MemStore::new();
    let tenant_id = store.add_tenant(10.0);
    let user_id = store.add_user(Some(tenant_id));

    let (raw_key, key_hash) = keys::generate_api_key();
    store.add_api_key(user_id, &key_hash);

    store.add_route("openai/gpt-4o", "OpenAI", 2.50, 10.00);
    store.add_route("anthropic/claude-sonnet-4-20250514", "Anthropic", 3.00, 15.00);
    store.add_route("groq/llama3-8b-8192", "Groq", 0.05, 0.08);

    info!("simulator store seeded with $10.00 of demo credits");
    println!("demo api key (valid until shutdown): {raw_key}");
    Arc::new(store)
}

fn build_upstream(config: &GatewayConfig) -> UpstreamClient {
    if config.simulator {
        info!("simulator mode: all providers short-circuit to canned responses");
        return UpstreamClient::new().with_catch_all(Arc::new(SimulatorProvider));
    }

    let timeout = Duration::from_secs(config.upstream.timeout_secs);
    let u = &config.upstream;
    let mut client = UpstreamClient::new();
    client.register(
        "openai",
        Arc::new(OpenAiCompatProvider::openai(u.openai_api_key.clone(), timeout)),
    );
    client.register(
        "groq",
        Arc::new(OpenAiCompatProvider::groq(u.groq_api_key.clone(), timeout)),
    );
    client.register(
        "mistral",
        Arc::new(OpenAiCompatProvider::mistral(u.mistral_api_key.clone(), timeout)),
    );
    client.register(
        "perplexity",
        Arc::new(OpenAiCompatProvider::perplexity(u.perplexity_api_key.clone(), timeout)),
    );
    client.register(
        "xai",
        Arc::new(OpenAiCompatProvider::xai(u.xai_api_key.clone(), timeout)),
    );
    client.register(
        "deepseek",
        Arc::new(OpenAiCompatProvider::deepseek(u.deepseek_api_key.clone(), timeout)),
    );
    client.register(
        "anthropic",
        Arc::new(AnthropicProvider::new(u.anthropic_api_key.clone(), timeout)),
    );
    client.register(
        "gemini",
        Arc::new(GeminiProvider::new(u.gemini_api_key.clone(), timeout)),
    );
    client.register(
        "ollama",
        Arc::new(OllamaProvider::new(u.ollama_base_url.clone(), timeout)),
    );
    client
}

async fn build_cache(config: &GatewayConfig) -> Option<Arc<dyn SemanticCache>> {
    let url = config.cache.redis_url.as_ref()?;
    match RedisSemanticCache::connect(
        url,
        &config.cache.index,
        config.cache.distance_threshold,
        config.cache.max_entries,
    )
    .await
    {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "semantic cache unavailable, caching disabled");
            None
        }
    }
}
