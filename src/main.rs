use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xen_bot::api::{build_router, AppState};
use xen_bot::config::{Config, ImageProvider, LoggingConfig};
use xen_bot::context::{DialogueWindow, TiktokenEstimator, TokenBudget};
use xen_bot::conversation::{Dispatcher, SessionStore, UploadStore};
use xen_bot::gateways::{
    GoogleTranslateClient, ImageGateway, OpenAiChatClient, OpenAiImageClient,
    ReplicateImageClient, SplitImageGateway, Translator,
};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let estimator = TiktokenEstimator::for_model(&config.dialogue.tokenizer_model)
        .context("failed to load tokenizer")?;
    info!("Using tokenizer profile {}", estimator.profile());

    let window = DialogueWindow::new(
        config.bot.system_prompt.clone(),
        Arc::new(estimator),
        TokenBudget::new(config.dialogue.token_budget),
        config.dialogue.trim_policy,
    );

    let completion = Arc::new(OpenAiChatClient::new(&config.openai)?);

    let openai_images: Arc<dyn ImageGateway> =
        Arc::new(OpenAiImageClient::new(&config.openai, &config.images)?);
    let images: Arc<dyn ImageGateway> = match config.images.provider {
        ImageProvider::OpenAi => openai_images,
        ImageProvider::Replicate => {
            info!("Generating images with Replicate");
            Arc::new(SplitImageGateway::new(
                Arc::new(ReplicateImageClient::new(&config.replicate)?),
                openai_images,
            ))
        }
    };

    let translator = Translator::new(
        Arc::new(GoogleTranslateClient::new(&config.translation)?),
        &config.translation,
    );

    let uploads = UploadStore::new(
        config.images.upload_dir.clone(),
        config.images.max_upload_bytes,
    );

    Ok(Dispatcher::new(
        window,
        completion,
        images,
        Arc::new(translator),
        uploads,
        config.bot.clone(),
    )
    .with_sessions(SessionStore::from_config(&config.sessions)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;
    init_tracing(&config.logging);

    if config.openai.api_key.is_none() {
        warn!("No OpenAI API key configured, completion and image calls will be rejected");
    }

    let dispatcher = build_dispatcher(&config)?;
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        transport_token: config
            .transport
            .token
            .as_ref()
            .map(|t| Arc::new(SecretString::new(t.expose_secret().clone()))),
    };
    if state.transport_token.is_none() {
        warn!("No transport token configured, session routes are unauthenticated");
    }

    // Expired sessions are otherwise only reclaimed when the store is written
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            dispatcher.sessions().sweep().await;
        }
    });

    let app = build_router(state, config.server.max_body_bytes);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("{} listening on {}", config.bot.name, address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
