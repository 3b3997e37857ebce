use anyhow::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use btl_quiz::{
    log_system_event,
    api::{create_router, AppState},
    config::{Config, LoggingConfig},
    AdaptivePool, ClassifierFactory, ClientStateStore, DifficultyFilter, QuestionBank, QuizEngine,
    QuizService, SessionStateStore, StateCodec,
};

/// Upper bound on sessions that keep preferences.
const MAX_PREFERENCE_SESSIONS: usize = 4096;
/// Upper bound on sessions whose filtered pool is cached at once.
const MAX_CACHED_POOLS: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    config.validate()?;

    info!("Starting BTL quiz server...");

    let bank = QuestionBank::open(&config.library.path).await?;
    let catalog = bank.snapshot().await;
    info!(
        path = %config.library.path,
        question_count = catalog.len(),
        "Question bank loaded"
    );

    let classifier = ClassifierFactory::create(&config.classifier)?;
    info!(classifier = classifier.name(), "Initialized BTL classifier");

    let codec = StateCodec::from_config(&config.state);

    let adaptive = AdaptivePool::new(DifficultyFilter::from_config(&config.filter), MAX_PREFERENCE_SESSIONS)
        .with_cache_limit(MAX_CACHED_POOLS);
    let engine = QuizEngine::system();

    let client_quiz = QuizService::new(
        bank.clone(),
        engine.clone(),
        Arc::new(ClientStateStore::new(codec.clone())),
        adaptive.clone(),
        config.quiz.clone(),
    );
    let session_quiz = QuizService::new(
        bank.clone(),
        engine,
        Arc::new(SessionStateStore::new()),
        adaptive.clone(),
        config.quiz.clone(),
    );

    let state = AppState {
        bank,
        classifier,
        client_quiz,
        session_quiz,
        adaptive,
        codec,
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    log_system_event!(startup, component = "server", format!("listening on {}", addr));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create log directory: {}", e);
        });

        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "btl-quiz.log");
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        // No ANSI colors for files
        Some(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_file)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        directory = %config.log_directory,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}
