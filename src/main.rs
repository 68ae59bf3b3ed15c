use std::{future::IntoFuture, process::ExitCode, sync::Arc};

use aperture::{
    application::{content::ContentService, error::AppError, repos::ContentSource},
    cache::{CacheServices, InvalidationEvent, cascade_tags},
    config::{self, CascadeArgs, ContentBackend},
    infra::{
        content::{CmsContentSource, FsContentSource},
        error::InfraError,
        http,
        telemetry,
    },
};
use serde_json::Value;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_application_error(&error);
            ExitCode::from(error.exit_code())
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cascade(args) => run_cascade(&args),
    }
}

fn run_cascade(args: &CascadeArgs) -> Result<(), AppError> {
    let event = match (args.collection.as_deref(), args.global.as_deref()) {
        (Some(collection), _) => {
            let doc = args
                .doc
                .as_deref()
                .map(serde_json::from_str::<Value>)
                .transpose()
                .map_err(|err| AppError::unexpected(format!("invalid --doc JSON: {err}")))?;
            InvalidationEvent::collection(collection, doc)
        }
        (None, Some(global)) => InvalidationEvent::global(global),
        (None, None) => {
            return Err(AppError::unexpected(
                "cascade requires --collection or --global",
            ));
        }
    };

    let tags = cascade_tags(&event);
    if args.json {
        let rendered = serde_json::to_string(&tags)
            .map_err(|err| AppError::unexpected(format!("failed to render tags: {err}")))?;
        println!("{rendered}");
    } else {
        for tag in &tags {
            println!("{tag}");
        }
    }
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("aperture/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(InfraError::from)?;
    let cache = CacheServices::build(&settings.cache, http_client);

    let source: Arc<dyn ContentSource> = match &settings.content.backend {
        ContentBackend::Fs { root } => {
            if !root.is_dir() {
                warn!(root = %root.display(), "Content root does not exist; every read will be empty");
            }
            Arc::new(FsContentSource::new(root.clone()))
        }
        ContentBackend::Cms { base_url } => Arc::new(CmsContentSource::new(
            cache.client.clone(),
            base_url,
            cache.client.default_max_age(),
        )),
    };
    let content = Arc::new(ContentService::new(
        Arc::clone(&cache.server),
        source,
        settings.content.page_size,
        settings.content.recent_limit,
    ));

    if settings.admin.revalidate_secret.is_none() {
        warn!("admin.revalidate_secret is not set; admin routes will answer 503");
    }

    let background = spawn_cache_tasks(&cache);
    let state = http::AppState::new(content, cache.clone(), settings.admin.revalidate_secret.clone());
    let result = serve_http(&settings, state).await;

    for handle in background {
        handle.abort();
        let _ = handle.await;
    }
    let flushed = cache.consumer.consume_all().await;
    if flushed > 0 {
        info!(batches = flushed, "Flushed pending invalidations");
    }

    result
}

/// Periodic queue consumption plus the fallback sweep.
fn spawn_cache_tasks(cache: &CacheServices) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if !cache.config.enabled {
        return handles;
    }

    if let Some(interval) = cache.config.dispatch.auto_consume_interval() {
        let consumer = Arc::clone(&cache.consumer);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                consumer.consume_all().await;
            }
        }));
    }

    if let Some(interval) = cache.config.dispatch.fallback_sweep_interval() {
        handles.push(Arc::clone(&cache.sweep).spawn(interval));
    }

    handles
}

async fn serve_http(settings: &config::Settings, state: http::AppState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Listening");

    let signalled = Arc::new(Notify::new());
    let notify = Arc::clone(&signalled);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            notify.notify_one();
        })
        .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => result.map_err(|err| AppError::from(InfraError::from(err))),
        () = async {
            signalled.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received; draining connections");
}
