use std::{
    io::{self, Read},
    path::Path,
    process,
    sync::Arc,
};

use furrow::{
    application::{
        engines::{NitrogenBalance, NormFilling},
        error::AppError,
    },
    cache::{
        CacheConfig, CacheStoreFactory, CachedResult, FileBackend, FlushPolicy, MemoryBackend,
        PersistenceBackend, hash_untyped,
    },
    config::{self, CacheCommand, CacheShowArgs, HashArgs},
    domain::kind::CalculationKind,
    infra::{
        error::InfraError,
        farm_data::InMemoryFarmData,
        http::{self, HttpState},
        telemetry,
    },
};
use serde_json::Value;
use tokio::{signal, sync::Notify};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Hash(args) => run_hash(&args),
        config::Command::Cache(args) => match args.command {
            CacheCommand::Show(show) => run_cache_show(&settings, &show),
        },
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = InMemoryFarmData::from_toml_file(&settings.data.farm_file).await?;

    let cache = CacheConfig::from(&settings.cache);
    let backend: Arc<dyn PersistenceBackend> = if cache.enabled {
        Arc::new(FileBackend::new(&cache.directory)?)
    } else {
        Arc::new(MemoryBackend::new())
    };
    let stores = CacheStoreFactory::new(backend, cache.flush_policy());

    let state = HttpState::new(Arc::new(repo), &stores, cache.enabled)?;
    let router = http::build_router(state)?;

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "furrow::serve",
        addr = %settings.server.addr,
        cache_enabled = cache.enabled,
        cache_directory = %cache.directory.display(),
        "Listening"
    );

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown({
            let shutdown = Arc::clone(&shutdown);
            async move { shutdown.notified().await }
        })
        .into_future();
    let mut server = tokio::spawn(server);

    let served = tokio::select! {
        joined = &mut server => Some(joined),
        () = shutdown_signal() => None,
    };
    let served = match served {
        Some(joined) => joined,
        None => {
            info!(target = "furrow::serve", "Shutdown requested; draining connections");
            shutdown.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        target = "furrow::serve",
                        timeout_secs = settings.server.graceful_shutdown.as_secs(),
                        "Graceful shutdown timed out"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    stores.flush_all()?;

    served
        .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(target = "furrow::serve", error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn run_hash(args: &HashArgs) -> Result<(), AppError> {
    let raw = read_input(&args.file).map_err(|err| AppError::from(InfraError::from(err)))?;
    let input: Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("input is not valid JSON: {err}")))?;
    let hash = hash_untyped(args.kind, args.schema_version, &input)
        .map_err(|err| AppError::validation(err.to_string()))?;
    println!("{hash}");
    Ok(())
}

fn read_input(path: &Path) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        std::fs::read_to_string(path)
    }
}

fn run_cache_show(settings: &config::Settings, args: &CacheShowArgs) -> Result<(), AppError> {
    let backend = FileBackend::new(&settings.cache.directory)?;
    let path = backend.path_for(args.kind.namespace());
    let stores = CacheStoreFactory::new(Arc::new(backend), FlushPolicy::Eager);

    println!("# {} ({})", args.kind, path.display());
    match args.kind {
        CalculationKind::NitrogenBalance => print_entries::<NitrogenBalance>(&stores, args.kind),
        CalculationKind::NormFilling => print_entries::<NormFilling>(&stores, args.kind),
    }
}

fn print_entries<T: CachedResult>(
    stores: &CacheStoreFactory,
    kind: CalculationKind,
) -> Result<(), AppError> {
    let store = stores.open::<T>(kind)?;
    for (id, entry) in store.entries() {
        let result = serde_json::to_string(&entry.result)
            .map_err(|err| AppError::unexpected(err.to_string()))?;
        println!("{id}\t{}\t{result}", entry.input_hash);
    }
    if store.is_empty() {
        println!("(no entries)");
    }
    Ok(())
}
