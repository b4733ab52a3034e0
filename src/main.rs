use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use barcode_intake::app_state::AppState;
use barcode_intake::config::AppConfig;
use barcode_intake::routes;
use barcode_intake::services::{
    cache::{Cache, CacheStore, MemoryStore, RedisStore},
    inventory::HttpInventoryClient,
    lookup::LookupManager,
    optimizer::{LanguageModel, Optimizer, WorkersAiClient},
    providers::{default_providers, ReqwestTransport},
    queue::JobQueue,
    scan::ScanService,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config
        .initial_settings()
        .expect("Invalid initial pipeline settings");

    tracing::info!("Initializing barcode-intake server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    describe_metrics();

    let store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis lookup cache");
            Arc::new(RedisStore::new(url).expect("Invalid REDIS_URL"))
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory lookup cache");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Cache::new(store).with_store_timeout(config.cache_store_timeout());

    let transport = Arc::new(ReqwestTransport::new().expect("Failed to build HTTP client"));
    let lookup = Arc::new(LookupManager::new(default_providers(transport)));

    let model: Option<Arc<dyn LanguageModel>> =
        match (&config.cf_account_id, &config.cf_api_token) {
            (Some(account_id), Some(api_token)) => {
                tracing::info!(model = %config.llm_model, "Initializing Cloudflare Workers AI client");
                Some(Arc::new(WorkersAiClient::new(
                    account_id.clone(),
                    api_token.clone(),
                    config.llm_model.clone(),
                )))
            }
            _ => {
                tracing::info!("Workers AI credentials not set, optimizer unavailable");
                None
            }
        };
    let optimizer = Optimizer::new(model);

    let inventory = HttpInventoryClient::new(&config.inventory_url, config.inventory_api_key.clone())
        .expect("Failed to initialize inventory client");
    let queue = JobQueue::start(settings.clone(), Arc::new(inventory), config.job_workers);

    let scan = ScanService::new(cache.clone(), lookup, optimizer, settings.clone());
    let state = AppState::new(scan, queue.clone(), settings, cache);

    let app = Router::new()
        .merge(routes::api_router(state))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    queue.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn describe_metrics() {
    metrics::describe_counter!(
        "provider_requests_total",
        "Provider lookups by provider and outcome"
    );
    metrics::describe_histogram!(
        "lookup_duration_seconds",
        "Time to complete a multi-provider lookup"
    );
    metrics::describe_counter!("cache_hits_total", "Lookup cache hits");
    metrics::describe_counter!("cache_misses_total", "Lookup cache misses");
    metrics::describe_counter!(
        "cache_coalesced_total",
        "Lookups that joined an in-flight fetch for the same barcode"
    );
    metrics::describe_counter!(
        "cache_errors_total",
        "Cache store failures that fell back to a direct lookup"
    );
    metrics::describe_counter!(
        "optimizer_outcomes_total",
        "Language-model optimization attempts by outcome"
    );
    metrics::describe_counter!("jobs_enqueued_total", "Inventory jobs submitted");
    metrics::describe_counter!("jobs_succeeded_total", "Inventory jobs completed");
    metrics::describe_counter!(
        "jobs_failed_total",
        "Inventory jobs that failed permanently"
    );
    metrics::describe_counter!("jobs_retried_total", "Inventory job attempts scheduled for retry");
    metrics::describe_gauge!(
        "job_queue_depth",
        "Inventory jobs waiting for a worker (pending or retrying)"
    );
}
