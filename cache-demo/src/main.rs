use aerocache::{AeroCache, CacheBackend, CacheBackendExt};
use shared::config::CacheSettings;
use std::time::Duration;
use storage_engine::{NamespaceConfig, Namespaces, SledConnector};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_NSUP_SECS: u64 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting cache demo");

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let settings = CacheSettings::from_env()?;

    // ============================================
    // STEP 1: Embedded node standing in for the cluster
    // ============================================
    let data_dir =
        std::env::var("CACHE_DEMO_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
    let nsup_secs = std::env::var("CACHE_DEMO_NSUP_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_NSUP_SECS);

    let namespaces = Namespaces::new([NamespaceConfig::new(settings.namespace.clone())
        .with_nsup_period(Duration::from_secs(nsup_secs))]);
    let connector = SledConnector::new(&data_dir, namespaces);

    // ============================================
    // STEP 2: Cache adapter
    // ============================================
    let cache = AeroCache::factory(&settings, None, &connector).await?;
    info!("Cache ready: {:?}", cache);

    // ============================================
    // STEP 3: Cached view, memoized functions, invalidation
    // ============================================
    for _ in 0..2 {
        info!("/api/now -> {}", current_time(&cache).await);
    }

    for _ in 0..2 {
        info!("add(2, 3) -> {}", memoized_add(&cache, 2, 3).await);
        info!("sub(9, 4) -> {}", memoized_sub(&cache, 9, 4).await);
    }

    let add_key = memo_key("_add", 2, 3);
    let sub_key = memo_key("_sub", 9, 4);
    let deleted = cache.delete_many(&[add_key.as_str(), sub_key.as_str()]).await;
    info!("Deleted memoized results: {:?}", deleted);
    info!("add(2, 3) after delete -> {}", memoized_add(&cache, 2, 3).await);

    let hits = cache.inc("demo/hits", 1).await;
    info!("Demo run count: {:?}", hits);

    info!("Cache demo finished");
    Ok(())
}

/// Cached for 50 seconds
async fn current_time(cache: &AeroCache) -> String {
    const KEY: &str = "view//api/now";

    if let Some(cached) = cache.get_as::<String>(KEY).await {
        return cached;
    }
    let now = chrono::Utc::now().to_rfc3339();
    cache.set_as(KEY, &now, Some(50)).await;
    now
}

fn memo_key(name: &str, a: i64, b: i64) -> String {
    format!("memoize/{}/{}/{}", name, a, b)
}

fn jitter() -> i64 {
    i64::from(chrono::Utc::now().timestamp_subsec_nanos() % 1000)
}

async fn memoize<F>(cache: &AeroCache, key: String, compute: F) -> i64
where
    F: FnOnce() -> i64,
{
    if let Some(cached) = cache.get_as::<i64>(&key).await {
        return cached;
    }
    let value = compute();
    cache.set(&key, serde_json::json!(value), Some(60)).await;
    value
}

async fn memoized_add(cache: &AeroCache, a: i64, b: i64) -> i64 {
    memoize(cache, memo_key("_add", a, b), || a + b + jitter()).await
}

async fn memoized_sub(cache: &AeroCache, a: i64, b: i64) -> i64 {
    memoize(cache, memo_key("_sub", a, b), || a - b - jitter()).await
}
