use bridge_rs::api::ApiServer;
use bridge_rs::clients::{FixedClients, MemorySource, MemoryTarget, SourceRecord};
use bridge_rs::config::{Config, StorageBackend};
use bridge_rs::migration::EntityKind;
use bridge_rs::storage::open_store;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A bridge-server running in-process against in-memory stores and a
/// SQLite wizard database in a temporary directory
pub struct TestEnv {
    pub base_url: String,
    pub source_key: String,
    pub target_key: String,
    pub target: Arc<MemoryTarget>,
    source: Arc<MemorySource>,
    config: Config,
    server: JoinHandle<()>,
    _data_dir: TempDir,
}

impl TestEnv {
    /// Start a server backed by `source`
    pub async fn start(source: MemorySource) -> Result<Self, String> {
        let data_dir = tempfile::tempdir().map_err(|e| format!("Failed to create temp dir: {}", e))?;

        let mut config = Config::default();
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.database_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.path().join("bridge.db").display()
        );
        config.migration.batch_size = 3;
        config.throttle.base_backoff_ms = 1;

        let source = Arc::new(source);
        let target = Arc::new(MemoryTarget::new());
        let (base_url, server) = spawn_server(&config, source.clone(), target.clone()).await?;

        let test_id = generate_test_id();
        let env = Self {
            base_url,
            source_key: format!("shop-{}.example.com", test_id),
            target_key: format!("store-{}", test_id),
            target,
            source,
            config,
            server,
            _data_dir: data_dir,
        };
        env.wait_for_service(10).await?;
        Ok(env)
    }

    /// Stop the server and start a fresh one on the same database
    pub async fn restart(&mut self) -> Result<(), String> {
        self.server.abort();
        let (base_url, server) =
            spawn_server(&self.config, self.source.clone(), self.target.clone()).await?;
        self.base_url = base_url;
        self.server = server;
        self.wait_for_service(10).await
    }

    /// Wait for the health endpoint to answer
    pub async fn wait_for_service(&self, timeout_secs: u64) -> Result<(), String> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.base_url);
        let start = std::time::Instant::now();

        loop {
            if start.elapsed().as_secs() > timeout_secs {
                return Err(format!("Timeout waiting for service: {}", url));
            }

            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                _ => sleep(Duration::from_millis(50)).await,
            }
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn spawn_server(
    config: &Config,
    source: Arc<MemorySource>,
    target: Arc<MemoryTarget>,
) -> Result<(String, JoinHandle<()>), String> {
    let store = open_store(config)
        .await
        .map_err(|e| format!("Failed to open wizard store: {}", e))?;
    let clients = Arc::new(FixedClients { source, target });
    let server = ApiServer::new(config.clone(), store, clients);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind: {}", e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read local address: {}", e))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            eprintln!("bridge-server stopped: {}", e);
        }
    });

    Ok((format!("http://{}", addr), handle))
}

/// A small WooCommerce catalogue: two category levels, products,
/// customers, orders (one guest) and coupons
pub fn sample_store() -> MemorySource {
    let categories = vec![
        SourceRecord::new(10, json!({"id": 10, "name": "Clothing", "parent": 0})),
        SourceRecord::new(11, json!({"id": 11, "name": "Hoodies", "parent": 10})),
        SourceRecord::new(12, json!({"id": 12, "name": "Accessories", "parent": 0})),
    ];

    let products = (1..=6)
        .map(|id| {
            let category = if id % 2 == 0 { 11 } else { 12 };
            SourceRecord::new(
                id,
                json!({
                    "id": id,
                    "name": format!("Product {}", id),
                    "sku": format!("woo-{}", id),
                    "regular_price": "25.00",
                    "sale_price": if id == 1 { "20.00" } else { "" },
                    "status": "publish",
                    "categories": [{"id": category}],
                }),
            )
        })
        .collect();

    let customers = (1..=10)
        .map(|id| {
            SourceRecord::new(
                id,
                json!({
                    "id": id,
                    "email": format!("customer{}@example.com", id),
                    "first_name": "Customer",
                    "last_name": id.to_string(),
                }),
            )
        })
        .collect();

    let orders = vec![
        SourceRecord::new(
            500,
            json!({
                "id": 500,
                "customer_id": 1,
                "status": "completed",
                "line_items": [{"product_id": 2, "quantity": 1, "price": "25.00"}],
            }),
        ),
        SourceRecord::new(
            501,
            json!({
                "id": 501,
                "customer_id": 0,
                "status": "on-hold",
                "line_items": [{"product_id": 3, "quantity": 2, "price": "25.00"}],
            }),
        ),
    ];

    let coupons = vec![
        SourceRecord::new(
            900,
            json!({"id": 900, "code": "WELCOME10", "discount_type": "percent", "amount": "10"}),
        ),
        SourceRecord::new(
            901,
            json!({"id": 901, "code": "FIVEOFF", "discount_type": "fixed_cart", "amount": "5"}),
        ),
    ];

    MemorySource::new()
        .with_records(EntityKind::Categories, categories)
        .with_records(EntityKind::Products, products)
        .with_records(EntityKind::Customers, customers)
        .with_records(EntityKind::Orders, orders)
        .with_records(EntityKind::Coupons, coupons)
}

/// Test result helper
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}

/// Unique suffix for store keys
pub fn generate_test_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("test_{}", timestamp)
}
