//! # Seed Data Generator
//!
//! Fills a document collection with generated catalog items through the
//! batched store, for development and rough throughput checks.
//!
//! ## Usage
//! ```bash
//! # Generate 5,000 items (default)
//! cargo run -p repokit-db --bin seed
//!
//! # Generate custom amount into a given database
//! cargo run -p repokit-db --bin seed -- --count 20000 --db ./data/dev.db
//!
//! # Use a config file (REPOKIT_* variables still override it)
//! cargo run -p repokit-db --bin seed -- --config ./repokit.toml
//!
//! # More detail
//! RUST_LOG=debug cargo run -p repokit-db --bin seed
//! ```

use repokit_core::{EnumerableContext, Key, ObjectContext, Repository, UpdateType};
use repokit_db::{Database, RepokitConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const COLLECTION: &str = "catalog";

/// Item families and names for generated data.
const FAMILIES: &[(&str, &[&str])] = &[
    ("TEA", &["Assam", "Darjeeling", "Sencha", "Rooibos", "Earl Grey"]),
    ("BRD", &["Sourdough", "Rye", "Baguette", "Brioche", "Focaccia"]),
    ("CHS", &["Comte", "Gouda", "Stilton", "Manchego", "Halloumi"]),
    ("OIL", &["Olive", "Sesame", "Walnut", "Rapeseed", "Avocado"]),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogItem {
    id: i64,
    sku: String,
    name: String,
    price_cents: i64,
    stock: Stock,
    tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stock {
    on_hand: i64,
    reorder_at: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,repokit=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut count: usize = 5000;
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if let Some(value) = args.get(i + 1) {
                    count = value.parse().unwrap_or(count);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if let Some(value) = args.get(i + 1) {
                    db_path = Some(PathBuf::from(value));
                    i += 1;
                }
            }
            "--config" => {
                if let Some(value) = args.get(i + 1) {
                    config_path = Some(PathBuf::from(value));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("repokit seed data generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>      Items to generate (default: 5000)");
                println!("  -d, --db <PATH>      Database file path (default: from config)");
                println!("      --config <PATH>  TOML config file");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = RepokitConfig::load(config_path.as_deref())?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    info!(
        path = %config.database.path.display(),
        count,
        batch_size = config.repository.batch_size,
        "Seeding catalog"
    );

    let db = Database::new(config.db_config()).await?;
    let catalog = db
        .documents(COLLECTION, |item: &CatalogItem| Key::from(item.id))?
        .with_options(config.repository_options())?;

    let existing = catalog.count().await?;
    if existing > 0 {
        warn!(existing, "Collection already has items, skipping seed");
        return Ok(());
    }

    let items: Vec<CatalogItem> = (0..count).map(generate_item).collect();

    let start = Instant::now();
    let report = match catalog.store_all(items).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Seeding failed");
            return Err(e.into());
        }
    };
    let elapsed = start.elapsed();

    info!(
        stored = report.stored,
        chunks = report.chunks,
        elapsed_ms = elapsed.as_millis() as u64,
        rate = %format!("{:.0}/s", report.stored as f64 / elapsed.as_secs_f64().max(f64::EPSILON)),
        "Batch store complete"
    );

    // Exercise a path update and a read-back on the first item
    if count > 0 {
        let key = Key::from(0);
        catalog
            .update_path("stock.on_hand", "0", UpdateType::Set, &key)
            .await?;

        let ctx = catalog.find(&key).await?;
        if let Some(item) = ctx.object() {
            info!(sku = %item.sku, on_hand = item.stock.on_hand, "Verified path update");
        }
        ctx.release().await?;
    }

    let mut cursor = catalog.items().await?;
    let low_stock = cursor
        .collect_remaining()
        .await?
        .iter()
        .filter(|item| item.stock.on_hand <= item.stock.reorder_at)
        .count();
    cursor.release().await?;

    info!(total = catalog.count().await?, low_stock, "Seed complete");

    db.close().await;
    Ok(())
}

/// Generates one catalog item; `seed` drives every field.
fn generate_item(seed: usize) -> CatalogItem {
    let (family, names) = FAMILIES[seed % FAMILIES.len()];
    let name = names[(seed / FAMILIES.len()) % names.len()];

    CatalogItem {
        id: seed as i64,
        sku: format!("{}-{:06}", family, seed),
        name: format!("{} #{}", name, seed),
        price_cents: 199 + ((seed * 37) % 2800) as i64,
        stock: Stock {
            on_hand: (seed % 120) as i64,
            reorder_at: 10,
        },
        tags: vec![family.to_lowercase(), format!("batch-{}", seed / 1000)],
    }
}
