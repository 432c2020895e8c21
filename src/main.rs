use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use pricewatch::config::AppConfig;
use pricewatch::models::{HistorySource, NewProduct};
use pricewatch::monitor::PriceMonitor;
use pricewatch::notifier::{DiscordWebhookNotifier, LogNotifier, Notifier};
use pricewatch::scraper::PriceScraper;
use pricewatch::site_config::SiteRegistry;
use pricewatch::store::{ProductStore, SqliteProductStore};

#[derive(Parser)]
#[command(name = "pricewatch", version, about = "E-commerce price tracking and monitoring")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring service (default)
    Run,
    /// Check one product, or all active products, immediately
    Check {
        #[arg(long)]
        product: Option<String>,
    },
    /// Track a new product URL
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// List tracked products
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing: stdout plus daily-rotated file
    let file_appender = tracing_appender::rolling::daily("logs", "pricewatch.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pricewatch=debug".parse()?),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = SqliteProductStore::connect(&config.database).await?;
    SqliteProductStore::init_schema(&pool).await?;
    let store: Arc<dyn ProductStore> = Arc::new(SqliteProductStore::new(pool));

    let sites = Arc::new(SiteRegistry::new());
    let scraper = Arc::new(PriceScraper::new(&config.scraper, Arc::clone(&sites))?);

    let notifier: Arc<dyn Notifier> = if config.notifications.discord.webhook_url.is_some() {
        Arc::new(DiscordWebhookNotifier::new(&config.notifications.discord)?)
    } else {
        Arc::new(LogNotifier)
    };

    let monitor = Arc::new(PriceMonitor::new(
        Arc::clone(&store),
        Arc::clone(&scraper),
        notifier,
        config.monitor.clone(),
    ));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting pricewatch...");
            Arc::clone(&monitor).start().await?;
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            monitor.stop().await?;
        }
        Command::Check { product } => {
            let report = monitor.force_check(product.as_deref()).await?;
            println!(
                "checked {} products: {} succeeded, {} failed",
                report.total, report.succeeded, report.failed
            );
        }
        Command::Add {
            url,
            name,
            target,
            threshold,
        } => {
            // Seed the product with one immediate scrape so the name and
            // first history record are in place before the schedule runs.
            let result = scraper.scrape_price(&url).await;
            let resolved_name = name
                .or_else(|| result.name.clone())
                .unwrap_or_else(|| url.clone());

            let product = store
                .insert(NewProduct {
                    url: url.clone(),
                    name: resolved_name,
                    target_price: target,
                    promotion_threshold: threshold,
                    channel_id: None,
                    guild_id: None,
                    user_id: None,
                })
                .await?;

            match result.price {
                Some(price) => {
                    store.update_price(&product.id, price).await?;
                    store
                        .append_history(&product.id, price, None, HistorySource::Initial)
                        .await?;
                    println!("tracking \"{}\" at {price:.2}", product.name);
                }
                None => {
                    println!(
                        "tracking \"{}\" (no price found yet: {})",
                        product.name,
                        result.error.unwrap_or_default()
                    );
                }
            }
        }
        Command::List => {
            for product in store.find_active().await? {
                let current = product
                    .current_price
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                let target = product
                    .target_price
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  current={} target={} errors={}",
                    product.id, product.name, current, target, product.error_count
                );
            }
        }
    }

    Ok(())
}
