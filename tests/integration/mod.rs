// Shared test doubles and builders for the integration suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pricewatch::config::{MonitorConfig, ScraperConfig};
use pricewatch::models::{
    ERROR_DEACTIVATION_CEILING, HistorySource, NewProduct, PriceHistoryRecord, PriceUpdate, Product,
};
use pricewatch::monitor::{CheckSummary, PriceMonitor};
use pricewatch::notifier::Notifier;
use pricewatch::scraper::PriceScraper;
use pricewatch::site_config::SiteRegistry;
use pricewatch::store::ProductStore;
use pricewatch::{AppError, Result};

/// In-memory store double. Mirrors the sqlite store's semantics closely
/// enough for monitor behavior tests, and allows seeding arbitrary state.
#[derive(Default)]
pub struct MemoryStore {
    products: Mutex<HashMap<String, Product>>,
    history: Mutex<Vec<PriceHistoryRecord>>,
    backups: AtomicUsize,
    pub fail_queries: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product with arbitrary state, bypassing `insert`.
    pub fn put(&self, product: Product) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }

    pub fn get(&self, id: &str) -> Option<Product> {
        self.products.lock().unwrap().get(id).cloned()
    }

    pub fn history_for(&self, product_id: &str) -> Vec<PriceHistoryRecord> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect()
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::Relaxed) {
            return Err(AppError::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert(&self, new_product: NewProduct) -> Result<Product> {
        let product = Product::new(new_product);
        self.put(product.clone());
        Ok(product)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Product>> {
        self.check_failure()?;
        Ok(self.get(id))
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<Product>> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .find(|p| p.url == url)
            .cloned())
    }

    async fn find_active(&self) -> Result<Vec<Product>> {
        self.check_failure()?;
        let mut active: Vec<Product> = self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn find_due_for_check(
        &self,
        interval_minutes: u64,
        max_count: u32,
    ) -> Result<Vec<Product>> {
        self.check_failure()?;
        let now = Utc::now();
        let mut due: Vec<Product> = self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_due(interval_minutes, now))
            .cloned()
            .collect();
        // Most overdue first; never-checked products lead
        due.sort_by_key(|p| (p.last_checked_at.is_some(), p.last_checked_at));
        due.truncate(max_count as usize);
        Ok(due)
    }

    async fn update_price(&self, id: &str, new_price: f64) -> Result<PriceUpdate> {
        let mut products = self.products.lock().unwrap();
        let product = products.get_mut(id).ok_or_else(|| AppError::NotFound {
            resource: format!("product {id}"),
        })?;

        let update = PriceUpdate::compute(product.current_price, new_price);
        product.last_price = product.current_price;
        product.current_price = Some(new_price);
        product.last_checked_at = Some(Utc::now());
        product.check_count += 1;
        product.error_count = 0;
        product.last_error = None;
        product.updated_at = Utc::now();

        Ok(update)
    }

    async fn increment_error(&self, id: &str, message: &str) -> Result<()> {
        let mut products = self.products.lock().unwrap();
        let product = products.get_mut(id).ok_or_else(|| AppError::NotFound {
            resource: format!("product {id}"),
        })?;

        product.error_count += 1;
        product.last_error = Some(message.to_string());
        product.last_checked_at = Some(Utc::now());
        product.updated_at = Utc::now();
        if product.error_count >= ERROR_DEACTIVATION_CEILING {
            product.is_active = false;
        }

        Ok(())
    }

    async fn reactivate_stale_errored(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let mut count = 0;

        for product in self.products.lock().unwrap().values_mut() {
            let stale = product
                .last_checked_at
                .is_some_and(|checked| checked <= cutoff);
            if !product.is_active && product.error_count >= ERROR_DEACTIVATION_CEILING && stale {
                product.is_active = true;
                product.error_count = 0;
                product.last_error = None;
                count += 1;
            }
        }

        Ok(count)
    }

    async fn append_history(
        &self,
        product_id: &str,
        price: f64,
        change_percent: Option<f64>,
        source: HistorySource,
    ) -> Result<()> {
        self.history.lock().unwrap().push(PriceHistoryRecord::new(
            product_id.to_string(),
            price,
            change_percent,
            source,
        ));
        Ok(())
    }

    async fn recent_history(
        &self,
        product_id: &str,
        limit: u32,
    ) -> Result<Vec<PriceHistoryRecord>> {
        let mut records = self.history_for(product_id);
        records.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn purge_history_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut history = self.history.lock().unwrap();
        let before = history.len();
        history.retain(|r| r.checked_at >= cutoff);
        Ok((before - history.len()) as u64)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut products = self.products.lock().unwrap();
        let product = products.get_mut(id).ok_or_else(|| AppError::NotFound {
            resource: format!("product {id}"),
        })?;
        product.is_active = active;
        product.error_count = 0;
        product.last_error = None;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.products.lock().unwrap().remove(id).is_some())
    }

    async fn backup(&self) -> Result<String> {
        let n = self.backups.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("memory://backup-{n}"))
    }
}

/// Records every delivery instead of sending it anywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    TargetReached {
        product_id: String,
        new_price: f64,
        old_price: f64,
    },
    PriceDrop {
        product_id: String,
        change_percent: f64,
    },
    PriceIncrease {
        product_id: String,
        change_percent: f64,
    },
    Summary {
        notifications: usize,
    },
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_target_reached(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
    ) -> Result<()> {
        self.record(NotificationEvent::TargetReached {
            product_id: product.id.clone(),
            new_price,
            old_price,
        });
        Ok(())
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        _new_price: f64,
        _old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        self.record(NotificationEvent::PriceDrop {
            product_id: product.id.clone(),
            change_percent,
        });
        Ok(())
    }

    async fn notify_price_increase(
        &self,
        product: &Product,
        _new_price: f64,
        _old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        self.record(NotificationEvent::PriceIncrease {
            product_id: product.id.clone(),
            change_percent,
        });
        Ok(())
    }

    async fn notify_summary(&self, summary: &CheckSummary) -> Result<()> {
        self.record(NotificationEvent::Summary {
            notifications: summary.notifications_sent,
        });
        Ok(())
    }
}

pub fn scraper_config() -> ScraperConfig {
    ScraperConfig {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) TestAgent/1.0".to_string(),
        request_timeout_secs: 5,
        max_redirects: 5,
        retry_attempts: 1,
        retry_base_delay_ms: 1,
        batch_size: 3,
        batch_delay_ms: 10,
    }
}

pub fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        check_interval_minutes: 30,
        warmup_delay_secs: 60,
        max_products_per_cycle: 50,
        sub_batch_size: 5,
        sub_batch_delay_ms: 10,
        force_check_delay_ms: 1,
        history_retention_days: 90,
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub monitor: Arc<PriceMonitor>,
}

pub fn build_harness(monitor_config_override: Option<MonitorConfig>) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let scraper = Arc::new(
        PriceScraper::new(&scraper_config(), Arc::new(SiteRegistry::new()))
            .expect("scraper construction"),
    );

    let monitor = Arc::new(PriceMonitor::new(
        Arc::clone(&store) as Arc<dyn ProductStore>,
        scraper,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        monitor_config_override.unwrap_or_else(monitor_config),
    ));

    TestHarness {
        store,
        notifier,
        monitor,
    }
}

/// A product pointing at a mock server path, seeded with the given state.
pub fn product_at(
    base_uri: &str,
    path: &str,
    current_price: Option<f64>,
    target_price: Option<f64>,
    promotion_threshold: f64,
) -> Product {
    let mut product = Product::new(NewProduct {
        url: format!("{base_uri}{path}"),
        name: format!("Produto {path}"),
        target_price,
        promotion_threshold: Some(promotion_threshold),
        channel_id: None,
        guild_id: None,
        user_id: None,
    });
    product.current_price = current_price;
    product
}

pub fn price_page(price: &str) -> String {
    format!(r#"<html><body><span class="price">{price}</span></body></html>"#)
}
