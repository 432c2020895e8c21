use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::models::{HistorySource, PriceUpdate, Product};
use crate::notifier::{NotificationKind, Notifier};
use crate::scraper::PriceScraper;
use crate::store::ProductStore;
use crate::utils::error::{AppError, Result};

/// Fired notifications at or above this count trigger a cycle summary.
const SUMMARY_NOTIFICATION_FLOOR: usize = 5;
/// Maintenance runs every Nth completed cycle.
const MAINTENANCE_EVERY: u64 = 10;
/// A store backup is requested every Nth completed cycle.
const BACKUP_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Idle,
    Checking,
}

/// Aggregate of one check cycle, logged and optionally sent as a summary
/// notification, then discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckSummary {
    pub total_checks: usize,
    pub successful_checks: usize,
    pub failed_checks: usize,
    pub notifications_sent: usize,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
}

/// Per-product result of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub product_id: String,
    pub success: bool,
    pub price: Option<f64>,
    pub notification: Option<NotificationKind>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ForceCheckReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    pub state: MonitorState,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub notifications_sent: u64,
}

/// Drives scheduled price checks: selects due products, scrapes them in
/// bounded sub-batches, persists outcomes and decides notifications.
pub struct PriceMonitor {
    store: Arc<dyn ProductStore>,
    scraper: Arc<PriceScraper>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    scheduler: Mutex<Option<JobScheduler>>,
    // At most one cycle runs at a time; re-entrant triggers are dropped.
    cycle_guard: Mutex<()>,
    state: AtomicU8,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    notifications_total: AtomicU64,
}

impl PriceMonitor {
    pub fn new(
        store: Arc<dyn ProductStore>,
        scraper: Arc<PriceScraper>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            scraper,
            notifier,
            config,
            scheduler: Mutex::new(None),
            cycle_guard: Mutex::new(()),
            state: AtomicU8::new(MonitorState::Stopped as u8),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            notifications_total: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.state.load(Ordering::Acquire) {
            0 => MonitorState::Stopped,
            1 => MonitorState::Idle,
            _ => MonitorState::Checking,
        }
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            state: self.state(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_total.load(Ordering::Relaxed),
        }
    }

    /// Register the recurring trigger and a warm-up check. No-op when the
    /// monitor is already running. Takes the `Arc` so the scheduled jobs can
    /// hold the monitor.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            debug!("monitor already running; start ignored");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await.map_err(scheduler_error)?;

        let interval = Duration::from_secs(self.config.check_interval_minutes * 60);
        let monitor = Arc::clone(&self);
        let recurring = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let monitor = Arc::clone(&monitor);
            Box::pin(async move {
                monitor.tick().await;
            })
        })
        .map_err(scheduler_error)?;
        scheduler.add(recurring).await.map_err(scheduler_error)?;

        let warmup = Duration::from_secs(self.config.warmup_delay_secs.max(1));
        let monitor = Arc::clone(&self);
        let initial = Job::new_one_shot_async(warmup, move |_uuid, _lock| {
            let monitor = Arc::clone(&monitor);
            Box::pin(async move {
                monitor.tick().await;
            })
        })
        .map_err(scheduler_error)?;
        scheduler.add(initial).await.map_err(scheduler_error)?;

        scheduler.start().await.map_err(scheduler_error)?;
        *slot = Some(scheduler);
        self.set_state(MonitorState::Idle);

        info!(
            interval_minutes = self.config.check_interval_minutes,
            warmup_secs = self.config.warmup_delay_secs,
            "price monitor started"
        );
        Ok(())
    }

    /// Cancel the schedule. An in-flight cycle is allowed to finish; no new
    /// one starts.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if let Some(mut scheduler) = slot.take() {
            scheduler.shutdown().await.map_err(scheduler_error)?;
            info!("price monitor stopped");
        }
        self.set_state(MonitorState::Stopped);
        Ok(())
    }

    async fn tick(&self) {
        match self.run_cycle().await {
            Ok(Some(_)) | Ok(None) => {}
            Err(err) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "check cycle failed; schedule continues");
            }
        }
    }

    /// Run one check cycle. Returns `None` when another cycle is already in
    /// flight (the trigger is dropped, never queued).
    pub async fn run_cycle(&self) -> Result<Option<CheckSummary>> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("check cycle already in flight; trigger dropped");
            return Ok(None);
        };

        self.set_state(MonitorState::Checking);
        let result = self.execute_check().await;

        let next = if self.scheduler.lock().await.is_some() {
            MonitorState::Idle
        } else {
            MonitorState::Stopped
        };
        self.set_state(next);

        let summary = result?;
        let completed = self.cycles_completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % MAINTENANCE_EVERY == 0 {
            self.run_maintenance(completed).await;
        }

        Ok(Some(summary))
    }

    async fn execute_check(&self) -> Result<CheckSummary> {
        let due = self
            .store
            .find_due_for_check(
                self.config.check_interval_minutes,
                self.config.max_products_per_cycle,
            )
            .await?;

        if due.is_empty() {
            debug!("no products due for check");
            return Ok(CheckSummary::default());
        }

        info!(products = due.len(), "check cycle started");

        let mut outcomes = Vec::with_capacity(due.len());
        let batches: Vec<&[Product]> = due.chunks(self.config.sub_batch_size.max(1)).collect();
        let total_batches = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let results = join_all(batch.iter().map(|product| self.check_product(product))).await;
            outcomes.extend(results);

            if index + 1 < total_batches {
                tokio::time::sleep(Duration::from_millis(self.config.sub_batch_delay_ms)).await;
            }
        }

        let summary = summarize(&outcomes);
        info!(
            total = summary.total_checks,
            succeeded = summary.successful_checks,
            failed = summary.failed_checks,
            notifications = summary.notifications_sent,
            "check cycle finished"
        );

        if summary.notifications_sent >= SUMMARY_NOTIFICATION_FLOOR {
            if let Err(err) = self.notifier.notify_summary(&summary).await {
                warn!(error = %err, "summary notification failed");
            }
        }

        Ok(summary)
    }

    /// Check one product. Every failure mode is folded into the outcome;
    /// nothing escaping this function can abort a batch or the cycle.
    pub async fn check_product(&self, product: &Product) -> CheckOutcome {
        let result = self.scraper.scrape_price(&product.url).await;

        let Some(new_price) = result.price.filter(|_| result.success) else {
            let reason = result
                .error
                .unwrap_or_else(|| "scrape failed".to_string());
            warn!(product = %product.name, error = %reason, "product check failed");
            if let Err(err) = self.store.increment_error(&product.id, &reason).await {
                warn!(product_id = %product.id, error = %err, "failed to record check error");
            }
            return CheckOutcome {
                product_id: product.id.clone(),
                success: false,
                price: None,
                notification: None,
                error: Some(reason),
            };
        };

        let update = match self.store.update_price(&product.id, new_price).await {
            Ok(update) => update,
            Err(err) => {
                warn!(product_id = %product.id, error = %err, "failed to persist price");
                return CheckOutcome {
                    product_id: product.id.clone(),
                    success: false,
                    price: Some(new_price),
                    notification: None,
                    error: Some(err.to_string()),
                };
            }
        };

        if let Err(err) = self
            .store
            .append_history(
                &product.id,
                new_price,
                update.price_change_percent,
                HistorySource::Scraping,
            )
            .await
        {
            warn!(product_id = %product.id, error = %err, "failed to append price history");
        }

        let notification = decide_notification(product, &update);
        if let Some(kind) = notification {
            self.notifications_total.fetch_add(1, Ordering::Relaxed);
            dispatch(self.notifier.as_ref(), kind, product, &update).await;
        }

        debug!(
            product = %product.name,
            price = new_price,
            change = ?update.price_change_percent,
            "product check succeeded"
        );

        CheckOutcome {
            product_id: product.id.clone(),
            success: true,
            price: Some(new_price),
            notification,
            error: None,
        }
    }

    /// Check one product, or every active product, immediately and
    /// sequentially, outside the schedule. The due filter is bypassed.
    pub async fn force_check(&self, product_id: Option<&str>) -> Result<ForceCheckReport> {
        let products = match product_id {
            Some(id) => {
                let product =
                    self.store
                        .find_by_id(id)
                        .await?
                        .ok_or_else(|| AppError::NotFound {
                            resource: format!("product {id}"),
                        })?;
                vec![product]
            }
            None => self.store.find_active().await?,
        };

        let total = products.len();
        let mut report = ForceCheckReport {
            total,
            ..Default::default()
        };

        for (index, product) in products.iter().enumerate() {
            let outcome = self.check_product(product).await;
            if outcome.success {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }

            if index + 1 < total {
                tokio::time::sleep(Duration::from_millis(self.config.force_check_delay_ms)).await;
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "forced check finished"
        );
        Ok(report)
    }

    async fn run_maintenance(&self, cycle: u64) {
        info!(cycle, "running maintenance");

        match self.store.reactivate_stale_errored().await {
            Ok(count) if count > 0 => info!(count, "reactivated stale errored products"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "reactivation sweep failed"),
        }

        match self
            .store
            .purge_history_older_than(self.config.history_retention_days)
            .await
        {
            Ok(count) if count > 0 => info!(count, "purged old history records"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "history purge failed"),
        }

        if cycle % BACKUP_EVERY == 0 {
            match self.store.backup().await {
                Ok(location) => info!(location, "store backup requested"),
                Err(err) => warn!(error = %err, "store backup failed"),
            }
        }
    }
}

/// First matching rule wins; the rest are not evaluated.
///
/// The increase threshold is intentionally double the drop threshold
/// (`promotion_threshold * 200` vs `* 100`).
pub fn decide_notification(product: &Product, update: &PriceUpdate) -> Option<NotificationKind> {
    if let (Some(target), Some(old)) = (product.target_price, update.old_price) {
        if update.new_price <= target && old > target {
            return Some(NotificationKind::TargetReached);
        }
    }

    let change = update.price_change_percent?;
    let threshold = product.promotion_threshold;

    if change <= -(threshold * 100.0) {
        return Some(NotificationKind::PriceDrop);
    }
    if change >= threshold * 200.0 {
        return Some(NotificationKind::PriceIncrease);
    }

    None
}

async fn dispatch(
    notifier: &dyn Notifier,
    kind: NotificationKind,
    product: &Product,
    update: &PriceUpdate,
) {
    let old_price = update.old_price.unwrap_or(update.new_price);
    let change = update.price_change_percent.unwrap_or(0.0);

    let delivery = match kind {
        NotificationKind::TargetReached => {
            notifier
                .notify_target_reached(product, update.new_price, old_price)
                .await
        }
        NotificationKind::PriceDrop => {
            notifier
                .notify_price_drop(product, update.new_price, old_price, change)
                .await
        }
        NotificationKind::PriceIncrease => {
            notifier
                .notify_price_increase(product, update.new_price, old_price, change)
                .await
        }
    };

    // Delivery problems (including cooldown suppression upstream) never feed
    // back into the check cycle.
    if let Err(err) = delivery {
        warn!(product = %product.name, error = %err, "notification delivery failed");
    }
}

fn summarize(outcomes: &[CheckOutcome]) -> CheckSummary {
    let prices: Vec<f64> = outcomes.iter().filter_map(|o| o.price.filter(|_| o.success)).collect();

    CheckSummary {
        total_checks: outcomes.len(),
        successful_checks: outcomes.iter().filter(|o| o.success).count(),
        failed_checks: outcomes.iter().filter(|o| !o.success).count(),
        notifications_sent: outcomes.iter().filter(|o| o.notification.is_some()).count(),
        min_price: prices.iter().copied().reduce(f64::min),
        max_price: prices.iter().copied().reduce(f64::max),
        avg_price: if prices.is_empty() {
            None
        } else {
            Some(prices.iter().sum::<f64>() / prices.len() as f64)
        },
    }
}

fn scheduler_error(err: tokio_cron_scheduler::JobSchedulerError) -> AppError {
    AppError::Scheduler(err.to_string())
}
