use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::DiscordConfig;
use crate::models::Product;
use crate::monitor::CheckSummary;
use crate::utils::error::{AppError, Result};

/// Which rule fired for a product check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TargetReached,
    PriceDrop,
    PriceIncrease,
}

/// Delivery contract consumed by the monitor. Calls are fire-and-forget from
/// the monitor's perspective; cooldown suppression happens behind this trait
/// and is not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_target_reached(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
    ) -> Result<()>;

    async fn notify_price_drop(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()>;

    async fn notify_price_increase(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()>;

    async fn notify_summary(&self, summary: &CheckSummary) -> Result<()>;
}

/// Posts rich embeds to a Discord webhook.
pub struct DiscordWebhookNotifier {
    client: Client,
    webhook_url: String,
    username: String,
    avatar_url: Option<String>,
}

impl DiscordWebhookNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let webhook_url = config
            .webhook_url
            .clone()
            .ok_or_else(|| AppError::Validation("Discord webhook_url is not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            webhook_url,
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn embed_color(kind: NotificationKind) -> u32 {
        match kind {
            NotificationKind::TargetReached => 0xffd700, // Gold for hitting the target
            NotificationKind::PriceDrop => 0x00ff00,     // Green for price drops
            NotificationKind::PriceIncrease => 0xff9900, // Orange for price increases
        }
    }

    fn emoji(kind: NotificationKind) -> &'static str {
        match kind {
            NotificationKind::TargetReached => "🎯",
            NotificationKind::PriceDrop => "📉",
            NotificationKind::PriceIncrease => "📈",
        }
    }

    fn price_embed(
        &self,
        kind: NotificationKind,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: Option<f64>,
    ) -> serde_json::Value {
        let title = match kind {
            NotificationKind::TargetReached => "Target price reached!",
            NotificationKind::PriceDrop => "Price drop!",
            NotificationKind::PriceIncrease => "Price increase",
        };

        let mut value = format!("**Old:** {old_price:.2}\n**New:** {new_price:.2}");
        if let Some(change) = change_percent {
            value.push_str(&format!("\n**Change:** {change:+.1}%"));
        }
        if let Some(target) = product.target_price {
            value.push_str(&format!("\n**Target:** {target:.2}"));
        }

        json!({
            "title": format!("{} {}", Self::emoji(kind), product.name),
            "url": product.url,
            "color": Self::embed_color(kind),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "fields": [{
                "name": title,
                "value": value,
                "inline": false
            }]
        })
    }

    async fn execute(&self, embed: serde_json::Value) -> Result<()> {
        let mut payload = json!({
            "username": self.username,
            "embeds": [embed]
        });
        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Discord webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn notify_target_reached(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
    ) -> Result<()> {
        let embed =
            self.price_embed(NotificationKind::TargetReached, product, new_price, old_price, None);
        self.execute(embed).await
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        let embed = self.price_embed(
            NotificationKind::PriceDrop,
            product,
            new_price,
            old_price,
            Some(change_percent),
        );
        self.execute(embed).await
    }

    async fn notify_price_increase(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        let embed = self.price_embed(
            NotificationKind::PriceIncrease,
            product,
            new_price,
            old_price,
            Some(change_percent),
        );
        self.execute(embed).await
    }

    async fn notify_summary(&self, summary: &CheckSummary) -> Result<()> {
        let embed = json!({
            "title": "📊 Check cycle summary",
            "color": 0x0099ff,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "fields": [{
                "name": "Results",
                "value": format!(
                    "**Checked:** {}\n**Succeeded:** {}\n**Failed:** {}\n**Notifications:** {}",
                    summary.total_checks,
                    summary.successful_checks,
                    summary.failed_checks,
                    summary.notifications_sent
                ),
                "inline": false
            }]
        });
        self.execute(embed).await
    }
}

/// Fallback notifier used when no webhook is configured: events land in the
/// structured log instead of being dropped silently.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_target_reached(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
    ) -> Result<()> {
        info!(
            product = %product.name,
            url = %product.url,
            old_price,
            new_price,
            "target price reached"
        );
        Ok(())
    }

    async fn notify_price_drop(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        info!(
            product = %product.name,
            url = %product.url,
            old_price,
            new_price,
            change_percent,
            "price drop"
        );
        Ok(())
    }

    async fn notify_price_increase(
        &self,
        product: &Product,
        new_price: f64,
        old_price: f64,
        change_percent: f64,
    ) -> Result<()> {
        warn!(
            product = %product.name,
            url = %product.url,
            old_price,
            new_price,
            change_percent,
            "price increase"
        );
        Ok(())
    }

    async fn notify_summary(&self, summary: &CheckSummary) -> Result<()> {
        info!(
            total = summary.total_checks,
            succeeded = summary.successful_checks,
            failed = summary.failed_checks,
            notifications = summary.notifications_sent,
            "check cycle summary"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewProduct;

    fn sample_product() -> Product {
        Product::new(NewProduct {
            url: "https://loja.com/p/1".to_string(),
            name: "Produto".to_string(),
            target_price: Some(100.0),
            promotion_threshold: None,
            channel_id: None,
            guild_id: None,
            user_id: None,
        })
    }

    #[test]
    fn test_new_requires_webhook_url() {
        let config = DiscordConfig {
            webhook_url: None,
            username: "PriceWatch".to_string(),
            avatar_url: None,
        };
        assert!(DiscordWebhookNotifier::new(&config).is_err());
    }

    #[test]
    fn test_embed_contents() {
        let config = DiscordConfig {
            webhook_url: Some("https://discord.com/api/webhooks/1/t".to_string()),
            username: "PriceWatch".to_string(),
            avatar_url: None,
        };
        let notifier = DiscordWebhookNotifier::new(&config).unwrap();
        let product = sample_product();

        let embed = notifier.price_embed(
            NotificationKind::PriceDrop,
            &product,
            90.0,
            120.0,
            Some(-25.0),
        );

        assert_eq!(embed["url"], product.url);
        assert_eq!(embed["color"], 0x00ff00);
        let value = embed["fields"][0]["value"].as_str().unwrap();
        assert!(value.contains("**Old:** 120.00"));
        assert!(value.contains("**New:** 90.00"));
        assert!(value.contains("-25.0%"));
        assert!(value.contains("**Target:** 100.00"));
    }

    #[test]
    fn test_embed_colors_distinguish_kinds() {
        assert_ne!(
            DiscordWebhookNotifier::embed_color(NotificationKind::TargetReached),
            DiscordWebhookNotifier::embed_color(NotificationKind::PriceDrop)
        );
        assert_ne!(
            DiscordWebhookNotifier::embed_color(NotificationKind::PriceDrop),
            DiscordWebhookNotifier::embed_color(NotificationKind::PriceIncrease)
        );
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let product = sample_product();
        let notifier = LogNotifier;

        assert!(
            notifier
                .notify_target_reached(&product, 95.0, 120.0)
                .await
                .is_ok()
        );
        assert!(
            notifier
                .notify_price_drop(&product, 90.0, 120.0, -25.0)
                .await
                .is_ok()
        );
    }
}
