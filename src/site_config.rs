use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Per-domain extraction overrides. Selectors are tried in order, before the
/// generic cascade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub price_selectors: Vec<String>,
    pub name_selectors: Vec<String>,
    pub currency: String,
    pub wait_time_ms: u64,
}

impl SiteConfig {
    pub fn new(price_selectors: &[&str], name_selectors: &[&str], currency: &str) -> Self {
        Self {
            price_selectors: price_selectors.iter().map(|s| s.to_string()).collect(),
            name_selectors: name_selectors.iter().map(|s| s.to_string()).collect(),
            currency: currency.to_string(),
            wait_time_ms: 1000,
        }
    }
}

/// Domain-keyed site configuration, mutable at runtime without restarting the
/// scraper. Lookups clone the config out; the lock is never held across await
/// points.
pub struct SiteRegistry {
    sites: RwLock<HashMap<String, SiteConfig>>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteRegistry {
    pub fn new() -> Self {
        let mut sites = HashMap::new();

        sites.insert(
            "amazon.com.br".to_string(),
            SiteConfig::new(
                &[
                    ".a-price-whole",
                    ".a-price .a-offscreen",
                    "#priceblock_ourprice",
                    "#priceblock_dealprice",
                ],
                &["#productTitle", "#title"],
                "BRL",
            ),
        );
        sites.insert(
            "mercadolivre.com.br".to_string(),
            SiteConfig::new(
                &[
                    ".andes-money-amount__fraction",
                    ".price-tag-fraction",
                    ".ui-pdp-price__second-line .andes-money-amount",
                ],
                &[".ui-pdp-title"],
                "BRL",
            ),
        );
        sites.insert(
            "magazineluiza.com.br".to_string(),
            SiteConfig::new(
                &[
                    "[data-testid=\"price-value\"]",
                    ".price-template__text",
                    ".price-value",
                ],
                &["[data-testid=\"heading-product-title\"]", ".header-product__title"],
                "BRL",
            ),
        );
        sites.insert(
            "americanas.com.br".to_string(),
            SiteConfig::new(
                &[".priceSales", "[class*=\"PriceUI\"]", ".sales-price"],
                &[".product-title", "h1[class*=\"Title\"]"],
                "BRL",
            ),
        );
        sites.insert(
            "kabum.com.br".to_string(),
            SiteConfig::new(
                &[".finalPrice", "h4[class*=\"finalPrice\"]", ".priceCard"],
                &["h1[class*=\"nameCard\"]", ".sc-fdfabab6-6"],
                "BRL",
            ),
        );
        sites.insert(
            "casasbahia.com.br".to_string(),
            SiteConfig::new(
                &["#product-price", "[data-testid=\"price-value\"]", ".product-price-value"],
                &["[data-testid=\"product-title\"]", "h1.product-title"],
                "BRL",
            ),
        );
        sites.insert(
            "aliexpress.com".to_string(),
            SiteConfig::new(
                &[".product-price-value", ".uniform-banner-box-price"],
                &["h1[data-pl=\"product-title\"]", ".product-title-text"],
                "USD",
            ),
        );

        Self {
            sites: RwLock::new(sites),
        }
    }

    /// Exact-domain lookup.
    pub fn get(&self, domain: &str) -> Option<SiteConfig> {
        self.sites.read().unwrap().get(domain).cloned()
    }

    /// Lookup that also matches subdomains of a configured domain
    /// (`produto.amazon.com.br` resolves to `amazon.com.br`).
    pub fn resolve(&self, domain: &str) -> Option<SiteConfig> {
        let sites = self.sites.read().unwrap();
        if let Some(config) = sites.get(domain) {
            return Some(config.clone());
        }
        sites
            .iter()
            .find(|(known, _)| domain.ends_with(&format!(".{known}")))
            .map(|(_, config)| config.clone())
    }

    pub fn upsert(&self, domain: &str, config: SiteConfig) {
        self.sites
            .write()
            .unwrap()
            .insert(domain.to_string(), config);
    }

    pub fn remove(&self, domain: &str) -> bool {
        self.sites.write().unwrap().remove(domain).is_some()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.sites.read().unwrap().contains_key(domain)
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.sites.read().unwrap().keys().cloned().collect();
        domains.sort();
        domains
    }
}
