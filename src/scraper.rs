use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use crate::config::ScraperConfig;
use crate::fetcher::PageFetcher;
use crate::price_parser::PriceParser;
use crate::site_config::{SiteConfig, SiteRegistry};

/// Query parameters stripped when building the canonical URL. `utm_*` is
/// matched by prefix on top of this list.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "ref", "ref_", "tag", "igshid", "mc_cid", "mc_eid", "srsltid",
];

/// Domain fragments that suggest an e-commerce site we have no explicit
/// configuration for.
const COMMERCE_KEYWORDS: &[&str] = &["shop", "store", "loja", "mercado", "magazine", "outlet", "market"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    pub domain: String,
    pub success: bool,
    pub price: Option<f64>,
    pub name: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ScrapeResult {
    fn failure(url: &str, domain: &str, error: impl Into<String>, started: Instant) -> Self {
        Self {
            url: url.to_string(),
            domain: domain.to_string(),
            success: false,
            price: None,
            name: None,
            error: Some(error.into()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// How confident we are that a URL points at a site we can extract from.
/// Advisory only; scraping is never refused on the basis of this value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteSupport {
    High,
    Medium,
    Low,
    None,
}

pub struct PriceScraper {
    fetcher: PageFetcher,
    parser: PriceParser,
    sites: Arc<SiteRegistry>,
    batch_size: usize,
    batch_delay_ms: u64,
}

impl PriceScraper {
    pub fn new(config: &ScraperConfig, sites: Arc<SiteRegistry>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            fetcher: PageFetcher::new(config)?,
            parser: PriceParser::new(),
            sites,
            batch_size: config.batch_size,
            batch_delay_ms: config.batch_delay_ms,
        })
    }

    /// Scrape one product page. Never returns an error: every failure mode is
    /// folded into the result so batch callers get all-settled semantics.
    pub async fn scrape_price(&self, url: &str) -> ScrapeResult {
        let started = Instant::now();

        let parsed = match validate_url(url) {
            Ok(parsed) => parsed,
            Err(reason) => return ScrapeResult::failure(url, "", reason, started),
        };
        let domain = domain_of(&parsed);
        let canonical = canonical_url(&parsed);

        debug!(url, domain = %domain, "scraping product page");

        // The original target is fetched; the canonical form is only the
        // dedupe/display key.
        let body = match self.fetcher.fetch(url).await {
            Ok(body) => body,
            Err(err) => return ScrapeResult::failure(&canonical, &domain, err.to_string(), started),
        };

        let site = self.sites.resolve(&domain);
        let (price, name) = self.extract(&body, site.as_ref());

        match price {
            Some(price) => ScrapeResult {
                url: canonical,
                domain,
                success: true,
                price: Some(price),
                name,
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            None => ScrapeResult::failure(
                &canonical,
                &domain,
                "page fetched but no price could be extracted",
                started,
            ),
        }
    }

    // Parsed document stays inside this synchronous scope; `Html` is not
    // Send and must not live across an await.
    fn extract(&self, body: &str, site: Option<&SiteConfig>) -> (Option<f64>, Option<String>) {
        let document = Html::parse_document(body);
        let price = self.parser.extract_price(&document, site);
        let name = self.parser.extract_product_name(&document, site);
        (price, name)
    }

    /// Scrape URLs in fixed-size groups. Each group runs fully in parallel;
    /// groups are separated by the configured delay (never applied after the
    /// last one). One URL failing never aborts its group.
    pub async fn scrape_batch(&self, urls: &[String]) -> Vec<ScrapeResult> {
        let mut results = Vec::with_capacity(urls.len());
        let groups: Vec<&[String]> = urls.chunks(self.batch_size.max(1)).collect();
        let total_groups = groups.len();

        for (index, group) in groups.into_iter().enumerate() {
            let outcomes =
                futures::future::join_all(group.iter().map(|url| self.scrape_price(url))).await;
            results.extend(outcomes);

            info!(
                group = index + 1,
                total_groups,
                scraped = results.len(),
                remaining = urls.len() - results.len(),
                "scrape batch progress"
            );

            if index + 1 < total_groups {
                tokio::time::sleep(Duration::from_millis(self.batch_delay_ms)).await;
            }
        }

        results
    }

    /// Classify how well a site is supported: exact domain config, subdomain
    /// or brand match, generic e-commerce keyword, or nothing.
    pub fn site_support(&self, url: &str) -> SiteSupport {
        let Ok(parsed) = validate_url(url) else {
            return SiteSupport::None;
        };
        let domain = domain_of(&parsed);

        if self.sites.contains(&domain) {
            return SiteSupport::High;
        }

        if self.sites.resolve(&domain).is_some() || self.brand_match(&domain) {
            return SiteSupport::Medium;
        }

        if COMMERCE_KEYWORDS
            .iter()
            .any(|keyword| domain.contains(keyword))
        {
            return SiteSupport::Low;
        }

        SiteSupport::None
    }

    // A configured `amazon.com.br` makes `amazon.de` a partial match.
    fn brand_match(&self, domain: &str) -> bool {
        self.sites.domains().iter().any(|known| {
            known
                .split('.')
                .next()
                .is_some_and(|brand| domain.split('.').any(|label| label == brand))
        })
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!("unsupported URL scheme: {scheme}")),
    }
}

/// Host without a leading `www.`; selects the site-specific extraction config.
pub fn domain_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// Canonical dedupe/display form: tracking parameters and fragment removed.
pub fn canonical_url(url: &Url) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut cleaned = url.clone();
    cleaned.set_fragment(None);
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        let mut pairs = cleaned.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
        drop(pairs);
    }

    cleaned.to_string()
}

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}
