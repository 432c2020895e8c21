use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;

use crate::site_config::SiteConfig;

/// Attributes inspected, in order, when an element's text does not parse.
const VALUE_ATTRIBUTES: &[&str] = &["data-price", "value", "content", "title"];

/// Common price containers across e-commerce storefronts, tried after any
/// site-specific selectors.
const GENERIC_PRICE_SELECTORS: &[&str] = &[
    ".price",
    ".product-price",
    ".sales-price",
    ".price-current",
    ".current-price",
    ".price-value",
    ".best-price",
    ".preco",
    ".preco-promocional",
    "[itemprop=\"price\"]",
    "[data-price]",
    ".a-price .a-offscreen",
    ".andes-money-amount__fraction",
    ".product-price-value",
    "span.price",
    "#price",
];

const GENERIC_NAME_SELECTORS: &[&str] = &[
    "h1",
    ".product-title",
    ".product-name",
    "#productTitle",
    "[itemprop=\"name\"]",
    "meta[property=\"og:title\"]",
];

const MAX_NAME_LENGTH: usize = 200;
const TRUNCATED_NAME_LENGTH: usize = 150;

/// Numeric formats recognized by `parse_price`, tried in order. The first
/// structural match wins; no alternate interpretation is attempted afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocaleFormat {
    /// `1.234,56`: dot thousands, comma decimal
    Brazilian,
    /// `1,234.56` or `1234.56`: comma thousands, dot decimal
    UsDecimal,
    /// `1234,56`: comma decimal without thousands separator
    CommaDecimal,
    /// `1234`
    Integer,
}

/// One step of the extraction cascade.
enum PriceStrategy<'a> {
    /// CSS selector; element text is inspected first, then `VALUE_ATTRIBUTES`.
    Selector(&'a str),
    /// Regex scanned against the serialized markup; capture group 1 is the
    /// candidate.
    Pattern(&'a Regex),
}

pub struct PriceParser {
    locale_patterns: Vec<(LocaleFormat, Regex)>,
    markup_patterns: Vec<Regex>,
}

impl Default for PriceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceParser {
    pub fn new() -> Self {
        let locale_patterns = vec![
            (
                LocaleFormat::Brazilian,
                Regex::new(r"^\d+(?:\.\d{3})+,\d{2}$").unwrap(),
            ),
            (
                LocaleFormat::UsDecimal,
                Regex::new(r"^\d+(?:,\d{3})*\.\d{2}$").unwrap(),
            ),
            (
                LocaleFormat::CommaDecimal,
                Regex::new(r"^\d+,\d{1,2}$").unwrap(),
            ),
            (LocaleFormat::Integer, Regex::new(r"^\d+$").unwrap()),
        ];

        // JSON-embedded price fields and currency-prefixed amounts, scanned
        // against raw markup when no selector produced a value.
        let markup_patterns = vec![
            Regex::new(r#""price"\s*:\s*"?([\d.,]+)"?"#).unwrap(),
            Regex::new(r#""amount"\s*:\s*"?([\d.,]+)"?"#).unwrap(),
            Regex::new(r#""lowPrice"\s*:\s*"?([\d.,]+)"?"#).unwrap(),
            Regex::new(r#""salePrice"\s*:\s*"?([\d.,]+)"?"#).unwrap(),
            Regex::new(r"R\$\s*([\d.,]+)").unwrap(),
        ];

        Self {
            locale_patterns,
            markup_patterns,
        }
    }

    /// Parse locale-ambiguous price text into a numeric value.
    ///
    /// Strips everything except digits, separators and a sign, then tries the
    /// known formats in order. A leading minus survives the stripping so
    /// negative amounts are rejected instead of being read as positive.
    pub fn parse_price(&self, text: &str) -> Option<f64> {
        let cleaned: String = text
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
            .collect();

        if cleaned.is_empty() {
            return None;
        }

        for (format, pattern) in &self.locale_patterns {
            if pattern.is_match(&cleaned) {
                let normalized = match format {
                    LocaleFormat::Brazilian => cleaned.replace('.', "").replace(',', "."),
                    LocaleFormat::UsDecimal => cleaned.replace(',', ""),
                    LocaleFormat::CommaDecimal => cleaned.replace(',', "."),
                    LocaleFormat::Integer => cleaned.clone(),
                };
                return Decimal::from_str(&normalized)
                    .ok()
                    .and_then(|d| d.to_f64())
                    .filter(|v| *v > 0.0);
            }
        }

        // Last resort: direct parse with comma treated as decimal point,
        // bounded to plausible price magnitudes.
        cleaned
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|v| *v > 0.0 && *v < 1_000_000.0)
    }

    /// Extract a price from a parsed document: site-specific selectors, then
    /// the generic selector list, then markup regex patterns. First hit wins.
    pub fn extract_price(&self, document: &Html, site: Option<&SiteConfig>) -> Option<f64> {
        let site_selectors = site.map(|s| s.price_selectors.as_slice()).unwrap_or(&[]);

        for selector in site_selectors
            .iter()
            .map(|s| s.as_str())
            .chain(GENERIC_PRICE_SELECTORS.iter().copied())
        {
            if let Some(price) = self.apply(document, &PriceStrategy::Selector(selector)) {
                return Some(price);
            }
        }

        for pattern in &self.markup_patterns {
            if let Some(price) = self.apply(document, &PriceStrategy::Pattern(pattern)) {
                return Some(price);
            }
        }

        None
    }

    /// Extract a product name: site-specific selectors, generic selectors,
    /// then the page `<title>` as a last resort.
    pub fn extract_product_name(&self, document: &Html, site: Option<&SiteConfig>) -> Option<String> {
        let site_selectors = site.map(|s| s.name_selectors.as_slice()).unwrap_or(&[]);

        for selector in site_selectors
            .iter()
            .map(|s| s.as_str())
            .chain(GENERIC_NAME_SELECTORS.iter().copied())
            .chain(std::iter::once("title"))
        {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            for element in document.select(&parsed) {
                if let Some(name) = Self::name_candidate(&element) {
                    return Some(name);
                }
            }
        }

        None
    }

    fn apply(&self, document: &Html, strategy: &PriceStrategy<'_>) -> Option<f64> {
        match strategy {
            PriceStrategy::Selector(selector) => {
                let parsed = Selector::parse(selector).ok()?;
                for element in document.select(&parsed) {
                    let text = element.text().collect::<Vec<_>>().join(" ");
                    if let Some(price) = self.parse_price(&text) {
                        return Some(price);
                    }
                    for attr in VALUE_ATTRIBUTES {
                        if let Some(price) =
                            element.value().attr(attr).and_then(|v| self.parse_price(v))
                        {
                            return Some(price);
                        }
                    }
                }
                None
            }
            PriceStrategy::Pattern(pattern) => {
                let markup = document.root_element().html();
                pattern
                    .captures(&markup)
                    .and_then(|captures| captures.get(1))
                    .and_then(|capture| self.parse_price(capture.as_str()))
            }
        }
    }

    fn name_candidate(element: &ElementRef<'_>) -> Option<String> {
        let raw = {
            let text = element.text().collect::<Vec<_>>().join(" ");
            if text.trim().is_empty() {
                element.value().attr("content").unwrap_or("").to_string()
            } else {
                text
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() >= MAX_NAME_LENGTH {
            return None;
        }

        Some(Self::normalize_name(trimmed))
    }

    fn normalize_name(name: &str) -> String {
        let collapsed: String = name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .map(|c| match c {
                '|' | '•' | '·' | '–' | '—' => '-',
                c => c,
            })
            .collect();

        collapsed.chars().take(TRUNCATED_NAME_LENGTH).collect::<String>()
            .trim()
            .to_string()
    }
}
