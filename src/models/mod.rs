use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod price_history;
pub mod product;

// Re-exports for convenience
pub use price_history::*;
pub use product::*;

/// Where a history record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT")]
pub enum HistorySource {
    #[sqlx(rename = "scraping")]
    Scraping,
    #[sqlx(rename = "initial")]
    Initial,
    #[sqlx(rename = "manual")]
    Manual,
}

// Helper function to generate IDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_source_serialization() {
        assert_eq!(
            serde_json::to_string(&HistorySource::Scraping).unwrap(),
            "\"scraping\""
        );
        assert_eq!(
            serde_json::to_string(&HistorySource::Initial).unwrap(),
            "\"initial\""
        );
        assert_eq!(
            serde_json::to_string(&HistorySource::Manual).unwrap(),
            "\"manual\""
        );
    }

    #[test]
    fn test_history_source_roundtrip() {
        let values = vec![
            HistorySource::Scraping,
            HistorySource::Initial,
            HistorySource::Manual,
        ];
        for value in values {
            let serialized = serde_json::to_string(&value).unwrap();
            let deserialized: HistorySource = serde_json::from_str(&serialized).unwrap();
            assert_eq!(value, deserialized);
        }
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 32); // UUID simple format is 32 chars
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
