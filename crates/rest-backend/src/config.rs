use std::collections::HashSet;
use std::time::Duration;

/// Static configuration for a [`crate::RestBackend`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the data API (e.g. `https://xyz.supabase.co`).
    pub base_url: String,
    /// Sent as both `apikey` and `Authorization: Bearer` when set.
    pub api_key: Option<String>,
    /// Path segment(s) between the base URL and the table name.
    pub resource_path: String,
    /// Permitted tables. Empty = every table is permitted.
    pub allowed_tables: HashSet<String>,
    pub allow_writes: bool,
    /// Per-request timeout. `None` = no timeout.
    pub timeout: Option<Duration>,
    /// Maximum upstream response size in bytes. `None` = unlimited.
    pub max_response_bytes: Option<usize>,
}

impl BackendConfig {
    pub const DEFAULT_RESOURCE_PATH: &'static str = "rest/v1";

    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            resource_path: Self::DEFAULT_RESOURCE_PATH.to_string(),
            allowed_tables: HashSet::new(),
            allow_writes: false,
            timeout: Some(Duration::from_secs(30)),
            max_response_bytes: None,
        }
    }

    #[must_use]
    pub fn table_allowed(&self, table: &str) -> bool {
        self.allowed_tables.is_empty() || self.allowed_tables.contains(table)
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
#[must_use]
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_permits_everything() {
        let cfg = BackendConfig::new("http://127.0.0.1:1");
        assert!(cfg.table_allowed("anything"));
    }

    #[test]
    fn non_empty_allow_list_is_exact_match() {
        let mut cfg = BackendConfig::new("http://127.0.0.1:1");
        cfg.allowed_tables = parse_csv(" notes, todos ,").into_iter().collect();
        assert!(cfg.table_allowed("notes"));
        assert!(cfg.table_allowed("todos"));
        assert!(!cfg.table_allowed("Notes"));
        assert!(!cfg.table_allowed("users"));
    }

    #[test]
    fn parse_csv_drops_blank_entries() {
        assert!(parse_csv("").is_empty());
        assert!(parse_csv(" , ,").is_empty());
        assert_eq!(parse_csv("a,b"), vec!["a".to_string(), "b".to_string()]);
    }
}
