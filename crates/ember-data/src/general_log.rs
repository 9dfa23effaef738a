//! Account activity log (logins, disconnects, admin actions).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;

/// One activity log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralLogEntry {
    /// Assigned by the repository on insert.
    pub log_id: Option<i64>,
    /// Account the activity belongs to.
    pub account_id: i64,
    /// Character involved, if any. Cleared when the character is deleted.
    pub character_id: Option<i64>,
    /// Remote address of the session.
    pub ip_address: String,
    /// Category such as `"Connection"`.
    pub log_type: String,
    /// Free-form detail.
    pub log_data: String,
    /// When the activity happened.
    pub timestamp: SystemTime,
}

/// Activity log persistence contract.
pub trait GeneralLogRepository: Send + Sync {
    /// Store `entry` and return it with its assigned id.
    fn insert(&self, entry: GeneralLogEntry) -> GeneralLogEntry;

    /// Build an entry stamped with the current time and store it.
    fn write(
        &self,
        account_id: i64,
        ip_address: &str,
        character_id: Option<i64>,
        log_type: &str,
        log_data: &str,
    ) -> GeneralLogEntry {
        self.insert(GeneralLogEntry {
            log_id: None,
            account_id,
            character_id,
            ip_address: ip_address.to_string(),
            log_type: log_type.to_string(),
            log_data: log_data.to_string(),
            timestamp: SystemTime::now(),
        })
    }

    /// All records of an account, oldest first.
    fn load_by_account(&self, account_id: i64) -> Vec<GeneralLogEntry>;

    /// Records of one type whose character reference equals `character_id`
    /// (`None` matches records without a character).
    fn load_by_log_type(&self, log_type: &str, character_id: Option<i64>) -> Vec<GeneralLogEntry>;

    /// Drop the character reference from every record naming
    /// `character_id`. Returns how many records changed.
    fn clear_character(&self, character_id: i64) -> usize;
}

/// [`GeneralLogRepository`] kept in memory.
#[derive(Debug)]
pub struct InMemoryGeneralLog {
    entries: DashMap<i64, GeneralLogEntry>,
    next_id: AtomicI64,
}

impl InMemoryGeneralLog {
    /// Empty log; ids start at 1.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect(&self, filter: impl Fn(&GeneralLogEntry) -> bool) -> Vec<GeneralLogEntry> {
        let mut found: Vec<GeneralLogEntry> = self
            .entries
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| e.log_id);
        found
    }
}

impl Default for InMemoryGeneralLog {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralLogRepository for InMemoryGeneralLog {
    fn insert(&self, entry: GeneralLogEntry) -> GeneralLogEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stored = GeneralLogEntry {
            log_id: Some(id),
            ..entry
        };
        self.entries.insert(id, stored.clone());
        stored
    }

    fn load_by_account(&self, account_id: i64) -> Vec<GeneralLogEntry> {
        self.collect(|e| e.account_id == account_id)
    }

    fn load_by_log_type(&self, log_type: &str, character_id: Option<i64>) -> Vec<GeneralLogEntry> {
        self.collect(|e| e.log_type == log_type && e.character_id == character_id)
    }

    fn clear_character(&self, character_id: i64) -> usize {
        let mut cleared = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.character_id == Some(character_id) {
                entry.character_id = None;
                cleared += 1;
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_assigns_id_and_timestamp() {
        let repo = InMemoryGeneralLog::new();
        let before = SystemTime::now();
        let entry = repo.write(1, "10.0.0.5", None, "Connection", "LOGIN");

        assert_eq!(entry.log_id, Some(1));
        assert!(entry.timestamp >= before);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_load_by_account_in_insert_order() {
        let repo = InMemoryGeneralLog::new();
        repo.write(1, "a", None, "Connection", "first");
        repo.write(2, "b", None, "Connection", "other");
        repo.write(1, "a", Some(5), "Trade", "second");

        let data: Vec<String> = repo
            .load_by_account(1)
            .into_iter()
            .map(|e| e.log_data)
            .collect();
        assert_eq!(data, ["first", "second"]);
    }

    #[test]
    fn test_load_by_log_type_matches_character_exactly() {
        let repo = InMemoryGeneralLog::new();
        repo.write(1, "a", None, "Connection", "no character");
        repo.write(1, "a", Some(5), "Connection", "character 5");
        repo.write(1, "a", Some(5), "Trade", "trade");

        let none = repo.load_by_log_type("Connection", None);
        assert_eq!(none.len(), 1);
        assert_eq!(none[0].log_data, "no character");

        let five = repo.load_by_log_type("Connection", Some(5));
        assert_eq!(five.len(), 1);
        assert_eq!(five[0].log_data, "character 5");
    }

    #[test]
    fn test_clear_character() {
        let repo = InMemoryGeneralLog::new();
        repo.write(1, "a", Some(5), "Connection", "x");
        repo.write(1, "a", Some(5), "Trade", "y");
        repo.write(1, "a", Some(6), "Trade", "z");

        assert_eq!(repo.clear_character(5), 2);
        assert_eq!(repo.load_by_log_type("Trade", None).len(), 1);
        assert_eq!(repo.load_by_log_type("Trade", Some(6)).len(), 1);
        assert_eq!(repo.clear_character(5), 0);
    }
}
