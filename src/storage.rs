use crate::error::AppError;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const KEY_DAILY_REQUESTS: &str = "daily_request_count";
const KEY_DAILY_TOKENS: &str = "daily_token_count";
const KEY_LAST_RESET: &str = "last_reset_date";

/// The persisted half of the usage state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyUsage {
    pub request_count: u64,
    pub token_count: u64,
    pub last_reset_date: Option<NaiveDate>,
}

/// Durable port for the rate guard's daily counters.
pub trait UsageStore: Send {
    fn load_daily(&self) -> Result<DailyUsage, AppError>;

    fn save_request_count(&mut self, count: u64) -> Result<(), AppError>;

    fn save_token_count(&mut self, count: u64) -> Result<(), AppError>;

    fn save_reset(&mut self, date: NaiveDate) -> Result<(), AppError>;
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let this = Self {
            conn: Connection::open_in_memory()?,
        };
        this.init()?;
        Ok(this)
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_count(&self, key: &str) -> Result<u64, AppError> {
        // Unparseable counters read as zero rather than poisoning startup.
        Ok(self
            .get(key)?
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0))
    }
}

impl UsageStore for Storage {
    fn load_daily(&self) -> Result<DailyUsage, AppError> {
        let last_reset_date = self
            .get(KEY_LAST_RESET)?
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok());

        Ok(DailyUsage {
            request_count: self.get_count(KEY_DAILY_REQUESTS)?,
            token_count: self.get_count(KEY_DAILY_TOKENS)?,
            last_reset_date,
        })
    }

    fn save_request_count(&mut self, count: u64) -> Result<(), AppError> {
        self.set(KEY_DAILY_REQUESTS, &count.to_string())
    }

    fn save_token_count(&mut self, count: u64) -> Result<(), AppError> {
        self.set(KEY_DAILY_TOKENS, &count.to_string())
    }

    fn save_reset(&mut self, date: NaiveDate) -> Result<(), AppError> {
        let tx = self.conn.transaction()?;
        for (key, value) in [
            (KEY_DAILY_REQUESTS, "0".to_string()),
            (KEY_DAILY_TOKENS, "0".to_string()),
            (KEY_LAST_RESET, date.format("%Y-%m-%d").to_string()),
        ] {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).expect("valid date")
    }

    #[test]
    fn empty_store_loads_zeroed_usage_without_reset_date() {
        let storage = Storage::open_in_memory().expect("open storage");
        assert_eq!(storage.load_daily().expect("load"), DailyUsage::default());
    }

    #[test]
    fn counters_survive_reopen() {
        let tmp = TempDir::new().expect("tempdir");
        let db = tmp.path().join("usage.sqlite");

        {
            let mut storage = Storage::open(&db).expect("open storage");
            storage.save_reset(day(3)).expect("reset");
            storage.save_request_count(7).expect("requests");
            storage.save_token_count(840).expect("tokens");
        }

        let storage = Storage::open(&db).expect("reopen storage");
        assert_eq!(
            storage.load_daily().expect("load"),
            DailyUsage {
                request_count: 7,
                token_count: 840,
                last_reset_date: Some(day(3)),
            }
        );
    }

    #[test]
    fn save_reset_zeroes_both_counters() {
        let mut storage = Storage::open_in_memory().expect("open storage");
        storage.save_request_count(12).expect("requests");
        storage.save_token_count(5000).expect("tokens");

        storage.save_reset(day(4)).expect("reset");
        let usage = storage.load_daily().expect("load");
        assert_eq!(usage.request_count, 0);
        assert_eq!(usage.token_count, 0);
        assert_eq!(usage.last_reset_date, Some(day(4)));
    }

    #[test]
    fn garbage_values_read_as_zero() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage.set(KEY_DAILY_REQUESTS, "NaN").expect("set");
        storage.set(KEY_LAST_RESET, "Tue May 14 2024").expect("set");

        let usage = storage.load_daily().expect("load");
        assert_eq!(usage.request_count, 0);
        assert!(usage.last_reset_date.is_none());
    }
}
