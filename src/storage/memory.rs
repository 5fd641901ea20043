//! テスト用のインメモリストア

use crate::core::error::{LoaderError, LoaderResult};
use crate::storage::models::{Record, RecordKey};
use crate::storage::repository::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum FailureMode {
    Transient,
    Permanent,
}

/// 主キーで行を保持する。同じキーの書き込みは上書きしない。
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<RecordKey, Record>>,
    calls: AtomicU64,
    failures: Mutex<Option<(FailureMode, u64)>>,
    delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// 次の `count` 回の書き込みを失敗させる
    pub fn fail_next(&self, mode: FailureMode, count: u64) {
        *self.failures.lock().unwrap() = Some((mode, count));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Record> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn write(&self, record: &Record) -> LoaderResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((mode, remaining)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(match mode {
                        FailureMode::Transient => LoaderError::Timeout,
                        FailureMode::Permanent => LoaderError::Unexpected("書き込み拒否".to_string()),
                    });
                }
            }
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.key()) {
            return Ok(0);
        }
        rows.insert(record.key(), record.clone());
        Ok(1)
    }
}
