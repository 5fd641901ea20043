use crate::core::error::{LoaderError, LoaderResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// 時間バケットの幅 (秒)。0以下は構築できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketWidth(i64);

impl BucketWidth {
    pub fn new(seconds: i64) -> LoaderResult<Self> {
        if seconds <= 0 {
            return Err(LoaderError::Config(format!(
                "時間バケットは正の秒数で指定してください: {}",
                seconds
            )));
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> i64 {
        self.0
    }
}

/// `timestamp - (timestamp mod width)`。負のタイムスタンプも下方向に丸める。
pub fn bucket(timestamp: i64, width: BucketWidth) -> i64 {
    timestamp - timestamp.rem_euclid(width.0)
}

pub fn bucket_time(timestamp: &DateTime<Utc>, width: BucketWidth) -> DateTime<Utc> {
    let seconds = bucket(timestamp.timestamp(), width);
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or_default()
}
