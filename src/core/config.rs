use crate::cli::{GlobalArgs, PcapArgs};
use crate::core::error::{LoaderError, LoaderResult};
use crate::ingest::bucket::BucketWidth;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub hosts: Vec<String>,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    pub table: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    pub capture_host: String,
    pub bucket_width: BucketWidth,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// `retry` 回目 (0始まり) の再試行前に待つ時間
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Configuration {
    pub fn from_cli(global: &GlobalArgs, pcap: &PcapArgs) -> LoaderResult<Self> {
        let bucket_width = BucketWidth::new(pcap.time_bucket)?;

        let hosts: Vec<String> = global
            .hosts
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(LoaderError::Config(
                "データベースのホストが指定されていません".to_string(),
            ));
        }

        if global.username.is_some() && global.password.is_none() {
            return Err(LoaderError::Config(
                "ユーザー名に対するパスワードが指定されていません".to_string(),
            ));
        }

        if !is_valid_table_name(&global.table) {
            return Err(LoaderError::Config(format!(
                "無効なテーブル名: {}",
                global.table
            )));
        }

        if global.connection_count == 0 {
            return Err(LoaderError::Config(
                "接続数は1以上を指定してください".to_string(),
            ));
        }

        if global.worker_count == 0 {
            return Err(LoaderError::Config(
                "ワーカー数は1以上を指定してください".to_string(),
            ));
        }

        let queue_capacity = global
            .queue_capacity
            .unwrap_or(global.worker_count.saturating_mul(2));
        if queue_capacity == 0 {
            return Err(LoaderError::Config(
                "キュー容量は1以上を指定してください".to_string(),
            ));
        }

        let capture_host = pcap.capture_host.trim().to_string();
        if capture_host.is_empty() {
            return Err(LoaderError::Config(
                "キャプチャホストが空です".to_string(),
            ));
        }

        Ok(Configuration {
            database: DatabaseConfig {
                hosts,
                port: global.port,
                username: global.username.clone(),
                password: global.password.clone(),
                database: global.database.clone(),
                table: global.table.clone(),
                max_connections: global.connection_count,
            },
            ingest: IngestConfig {
                capture_host,
                bucket_width,
                worker_count: global.worker_count,
                queue_capacity,
                retry: RetryPolicy {
                    max_retries: global.max_retries,
                    initial_backoff: Duration::from_millis(global.retry_backoff_ms),
                    max_backoff: RetryPolicy::MAX_BACKOFF,
                },
                shutdown_timeout: Duration::from_secs(global.shutdown_timeout_secs),
            },
        })
    }
}

// スキーマ修飾 (schema.table) まで許可する
fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
impl Configuration {
    pub fn for_testing() -> Self {
        Self {
            database: DatabaseConfig {
                hosts: vec!["localhost".to_string()],
                port: 5432,
                username: Some("test".to_string()),
                password: Some("test".to_string()),
                database: "test_db".to_string(),
                table: "packets_by_time".to_string(),
                max_connections: 4,
            },
            ingest: IngestConfig {
                capture_host: "host-A".to_string(),
                bucket_width: BucketWidth::new(600).unwrap(),
                worker_count: 4,
                queue_capacity: 8,
                retry: RetryPolicy::none(),
                shutdown_timeout: Duration::from_secs(1),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn parse(args: &[&str]) -> LoaderResult<Configuration> {
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Pcap(pcap) = &cli.command;
        Configuration::from_cli(&cli.global, pcap)
    }

    #[test]
    fn builds_configuration_with_defaults() {
        let config = parse(&["pcap-loader", "-c", "db1,db2", "pcap", "host-A", "a.pcap"]).unwrap();
        assert_eq!(config.database.hosts, vec!["db1", "db2"]);
        assert_eq!(config.database.max_connections, 16);
        assert_eq!(config.ingest.worker_count, 100);
        assert_eq!(config.ingest.queue_capacity, 200);
        assert_eq!(config.ingest.bucket_width.seconds(), 600);
        assert_eq!(config.ingest.retry.max_retries, 3);
    }

    #[test]
    fn zero_or_negative_bucket_is_config_error() {
        for width in ["0", "-600"] {
            let result = parse(&["pcap-loader", "-c", "db", "pcap", "-t", width, "h", "a.pcap"]);
            assert!(matches!(result, Err(LoaderError::Config(_))), "width {width}");
        }
    }

    #[test]
    fn username_without_password_is_config_error() {
        let result = parse(&["pcap-loader", "-u", "user", "-c", "db", "pcap", "h", "a.pcap"]);
        assert!(matches!(result, Err(LoaderError::Config(_))));
    }

    #[test]
    fn rejects_suspicious_table_names() {
        assert!(is_valid_table_name("packets_by_time"));
        assert!(is_valid_table_name("netbrane.packets_by_time"));
        assert!(!is_valid_table_name("packets; DROP TABLE x"));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name("1packets"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn password_is_not_serialized() {
        let json = serde_json::to_string(&Configuration::for_testing()).unwrap();
        assert!(!json.contains("\"password\""));
    }
}
