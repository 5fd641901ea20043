use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// pcapファイルを時間バケット単位のパケットテーブルに書き込む
///
/// 例: pcap-loader -u user -p pass -c 10.0.0.1 -c 10.0.0.2 pcap host-a 1.pcap 2.pcap
#[derive(Parser, Debug)]
#[command(name = "pcap-loader", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// データベースのユーザー名
    #[arg(short = 'u', long, env = "LOADER_DB_USER")]
    pub username: Option<String>,

    /// データベースのパスワード
    #[arg(short = 'p', long, env = "LOADER_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// データベースのホスト (複数指定可)
    #[arg(short = 'c', long = "host", env = "LOADER_DB_HOSTS", value_delimiter = ',')]
    pub hosts: Vec<String>,

    /// データベースのポート
    #[arg(long, env = "LOADER_DB_PORT", default_value_t = 5432)]
    pub port: u16,

    /// データベース名
    #[arg(short = 'd', long, env = "LOADER_DB_NAME", default_value = "netbrane")]
    pub database: String,

    /// 書き込み先のテーブル
    #[arg(long, env = "LOADER_DB_TABLE", default_value = "packets_by_time")]
    pub table: String,

    /// コネクションプールの接続数
    #[arg(short = 'n', long, default_value_t = 16)]
    pub connection_count: u32,

    /// 書き込みワーカー数
    #[arg(short = 'w', long, default_value_t = 100)]
    pub worker_count: usize,

    /// レコードキューの容量 (省略時はワーカー数の2倍)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// 一時的な書き込みエラーの再試行回数
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// 再試行の初回待機時間 (ミリ秒)
    #[arg(long, default_value_t = 100)]
    pub retry_backoff_ms: u64,

    /// 中断時に書き込み中のレコードを待つ秒数
    #[arg(long, default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// ログの出力先ファイル
    #[arg(long, env = "LOADER_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// pcapファイルを書き込む
    Pcap(PcapArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PcapArgs {
    /// 時間バケットの秒数
    #[arg(
        short = 't',
        long = "time-bucket",
        default_value_t = 600,
        allow_negative_numbers = true
    )]
    pub time_bucket: i64,

    /// パケットをキャプチャしたホスト
    #[arg(value_name = "CAPTURE_HOST")]
    pub capture_host: String,

    /// 書き込むpcapファイル
    #[arg(value_name = "FILENAME", required = true, num_args = 1..)]
    pub filenames: Vec<PathBuf>,
}
