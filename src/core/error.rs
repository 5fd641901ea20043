use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("接続エラー: {0}")]
    Connection(String),

    #[error("キャプチャエラー: {0}")]
    Capture(#[from] CaptureError),

    #[error("データベースエラー: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("タイムアウト")]
    Timeout,

    #[error("中断されました")]
    Cancelled,

    #[error("予期せぬエラー: {0}")]
    Unexpected(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    /// 再試行すれば成功する見込みのあるエラーかどうか
    pub fn is_transient(&self) -> bool {
        match self {
            LoaderError::Timeout => true,
            LoaderError::Database(e) => is_transient_postgres(e),
            _ => false,
        }
    }

    /// プロセスの終了コード
    pub fn exit_code(&self) -> u8 {
        match self {
            LoaderError::Config(_) => 2,
            LoaderError::Connection(_) => 3,
            LoaderError::Cancelled => 130,
            _ => 1,
        }
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for LoaderError {
    fn from(err: bb8::RunError<tokio_postgres::Error>) -> Self {
        match err {
            bb8::RunError::User(e) => LoaderError::Database(e),
            bb8::RunError::TimedOut => LoaderError::Timeout,
        }
    }
}

// 接続断・リソース不足・シリアライズ失敗・管理者によるシャットダウン
const TRANSIENT_SQLSTATE_PREFIXES: [&str; 4] = ["08", "40", "53", "57P"];

fn is_transient_postgres(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }

    if let Some(code) = err.code() {
        return TRANSIENT_SQLSTATE_PREFIXES
            .iter()
            .any(|prefix| code.code().starts_with(prefix));
    }

    // ソケットのI/Oエラーは再接続で回復する
    std::error::Error::source(err)
        .map(|source| source.is::<io::Error>())
        .unwrap_or(false)
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] io::Error),

    #[error("pcapの解析に失敗しました ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
}
