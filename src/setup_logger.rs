use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// 標準出力と (指定があれば) ログファイルに同じ内容を書き出す
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

/// ロガーを初期化する。RUST_LOG が設定されていればそちらを優先する。
pub fn setup_logger(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        // タイムスタンプ付きのフォーマット
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder.target(Target::Pipe(Box::new(Tee { file })));
        }
        None => {
            builder.target(Target::Stdout);
        }
    }

    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_reported() {
        // 他のテストが先に初期化している場合もあるので1回目の結果は問わない
        let _ = setup_logger(None);
        let err = setup_logger(None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
