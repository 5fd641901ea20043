use log::info;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 進捗を出力する書き込み試行数の間隔
pub const PROGRESS_INTERVAL: u64 = 2500;

/// 1ファイル分の集計。ワーカーから同時に更新される。
#[derive(Debug)]
pub struct FileStats {
    path: PathBuf,
    started: Instant,
    frames_seen: AtomicU64,
    frames_skipped: AtomicU64,
    writes_attempted: AtomicU64,
    writes_succeeded: AtomicU64,
    writes_failed: AtomicU64,
    writes_retried: AtomicU64,
}

impl FileStats {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            started: Instant::now(),
            frames_seen: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            writes_attempted: AtomicU64::new(0),
            writes_succeeded: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            writes_retried: AtomicU64::new(0),
        }
    }

    pub fn frame_seen(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_attempted(&self) {
        let attempted = self.writes_attempted.fetch_add(1, Ordering::Relaxed) + 1;
        if attempted % PROGRESS_INTERVAL == 0 {
            info!(
                "'{}': {} 件書き込みを試行しました (経過 {:.1?})",
                self.path.display(),
                attempted,
                self.started.elapsed()
            );
        }
    }

    pub fn write_succeeded(&self) {
        self.writes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_retried(&self) {
        self.writes_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> Counts {
        Counts {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            writes_attempted: self.writes_attempted.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            writes_retried: self.writes_retried.load(Ordering::Relaxed),
            read_errors: 0,
        }
    }

    pub fn summary(&self, read_errors: u64) -> FileSummary {
        FileSummary {
            path: self.path.clone(),
            elapsed: self.started.elapsed(),
            counts: Counts {
                read_errors,
                ..self.counts()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub frames_seen: u64,
    pub frames_skipped: u64,
    pub writes_attempted: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub writes_retried: u64,
    pub read_errors: u64,
}

impl std::ops::AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.frames_seen += other.frames_seen;
        self.frames_skipped += other.frames_skipped;
        self.writes_attempted += other.writes_attempted;
        self.writes_succeeded += other.writes_succeeded;
        self.writes_failed += other.writes_failed;
        self.writes_retried += other.writes_retried;
        self.read_errors += other.read_errors;
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "フレーム: {} 読み飛ばし: {} 試行: {} 成功: {} 失敗: {} 再試行: {}",
            self.frames_seen,
            self.frames_skipped,
            self.writes_attempted,
            self.writes_succeeded,
            self.writes_failed,
            self.writes_retried
        )?;
        if self.read_errors > 0 {
            write!(f, " 読み込みエラー: {}", self.read_errors)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: PathBuf,
    pub elapsed: Duration,
    pub counts: Counts,
}

impl fmt::Display for FileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' 完了 所要時間: {:.3?} {}",
            self.path.display(),
            self.elapsed,
            self.counts
        )
    }
}

/// 実行全体の集計
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: Vec<FileSummary>,
    pub failed_to_open: Vec<PathBuf>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for file in &self.files {
            totals += file.counts;
        }
        totals
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "合計 ファイル: {} 開けなかったファイル: {} {}",
            self.files.len(),
            self.failed_to_open.len(),
            self.totals()
        )?;
        if self.cancelled {
            write!(f, " (中断)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_from_many_threads_are_exact() {
        let stats = Arc::new(FileStats::new(Path::new("a.pcap")));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.write_attempted();
                        stats.write_succeeded();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counts = stats.counts();
        assert_eq!(counts.writes_attempted, 8000);
        assert_eq!(counts.writes_succeeded, 8000);
        assert_eq!(counts.writes_failed, 0);
    }

    #[test]
    fn run_totals_sum_every_file() {
        let a = FileStats::new(Path::new("a.pcap"));
        a.frame_seen();
        a.frame_skipped();
        let b = FileStats::new(Path::new("b.pcap"));
        b.frame_seen();
        b.write_attempted();
        b.write_failed();

        let summary = RunSummary {
            files: vec![a.summary(0), b.summary(1)],
            failed_to_open: vec![PathBuf::from("c.pcap")],
            cancelled: false,
        };
        let totals = summary.totals();
        assert_eq!(totals.frames_seen, 2);
        assert_eq!(totals.frames_skipped, 1);
        assert_eq!(totals.writes_failed, 1);
        assert_eq!(totals.read_errors, 1);
        assert!(summary.to_string().contains("開けなかったファイル: 1"));
    }
}
