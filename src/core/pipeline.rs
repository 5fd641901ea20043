use crate::core::config::IngestConfig;
use crate::core::error::LoaderResult;
use crate::core::shutdown::ShutdownSignal;
use crate::ingest::aggregator::{FileStats, FileSummary, RunSummary};
use crate::ingest::normalizer::Normalizer;
use crate::ingest::packet_id::PacketIdGenerator;
use crate::ingest::queue::record_queue;
use crate::ingest::worker::WorkerPool;
use crate::network::capture::{CaptureFile, FrameSource};
use crate::storage::RecordStore;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinError;

/// キャプチャファイルを1つずつ読み、ワーカー経由でストアに書き込む
pub struct IngestPipeline {
    store: Arc<dyn RecordStore>,
    config: IngestConfig,
    capture_host: Arc<str>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn RecordStore>, config: IngestConfig) -> Self {
        let capture_host = Arc::from(config.capture_host.as_str());
        Self {
            store,
            config,
            capture_host,
        }
    }

    /// 指定順にファイルを処理する。開けないファイルは読み飛ばす。
    /// 中断された場合も、それまでの集計を `cancelled` 付きで返す。
    pub async fn run(&self, paths: Vec<PathBuf>, shutdown: ShutdownSignal) -> LoaderResult<RunSummary> {
        info!(
            "取り込みを開始します: ファイル {} 件 (ホスト {}, バケット幅 {}秒, ワーカー {})",
            paths.len(),
            self.capture_host,
            self.config.bucket_width.seconds(),
            self.config.worker_count
        );

        let mut summary = RunSummary::default();
        let mut source = FrameSource::new(paths);
        loop {
            if shutdown.is_triggered() {
                summary.cancelled = true;
                break;
            }
            let Some(file) = source.next() else {
                break;
            };

            let file_summary = self.ingest_file(file, shutdown.clone()).await;
            info!("{}", file_summary);
            summary.files.push(file_summary);
        }
        summary.failed_to_open = source.failed().to_vec();

        if summary.cancelled {
            warn!("取り込みが中断されました");
        }
        info!("{}", summary);
        Ok(summary)
    }

    async fn ingest_file(&self, file: CaptureFile, shutdown: ShutdownSignal) -> FileSummary {
        let path = file.path().to_path_buf();
        info!("'{}' の取り込みを開始します", path.display());

        let stats = Arc::new(FileStats::new(&path));
        let (sender, receiver) = record_queue(self.config.queue_capacity);
        let pool = WorkerPool::spawn(
            self.config.worker_count,
            receiver,
            Arc::clone(&self.store),
            Arc::clone(&stats),
            self.config.retry,
            shutdown.clone(),
        );

        let mut normalizer = Normalizer::new(
            Arc::clone(&self.capture_host),
            self.config.bucket_width,
            PacketIdGenerator::for_file(&path),
        );
        let producer_stats = Arc::clone(&stats);
        let producer_shutdown = shutdown.clone();

        // ファイル読み込みは同期I/Oなので専用スレッドで行う
        let producer = tokio::task::spawn_blocking(move || {
            let mut file = file;
            for frame in file.by_ref() {
                if producer_shutdown.is_triggered() {
                    break;
                }
                producer_stats.frame_seen();
                let Some(record) = normalizer.normalize(&frame) else {
                    producer_stats.frame_skipped();
                    continue;
                };
                // ワーカーが全員止まっていれば送れない
                if sender.blocking_push(record).is_err() {
                    break;
                }
            }
            file.read_errors()
        });

        pool.join(shutdown, self.config.shutdown_timeout).await;
        let read_errors = match producer.await {
            Ok(read_errors) => read_errors,
            Err(e) => producer_failed(&path, e),
        };

        stats.summary(read_errors)
    }
}

/// 読み込みタスクの異常終了はそのファイルの読み込みエラーとして扱い、次のファイルへ進む
fn producer_failed(path: &Path, err: JoinError) -> u64 {
    error!(
        "'{}' の読み込みタスクが異常終了しました: {}",
        path.display(),
        err
    );
    1
}
