use crate::core::config::RetryPolicy;
use crate::core::error::LoaderResult;
use crate::core::shutdown::ShutdownSignal;
use crate::ingest::aggregator::FileStats;
use crate::ingest::queue::RecordReceiver;
use crate::storage::models::Record;
use crate::storage::RecordStore;
use futures::future::join_all;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// キューからレコードを取り出して書き込むワーカー群
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        receiver: RecordReceiver,
        store: Arc<dyn RecordStore>,
        stats: Arc<FileStats>,
        retry: RetryPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: receiver.clone(),
                    store: Arc::clone(&store),
                    stats: Arc::clone(&stats),
                    retry,
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        // ここで元の受信側を破棄し、全ワーカー終了時にキューが閉じるようにする
        drop(receiver);
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 全ワーカーの終了を待つ。
    /// 中断された場合は `grace` だけ書き込み中のレコードを待ち、残りは打ち切る。
    pub async fn join(self, mut shutdown: ShutdownSignal, grace: Duration) {
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        let all = join_all(self.handles);
        tokio::pin!(all);

        tokio::select! {
            results = &mut all => {
                report_panics(results);
                return;
            }
            _ = shutdown.wait() => {}
        }

        match tokio::time::timeout(grace, &mut all).await {
            Ok(results) => report_panics(results),
            Err(_) => {
                warn!(
                    "{:?} 以内に終了しなかったワーカーを打ち切ります",
                    grace
                );
                for abort in &aborts {
                    abort.abort();
                }
                let _ = all.await;
            }
        }
    }
}

fn report_panics(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(e) = result {
            if e.is_panic() {
                error!("ワーカーが異常終了しました: {}", e);
            }
        }
    }
}

struct Worker {
    id: usize,
    receiver: RecordReceiver,
    store: Arc<dyn RecordStore>,
    stats: Arc<FileStats>,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                record = self.receiver.pop() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            self.stats.write_attempted();
            match self.write_with_retry(&record).await {
                Ok(0) => {
                    debug!("既に保存済みのレコード: {}", record.packet_id);
                    self.stats.write_succeeded();
                }
                Ok(_) => self.stats.write_succeeded(),
                Err(e) => {
                    self.stats.write_failed();
                    warn!(
                        "レコードの書き込みに失敗しました (worker {}, packet {}): {}",
                        self.id, record.packet_id, e
                    );
                }
            }
        }
        debug!("ワーカー {} を終了します", self.id);
    }

    async fn write_with_retry(&mut self, record: &Record) -> LoaderResult<u64> {
        let mut retry = 0;
        loop {
            let err = match self.store.write(record).await {
                Ok(written) => return Ok(written),
                Err(e) => e,
            };
            if !err.is_transient() || retry >= self.retry.max_retries {
                return Err(err);
            }

            let backoff = self.retry.backoff(retry);
            debug!(
                "一時的なエラーのため {:?} 後に再試行します (worker {}): {}",
                backoff, self.id, err
            );
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return Err(err),
                _ = tokio::time::sleep(backoff) => {}
            }
            self.stats.write_retried();
            retry += 1;
        }
    }
}
