use crate::storage::models::Record;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// 容量付きのレコードキューを作る。
/// 満杯なら送信側が、空なら受信側が待たされる。
pub fn record_queue(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        RecordSender { inner: tx },
        RecordReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// 送信側。すべて破棄されるとキューが閉じる。
#[derive(Debug)]
pub struct RecordSender {
    inner: mpsc::Sender<Record>,
}

impl RecordSender {
    /// 受信側がすべて破棄されていれば `Err` でレコードを返す
    pub async fn push(&self, record: Record) -> Result<(), Record> {
        self.inner.send(record).await.map_err(|e| e.0)
    }

    /// ランタイム外のスレッドから使う
    pub fn blocking_push(&self, record: Record) -> Result<(), Record> {
        self.inner.blocking_send(record).map_err(|e| e.0)
    }
}

/// 受信側。ワーカー間で共有し、1レコードは1つのワーカーにだけ渡る。
#[derive(Debug, Clone)]
pub struct RecordReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Record>>>,
}

impl RecordReceiver {
    /// キューが閉じて空になったら `None`
    pub async fn pop(&self) -> Option<Record> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::TransportFields;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn record(n: u128) -> Record {
        let now = Utc::now();
        Record {
            bucket: now,
            capture_host: Arc::from("host-A"),
            packet_id: Uuid::from_u128(n),
            timestamp: now,
            packet_size: 60,
            link: None,
            network: None,
            transport: TransportFields::default(),
        }
    }

    #[tokio::test]
    async fn preserves_order_for_a_single_consumer() {
        let (tx, rx) = record_queue(4);
        for n in 0..3 {
            tx.push(record(n)).await.unwrap();
        }
        drop(tx);

        let mut ids = Vec::new();
        while let Some(r) = rx.pop().await {
            ids.push(r.packet_id.as_u128());
        }
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn second_push_waits_until_first_is_popped() {
        let (tx, rx) = record_queue(1);
        tx.push(record(1)).await.unwrap();

        let producer = tokio::spawn(async move {
            tx.push(record(2)).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "満杯のキューへの送信が戻ってはいけない");

        let first = rx.pop().await.unwrap();
        assert_eq!(first.packet_id.as_u128(), 1);

        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("取り出し後は送信が完了する")
            .unwrap();
        assert_eq!(rx.pop().await.unwrap().packet_id.as_u128(), 2);
    }

    #[tokio::test]
    async fn push_fails_once_all_receivers_are_gone() {
        let (tx, rx) = record_queue(1);
        drop(rx);
        assert!(tx.push(record(1)).await.is_err());
    }
}
