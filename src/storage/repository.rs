use crate::core::config::DatabaseConfig;
use crate::core::error::{LoaderError, LoaderResult};
use crate::storage::models::Record;
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use bb8_postgres::PostgresConnectionManager;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use log::info;
use pnet::util::MacAddr;
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use std::net::IpAddr;
use std::time::Duration;
use tokio_postgres::{Client, NoTls, Statement};
use uuid::Uuid;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 1レコードを書き込む。同じキーの再書き込みは行を増やさない。
    async fn write(&self, record: &Record) -> LoaderResult<u64>;
}

/// 挿入文を準備済みの接続
pub struct PreparedConnection {
    client: Client,
    insert: Statement,
}

/// 接続を確立したときに一度だけ挿入文を準備する
pub struct InsertConnectionManager {
    inner: PostgresConnectionManager<NoTls>,
    insert: String,
}

impl InsertConnectionManager {
    pub fn new(config: &DatabaseConfig) -> Self {
        let mut pg = tokio_postgres::Config::new();
        for host in &config.hosts {
            pg.host(host);
        }
        pg.port(config.port)
            .dbname(&config.database)
            .connect_timeout(CONNECTION_TIMEOUT)
            .application_name("pcap-loader");
        if let Some(username) = &config.username {
            pg.user(username);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }

        Self {
            inner: PostgresConnectionManager::new(pg, NoTls),
            insert: insert_statement(&config.table),
        }
    }

    pub fn insert(&self) -> &str {
        &self.insert
    }
}

#[async_trait]
impl ManageConnection for InsertConnectionManager {
    type Connection = PreparedConnection;
    type Error = tokio_postgres::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let client = self.inner.connect().await?;
        let insert = client.prepare(&self.insert).await?;
        Ok(PreparedConnection { client, insert })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.client.simple_query("").await.map(|_| ())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.client.is_closed()
    }
}

pub struct TimescaleStore {
    pool: Pool<InsertConnectionManager>,
}

impl TimescaleStore {
    /// プールを作成し、1接続を実際に確立して確認する
    pub async fn connect(config: &DatabaseConfig) -> LoaderResult<Self> {
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(InsertConnectionManager::new(config))
            .await
            .map_err(|e| LoaderError::Connection(e.to_string()))?;

        {
            let conn = pool
                .get()
                .await
                .map_err(|e| LoaderError::Connection(e.to_string()))?;
            conn.client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| LoaderError::Connection(e.to_string()))?;
        }

        info!(
            "データベースに接続しました: {:?} (接続数 {})",
            config.hosts, config.max_connections
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for TimescaleStore {
    async fn write(&self, record: &Record) -> LoaderResult<u64> {
        let conn = self.pool.get().await?;
        let row = RowValues::from(record);
        let written = conn.client.execute(&conn.insert, &row.params()).await?;
        Ok(written)
    }
}

/// 列の順序は (time_bucket, capture_host, timestamp) を主キーとするテーブル定義に合わせる
pub fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {} (time_bucket, capture_host, timestamp, packet_size, \
         source_mac, destination_mac, ip_protocol, source_ip, destination_ip, ip_flags, \
         source_port, destination_port, tcp_flags, tcp_window_size, tcp_sequence, tcp_acknowledgement) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
         ON CONFLICT (time_bucket, capture_host, timestamp) DO NOTHING",
        table
    )
}

/// 1行分のパラメータ。PostgreSQLに符号なし整数型がないため1段広い型に載せる。
#[derive(Debug)]
struct RowValues<'a> {
    time_bucket: DateTime<Utc>,
    capture_host: &'a str,
    packet_id: Uuid,
    packet_size: i64,
    source_mac: Option<SqlMacAddr>,
    destination_mac: Option<SqlMacAddr>,
    ip_protocol: i16,
    source_ip: Option<IpAddr>,
    destination_ip: Option<IpAddr>,
    ip_flags: i16,
    source_port: i32,
    destination_port: i32,
    tcp_flags: &'static str,
    tcp_window_size: i32,
    tcp_sequence: i64,
    tcp_acknowledgement: i64,
}

impl<'a> From<&'a Record> for RowValues<'a> {
    fn from(record: &'a Record) -> Self {
        Self {
            time_bucket: record.bucket,
            capture_host: &record.capture_host,
            packet_id: record.packet_id,
            packet_size: record.packet_size as i64,
            source_mac: record.link.map(|l| SqlMacAddr(l.source_mac)),
            destination_mac: record.link.map(|l| SqlMacAddr(l.destination_mac)),
            ip_protocol: record.ip_protocol() as i16,
            source_ip: record.network.map(|n| n.source),
            destination_ip: record.network.map(|n| n.destination),
            ip_flags: record.network.map_or(0, |n| n.flags as i16),
            source_port: record.transport.source_port as i32,
            destination_port: record.transport.destination_port as i32,
            // TCPフラグは未対応
            tcp_flags: "",
            tcp_window_size: record.transport.window as i32,
            tcp_sequence: record.transport.sequence as i64,
            tcp_acknowledgement: record.transport.acknowledgement as i64,
        }
    }
}

impl RowValues<'_> {
    fn params(&self) -> [&(dyn ToSql + Sync); 16] {
        [
            &self.time_bucket,
            &self.capture_host,
            &self.packet_id,
            &self.packet_size,
            &self.source_mac,
            &self.destination_mac,
            &self.ip_protocol,
            &self.source_ip,
            &self.destination_ip,
            &self.ip_flags,
            &self.source_port,
            &self.destination_port,
            &self.tcp_flags,
            &self.tcp_window_size,
            &self.tcp_sequence,
            &self.tcp_acknowledgement,
        ]
    }
}

/// macaddr型のバイナリ表現 (6バイト)
#[derive(Debug, Clone, Copy)]
struct SqlMacAddr(MacAddr);

impl ToSql for SqlMacAddr {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        let MacAddr(a, b, c, d, e, f) = self.0;
        out.extend_from_slice(&[a, b, c, d, e, f]);
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MACADDR
    }

    to_sql_checked!();
}
