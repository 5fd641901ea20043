use chrono::{DateTime, Utc};
use pnet::util::MacAddr;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

/// 書き込み可能な形に正規化された1パケット
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub bucket: DateTime<Utc>,
    pub capture_host: Arc<str>,
    pub packet_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub packet_size: u32,
    pub link: Option<LinkFields>,
    pub network: Option<NetworkFields>,
    pub transport: TransportFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFields {
    pub source_mac: MacAddr,
    pub destination_mac: MacAddr,
}

/// `protocol` は 4 か 6。`flags` はIPv4のみ、IPv6では常に0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkFields {
    pub protocol: u8,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub flags: u8,
}

/// UDPと未知のプロトコルでは sequence / acknowledgement / window は0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportFields {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    pub window: u16,
}

/// 書き込みキー (time_bucket, capture_host, packet_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub bucket: DateTime<Utc>,
    pub capture_host: Arc<str>,
    pub packet_id: Uuid,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            bucket: self.bucket,
            capture_host: Arc::clone(&self.capture_host),
            packet_id: self.packet_id,
        }
    }

    /// ネットワーク層が未知の場合は0
    pub fn ip_protocol(&self) -> u8 {
        self.network.map_or(0, |n| n.protocol)
    }
}
