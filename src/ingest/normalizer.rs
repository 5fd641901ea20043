use crate::ingest::bucket::{bucket_time, BucketWidth};
use crate::ingest::packet_id::PacketIdGenerator;
use crate::network::packet::{LinkLayer, NetworkLayer, RawFrame, TransportLayer};
use crate::storage::models::{LinkFields, NetworkFields, Record, TransportFields};
use log::debug;
use std::net::IpAddr;
use std::sync::Arc;

/// RawFrameをRecordに変換する。
///
/// レイヤーそのものが無いフレームは読み飛ばし (`None`)、
/// レイヤーはあるが種類が未知の場合は該当フィールドを空にして変換する。
pub struct Normalizer {
    capture_host: Arc<str>,
    bucket_width: BucketWidth,
    ids: PacketIdGenerator,
}

impl Normalizer {
    pub fn new(capture_host: Arc<str>, bucket_width: BucketWidth, ids: PacketIdGenerator) -> Self {
        Self {
            capture_host,
            bucket_width,
            ids,
        }
    }

    pub fn normalize(&mut self, frame: &RawFrame) -> Option<Record> {
        let Some(link) = &frame.link else {
            debug!("リンク層の情報がないためパケットを読み飛ばします");
            return None;
        };
        let Some(network) = &frame.network else {
            debug!("ネットワーク層の情報がないためパケットを読み飛ばします");
            return None;
        };
        let Some(transport) = &frame.transport else {
            debug!("トランスポート層の情報がないためパケットを読み飛ばします");
            return None;
        };

        let link = match link {
            LinkLayer::Ethernet {
                source,
                destination,
            } => Some(LinkFields {
                source_mac: *source,
                destination_mac: *destination,
            }),
            LinkLayer::Unknown { linktype } => {
                debug!("リンク層: linktype={}", linktype);
                None
            }
        };

        let network = match network {
            NetworkLayer::V4 {
                source,
                destination,
                flags,
            } => Some(NetworkFields {
                protocol: 4,
                source: IpAddr::V4(*source),
                destination: IpAddr::V4(*destination),
                flags: *flags,
            }),
            NetworkLayer::V6 {
                source,
                destination,
            } => Some(NetworkFields {
                protocol: 6,
                source: IpAddr::V6(*source),
                destination: IpAddr::V6(*destination),
                flags: 0,
            }),
            NetworkLayer::Unknown { ethertype } => {
                debug!("ネットワーク層: ethertype=0x{:04x}", ethertype);
                None
            }
        };

        let transport = match transport {
            TransportLayer::Tcp {
                source_port,
                destination_port,
                sequence,
                acknowledgement,
                window,
            } => TransportFields {
                source_port: *source_port,
                destination_port: *destination_port,
                sequence: *sequence,
                acknowledgement: *acknowledgement,
                window: *window,
            },
            TransportLayer::Udp {
                source_port,
                destination_port,
            } => TransportFields {
                source_port: *source_port,
                destination_port: *destination_port,
                ..TransportFields::default()
            },
            TransportLayer::Unknown { protocol } => {
                debug!("トランスポート層: protocol={}", protocol);
                TransportFields::default()
            }
        };

        Some(Record {
            bucket: bucket_time(&frame.timestamp, self.bucket_width),
            capture_host: Arc::clone(&self.capture_host),
            packet_id: self.ids.next_id(&frame.timestamp),
            timestamp: frame.timestamp,
            packet_size: frame.length,
            link,
            network,
            transport,
        })
    }
}
