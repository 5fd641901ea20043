pub mod decode;

use chrono::{DateTime, Utc};
use pnet::util::MacAddr;
use std::net::{Ipv4Addr, Ipv6Addr};

pub use decode::decode_frame;

/// キャプチャファイルから読み出した1フレーム。
/// 各レイヤーの `None` はレイヤー自体が存在しないことを表す。
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub timestamp: DateTime<Utc>,
    pub length: u32,
    pub link: Option<LinkLayer>,
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet {
        source: MacAddr,
        destination: MacAddr,
    },
    Unknown {
        linktype: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    V4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        flags: u8,
    },
    V6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
    },
    Unknown {
        ethertype: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportLayer {
    Tcp {
        source_port: u16,
        destination_port: u16,
        sequence: u32,
        acknowledgement: u32,
        window: u16,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
    },
    Unknown {
        protocol: u8,
    },
}
