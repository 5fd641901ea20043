use super::{LinkLayer, NetworkLayer, RawFrame, TransportLayer};
use chrono::{DateTime, Utc};
use log::trace;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

/// pcapのリンクタイプ
pub mod linktype {
    pub const NULL: i32 = 0;
    pub const ETHERNET: i32 = 1;
    pub const RAW_LEGACY: i32 = 12;
    pub const RAW_OPENBSD: i32 = 14;
    pub const RAW: i32 = 101;
    pub const LOOP: i32 = 108;
    pub const LINUX_SLL: i32 = 113;
    pub const IPV4: i32 = 228;
    pub const IPV6: i32 = 229;
}

const ETHERNET_HEADER_LEN: usize = 14;
const LINUX_SLL_HEADER_LEN: usize = 16;
const LOOPBACK_HEADER_LEN: usize = 4;
const IPV6_HEADER_LEN: usize = 40;

const ETHERTYPE_IPX: EtherType = EtherType(0x8137);
const ETHERTYPE_DDP: EtherType = EtherType(0x809B);
const ETHERTYPE_DECNET: EtherType = EtherType(0x6003);

// IP以外で、ネットワーク層として認識はするが展開しないプロトコル
const OPAQUE_NETWORK_TYPES: [EtherType; 3] = [ETHERTYPE_IPX, ETHERTYPE_DDP, ETHERTYPE_DECNET];

// 上位プロトコル種別の位置: IPXはヘッダー30バイト中5バイト目、DDPは13バイト中12バイト目
const IPX_HEADER_LEN: usize = 30;
const IPX_PACKET_TYPE_OFFSET: usize = 5;
const DDP_HEADER_LEN: usize = 13;
const DDP_TYPE_OFFSET: usize = 12;

// 同様に、トランスポート層として認識はするが展開しないプロトコル
const OPAQUE_TRANSPORT_TYPES: [IpNextHeaderProtocol; 2] = [
    IpNextHeaderProtocol(132), // SCTP
    IpNextHeaderProtocol(136), // UDP-Lite
];

// BSDループバックのアドレスファミリー (OSによってAF_INET6の値が異なる)
const AF_INET: u32 = 2;
const AF_INET6: [u32; 4] = [10, 24, 28, 30];

type Upper = (Option<NetworkLayer>, Option<TransportLayer>);

/// 1フレーム分のバイト列を各レイヤーのビューに分解する
pub fn decode_frame(linktype: i32, timestamp: DateTime<Utc>, length: u32, data: &[u8]) -> RawFrame {
    let (link, (network, transport)) = decode_link(linktype, data);

    RawFrame {
        timestamp,
        length,
        link,
        network,
        transport,
    }
}

fn decode_link(linktype: i32, data: &[u8]) -> (Option<LinkLayer>, Upper) {
    match linktype {
        linktype::ETHERNET => match EthernetPacket::new(data) {
            Some(ethernet) => {
                let link = LinkLayer::Ethernet {
                    source: ethernet.get_source(),
                    destination: ethernet.get_destination(),
                };
                let upper = decode_network(ethernet.get_ethertype(), &data[ETHERNET_HEADER_LEN..]);
                (Some(link), upper)
            }
            None => (None, (None, None)),
        },
        linktype::LINUX_SLL if data.len() >= LINUX_SLL_HEADER_LEN => {
            let ethertype = EtherType(u16::from_be_bytes([data[14], data[15]]));
            let upper = decode_network(ethertype, &data[LINUX_SLL_HEADER_LEN..]);
            (Some(LinkLayer::Unknown { linktype }), upper)
        }
        linktype::NULL | linktype::LOOP if data.len() >= LOOPBACK_HEADER_LEN => {
            let family = [data[0], data[1], data[2], data[3]];
            let upper = match loopback_ethertype(family) {
                Some(ethertype) => decode_network(ethertype, &data[LOOPBACK_HEADER_LEN..]),
                None => (None, None),
            };
            (Some(LinkLayer::Unknown { linktype }), upper)
        }
        // 生IPはリンク層を持たない
        linktype::RAW | linktype::RAW_LEGACY | linktype::RAW_OPENBSD | linktype::IPV4
        | linktype::IPV6 => {
            let upper = match data.first().map(|b| b >> 4) {
                Some(4) => decode_network(EtherTypes::Ipv4, data),
                Some(6) => decode_network(EtherTypes::Ipv6, data),
                _ => (None, None),
            };
            (None, upper)
        }
        _ => {
            trace!("未対応のリンクタイプです: {}", linktype);
            (None, (None, None))
        }
    }
}

fn loopback_ethertype(family: [u8; 4]) -> Option<EtherType> {
    // 書き込んだホストのバイトオーダーで格納されている
    let candidates = [u32::from_le_bytes(family), u32::from_be_bytes(family)];
    if candidates.contains(&AF_INET) {
        Some(EtherTypes::Ipv4)
    } else if candidates.iter().any(|c| AF_INET6.contains(c)) {
        Some(EtherTypes::Ipv6)
    } else {
        None
    }
}

fn decode_network(ethertype: EtherType, data: &[u8]) -> Upper {
    let unknown = || (Some(NetworkLayer::Unknown { ethertype: ethertype.0 }), None);

    if ethertype == EtherTypes::Ipv4 {
        let Some(ipv4) = Ipv4Packet::new(data) else {
            return unknown();
        };
        let header_len = ipv4.get_header_length() as usize * 4;
        if ipv4.get_version() != 4 || header_len < 20 || header_len > data.len() {
            return unknown();
        }

        let network = NetworkLayer::V4 {
            source: ipv4.get_source(),
            destination: ipv4.get_destination(),
            flags: ipv4.get_flags(),
        };

        // 先頭以外のフラグメントにはトランスポートヘッダーがない
        if ipv4.get_fragment_offset() != 0 {
            return (Some(network), None);
        }

        let end = match ipv4.get_total_length() as usize {
            0 => data.len(),
            total => total.clamp(header_len, data.len()),
        };
        let transport = decode_transport(ipv4.get_next_level_protocol(), &data[header_len..end]);
        (Some(network), transport)
    } else if ethertype == EtherTypes::Ipv6 {
        let Some(ipv6) = Ipv6Packet::new(data) else {
            return unknown();
        };
        if ipv6.get_version() != 6 {
            return unknown();
        }

        let network = NetworkLayer::V6 {
            source: ipv6.get_source(),
            destination: ipv6.get_destination(),
        };

        // ペイロード長0はジャンボグラム
        let end = match ipv6.get_payload_length() as usize {
            0 => data.len(),
            payload => (IPV6_HEADER_LEN + payload).min(data.len()),
        };
        let transport = decode_transport(ipv6.get_next_header(), &data[IPV6_HEADER_LEN..end]);
        (Some(network), transport)
    } else if OPAQUE_NETWORK_TYPES.contains(&ethertype) {
        (unknown().0, opaque_transport(ethertype, data))
    } else {
        trace!("ネットワーク層のないフレームです: ethertype={}", ethertype);
        (None, None)
    }
}

/// IPX / DDP はヘッダーに上位プロトコルの種別を持つので、展開しないトランスポート層として残す
fn opaque_transport(ethertype: EtherType, data: &[u8]) -> Option<TransportLayer> {
    let (header_len, offset) = if ethertype == ETHERTYPE_IPX {
        (IPX_HEADER_LEN, IPX_PACKET_TYPE_OFFSET)
    } else if ethertype == ETHERTYPE_DDP {
        (DDP_HEADER_LEN, DDP_TYPE_OFFSET)
    } else {
        return None;
    };
    if data.len() < header_len {
        return None;
    }
    Some(TransportLayer::Unknown { protocol: data[offset] })
}

fn decode_transport(protocol: IpNextHeaderProtocol, data: &[u8]) -> Option<TransportLayer> {
    let unknown = Some(TransportLayer::Unknown { protocol: protocol.0 });

    if protocol == IpNextHeaderProtocols::Tcp {
        match TcpPacket::new(data) {
            Some(tcp) => Some(TransportLayer::Tcp {
                source_port: tcp.get_source(),
                destination_port: tcp.get_destination(),
                sequence: tcp.get_sequence(),
                acknowledgement: tcp.get_acknowledgement(),
                window: tcp.get_window(),
            }),
            None => unknown,
        }
    } else if protocol == IpNextHeaderProtocols::Udp {
        match UdpPacket::new(data) {
            Some(udp) => Some(TransportLayer::Udp {
                source_port: udp.get_source(),
                destination_port: udp.get_destination(),
            }),
            None => unknown,
        }
    } else if OPAQUE_TRANSPORT_TYPES.contains(&protocol) {
        unknown
    } else {
        None
    }
}
