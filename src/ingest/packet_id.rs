use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

// 1582-10-15 から 1970-01-01 までの100ナノ秒単位の差
const GREGORIAN_OFFSET_TICKS: i64 = 0x01B2_1DD2_1381_4000;
const NODE_MASK: u64 = 0xFFFF_FFFF_FFFF;
// タイムスタンプ欄は60ビット
const MAX_TICKS: i128 = (1 << 60) - 1;

/// キャプチャ時刻から時刻順のパケットIDを生成する。
///
/// バージョン1 UUIDの配置で、タイムスタンプ欄にキャプチャ時刻、
/// ノード欄にファイル内の通し番号、クロックシーケンス欄にファイルパスの
/// ハッシュを入れる。同じ時刻のパケットでも衝突せず、同じファイルを
/// 読み直せば同じIDになる。
#[derive(Debug, Clone)]
pub struct PacketIdGenerator {
    clock_sequence: u16,
    next_index: u64,
}

impl PacketIdGenerator {
    pub fn for_file(path: &Path) -> Self {
        Self {
            clock_sequence: (fnv1a(path.to_string_lossy().as_bytes()) & 0x3FFF) as u16,
            next_index: 0,
        }
    }

    pub fn next_id(&mut self, timestamp: &DateTime<Utc>) -> Uuid {
        let index = self.next_index;
        self.next_index += 1;
        time_ordered_id(timestamp, self.clock_sequence, index)
    }
}

fn time_ordered_id(timestamp: &DateTime<Utc>, clock_sequence: u16, index: u64) -> Uuid {
    // 表現できない時刻は欄の両端に寄せる。一意性はノード欄の通し番号で保たれる。
    let unix_ticks =
        timestamp.timestamp() as i128 * 10_000_000 + (timestamp.timestamp_subsec_nanos() / 100) as i128;
    let ticks = (unix_ticks + GREGORIAN_OFFSET_TICKS as i128).clamp(0, MAX_TICKS) as u64;

    let time_low = ticks as u32;
    let time_mid = (ticks >> 32) as u16;
    let time_hi_and_version = ((ticks >> 48) & 0x0FFF) as u16 | 0x1000;

    let node = (index & NODE_MASK).to_be_bytes();
    let d4 = [
        ((clock_sequence >> 8) & 0x3F) as u8 | 0x80,
        clock_sequence as u8,
        node[2],
        node[3],
        node[4],
        node[5],
        node[6],
        node[7],
    ];

    Uuid::from_fields(time_low, time_mid, time_hi_and_version, &d4)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn same_timestamp_yields_distinct_ids() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut ids = PacketIdGenerator::for_file(Path::new("a.pcap"));
        let unique: HashSet<Uuid> = (0..1000).map(|_| ids.next_id(&ts)).collect();
        assert_eq!(unique.len(), 1000);
    }

    #[test]
    fn rereading_a_file_reproduces_ids() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
        let mut first = PacketIdGenerator::for_file(Path::new("/captures/a.pcap"));
        let mut second = PacketIdGenerator::for_file(Path::new("/captures/a.pcap"));
        for _ in 0..10 {
            assert_eq!(first.next_id(&ts), second.next_id(&ts));
        }
    }

    #[test]
    fn ids_are_version_one_and_carry_the_capture_time() {
        let ts = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        let id = PacketIdGenerator::for_file(Path::new("a.pcap")).next_id(&ts);
        assert_eq!(id.get_version_num(), 1);
        assert_eq!(id.get_variant(), uuid::Variant::RFC4122);

        let ticks = ticks_of(id);
        let expected = (1_700_000_000i64 * 10_000_000 + 5_000_000 + GREGORIAN_OFFSET_TICKS) as u64;
        assert_eq!(ticks, expected);
    }

    fn ticks_of(id: Uuid) -> u64 {
        let (low, mid, hi, _) = id.as_fields();
        ((hi & 0x0FFF) as u64) << 48 | (mid as u64) << 32 | low as u64
    }

    #[test]
    fn out_of_range_times_clamp_to_the_field_limits() {
        let mut ids = PacketIdGenerator::for_file(Path::new("a.pcap"));

        let far_future = Utc.timestamp_opt(5_000_000_000_000, 0).unwrap();
        let a = ids.next_id(&far_future);
        let b = ids.next_id(&far_future);
        assert_eq!(ticks_of(a), MAX_TICKS as u64);
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 1);

        let before_gregorian = Utc.timestamp_opt(-20_000_000_000, 0).unwrap();
        assert_eq!(ticks_of(ids.next_id(&before_gregorian)), 0);
    }

    #[test]
    fn different_files_use_different_clock_sequences() {
        let a = PacketIdGenerator::for_file(Path::new("a.pcap"));
        let b = PacketIdGenerator::for_file(Path::new("b.pcap"));
        assert_ne!(a.clock_sequence, b.clock_sequence);
    }
}
