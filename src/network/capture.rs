use crate::core::error::CaptureError;
use crate::network::packet::decode::linktype;
use crate::network::packet::{decode_frame, RawFrame};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, warn};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const READER_BUFFER_SIZE: usize = 65536;
// snaplen 262144 のブロックにオプションが付いても収まる大きさ
const MAX_READER_BUFFER_SIZE: usize = 1 << 20;
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const DEFAULT_TS_RESOLUTION: u64 = 1_000_000;

/// 複数のキャプチャファイルを指定順に開く。
/// 開けなかったファイルはログに残して読み飛ばす。
pub struct FrameSource {
    paths: std::vec::IntoIter<PathBuf>,
    failed: Vec<PathBuf>,
}

impl FrameSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths: paths.into_iter(),
            failed: Vec::new(),
        }
    }

    /// 開くことができなかったファイル
    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }
}

impl Iterator for FrameSource {
    type Item = CaptureFile;

    fn next(&mut self) -> Option<CaptureFile> {
        for path in self.paths.by_ref() {
            match CaptureFile::open(&path) {
                Ok(file) => return Some(file),
                Err(e) => {
                    error!("キャプチャファイルを開けませんでした '{}': {}", path.display(), e);
                    self.failed.push(path);
                }
            }
        }
        None
    }
}

enum CaptureReader {
    Legacy {
        reader: LegacyPcapReader<File>,
        linktype: i32,
        nanosecond: bool,
    },
    Ng {
        reader: PcapNGReader<File>,
        interfaces: Vec<Interface>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    linktype: i32,
    ts_units_per_second: u64,
    ts_offset: i64,
}

/// 1つのキャプチャファイルから、ディスク上の順序でフレームを読み出す
pub struct CaptureFile {
    path: PathBuf,
    reader: CaptureReader,
    buffer_size: usize,
    read_errors: u64,
    finished: bool,
}

impl CaptureFile {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let reader = if magic == PCAPNG_MAGIC {
            let reader = PcapNGReader::new(READER_BUFFER_SIZE, file).map_err(|e| CaptureError::Pcap {
                context: "pcapngリーダーの初期化",
                message: e.to_string(),
            })?;
            CaptureReader::Ng {
                reader,
                interfaces: Vec::new(),
            }
        } else {
            let reader = LegacyPcapReader::new(READER_BUFFER_SIZE, file).map_err(|e| CaptureError::Pcap {
                context: "pcapリーダーの初期化",
                message: e.to_string(),
            })?;
            CaptureReader::Legacy {
                reader,
                linktype: linktype::ETHERNET,
                nanosecond: false,
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            buffer_size: READER_BUFFER_SIZE,
            read_errors: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 途中で読み込みが打ち切られた回数 (0か1)
    pub fn read_errors(&self) -> u64 {
        self.read_errors
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        loop {
            match &mut self.reader {
                CaptureReader::Legacy {
                    reader,
                    linktype,
                    nanosecond,
                } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::LegacyHeader(header) => {
                                *linktype = header.network.0;
                                *nanosecond = header.is_nanosecond_precision();
                                None
                            }
                            PcapBlockOwned::Legacy(packet) => {
                                let nanos = if *nanosecond {
                                    packet.ts_usec
                                } else {
                                    packet.ts_usec.saturating_mul(1000)
                                };
                                let timestamp = timestamp_from_parts(packet.ts_sec as i64, nanos);
                                Some(decode_frame(*linktype, timestamp, packet.origlen, packet.data))
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::UnexpectedEof) => return Err(truncated()),
                    Err(PcapError::Incomplete(_)) | Err(PcapError::BufferTooSmall) => {
                        refill_or_grow(reader, &mut self.buffer_size)?;
                    }
                    Err(e) => {
                        return Err(CaptureError::Pcap {
                            context: "pcapの解析",
                            message: e.to_string(),
                        })
                    }
                },
                CaptureReader::Ng { reader, interfaces } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                                // セクションごとにインターフェースIDが振り直される
                                interfaces.clear();
                                None
                            }
                            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                                interfaces.push(Interface {
                                    linktype: idb.linktype.0,
                                    ts_units_per_second: ts_units_per_second(idb.if_tsresol),
                                    ts_offset: idb.if_tsoffset,
                                });
                                None
                            }
                            PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                                let interface = interfaces.get(epb.if_id as usize).copied().unwrap_or(Interface {
                                    linktype: linktype::ETHERNET,
                                    ts_units_per_second: DEFAULT_TS_RESOLUTION,
                                    ts_offset: 0,
                                });
                                let ticks = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                                let timestamp = timestamp_from_ticks(ticks, interface.ts_units_per_second, interface.ts_offset);
                                Some(decode_frame(interface.linktype, timestamp, epb.origlen, epb.data))
                            }
                            PcapBlockOwned::NG(Block::SimplePacket(_)) => {
                                debug!("タイムスタンプのないSimple Packet Blockを読み飛ばします");
                                None
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::UnexpectedEof) => return Err(truncated()),
                    Err(PcapError::Incomplete(_)) | Err(PcapError::BufferTooSmall) => {
                        refill_or_grow(reader, &mut self.buffer_size)?;
                    }
                    Err(e) => {
                        return Err(CaptureError::Pcap {
                            context: "pcapngの解析",
                            message: e.to_string(),
                        })
                    }
                },
            }
        }
    }
}

impl Iterator for CaptureFile {
    type Item = RawFrame;

    fn next(&mut self) -> Option<RawFrame> {
        if self.finished {
            return None;
        }

        match self.next_frame() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                warn!("'{}' の読み込みを中断します: {}", self.path.display(), e);
                self.read_errors += 1;
                self.finished = true;
                None
            }
        }
    }
}

fn truncated() -> CaptureError {
    CaptureError::Pcap {
        context: "ブロックの読み込み",
        message: "ファイルの末尾でブロックが途切れています".to_string(),
    }
}

/// 次のブロックに足りないデータを読み足す。
/// バッファが埋まっていて読み足せなければ、上限までバッファを広げる。
fn refill_or_grow<R: PcapReaderIterator>(reader: &mut R, buffer_size: &mut usize) -> Result<(), CaptureError> {
    let before = reader.data().len();
    reader.refill().map_err(|e| CaptureError::Pcap {
        context: "キャプチャファイルの読み込み",
        message: e.to_string(),
    })?;
    // ファイル末尾に達した場合は、次の next() が Eof か UnexpectedEof を返す
    if reader.data().len() > before || reader.reader_exhausted() {
        return Ok(());
    }

    let grown = (*buffer_size * 2).min(MAX_READER_BUFFER_SIZE);
    if grown <= *buffer_size || !reader.grow(grown) {
        return Err(CaptureError::Pcap {
            context: "ブロックの読み込み",
            message: format!("{} バイトを超えるブロックは読み込めません", MAX_READER_BUFFER_SIZE),
        });
    }
    debug!("読み込みバッファを {} バイトに広げます", grown);
    *buffer_size = grown;
    Ok(())
}

// if_tsresol: 最上位ビットが立っていれば2の累乗、そうでなければ10の累乗
fn ts_units_per_second(tsresol: u8) -> u64 {
    let exponent = (tsresol & 0x7f) as u32;
    let units = if tsresol & 0x80 != 0 {
        1u64.checked_shl(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    units.filter(|u| *u > 0).unwrap_or(DEFAULT_TS_RESOLUTION)
}

fn timestamp_from_ticks(ticks: u64, units_per_second: u64, offset: i64) -> DateTime<Utc> {
    // 範囲外の秒数は timestamp_from_parts で既定値に落ちる
    let seconds = i64::try_from(ticks / units_per_second)
        .unwrap_or(i64::MAX)
        .saturating_add(offset);
    let fraction = (ticks % units_per_second) as u128;
    let nanos = (fraction * 1_000_000_000 / units_per_second as u128) as u32;
    timestamp_from_parts(seconds, nanos)
}

fn timestamp_from_parts(seconds: i64, nanos: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, nanos.min(999_999_999))
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! テスト用のpcapファイルを書き出す

    use std::io::Write;
    use tempfile::NamedTempFile;

    pub struct FixtureFrame {
        pub ts_sec: u32,
        pub ts_usec: u32,
        pub data: Vec<u8>,
    }

    pub fn legacy_pcap_bytes(linktype: u32, frames: &[FixtureFrame]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&65535u32.to_le_bytes());
        bytes.extend_from_slice(&linktype.to_le_bytes());
        for frame in frames {
            bytes.extend_from_slice(&frame.ts_sec.to_le_bytes());
            bytes.extend_from_slice(&frame.ts_usec.to_le_bytes());
            bytes.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&frame.data);
        }
        bytes
    }

    pub fn write_legacy_pcap(linktype: u32, frames: &[FixtureFrame]) -> NamedTempFile {
        write_bytes(&legacy_pcap_bytes(linktype, frames))
    }

    /// Ethernetインターフェース1つのpcapng。`ticks` は `if_tsresol` 単位の時刻。
    pub fn pcapng_bytes(tsresol: u8, packets: &[(u64, Vec<u8>)]) -> Vec<u8> {
        let mut bytes = Vec::new();

        // Section Header Block
        bytes.extend_from_slice(&0x0A0D_0D0Au32.to_le_bytes());
        bytes.extend_from_slice(&28u32.to_le_bytes());
        bytes.extend_from_slice(&0x1A2B_3C4Du32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        bytes.extend_from_slice(&28u32.to_le_bytes());

        // Interface Description Block (if_tsresol, opt_endofopt)
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&32u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&9u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&[tsresol, 0, 0, 0]);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&32u32.to_le_bytes());

        // Enhanced Packet Block
        for (ticks, data) in packets {
            let padded = (data.len() + 3) & !3;
            let total = (32 + padded) as u32;
            bytes.extend_from_slice(&6u32.to_le_bytes());
            bytes.extend_from_slice(&total.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&((ticks >> 32) as u32).to_le_bytes());
            bytes.extend_from_slice(&(*ticks as u32).to_le_bytes());
            bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
            bytes.extend_from_slice(data);
            bytes.resize(bytes.len() + padded - data.len(), 0);
            bytes.extend_from_slice(&total.to_le_bytes());
        }
        bytes
    }

    pub fn write_pcapng(tsresol: u8, packets: &[(u64, Vec<u8>)]) -> NamedTempFile {
        write_bytes(&pcapng_bytes(tsresol, packets))
    }

    fn write_bytes(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }
}
