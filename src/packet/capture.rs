use std::fs::File;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use pcap_file::pcap::PcapReader;
use pcap_file::pcapng::{Block, PcapNgReader};

use crate::error::{PipelineError, Result};

use super::{classify_frame, Packet};

enum Reader {
    Legacy(PcapReader<File>),
    NextGen(PcapNgReader<File>),
}

/// Lazily iterates the classified packets of one capture file. Never loads
/// the whole file or builds an index; each `next()` decodes one record.
pub struct CaptureReader {
    reader: Reader,
    malformed_count: u64,
}

impl CaptureReader {
    /// Opens `path`, auto-detecting legacy pcap vs. pcapng by magic number.
    /// `InputUnreadable` if the file can't be opened or matches neither
    /// format.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PipelineError::InputUnreadable(format!("{:?}: {}", path, e)))?;

        match PcapReader::new(file) {
            Ok(reader) => {
                return Ok(CaptureReader {
                    reader: Reader::Legacy(reader),
                    malformed_count: 0,
                })
            }
            Err(_) => {}
        }

        let file = File::open(path)
            .map_err(|e| PipelineError::InputUnreadable(format!("{:?}: {}", path, e)))?;
        let reader = PcapNgReader::new(file)
            .map_err(|e| PipelineError::InputUnreadable(format!("{:?}: {}", path, e)))?;
        Ok(CaptureReader {
            reader: Reader::NextGen(reader),
            malformed_count: 0,
        })
    }

    /// Number of raw records skipped so far because they failed to parse
    /// down to a classified `Packet` (truncated frame, non-IPv4, unsupported
    /// transport protocol).
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Pulls the next classified packet, skipping malformed/unsupported
    /// records transparently. Returns `None` once the file is exhausted.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            let (ts, data) = match &mut self.reader {
                Reader::Legacy(r) => match r.next_packet() {
                    Some(Ok(pkt)) => {
                        let ts = pkt.timestamp;
                        (unix_duration_to_datetime(ts), pkt.data.into_owned())
                    }
                    Some(Err(_)) => {
                        self.malformed_count += 1;
                        continue;
                    }
                    None => return None,
                },
                Reader::NextGen(r) => match r.next_block() {
                    Some(Ok(block)) => match extract_enhanced_packet(&block) {
                        Some((ts, data)) => (ts, data),
                        None => continue,
                    },
                    Some(Err(_)) => {
                        self.malformed_count += 1;
                        continue;
                    }
                    None => return None,
                },
            };

            match classify_frame(ts, &data) {
                Some(packet) => return Some(packet),
                None => {
                    self.malformed_count += 1;
                    continue;
                }
            }
        }
    }
}

fn extract_enhanced_packet(block: &Block) -> Option<(DateTime<Utc>, Vec<u8>)> {
    match block {
        Block::EnhancedPacket(epb) => {
            let ts = Utc
                .timestamp_micros(epb.timestamp.as_micros() as i64)
                .single()
                .unwrap_or_else(Utc::now);
            Some((ts, epb.data.to_vec()))
        }
        _ => None,
    }
}

fn unix_duration_to_datetime(ts: std::time::Duration) -> DateTime<Utc> {
    Utc.timestamp_micros(ts.as_micros() as i64)
        .single()
        .unwrap_or_else(Utc::now)
}
