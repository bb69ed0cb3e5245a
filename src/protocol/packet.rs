//! Scan data packet framing, decoding and scan assembly.
//!
//! The scan data stream is a sequence of little-endian packets, each made of
//! a header followed by `num_points_packet` samples. A scan is split across
//! consecutive packets sharing the same `scan_number`; `first_index` gives
//! the position of the packet's first sample within the scan.
//!
//! Header layout (offsets in bytes):
//!
//! | Offset | Size | Field               |
//! |--------|------|---------------------|
//! | 0      | 2    | magic (`0xa25c`)    |
//! | 2      | 2    | packet_type         |
//! | 4      | 4    | packet_size         |
//! | 8      | 2    | header_size         |
//! | 10     | 2    | scan_number         |
//! | 12     | 2    | packet_number       |
//! | 14     | 8    | timestamp_raw       |
//! | 22     | 8    | timestamp_sync      |
//! | 30     | 4    | status_flags        |
//! | 34     | 4    | scan_frequency      |
//! | 38     | 2    | num_points_scan     |
//! | 40     | 2    | num_points_packet   |
//! | 42     | 2    | first_index         |
//! | 44     | 4    | first_angle         |
//! | 48     | 4    | angular_increment   |
//! | 52     | 4    | iq_input            |
//! | 56     | 4    | iq_overload         |
//! | 60     | 8    | iq_timestamp_raw    |
//! | 68     | 8    | iq_timestamp_sync   |
//!
//! Bytes between the last known field and `header_size` are skipped.

use std::io::Cursor;

use byteorder::{ReadBytesExt, LE};

use crate::error::{Error, Result};
use crate::types::{PacketType, Scan, ScanPoint, ScanTimestamp};

/// Packet start marker.
pub const MAGIC: u16 = 0xa25c;

const MAGIC_BYTES: [u8; 2] = MAGIC.to_le_bytes();

/// Size of the header including the I/Q fields.
pub const HEADER_SIZE: usize = 76;

/// Smallest header that still carries every scan field.
pub const MIN_HEADER_SIZE: usize = 52;

/// Upper bound for a single packet.
pub const MAX_PACKET_SIZE: usize = 65_536;

const INVALID_DISTANCE: u32 = 0xFFFF_FFFF;
const INVALID_DISTANCE_C: u32 = 0x000F_FFFF;

// =============================================================================
// Header
// =============================================================================

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub packet_size: u32,
    pub header_size: u16,
    pub scan_number: u16,
    pub packet_number: u16,
    pub timestamp_raw: u64,
    pub timestamp_sync: u64,
    pub status_flags: u32,
    /// Scan frequency in mHz.
    pub scan_frequency: u32,
    pub num_points_scan: u16,
    pub num_points_packet: u16,
    pub first_index: u16,
    pub first_angle: i32,
    pub angular_increment: i32,
    pub iq_input: u32,
    pub iq_overload: u32,
    pub iq_timestamp_raw: u64,
    pub iq_timestamp_sync: u64,
}

impl PacketHeader {
    /// Decode a header from the start of `data`.
    ///
    /// `data` must start with the magic bytes and hold at least
    /// [`MIN_HEADER_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "header truncated: {} bytes",
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let io = |e: std::io::Error| Error::protocol(format!("header truncated: {}", e));

        let magic = cursor.read_u16::<LE>().map_err(io)?;
        if magic != MAGIC {
            return Err(Error::protocol(format!("bad magic 0x{:04x}", magic)));
        }
        let type_id = cursor.read_u16::<LE>().map_err(io)?;
        let packet_type = PacketType::from_wire_id(type_id)
            .ok_or_else(|| Error::protocol(format!("unknown packet type 0x{:04x}", type_id)))?;

        let mut header = PacketHeader {
            packet_type,
            packet_size: cursor.read_u32::<LE>().map_err(io)?,
            header_size: cursor.read_u16::<LE>().map_err(io)?,
            scan_number: cursor.read_u16::<LE>().map_err(io)?,
            packet_number: cursor.read_u16::<LE>().map_err(io)?,
            timestamp_raw: cursor.read_u64::<LE>().map_err(io)?,
            timestamp_sync: cursor.read_u64::<LE>().map_err(io)?,
            status_flags: cursor.read_u32::<LE>().map_err(io)?,
            scan_frequency: cursor.read_u32::<LE>().map_err(io)?,
            num_points_scan: cursor.read_u16::<LE>().map_err(io)?,
            num_points_packet: cursor.read_u16::<LE>().map_err(io)?,
            first_index: cursor.read_u16::<LE>().map_err(io)?,
            first_angle: cursor.read_i32::<LE>().map_err(io)?,
            angular_increment: cursor.read_i32::<LE>().map_err(io)?,
            ..Default::default()
        };

        // Older firmware stops after the angular increment.
        if header.header_size as usize >= HEADER_SIZE && data.len() >= HEADER_SIZE {
            header.iq_input = cursor.read_u32::<LE>().map_err(io)?;
            header.iq_overload = cursor.read_u32::<LE>().map_err(io)?;
            header.iq_timestamp_raw = cursor.read_u64::<LE>().map_err(io)?;
            header.iq_timestamp_sync = cursor.read_u64::<LE>().map_err(io)?;
        }

        header.check()?;
        Ok(header)
    }

    fn check(&self) -> Result<()> {
        let header_size = self.header_size as usize;
        let packet_size = self.packet_size as usize;
        if header_size < MIN_HEADER_SIZE {
            return Err(Error::protocol(format!("header_size {} too small", header_size)));
        }
        if packet_size < header_size || packet_size > MAX_PACKET_SIZE {
            return Err(Error::protocol(format!(
                "packet_size {} invalid for header_size {}",
                packet_size, header_size
            )));
        }
        if self.payload_len() > packet_size - header_size {
            return Err(Error::protocol(format!(
                "{} samples do not fit in a {} byte packet",
                self.num_points_packet, packet_size
            )));
        }
        if self.first_index as usize + self.num_points_packet as usize
            > self.num_points_scan as usize
        {
            return Err(Error::protocol(format!(
                "samples {}..{} exceed scan size {}",
                self.first_index,
                self.first_index as usize + self.num_points_packet as usize,
                self.num_points_scan
            )));
        }
        Ok(())
    }

    /// Bytes occupied by the samples.
    pub fn payload_len(&self) -> usize {
        self.num_points_packet as usize * self.packet_type.sample_size()
    }
}

// =============================================================================
// Packets
// =============================================================================

/// A decoded scan data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub points: Vec<ScanPoint>,
}

/// Decode the samples of a packet.
pub fn decode_points(packet_type: PacketType, payload: &[u8], count: usize) -> Result<Vec<ScanPoint>> {
    if payload.len() < count * packet_type.sample_size() {
        return Err(Error::protocol("sample data truncated"));
    }
    let mut cursor = Cursor::new(payload);
    let io = |e: std::io::Error| Error::protocol(format!("sample data truncated: {}", e));
    let mut points = Vec::with_capacity(count);

    for _ in 0..count {
        let point = match packet_type {
            PacketType::A => {
                let distance = cursor.read_u32::<LE>().map_err(io)?;
                distance_point(distance, INVALID_DISTANCE)
            }
            PacketType::B => {
                let distance = cursor.read_u32::<LE>().map_err(io)?;
                let amplitude = cursor.read_u16::<LE>().map_err(io)?;
                distance_point(distance, INVALID_DISTANCE).with_amplitude(amplitude)
            }
            PacketType::C => {
                let raw = cursor.read_u32::<LE>().map_err(io)?;
                let amplitude = (raw >> 20) as u16;
                distance_point(raw & INVALID_DISTANCE_C, INVALID_DISTANCE_C)
                    .with_amplitude(amplitude)
            }
        };
        points.push(point);
    }
    Ok(points)
}

fn distance_point(distance: u32, invalid: u32) -> ScanPoint {
    if distance == invalid {
        ScanPoint::invalid()
    } else {
        ScanPoint::new(distance)
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Splits a byte stream into packets.
///
/// Bytes are appended with [`extend`](Self::extend) as they arrive; complete
/// packets are taken out with [`next_packet`](Self::next_packet). Garbage is
/// skipped by searching for the next magic marker.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: Vec<u8>,
    discarded: usize,
    discarded_total: u64,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes skipped since the last good packet.
    pub fn discarded_since_last_packet(&self) -> usize {
        self.discarded
    }

    /// Bytes skipped since creation.
    pub fn discarded_total(&self) -> u64 {
        self.discarded_total
    }

    /// Bytes waiting for the rest of their packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete packet out of the buffer.
    ///
    /// Returns `None` when more data is needed.
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if !self.align_to_magic() {
                return None;
            }
            let available = self.buffer.len();
            let header_len = available.min(HEADER_SIZE);
            if header_len < MIN_HEADER_SIZE {
                return None;
            }

            let header = match PacketHeader::decode(&self.buffer[..header_len]) {
                Ok(header) => header,
                Err(e) => {
                    log::debug!("skipping bad packet header: {}", e);
                    self.skip(MAGIC_BYTES.len());
                    continue;
                }
            };

            let packet_size = header.packet_size as usize;
            if available < packet_size {
                return None;
            }

            let payload_start = header.header_size as usize;
            let payload = &self.buffer[payload_start..packet_size];
            match decode_points(header.packet_type, payload, header.num_points_packet as usize) {
                Ok(points) => {
                    self.buffer.drain(..packet_size);
                    if self.discarded > 0 {
                        log::warn!("resynchronised after {} bytes", self.discarded);
                        self.discarded = 0;
                    }
                    return Some(Packet { header, points });
                }
                Err(e) => {
                    log::debug!("skipping bad packet payload: {}", e);
                    self.skip(MAGIC_BYTES.len());
                }
            }
        }
    }

    /// Drop bytes up to the next magic marker. Returns false if none is
    /// buffered yet.
    fn align_to_magic(&mut self) -> bool {
        match self.buffer.windows(2).position(|w| w == MAGIC_BYTES) {
            Some(0) => true,
            Some(pos) => {
                self.skip(pos);
                true
            }
            None => {
                // Keep a trailing half marker.
                let keep = usize::from(self.buffer.last() == Some(&MAGIC_BYTES[0]));
                let drop = self.buffer.len() - keep;
                self.skip(drop);
                false
            }
        }
    }

    fn skip(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.drain(..n);
        self.discarded += n;
        self.discarded_total += n as u64;
    }
}

// =============================================================================
// Scan assembly
// =============================================================================

struct PartialScan {
    scan_number: u16,
    timestamp: ScanTimestamp,
    scan_frequency_mhz: u32,
    first_angle: i32,
    angular_increment: i32,
    expected: usize,
    points: Vec<ScanPoint>,
}

/// Collects packets into complete scans.
///
/// Packets must arrive in order. A scan whose packets are not contiguous
/// (missing packet, scan number change mid-scan) is dropped; assembly
/// restarts at the next packet with `first_index == 0`.
#[derive(Default)]
pub struct ScanAssembler {
    current: Option<PartialScan>,
    completed: u64,
    dropped: u64,
}

impl ScanAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scans completed so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Number of partial scans discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Add a packet. Returns the scan it completes, if any.
    pub fn push(&mut self, packet: Packet) -> Option<Scan> {
        let header = packet.header;
        let first_index = header.first_index as usize;

        let continues = self.current.as_ref().is_some_and(|partial| {
            partial.scan_number == header.scan_number && partial.points.len() == first_index
        });
        if !continues {
            if let Some(partial) = self.current.take() {
                log::debug!(
                    "dropping incomplete scan {} ({}/{} samples)",
                    partial.scan_number,
                    partial.points.len(),
                    partial.expected
                );
                self.dropped += 1;
            }
            if first_index != 0 {
                return None;
            }
            self.current = Some(PartialScan {
                scan_number: header.scan_number,
                timestamp: ScanTimestamp(header.timestamp_raw),
                scan_frequency_mhz: header.scan_frequency,
                first_angle: header.first_angle,
                angular_increment: header.angular_increment,
                expected: header.num_points_scan as usize,
                points: Vec::with_capacity(header.num_points_scan as usize),
            });
        }

        let partial = self.current.as_mut()?;
        partial.points.extend(packet.points);
        if partial.points.len() < partial.expected {
            return None;
        }

        let partial = self.current.take()?;
        self.completed += 1;
        Some(Scan {
            scan_number: partial.scan_number,
            timestamp: partial.timestamp,
            scan_frequency_mhz: partial.scan_frequency_mhz,
            first_angle: partial.first_angle,
            angular_increment: partial.angular_increment,
            points: partial.points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    struct TestPacket {
        packet_type: PacketType,
        scan_number: u16,
        timestamp: u64,
        num_points_scan: u16,
        first_index: u16,
        distances: Vec<u32>,
    }

    fn encode(packet: &TestPacket) -> Vec<u8> {
        let sample_size = packet.packet_type.sample_size();
        let packet_size = HEADER_SIZE + packet.distances.len() * sample_size;
        let mut out = Vec::with_capacity(packet_size);
        out.write_u16::<LE>(MAGIC).unwrap();
        out.write_u16::<LE>(packet.packet_type.wire_id()).unwrap();
        out.write_u32::<LE>(packet_size as u32).unwrap();
        out.write_u16::<LE>(HEADER_SIZE as u16).unwrap();
        out.write_u16::<LE>(packet.scan_number).unwrap();
        out.write_u16::<LE>(1).unwrap();
        out.write_u64::<LE>(packet.timestamp).unwrap();
        out.write_u64::<LE>(0).unwrap();
        out.write_u32::<LE>(0).unwrap();
        out.write_u32::<LE>(35_000).unwrap();
        out.write_u16::<LE>(packet.num_points_scan).unwrap();
        out.write_u16::<LE>(packet.distances.len() as u16).unwrap();
        out.write_u16::<LE>(packet.first_index).unwrap();
        out.write_i32::<LE>(-1_800_000).unwrap();
        out.write_i32::<LE>(500).unwrap();
        out.resize(HEADER_SIZE, 0);
        for &d in &packet.distances {
            match packet.packet_type {
                PacketType::A => out.write_u32::<LE>(d).unwrap(),
                PacketType::B => {
                    out.write_u32::<LE>(d).unwrap();
                    out.write_u16::<LE>(900).unwrap();
                }
                PacketType::C => out.write_u32::<LE>((d & 0xFFFFF) | (300 << 20)).unwrap(),
            }
        }
        out
    }

    fn type_a(scan_number: u16, first_index: u16, distances: Vec<u32>, total: u16) -> Vec<u8> {
        encode(&TestPacket {
            packet_type: PacketType::A,
            scan_number,
            timestamp: 1000 + scan_number as u64,
            num_points_scan: total,
            first_index,
            distances,
        })
    }

    #[test]
    fn test_decode_header() {
        let bytes = type_a(7, 0, vec![1, 2, 3], 6);
        let header = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(header.packet_type, PacketType::A);
        assert_eq!(header.scan_number, 7);
        assert_eq!(header.timestamp_raw, 1007);
        assert_eq!(header.num_points_packet, 3);
        assert_eq!(header.first_angle, -1_800_000);
        assert_eq!(header.packet_size as usize, HEADER_SIZE + 12);
    }

    #[test]
    fn test_decode_header_rejects_bad_magic() {
        let mut bytes = type_a(1, 0, vec![1], 1);
        bytes[0] = 0;
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_header_rejects_overflowing_samples() {
        let bytes = type_a(1, 4, vec![1, 2, 3], 6);
        assert!(PacketHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_points_invalid_samples() {
        let bytes = type_a(1, 0, vec![1200, INVALID_DISTANCE], 2);
        let header = PacketHeader::decode(&bytes).unwrap();
        let points = decode_points(PacketType::A, &bytes[HEADER_SIZE..], 2).unwrap();
        assert_eq!(header.num_points_packet, 2);
        assert_eq!(points[0], ScanPoint::new(1200));
        assert_eq!(points[1], ScanPoint::invalid());
    }

    #[test]
    fn test_decode_points_type_b_and_c() {
        let bytes = encode(&TestPacket {
            packet_type: PacketType::B,
            scan_number: 1,
            timestamp: 0,
            num_points_scan: 1,
            first_index: 0,
            distances: vec![42],
        });
        let points = decode_points(PacketType::B, &bytes[HEADER_SIZE..], 1).unwrap();
        assert_eq!(points[0], ScanPoint::new(42).with_amplitude(900));

        let bytes = encode(&TestPacket {
            packet_type: PacketType::C,
            scan_number: 1,
            timestamp: 0,
            num_points_scan: 2,
            first_index: 0,
            distances: vec![42, INVALID_DISTANCE_C],
        });
        let points = decode_points(PacketType::C, &bytes[HEADER_SIZE..], 2).unwrap();
        assert_eq!(points[0], ScanPoint::new(42).with_amplitude(300));
        assert_eq!(points[1].distance_mm, None);
    }

    #[test]
    fn test_framer_handles_split_input() {
        let bytes = type_a(1, 0, vec![10, 20, 30], 3);
        let mut framer = PacketFramer::new();

        for chunk in bytes.chunks(7) {
            assert!(framer.next_packet().is_none());
            framer.extend(chunk);
        }
        let packet = framer.next_packet().expect("complete packet");
        assert_eq!(packet.points.len(), 3);
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.discarded_total(), 0);
    }

    #[test]
    fn test_framer_resyncs_after_garbage() {
        let mut framer = PacketFramer::new();
        framer.extend(&[0x01, 0x02, 0x5c, 0x00, 0xff]);
        framer.extend(&type_a(1, 0, vec![10], 1));
        framer.extend(&type_a(2, 0, vec![20], 1));

        let first = framer.next_packet().unwrap();
        assert_eq!(first.header.scan_number, 1);
        assert_eq!(framer.discarded_total(), 5);
        assert_eq!(framer.discarded_since_last_packet(), 0);
        let second = framer.next_packet().unwrap();
        assert_eq!(second.header.scan_number, 2);
        assert!(framer.next_packet().is_none());
    }

    #[test]
    fn test_framer_skips_corrupt_header() {
        let mut corrupt = type_a(1, 0, vec![10], 1);
        // header_size smaller than any valid header
        corrupt[8] = 4;
        corrupt[9] = 0;

        let mut framer = PacketFramer::new();
        framer.extend(&corrupt);
        framer.extend(&type_a(2, 0, vec![20], 1));

        let packet = framer.next_packet().unwrap();
        assert_eq!(packet.header.scan_number, 2);
        assert_eq!(framer.discarded_total() as usize, corrupt.len());
    }

    fn packet(bytes: Vec<u8>) -> Packet {
        let mut framer = PacketFramer::new();
        framer.extend(&bytes);
        framer.next_packet().unwrap()
    }

    #[test]
    fn test_assembler_builds_scan_from_packets() {
        let mut assembler = ScanAssembler::new();
        assert!(assembler.push(packet(type_a(3, 0, vec![1, 2], 5))).is_none());
        assert!(assembler.push(packet(type_a(3, 2, vec![3, 4], 5))).is_none());
        let scan = assembler.push(packet(type_a(3, 4, vec![5], 5))).unwrap();

        assert_eq!(scan.scan_number, 3);
        assert_eq!(scan.timestamp, ScanTimestamp(1003));
        assert_eq!(scan.len(), 5);
        assert_eq!(scan.points[4], ScanPoint::new(5));
        assert_eq!(scan.angular_increment, 500);
        assert_eq!(assembler.completed(), 1);
    }

    #[test]
    fn test_assembler_drops_scan_with_missing_packet() {
        let mut assembler = ScanAssembler::new();
        assembler.push(packet(type_a(3, 0, vec![1, 2], 4)));
        // packet with first_index 2 lost
        assert!(assembler.push(packet(type_a(4, 0, vec![1, 2], 4))).is_none());
        assert_eq!(assembler.dropped(), 1);
        let scan = assembler.push(packet(type_a(4, 2, vec![3, 4], 4))).unwrap();
        assert_eq!(scan.scan_number, 4);
    }

    #[test]
    fn test_assembler_waits_for_scan_start() {
        let mut assembler = ScanAssembler::new();
        assert!(assembler.push(packet(type_a(9, 2, vec![3, 4], 4))).is_none());
        assert_eq!(assembler.dropped(), 0);
        assert!(assembler.push(packet(type_a(10, 0, vec![1, 2, 3, 4], 4))).is_some());
    }
}
