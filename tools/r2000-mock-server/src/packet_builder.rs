//! Pure functions for building scan data packets.

use byteorder::{WriteBytesExt, LE};

use crate::constants::{
    NO_ECHO, PACKET_HEADER_SIZE, PACKET_MAGIC, PACKET_TYPE_B, PACKET_TYPE_C,
};

/// Amplitude reported with every sample of types B and C.
const MOCK_AMPLITUDE: u16 = 1000;

/// One scan to be split into packets.
#[derive(Clone, Debug)]
pub struct ScanFrame {
    pub packet_type: u16,
    pub scan_number: u16,
    pub timestamp_raw: u64,
    /// Scan frequency in mHz.
    pub scan_frequency: u32,
    pub first_angle: i32,
    pub angular_increment: i32,
    /// Distances in mm, [`NO_ECHO`] for missing samples.
    pub distances: Vec<u32>,
}

fn sample_size(packet_type: u16) -> usize {
    if packet_type == PACKET_TYPE_B {
        6
    } else {
        4
    }
}

/// Split `frame` into packets of at most `max_points` samples.
pub fn build_scan_packets(frame: &ScanFrame, max_points: usize) -> Vec<Vec<u8>> {
    let max_points = max_points.max(1);
    frame
        .distances
        .chunks(max_points)
        .enumerate()
        .map(|(n, samples)| build_packet(frame, (n + 1) as u16, n * max_points, samples))
        .collect()
}

/// Build a single packet carrying `samples` starting at `first_index`.
pub fn build_packet(frame: &ScanFrame, packet_number: u16, first_index: usize, samples: &[u32]) -> Vec<u8> {
    let packet_size = PACKET_HEADER_SIZE + samples.len() * sample_size(frame.packet_type);
    let mut out = Vec::with_capacity(packet_size);

    // Writes into a Vec cannot fail.
    let _ = write_header(&mut out, frame, packet_size, packet_number, first_index, samples.len());
    for &distance in samples {
        let _ = write_sample(&mut out, frame.packet_type, distance);
    }
    out
}

fn write_header(
    out: &mut Vec<u8>,
    frame: &ScanFrame,
    packet_size: usize,
    packet_number: u16,
    first_index: usize,
    num_points: usize,
) -> std::io::Result<()> {
    out.write_u16::<LE>(PACKET_MAGIC)?;
    out.write_u16::<LE>(frame.packet_type)?;
    out.write_u32::<LE>(packet_size as u32)?;
    out.write_u16::<LE>(PACKET_HEADER_SIZE as u16)?;
    out.write_u16::<LE>(frame.scan_number)?;
    out.write_u16::<LE>(packet_number)?;
    out.write_u64::<LE>(frame.timestamp_raw)?;
    out.write_u64::<LE>(frame.timestamp_raw)?; // timestamp_sync
    out.write_u32::<LE>(0)?; // status_flags
    out.write_u32::<LE>(frame.scan_frequency)?;
    out.write_u16::<LE>(frame.distances.len() as u16)?;
    out.write_u16::<LE>(num_points as u16)?;
    out.write_u16::<LE>(first_index as u16)?;
    out.write_i32::<LE>(frame.first_angle + frame.angular_increment * first_index as i32)?;
    out.write_i32::<LE>(frame.angular_increment)?;
    out.write_u32::<LE>(0)?; // iq_input
    out.write_u32::<LE>(0)?; // iq_overload
    out.write_u64::<LE>(frame.timestamp_raw)?; // iq_timestamp_raw
    out.write_u64::<LE>(frame.timestamp_raw)?; // iq_timestamp_sync
    Ok(())
}

fn write_sample(out: &mut Vec<u8>, packet_type: u16, distance: u32) -> std::io::Result<()> {
    match packet_type {
        PACKET_TYPE_B => {
            out.write_u32::<LE>(distance)?;
            out.write_u16::<LE>(MOCK_AMPLITUDE)?;
        }
        PACKET_TYPE_C => {
            let distance = if distance == NO_ECHO {
                0x000F_FFFF
            } else {
                distance & 0x000F_FFFF
            };
            out.write_u32::<LE>(distance | ((MOCK_AMPLITUDE as u32 & 0xFFF) << 20))?;
        }
        _ => out.write_u32::<LE>(distance)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PACKET_TYPE_A;

    fn frame(points: usize) -> ScanFrame {
        ScanFrame {
            packet_type: PACKET_TYPE_A,
            scan_number: 3,
            timestamp_raw: 99,
            scan_frequency: 35_000,
            first_angle: -1_800_000,
            angular_increment: 500,
            distances: (0..points as u32).collect(),
        }
    }

    #[test]
    fn test_scan_is_split_into_packets() {
        let packets = build_scan_packets(&frame(7), 3);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].len(), PACKET_HEADER_SIZE + 12);
        assert_eq!(packets[2].len(), PACKET_HEADER_SIZE + 4);

        // first_index of the last packet
        assert_eq!(u16::from_le_bytes([packets[2][42], packets[2][43]]), 6);
        // num_points_scan
        assert_eq!(u16::from_le_bytes([packets[2][38], packets[2][39]]), 7);
    }

    #[test]
    fn test_packet_starts_with_magic() {
        let packets = build_scan_packets(&frame(1), 10);
        assert_eq!(&packets[0][..2], &PACKET_MAGIC.to_le_bytes());
    }
}
