//! CCSDS space packet decoding.
//!
//! # References
//! 1. CCSDS Space Packet Protocol 133.0-B-1
//!    - <https://public.ccsds.org/Pubs/133x0b1c2.pdf>

use std::fmt::Display;
use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type Apid = u16;

/// Packet is the first of a packet group.
pub const SEQ_FIRST: u8 = 1;
/// Packet is part of a packet group, neither first nor last.
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the last of a packet group.
pub const SEQ_LAST: u8 = 2;
/// Packet does not belong to a packet group.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// CCSDS primary header, common to all space packets.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Packet grouping disposition; see the `SEQ_*` constants.
    pub sequence_flags: u8,
    pub sequence_id: u16,
    /// Length of the packet data field, less one.
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Primary header length in bytes.
    pub const LEN: usize = 6;
    /// Modulus of the 14-bit packet sequence counter.
    pub const SEQ_MOD: u16 = 1 << 14;
    /// APID reserved for idle packets.
    pub const APID_IDLE: Apid = 0x7ff;

    /// Decode from bytes.
    ///
    /// # Errors
    /// [Error::Truncated] if fewer than [Self::LEN] bytes are provided.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < Self::LEN {
            return Err(Error::Truncated {
                actual: dat.len(),
                minimum: Self::LEN,
            });
        }
        let d1 = u16::from_be_bytes([dat[0], dat[1]]);
        let d2 = u16::from_be_bytes([dat[2], dat[3]]);
        let d3 = u16::from_be_bytes([dat[4], dat[5]]);

        Ok(PrimaryHeader {
            version: ((d1 >> 13) & 0x7) as u8,
            type_flag: ((d1 >> 12) & 0x1) as u8,
            has_secondary_header: (d1 >> 11) & 0x1 == 1,
            apid: d1 & 0x7ff,
            sequence_flags: ((d2 >> 14) & 0x3) as u8,
            sequence_id: d2 & 0x3fff,
            len_minus1: d3,
        })
    }

    /// Read a header from `r`.
    ///
    /// # Errors
    /// Any [std::io::Error] from the reader.
    pub fn read<R>(mut r: R) -> std::io::Result<Self>
    where
        R: Read,
    {
        let mut buf = [0u8; Self::LEN];
        r.read_exact(&mut buf)?;
        // cannot fail, read_exact filled the buffer
        Ok(Self::decode(&buf).unwrap())
    }

    /// Total packet length this header describes, header included.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.len_minus1 as usize + 1
    }

    /// Encode back to the 6 wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let d1: u16 = (u16::from(self.version) << 13)
            | (u16::from(self.type_flag) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7ff);
        let d2: u16 = (u16::from(self.sequence_flags) << 14) | (self.sequence_id & 0x3fff);
        let d1 = d1.to_be_bytes();
        let d2 = d2.to_be_bytes();
        let d3 = self.len_minus1.to_be_bytes();
        [d1[0], d1[1], d2[0], d2[1], d3[0], d3[1]]
    }
}

/// A single space packet: primary header plus the full packet bytes
/// (header included).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Packet {
    pub header: PrimaryHeader,
    pub data: Vec<u8>,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{apid: {}, seq: {}, len: {}}}",
            self.header.apid,
            self.header.sequence_id,
            self.data.len()
        )
    }
}

impl Packet {
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.header.sequence_flags == SEQ_FIRST
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.header.sequence_flags == SEQ_LAST
    }

    #[must_use]
    pub fn is_cont(&self) -> bool {
        self.header.sequence_flags == SEQ_CONTINUATION
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.header.sequence_flags == SEQ_UNSEGMENTED
    }

    /// True for fill packets on the idle APID.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.header.apid == PrimaryHeader::APID_IDLE
    }

    /// Decode a packet, consuming exactly the header and the body it
    /// describes; surplus bytes are ignored.
    ///
    /// # Errors
    /// [Error::Truncated] if `dat` cannot hold the packet described by its
    /// header.
    pub fn decode(dat: &[u8]) -> Result<Packet> {
        let header = PrimaryHeader::decode(dat)?;
        let need = header.packet_len();
        if dat.len() < need {
            return Err(Error::Truncated {
                actual: dat.len(),
                minimum: need,
            });
        }
        Ok(Packet {
            header,
            data: dat[..need].to_vec(),
        })
    }

    /// Read a single packet from `r`, keeping the original wire bytes.
    ///
    /// # Errors
    /// Any [std::io::Error] from the reader.
    pub fn read<R>(mut r: R) -> std::io::Result<Packet>
    where
        R: Read,
    {
        let mut hdr = [0u8; PrimaryHeader::LEN];
        r.read_exact(&mut hdr)?;
        // cannot fail, read_exact filled the buffer
        let header = PrimaryHeader::decode(&hdr).unwrap();

        let mut data = vec![0u8; header.packet_len()];
        data[..PrimaryHeader::LEN].copy_from_slice(&hdr);
        r.read_exact(&mut data[PrimaryHeader::LEN..])?;

        Ok(Packet { header, data })
    }
}

/// Number of packets missing between two sequence ids observed
/// back-to-back on an APID, i.e. `(cur - last - 1) mod 2^14`.
///
/// Zero when `cur` immediately follows `last` (including across the wrap);
/// a repeated id reads as `2^14 - 1` missing.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    cur.wrapping_sub(last).wrapping_sub(1) % PrimaryHeader::SEQ_MOD
}

/// Iterates packets read from a byte-aligned, contiguous packet stream,
/// ending at end of stream. A trailing partial packet is dropped.
pub struct PacketReaderIter<R>
where
    R: Read,
{
    reader: R,
}

impl<R> PacketReaderIter<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        PacketReaderIter { reader }
    }
}

impl<R> Iterator for PacketReaderIter<R>
where
    R: Read,
{
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        match Packet::read(&mut self.reader) {
            Ok(p) => Some(Ok(p)),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => None,
            Err(err) => Some(Err(Error::Io(err))),
        }
    }
}

/// Return an iterator of [Packet]s from a byte-aligned stream of contiguous
/// packets with no framing.
///
/// # Examples
/// ```
/// let dat: &[u8] = &[
///     // primary header
///     0xd, 0x59, 0xd2, 0xab, 0x0, 0x7,
///     // CDS timecode in the secondary header
///     0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb,
/// ];
/// for zult in downlink::packet::read_packets(dat) {
///     assert_eq!(zult.unwrap().header.apid, 1369);
/// }
/// ```
pub fn read_packets<R>(reader: R) -> impl Iterator<Item = Result<Packet>>
where
    R: Read,
{
    PacketReaderIter::new(reader)
}

/// Packets of one APID grouped according to their sequence flags.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PacketGroup {
    pub apid: Apid,
    pub packets: Vec<Packet>,
}

impl PacketGroup {
    /// True if the group starts with a first packet, ends with a last
    /// packet, and has no sequence-id gaps; a lone unsegmented packet is
    /// also complete.
    #[must_use]
    pub fn complete(&self) -> bool {
        match self.packets.as_slice() {
            [] => false,
            [only] => only.is_standalone(),
            [first, .., last] => first.is_first() && last.is_last() && !self.have_missing(),
        }
    }

    #[must_use]
    pub fn have_missing(&self) -> bool {
        self.packets
            .windows(2)
            .any(|w| missing_packets(w[1].header.sequence_id, w[0].header.sequence_id) > 0)
    }
}

/// Group packets by APID change and sequence flags; see
/// [collect_packet_groups].
pub struct PacketGroupIter<I>
where
    I: Iterator<Item = Packet>,
{
    packets: I,
    cached: Option<Packet>,
}

impl<I> Iterator for PacketGroupIter<I>
where
    I: Iterator<Item = Packet>,
{
    type Item = PacketGroup;

    fn next(&mut self) -> Option<Self::Item> {
        let mut group: Option<PacketGroup> = None;
        loop {
            let Some(packet) = self.cached.take().or_else(|| self.packets.next()) else {
                // source exhausted; yield any group in progress
                return group;
            };

            match group.as_mut() {
                None => {
                    if packet.is_standalone() {
                        return Some(PacketGroup {
                            apid: packet.header.apid,
                            packets: vec![packet],
                        });
                    }
                    group = Some(PacketGroup {
                        apid: packet.header.apid,
                        packets: vec![packet],
                    });
                }
                Some(group) => {
                    // Group boundary: APID change, or anything that is not a
                    // continuation/last of the group in progress.
                    if packet.header.apid != group.apid
                        || packet.is_standalone()
                        || packet.is_first()
                    {
                        self.cached = Some(packet);
                        break;
                    }
                    group.packets.push(packet);
                }
            }
        }
        group
    }
}

/// Collect packets into [PacketGroup]s using the primary-header sequence
/// flags. Unsegmented packets come back as single-packet groups.
pub fn collect_packet_groups<I>(packets: I) -> impl Iterator<Item = PacketGroup>
where
    I: Iterator<Item = Packet>,
{
    PacketGroupIter {
        packets,
        cached: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SNPP CrIS packet header
    const CRIS_HDR: [u8; 6] = [0xd, 0x59, 0xd2, 0xab, 0xa, 0x8f];

    #[test]
    fn decode_header_fields() {
        let ph = PrimaryHeader::decode(&CRIS_HDR).unwrap();

        assert_eq!(ph.version, 0);
        assert_eq!(ph.type_flag, 0);
        assert!(ph.has_secondary_header);
        assert_eq!(ph.apid, 1369);
        assert_eq!(ph.sequence_flags, 3);
        assert_eq!(ph.sequence_id, 4779);
        assert_eq!(ph.len_minus1, 2703);
    }

    #[test]
    fn decode_header_roundtrip() {
        let ph = PrimaryHeader::decode(&CRIS_HDR).unwrap();
        assert_eq!(PrimaryHeader::decode(&ph.encode()).unwrap(), ph);
        assert_eq!(ph.encode(), CRIS_HDR);
    }

    #[test]
    fn decode_header_truncated() {
        let zult = PrimaryHeader::decode(&CRIS_HDR[..4]);
        assert!(matches!(
            zult,
            Err(Error::Truncated {
                actual: 4,
                minimum: 6
            })
        ));
    }

    #[test]
    fn decode_packet() {
        let dat: [u8; 15] = [
            0xd, 0x59, 0xd2, 0xab, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
        ];
        let packet = Packet::decode(&dat).unwrap();
        assert_eq!(packet.header.apid, 1369);
        assert_eq!(packet.data.len(), 15);

        // body short of the header's promise
        assert!(matches!(
            Packet::decode(&dat[..12]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn read_packet_stream() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            // two packets, sequence ids 1 and 2, 9 data bytes each
            0xd, 0x59, 0xc0, 0x01, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
            0xd, 0x59, 0xc0, 0x02, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
        ];
        let packets: Vec<Packet> = read_packets(dat).map(|z| z.unwrap()).collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header.apid, 1369);
        assert_eq!(packets[0].header.sequence_id, 1);
        assert_eq!(&packets[0].data[..], &dat[..15]);
        assert_eq!(packets[1].header.sequence_id, 2);
        assert_eq!(&packets[1].data[..], &dat[15..]);
    }

    #[test]
    fn read_packet_stream_drops_partial_tail() {
        let dat: &[u8] = &[
            0xd, 0x59, 0xc0, 0x01, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
            0xd, 0x59, // half a header
        ];
        assert_eq!(read_packets(dat).map(|z| z.unwrap()).count(), 1);
    }

    #[test]
    fn test_missing_packets() {
        assert_eq!(missing_packets(5, 4), 0);
        assert_eq!(missing_packets(5, 3), 1);
        assert_eq!(missing_packets(3, 5), 16381);
        assert_eq!(missing_packets(0, PrimaryHeader::SEQ_MOD - 1), 0);
        assert_eq!(missing_packets(0, PrimaryHeader::SEQ_MOD - 2), 1);
        assert_eq!(missing_packets(0, 0), PrimaryHeader::SEQ_MOD - 1);
    }

    fn packet_with_flags(apid: Apid, seq: u16, flags: u8) -> Packet {
        let header = PrimaryHeader {
            version: 0,
            type_flag: 0,
            has_secondary_header: false,
            apid,
            sequence_flags: flags,
            sequence_id: seq,
            len_minus1: 0,
        };
        let mut data = header.encode().to_vec();
        data.push(0);
        Packet { header, data }
    }

    #[test]
    fn groups_by_sequence_flags() {
        let packets = vec![
            packet_with_flags(100, 0, SEQ_UNSEGMENTED),
            packet_with_flags(200, 1, SEQ_FIRST),
            packet_with_flags(200, 2, SEQ_CONTINUATION),
            packet_with_flags(200, 3, SEQ_LAST),
            packet_with_flags(200, 4, SEQ_FIRST),
            packet_with_flags(200, 5, SEQ_LAST),
        ];

        let groups: Vec<PacketGroup> = collect_packet_groups(packets.into_iter()).collect();

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].apid, 100);
        assert!(groups[0].complete());
        assert_eq!(groups[1].packets.len(), 3);
        assert!(groups[1].complete());
        assert_eq!(groups[2].packets.len(), 2);
        assert!(groups[2].complete());
    }

    #[test]
    fn incomplete_group_with_gap() {
        let packets = vec![
            packet_with_flags(200, 1, SEQ_FIRST),
            packet_with_flags(200, 3, SEQ_LAST), // id 2 missing
        ];
        let groups: Vec<PacketGroup> = collect_packet_groups(packets.into_iter()).collect();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].have_missing());
        assert!(!groups[0].complete());
    }
}
