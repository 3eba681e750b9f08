//! CCSDS spacecraft downlink telemetry decoding.
//!
//! Decodes the return-link stack used by most earth-science missions
//! (SNPP, JPSS, EOS Aqua/Terra, ...): raw CADU byte streams are
//! synchronized on the attached sync marker, derandomized, Reed-Solomon
//! checked and corrected, parsed into transfer frames, and the space
//! packets multiplexed across those frames are reassembled per virtual
//! channel. Every stage is a lazy, pull-driven iterator, so streams of any
//! size decode in constant memory and a malformed stretch of input costs
//! at most the packets it touched.
//!
//! The layers are usable on their own ([Synchronizer], [FrameDecoder],
//! [Reassembler]) or through the file-level functions [read_frames] and
//! [read_framed_packets]. Byte-aligned packet files with no framing go
//! through [read_packets]. [CDS](timecode::decode_cds_timecode) and
//! [EOS CUC](timecode::decode_eoscuc_timecode) timecode decoders handle
//! the common secondary-header timestamps.
//!
//! # Examples
//! ```no_run
//! // Decode SNPP VIIRS science packets from a raw downlink capture
//! for packet in downlink::read_framed_packets("snpp.dat", 157, 4, 0, 0).unwrap() {
//!     let packet = packet.unwrap();
//!     println!("apid={} len={}", packet.header.apid, packet.data.len());
//! }
//! ```
//!
//! # References
//! * CCSDS Space Packet Protocol 133.0-B-1
//! * CCSDS AOS Space Data Link Protocol 732.0-B-4
//! * CCSDS TM Synchronization and Channel Coding 131.0-B-5

mod error;
mod frame;
mod reassembly;
mod sync;

pub mod packet;
pub mod pn;
pub mod rs;
pub mod timecode;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub use error::{Error, Result};
pub use frame::{
    missing_frames, Frame, FrameDecoder, FrameDecoderBuilder, FrameIter, Mpdu, Scid, Vcid,
    VCDUHeader,
};
pub use packet::{
    collect_packet_groups, missing_packets, Apid, Packet, PacketGroup, PrimaryHeader,
};
pub use reassembly::{decode_framed_packets, DecodedPacket, FramedPacketIter, Reassembler};
pub use rs::RsState;
pub use sync::{read_cadus, CaduIter, Synchronizer, ASM};

/// Decode transfer [Frame]s from the file at `path`.
///
/// The stream is synchronized, derandomized, and Reed-Solomon corrected
/// with the given `interleave`. Streams without Reed-Solomon parity have no
/// interleave to infer the frame size from; decode those with
/// [FrameDecoderBuilder::frame_length] instead.
///
/// # Errors
/// [Error::InvalidConfig] when `interleave` is 0, [Error::Io] if the file
/// cannot be opened.
pub fn read_frames<P>(path: P, interleave: usize) -> Result<impl Iterator<Item = Result<Frame>>>
where
    P: AsRef<Path>,
{
    if interleave == 0 {
        return Err(Error::InvalidConfig(
            "reed-solomon interleave is required; for streams without parity use \
             FrameDecoderBuilder::frame_length"
                .into(),
        ));
    }
    let decoder = FrameDecoderBuilder::new().reed_solomon(interleave).build()?;
    let file = File::open(path)?;
    Ok(decoder.decode_reader(file))
}

/// Read [Packet]s from a file of byte-aligned contiguous space packets with
/// no framing, e.g. a level-0 product.
///
/// # Errors
/// [Error::Io] if the file cannot be opened.
pub fn read_packets<P>(path: P) -> Result<impl Iterator<Item = Result<Packet>>>
where
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    Ok(packet::read_packets(BufReader::new(file)))
}

/// Group packets read from the file at `path` by their sequence flags; see
/// [collect_packet_groups].
///
/// # Errors
/// [Error::Io] if the file cannot be opened.
pub fn read_packet_groups<P>(path: P) -> Result<impl Iterator<Item = PacketGroup>>
where
    P: AsRef<Path>,
{
    Ok(collect_packet_groups(
        read_packets(path)?.filter_map(Result::ok),
    ))
}

/// Decode space [Packet]s from the raw CADU stream in the file at `path`.
///
/// Frames whose spacecraft id is not `scid` are dropped. `izone_length` and
/// `trailer_length` give the per-frame insert-zone and trailer sizes, both
/// usually 0. For scid/vcid-annotated packets or RS-less streams compose
/// [FrameDecoder] with [decode_framed_packets] directly.
///
/// # Errors
/// [Error::InvalidConfig] when `interleave` is 0, [Error::Io] if the file
/// cannot be opened.
pub fn read_framed_packets<P>(
    path: P,
    scid: Scid,
    interleave: usize,
    izone_length: usize,
    trailer_length: usize,
) -> Result<impl Iterator<Item = Result<Packet>>>
where
    P: AsRef<Path>,
{
    let frames = read_frames(path, interleave)?.filter(move |zult| match zult {
        Ok(frame) => frame.header.scid == scid,
        Err(_) => true,
    });
    let packets = decode_framed_packets(frames, izone_length, trailer_length);
    Ok(packets.map(|zult| zult.map(|decoded| decoded.packet)))
}
