//! CCSDS transfer frame decoding.
//!
//! Turns synchronized CADU candidates into [Frame]s: strip the ASM, remove
//! pseudo-noise, Reed-Solomon check/correct when configured, and parse the
//! VCDU primary header.
//!
//! # References
//! 1. CCSDS AOS Space Data Link Protocol 732.0-B-4
//!    - <https://public.ccsds.org/Pubs/732x0b4.pdf>

use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pn;
use crate::rs::{self, RsState};
use crate::sync::ASM;

pub type Scid = u16;
pub type Vcid = u16;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct VCDUHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub counter: u32,
    pub replay: bool,
    /// VC frame count usage flag.
    pub cycle: bool,
    pub counter_cycle: u8,
}

impl VCDUHeader {
    /// VCDU header length in bytes.
    pub const LEN: usize = 6;
    /// VCID indicating a fill frame.
    pub const FILL: Vcid = 63;
    /// Modulus of the 24-bit frame counter.
    pub const COUNTER_MOD: u32 = 1 << 24;

    /// Construct from the provided bytes, or `None` if there are not enough
    /// bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }

        let x = u16::from_be_bytes([dat[0], dat[1]]);
        Some(VCDUHeader {
            version: (dat[0] >> 6) & 0x3,
            scid: (x >> 6) & 0xff,
            vcid: x & 0x3f,
            counter: u32::from_be_bytes([0, dat[2], dat[3], dat[4]]),
            replay: (dat[5] >> 7) & 0x1 == 1,
            cycle: (dat[5] >> 6) & 0x1 == 1,
            counter_cycle: dat[5] & 0xf,
        })
    }
}

/// View of a frame's M_PDU zone: a 2-byte header whose low 11 bits are the
/// first-header pointer, followed by packet bytes.
#[derive(Debug, Clone, Copy)]
pub struct Mpdu<'a> {
    first_header: u16,
    data: &'a [u8],
}

impl<'a> Mpdu<'a> {
    /// First-header pointer value indicating the frame carries only fill.
    pub const FILL: u16 = 0x7fe;
    /// First-header pointer value indicating no packet starts in this
    /// frame.
    pub const NO_HEADER: u16 = 0x7ff;

    /// Decode the M_PDU from `data`, or `None` if there are not enough
    /// bytes.
    #[must_use]
    pub fn decode(data: &'a [u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let x = u16::from_be_bytes([data[0], data[1]]);
        Some(Mpdu {
            first_header: x & 0x7ff,
            data,
        })
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.first_header == Self::FILL
    }

    /// True when a packet primary header begins somewhere in this M_PDU.
    #[must_use]
    pub fn has_header(&self) -> bool {
        self.first_header != Self::NO_HEADER
    }

    /// Offset of the first packet header within [Self::payload].
    #[must_use]
    pub fn header_offset(&self) -> usize {
        self.first_header as usize
    }

    /// The packet bytes following the M_PDU header.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[2..]
    }
}

/// A transfer frame and the disposition of its decoding.
///
/// `data` holds the full frame starting with the 6 header bytes; the ASM
/// and any Reed-Solomon parity are already gone. Insert zone and trailer
/// bytes, if the mission uses them, are still present and are skipped at
/// the packet layer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: VCDUHeader,
    pub rsstate: RsState,
    pub data: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.vcid == VCDUHeader::FILL
    }

    /// Extract the M_PDU, skipping `izone_length` insert-zone bytes after
    /// the header and `trailer_length` bytes at the end, or `None` if the
    /// frame is too short for either.
    #[must_use]
    pub fn mpdu(&self, izone_length: usize, trailer_length: usize) -> Option<Mpdu> {
        let start = VCDUHeader::LEN + izone_length;
        let end = self.data.len().checked_sub(trailer_length)?;
        if start > end {
            return None;
        }
        Mpdu::decode(&self.data[start..end])
    }
}

/// Number of frames missing between the counters of two frames observed
/// back-to-back on a virtual channel, i.e. `(cur - last - 1) mod 2^24`.
///
/// Zero when `cur` immediately follows `last` (including across the wrap);
/// a repeated counter reads as `2^24 - 1` missing.
#[must_use]
pub fn missing_frames(cur: u32, last: u32) -> u32 {
    cur.wrapping_sub(last).wrapping_sub(1) % VCDUHeader::COUNTER_MOD
}

/// Configures a [FrameDecoder].
///
/// One of [reed_solomon](Self::reed_solomon) or
/// [frame_length](Self::frame_length) must be provided so the CADU size is
/// known.
#[derive(Debug, Clone)]
pub struct FrameDecoderBuilder {
    interleave: usize,
    frame_length: Option<usize>,
    derandomize: bool,
}

impl Default for FrameDecoderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoderBuilder {
    #[must_use]
    pub fn new() -> Self {
        FrameDecoderBuilder {
            interleave: 0,
            frame_length: None,
            derandomize: true,
        }
    }

    /// Enable Reed-Solomon with the given interleave. The CADU body length
    /// becomes `255 * interleave`.
    #[must_use]
    pub fn reed_solomon(mut self, interleave: usize) -> Self {
        self.interleave = interleave;
        self
    }

    /// Set the frame length for streams without Reed-Solomon parity.
    /// Ignored when an interleave is set.
    #[must_use]
    pub fn frame_length(mut self, len: usize) -> Self {
        self.frame_length = Some(len);
        self
    }

    /// Enable or disable pseudo-noise removal. On by default.
    #[must_use]
    pub fn derandomize(mut self, yes: bool) -> Self {
        self.derandomize = yes;
        self
    }

    /// Build the decoder.
    ///
    /// # Errors
    /// [Error::InvalidConfig] when neither an interleave nor a frame length
    /// is set, or the configured frame is too short to hold a VCDU header.
    pub fn build(self) -> Result<FrameDecoder> {
        let frame_length = match (self.interleave, self.frame_length) {
            (0, None) => {
                return Err(Error::InvalidConfig(
                    "one of reed-solomon interleave or frame length is required".into(),
                ));
            }
            (0, Some(len)) => len,
            (i, _) => rs::K * i,
        };
        if frame_length < VCDUHeader::LEN {
            return Err(Error::InvalidConfig(format!(
                "frame length {frame_length} cannot hold a VCDU header"
            )));
        }
        Ok(FrameDecoder {
            interleave: self.interleave,
            frame_length,
            derandomize: self.derandomize,
        })
    }
}

/// Decodes CADUs into [Frame]s.
///
/// # Examples
/// ```no_run
/// use downlink::{read_cadus, FrameDecoderBuilder};
///
/// let decoder = FrameDecoderBuilder::new().reed_solomon(4).build().unwrap();
/// let file = std::fs::File::open("downlink.dat").unwrap();
/// let cadus = read_cadus(file, decoder.cadu_length());
/// for frame in decoder.decode(cadus) {
///     let frame = frame.unwrap();
///     println!("vcid={} counter={}", frame.header.vcid, frame.header.counter);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    interleave: usize,
    frame_length: usize,
    derandomize: bool,
}

impl FrameDecoder {
    /// Full CADU length for this configuration, ASM included.
    #[must_use]
    pub fn cadu_length(&self) -> usize {
        ASM.len() + self.block_length()
    }

    /// CADU body length: the frame plus any Reed-Solomon parity.
    #[must_use]
    pub fn block_length(&self) -> usize {
        if self.interleave > 0 {
            rs::N * self.interleave
        } else {
            self.frame_length
        }
    }

    /// Decode CADUs, as produced by [crate::read_cadus], into [Frame]s.
    ///
    /// Frames are produced lazily, in input order. Blocks of unexpected
    /// size are dropped. A frame whose header version is not 1 is emitted
    /// with [RsState::Uncorrected] for downstream inspection.
    pub fn decode<I>(self, cadus: I) -> FrameIter<I>
    where
        I: Iterator<Item = Result<Vec<u8>>>,
    {
        FrameIter {
            decoder: self,
            cadus,
        }
    }

    /// Synchronize `reader` and decode everything it yields.
    pub fn decode_reader<R>(self, reader: R) -> FrameIter<crate::sync::CaduIter<R>>
    where
        R: Read,
    {
        let cadus = crate::sync::Synchronizer::new(reader, self.cadu_length()).into_iter();
        self.decode(cadus)
    }

    fn decode_cadu(&self, cadu: &[u8]) -> Option<Frame> {
        if cadu.len() != self.cadu_length() {
            debug!(len = cadu.len(), "dropping block of unexpected size");
            return None;
        }
        let body = &cadu[ASM.len()..];
        let body = if self.derandomize {
            pn::derandomize(body)
        } else {
            body.to_vec()
        };

        // The first frame bytes are readable before de-interleaving, so
        // peek at the header to skip RS work on fill frames.
        let peek = VCDUHeader::decode(&body)?;

        let (data, rsstate) = if self.interleave == 0 {
            (body, RsState::NotPerformed)
        } else if peek.vcid == VCDUHeader::FILL {
            let mut body = body;
            body.truncate(self.interleave * rs::K);
            (body, RsState::NotPerformed)
        } else {
            rs::correct_codeblock(&body, self.interleave)
        };

        let header = VCDUHeader::decode(&data)?;
        let rsstate = if header.version == 1 {
            rsstate
        } else {
            debug!(version = header.version, "unexpected frame version");
            RsState::Uncorrected
        };

        Some(Frame {
            header,
            rsstate,
            data,
        })
    }
}

/// Lazy [Frame] sequence created by [FrameDecoder::decode].
pub struct FrameIter<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    decoder: FrameDecoder,
    cadus: I,
}

impl<I> Iterator for FrameIter<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.cadus.next()? {
                Ok(cadu) => match self.decoder.decode_cadu(&cadu) {
                    Some(frame) => return Some(Ok(frame)),
                    None => continue,
                },
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
