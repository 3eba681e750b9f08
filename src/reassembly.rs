//! Space packet reassembly from transfer frames.
//!
//! Packets are variable length and cross frame boundaries, so each virtual
//! channel carries its own reassembly state: a byte cache of packet data
//! accumulated from M_PDUs and a sync flag saying whether the cache is
//! anchored at a known packet boundary. Sync is acquired from a frame's
//! first-header pointer and lost whenever data goes missing (frame counter
//! gap, failed Reed-Solomon) or the byte stream stops making sense.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::frame::{missing_frames, Frame, Scid, Vcid};
use crate::packet::{Packet, PrimaryHeader};
use crate::rs::RsState;

/// A [Packet] annotated with the spacecraft and virtual channel it arrived
/// on. Useful when multiplexed streams share a source.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub scid: Scid,
    pub vcid: Vcid,
    pub packet: Packet,
}

#[derive(Default)]
struct VcidTracker {
    /// Packet bytes carried over from previous frames, always anchored at
    /// a packet boundary while `sync` holds.
    cache: Vec<u8>,
    /// True while the cache is anchored at a packet boundary.
    sync: bool,
    last_counter: Option<u32>,
}

impl VcidTracker {
    fn reset(&mut self) {
        self.cache.clear();
        self.sync = false;
    }

    /// Bytes still owed to the packet under construction, or `None` when
    /// the cache holds only a header fragment and the total is unknowable.
    fn bytes_owed(&self) -> Option<usize> {
        if self.cache.is_empty() {
            return Some(0);
        }
        if self.cache.len() < PrimaryHeader::LEN {
            return None;
        }
        let header = PrimaryHeader::decode(&self.cache).expect("cache holds a full header");
        Some(header.packet_len() - self.cache.len())
    }
}

impl Display for VcidTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VcidTracker{{sync={}, cache_len={}}}",
            self.sync,
            self.cache.len()
        )
    }
}

/// Reassembles [Frame]s into [DecodedPacket]s.
///
/// Construction is cheap; all state lives in the iterator returned by
/// [reassemble](Self::reassemble).
#[derive(Debug, Default, Clone)]
pub struct Reassembler {
    izone_length: usize,
    trailer_length: usize,
    use_uncorrected: bool,
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of insert-zone bytes between the VCDU header and the M_PDU.
    #[must_use]
    pub fn izone_length(mut self, len: usize) -> Self {
        self.izone_length = len;
        self
    }

    /// Number of trailer bytes at the end of each frame.
    #[must_use]
    pub fn trailer_length(mut self, len: usize) -> Self {
        self.trailer_length = len;
        self
    }

    /// Consume frames that failed Reed-Solomon rather than treating them as
    /// lost. Off by default; an uncorrected frame's bytes are suspect and
    /// normally poison the packet under construction.
    #[must_use]
    pub fn use_uncorrected(mut self, yes: bool) -> Self {
        self.use_uncorrected = yes;
        self
    }

    /// Reassemble packets from `frames`, per virtual channel.
    ///
    /// Fill frames (VCID 63) are skipped. Idle packets (APID 0x7ff) are
    /// emitted; filter on [Packet::is_idle] if unwanted. An `Err` from
    /// `frames` is passed through once and ends the stream.
    pub fn reassemble<I>(self, frames: I) -> FramedPacketIter<I>
    where
        I: Iterator<Item = Result<Frame>>,
    {
        FramedPacketIter {
            frames,
            izone_length: self.izone_length,
            trailer_length: self.trailer_length,
            use_uncorrected: self.use_uncorrected,
            trackers: HashMap::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

/// Iterator created by [Reassembler::reassemble].
pub struct FramedPacketIter<I>
where
    I: Iterator<Item = Result<Frame>>,
{
    frames: I,
    izone_length: usize,
    trailer_length: usize,
    use_uncorrected: bool,

    trackers: HashMap<(Scid, Vcid), VcidTracker>,
    /// Packets already reassembled, waiting to be handed out.
    ready: VecDeque<DecodedPacket>,
    done: bool,
}

impl<I> FramedPacketIter<I>
where
    I: Iterator<Item = Result<Frame>>,
{
    // Pull complete packets off the front of the tracker cache onto the
    // ready queue, leaving any unterminated tail in place.
    fn extract(&mut self, key: (Scid, Vcid)) {
        let tracker = self.trackers.get_mut(&key).expect("tracker exists");
        loop {
            if tracker.cache.len() < PrimaryHeader::LEN {
                return;
            }
            let header = PrimaryHeader::decode(&tracker.cache).expect("cache holds a full header");
            if header.version != 0 {
                warn!(version = header.version, "bad packet version, resyncing");
                tracker.reset();
                return;
            }
            let need = header.packet_len();
            if tracker.cache.len() < need {
                return;
            }
            let data: Vec<u8> = tracker.cache.drain(..need).collect();
            self.ready.push_back(DecodedPacket {
                scid: key.0,
                vcid: key.1,
                packet: Packet { header, data },
            });
        }
    }
}

impl<I> Iterator for FramedPacketIter<I>
where
    I: Iterator<Item = Result<Frame>>,
{
    type Item = Result<DecodedPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(packet) = self.ready.pop_front() {
            return Some(Ok(packet));
        }
        if self.done {
            return None;
        }

        loop {
            let Some(zult) = self.frames.next() else {
                break;
            };
            let frame = match zult {
                Ok(frame) => frame,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if frame.is_fill() {
                continue;
            }

            let key = (frame.header.scid, frame.header.vcid);
            let tracker = self.trackers.entry(key).or_default();

            // Counter continuity. Missing frames may have carried bytes of
            // the packet under construction, which is then unrecoverable.
            let missing = match tracker.last_counter {
                Some(last) => missing_frames(frame.header.counter, last),
                None => 0,
            };
            tracker.last_counter = Some(frame.header.counter);
            if missing > 0 {
                trace!(vcid = frame.header.vcid, missing, tracker = %tracker, "missing frames, dropping partial");
                tracker.reset();
            }

            match frame.rsstate {
                RsState::Corrected(num) => {
                    debug!(vcid = frame.header.vcid, corrected = num, "corrected frame");
                }
                RsState::Uncorrected if !self.use_uncorrected => {
                    // Treated like a gap: the partial is poisoned and the
                    // frame's own bytes are not to be trusted.
                    debug!(vcid = frame.header.vcid, tracker = %tracker, "uncorrected frame, dropping partial");
                    tracker.reset();
                    continue;
                }
                _ => {}
            }

            let Some(mpdu) = frame.mpdu(self.izone_length, self.trailer_length) else {
                debug!(vcid = frame.header.vcid, "frame too short for mpdu");
                tracker.reset();
                continue;
            };
            if mpdu.is_fill() {
                // Idle frame: no packet bytes, but nothing was lost either,
                // so any partial stays valid.
                continue;
            }
            let payload = mpdu.payload();

            if tracker.sync {
                if mpdu.has_header() {
                    let fhp = mpdu.header_offset();
                    if fhp > payload.len() {
                        debug!(fhp, len = payload.len(), "first-header pointer out of range");
                        tracker.reset();
                        continue;
                    }
                    match tracker.bytes_owed() {
                        Some(owed) if owed != fhp => {
                            // The packet under construction disagrees with
                            // where the frame says the next one starts;
                            // drop it and restart at the pointer.
                            debug!(owed, fhp, tracker = %tracker, "first-header pointer mismatch, resyncing");
                            tracker.cache = payload[fhp..].to_vec();
                        }
                        _ => tracker.cache.extend_from_slice(payload),
                    }
                } else {
                    tracker.cache.extend_from_slice(payload);
                }
            } else {
                if !mpdu.has_header() {
                    trace!(vcid = frame.header.vcid, "no packet header while searching");
                    continue;
                }
                let fhp = mpdu.header_offset();
                if fhp > payload.len() {
                    debug!(fhp, len = payload.len(), "first-header pointer out of range");
                    continue;
                }
                // Bytes before the pointer belong to a packet whose start
                // was never seen.
                tracker.cache = payload[fhp..].to_vec();
                tracker.sync = true;
            }

            self.extract(key);
            if let Some(packet) = self.ready.pop_front() {
                return Some(Ok(packet));
            }
        }

        // Frame source is exhausted; partials are abandoned.
        self.done = true;
        self.ready.pop_front().map(Ok)
    }
}

/// Reassemble `frames` into the packets contained in their M_PDUs,
/// annotated with origin SCID and VCID.
///
/// Frames should all be from the same spacecraft; each `(scid, vcid)` pair
/// reassembles independently.
pub fn decode_framed_packets<I>(
    frames: I,
    izone_length: usize,
    trailer_length: usize,
) -> impl Iterator<Item = Result<DecodedPacket>>
where
    I: Iterator<Item = Result<Frame>>,
{
    Reassembler::new()
        .izone_length(izone_length)
        .trailer_length(trailer_length)
        .reassemble(frames)
}
