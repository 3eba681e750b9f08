//! CADU synchronization.
//!
//! Locates the attached sync marker in a raw downlink byte stream and
//! carves the stream into fixed-length CADU candidates. Operation is
//! byte-aligned: once the four ASM bytes are seen the stream is assumed to
//! stay aligned until a block arrives without a leading ASM, at which point
//! the scanner falls back to searching. A block with a damaged ASM is still
//! emitted since Reed-Solomon may recover it.

use std::io::{BufReader, ErrorKind, Read};

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// CCSDS attached sync marker.
pub const ASM: [u8; 4] = [0x1a, 0xcf, 0xfc, 0x1d];

/// Scans a byte stream for CADUs.
///
/// `cadu_length` is the full CADU size, ASM included, and emitted blocks
/// include the ASM bytes.
pub struct Synchronizer<R>
where
    R: Read,
{
    reader: BufReader<R>,
    cadu_length: usize,
    locked: bool,
    /// Number of times lock was acquired from a search.
    pub lock_count: u64,
}

impl<R> Synchronizer<R>
where
    R: Read,
{
    pub fn new(reader: R, cadu_length: usize) -> Self {
        assert!(cadu_length > ASM.len(), "cadu length must exceed the ASM");
        Synchronizer {
            reader: BufReader::new(reader),
            cadu_length,
            locked: false,
            lock_count: 0,
        }
    }

    // Read exactly buf.len() bytes, mapping a clean EOF to None.
    fn fill(&mut self, buf: &mut [u8]) -> Result<Option<()>> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(Some(())),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn read_one(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        Ok(self.fill(&mut b)?.map(|()| b[0]))
    }

    // Slide a 4-byte window until it equals the ASM, then pull the block
    // body. Any partial block at end of stream is dropped.
    fn search(&mut self) -> Result<Option<Vec<u8>>> {
        let mut window = [0u8; 4];
        if self.fill(&mut window)?.is_none() {
            return Ok(None);
        }
        loop {
            if window == ASM {
                let mut cadu = vec![0u8; self.cadu_length];
                cadu[..4].copy_from_slice(&window);
                if self.fill(&mut cadu[4..])?.is_none() {
                    return Ok(None);
                }
                self.locked = true;
                self.lock_count += 1;
                trace!("sync acquired");
                return Ok(Some(cadu));
            }
            let Some(b) = self.read_one()? else {
                return Ok(None);
            };
            window.rotate_left(1);
            window[3] = b;
        }
    }

    /// Fetch the next CADU candidate, or `None` at end of stream.
    ///
    /// # Errors
    /// [Error::Io] for any read failure other than end of stream.
    pub fn cadu(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.locked {
            return self.search();
        }

        let mut cadu = vec![0u8; self.cadu_length];
        if self.fill(&mut cadu)?.is_none() {
            return Ok(None);
        }
        if cadu[..4] != ASM {
            // A single flipped ASM bit should not cost a whole frame, so
            // emit the block, but trust the alignment no further.
            debug!("sync lost, emitting block and resuming search");
            self.locked = false;
        }
        Ok(Some(cadu))
    }
}

impl<R> IntoIterator for Synchronizer<R>
where
    R: Read,
{
    type Item = Result<Vec<u8>>;
    type IntoIter = CaduIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        CaduIter { scanner: self }
    }
}

/// Iterator over synchronized CADU candidates. Ends at end of stream; IO
/// errors are yielded once and end the iteration.
pub struct CaduIter<R>
where
    R: Read,
{
    scanner: Synchronizer<R>,
}

impl<R> Iterator for CaduIter<R>
where
    R: Read,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scanner.cadu().transpose()
    }
}

/// Creates an iterator of CADU candidates of `cadu_length` bytes (ASM
/// included) located in the stream read from `reader`.
///
/// The first CADU begins at the first ASM occurrence; trailing bytes that
/// do not fill a whole CADU are dropped.
pub fn read_cadus<R>(reader: R, cadu_length: usize) -> impl Iterator<Item = Result<Vec<u8>>>
where
    R: Read,
{
    Synchronizer::new(reader, cadu_length).into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadu_with_body(fill: u8, len: usize) -> Vec<u8> {
        let mut cadu = ASM.to_vec();
        cadu.resize(len, fill);
        cadu
    }

    #[test]
    fn finds_unaligned_asm() {
        let mut stream = vec![0x00, 0xa5, 0x1a];
        stream.extend(cadu_with_body(0x11, 10));
        stream.extend(cadu_with_body(0x22, 10));

        let cadus: Vec<Vec<u8>> = read_cadus(&stream[..], 10).map(|z| z.unwrap()).collect();

        assert_eq!(cadus.len(), 2);
        assert_eq!(cadus[0], cadu_with_body(0x11, 10));
        assert_eq!(cadus[1], cadu_with_body(0x22, 10));
    }

    #[test]
    fn emits_block_with_damaged_asm_then_resyncs() {
        let mut corrupt = cadu_with_body(0x22, 10);
        corrupt[0] ^= 0x01;

        let mut stream = Vec::new();
        stream.extend(cadu_with_body(0x11, 10));
        stream.extend(&corrupt);
        stream.extend(cadu_with_body(0x33, 10));

        let cadus: Vec<Vec<u8>> = read_cadus(&stream[..], 10).map(|z| z.unwrap()).collect();

        assert_eq!(cadus.len(), 3);
        assert_eq!(cadus[1], corrupt, "damaged block should still be emitted");
        assert_eq!(cadus[2], cadu_with_body(0x33, 10));
    }

    #[test]
    fn drops_partial_block_at_eof() {
        let mut stream = cadu_with_body(0x11, 10);
        stream.extend(&ASM);
        stream.extend(&[1, 2, 3]); // not enough for a block

        let cadus: Vec<Vec<u8>> = read_cadus(&stream[..], 10).map(|z| z.unwrap()).collect();

        assert_eq!(cadus.len(), 1);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let stream: &[u8] = &[];
        assert_eq!(read_cadus(stream, 10).count(), 0);
    }

    #[test]
    fn asm_bytes_inside_body_are_not_markers() {
        // body contains the ASM pattern; lock keeps block cadence
        let mut body = vec![0u8; 6];
        body[..4].copy_from_slice(&ASM);
        let mut stream = ASM.to_vec();
        stream.extend(&body);
        let mut second = ASM.to_vec();
        second.extend(vec![0x44u8; 6]);
        stream.extend(&second);

        let cadus: Vec<Vec<u8>> = read_cadus(&stream[..], 10).map(|z| z.unwrap()).collect();
        assert_eq!(cadus.len(), 2);
        assert_eq!(&cadus[1][4..], &[0x44u8; 6][..]);
    }
}
