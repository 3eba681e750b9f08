//! Support for building synthetic downlink streams.
//!
//! Real capture files are too large to ship, so the end-to-end tests
//! encode their own: space packets are packed into M_PDUs, framed,
//! Reed-Solomon encoded, randomized, and prefixed with the ASM, which is
//! exactly the transmit-side stack the decoder undoes.

use downlink::packet::{PrimaryHeader, SEQ_UNSEGMENTED};
use downlink::rs::{dual_basis, gf, K, N, PARITY_LEN};
use downlink::{pn, Apid, Vcid, ASM};

/// Systematically encode 223 dual-basis message symbols into a 255-symbol
/// dual-basis codeword.
pub fn rs_encode(message: &[u8]) -> Vec<u8> {
    assert_eq!(message.len(), K);

    // g(x) has roots alpha^(11*(112+j)) for j in 0..32
    let mut gen = vec![1u8];
    for j in 0..PARITY_LEN {
        gen = gf::poly_mult(&gen, &[1, gf::pow(173, 112 + j as i32)]);
    }

    let mut padded = dual_basis::to_conv(message);
    padded.resize(N, 0);
    let (_, parity) = gf::poly_div(&padded, &gen);

    let mut codeword = padded;
    codeword.truncate(K);
    codeword.extend(parity);
    dual_basis::to_dual(&codeword)
}

/// Interleave `interleave` codewords encoded from a `223 * interleave`
/// byte frame into a `255 * interleave` byte codeblock.
pub fn encode_codeblock(frame: &[u8], interleave: usize) -> Vec<u8> {
    assert_eq!(frame.len(), K * interleave);

    let mut words = vec![vec![0u8; K]; interleave];
    for (j, &b) in frame.iter().enumerate() {
        words[j % interleave][j / interleave] = b;
    }

    let mut block = vec![0u8; N * interleave];
    for (w, word) in words.iter().enumerate() {
        for (p, &b) in rs_encode(word).iter().enumerate() {
            block[w + p * interleave] = b;
        }
    }
    block
}

/// Build a full CADU: ASM + randomized RS codeblock.
pub fn encode_cadu(frame: &[u8], interleave: usize) -> Vec<u8> {
    let mut cadu = ASM.to_vec();
    // randomization is the same XOR the decoder applies
    cadu.extend(pn::derandomize(&encode_codeblock(frame, interleave)));
    cadu
}

/// An unsegmented packet of `total_len` bytes with a recognizable body.
pub fn make_packet(apid: Apid, seq: u16, total_len: usize) -> Vec<u8> {
    let header = PrimaryHeader {
        version: 0,
        type_flag: 0,
        has_secondary_header: false,
        apid,
        sequence_flags: SEQ_UNSEGMENTED,
        sequence_id: seq,
        len_minus1: (total_len - PrimaryHeader::LEN - 1) as u16,
    };
    let mut dat = header.encode().to_vec();
    for i in dat.len()..total_len {
        dat.push((i % 251) as u8);
    }
    dat
}

/// Pack a contiguous packet stream into transfer frames of `frame_len`
/// bytes (header and M_PDU header included), computing each frame's
/// first-header pointer from the packet boundaries. The stream must fill
/// the frames exactly.
pub fn frames_to_cadus(
    packets: &[Vec<u8>],
    vcid: Vcid,
    first_counter: u32,
    frame_len: usize,
    interleave: usize,
) -> Vec<Vec<u8>> {
    let payload_len = frame_len - 6 - 2;

    let mut stream = Vec::new();
    let mut boundaries = Vec::new();
    for p in packets {
        boundaries.push(stream.len());
        stream.extend(p);
    }
    assert_eq!(
        stream.len() % payload_len,
        0,
        "packet stream must fill frames exactly"
    );

    let mut cadus = Vec::new();
    for (i, chunk) in stream.chunks(payload_len).enumerate() {
        let lo = i * payload_len;
        let fhp = boundaries
            .iter()
            .find(|&&b| b >= lo && b < lo + payload_len)
            .map_or(0x7ff, |&b| (b - lo) as u16);

        let counter = first_counter + i as u32;
        let x: u16 = (1 << 14) | (157u16 << 6) | vcid;
        let mut frame = x.to_be_bytes().to_vec();
        frame.extend(&counter.to_be_bytes()[1..]);
        frame.push(0);
        frame.extend(fhp.to_be_bytes());
        frame.extend(chunk);
        assert_eq!(frame.len(), frame_len);

        cadus.push(encode_cadu(&frame, interleave));
    }
    cadus
}
