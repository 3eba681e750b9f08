//! Timecode decoding for CCSDS space packet secondary headers.
//!
//! Two formats are supported: the day-segmented timecode (CDS) used by the
//! JPSS spacecraft and most EOS science packets, and the unsegmented
//! timecode (CUC) variant used by the EOS Aqua and Terra spacecraft.
//!
//! # References
//! 1. [CCSDS Time Code Formats (301.0-B-4)](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
//!    Section 3.2
//! 2. EOS PM-1 Spacecraft to EOS Ground System ICD (GSFC 422-11-19-03),
//!    Figure 5.5.1-1

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

// Seconds between the CCSDS epoch (1958-01-01) and the Unix epoch
// (1970-01-01): 4383 days.
const EPOCH_DELTA_SECONDS: i64 = 378_691_200;

/// CCSDS Day-Segmented timecode: days since 1958, milliseconds of day,
/// microseconds of millisecond.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Cds {
    pub days: u16,
    pub millis: u32,
    pub micros: u16,
}

impl Cds {
    pub const LEN: usize = 8;

    /// Decode from big-endian bytes.
    ///
    /// # Errors
    /// [Error::Truncated] if fewer than [Self::LEN] bytes are provided.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::Truncated {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        Ok(Cds {
            days: u16::from_be_bytes([buf[0], buf[1]]),
            millis: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            micros: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }
}

/// Decode CCSDS day-segmented timecode bytes to a UTC datetime.
///
/// # Errors
/// [Error::Truncated] if there are not enough bytes.
pub fn decode_cds(buf: &[u8]) -> Result<DateTime<Utc>> {
    let cds = Cds::decode(buf)?;

    let secs = i64::from(cds.days) * 86_400 + i64::from(cds.millis) / 1_000;
    let nanos = u32::try_from(
        u64::from(cds.millis) * 1_000_000 % 1_000_000_000 + u64::from(cds.micros) * 1_000,
    )
    .expect("sub-second nanos fit in u32");

    let epoch = Utc
        .timestamp_opt(secs, nanos)
        .single()
        .expect("in-range timestamp");
    Ok(epoch - Duration::seconds(EPOCH_DELTA_SECONDS))
}

/// Decode CCSDS day-segmented timecode bytes to UTC milliseconds since the
/// Unix epoch.
///
/// # Errors
/// [Error::Truncated] if there are not enough bytes.
pub fn decode_cds_timecode(buf: &[u8]) -> Result<i64> {
    Ok(decode_cds(buf)?.timestamp_millis())
}

/// CCSDS unsegmented timecode as used by NASA EOS Aqua & Terra: 4 bytes of
/// coarse TAI seconds since 1958 and 4 bytes of fine time in units of
/// 2^-32 seconds.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EosCuc {
    pub seconds: u32,
    pub sub_seconds: u32,
}

impl EosCuc {
    pub const LEN: usize = 8;

    // TAI-to-UTC offset fixed by the EOS mission convention.
    const LEAP_SECONDS: i64 = 32;

    /// Decode from big-endian bytes.
    ///
    /// # Errors
    /// [Error::Truncated] if fewer than [Self::LEN] bytes are provided.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::Truncated {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        Ok(EosCuc {
            seconds: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            sub_seconds: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// Decode EOS unsegmented timecode bytes to a UTC datetime.
///
/// # Errors
/// [Error::Truncated] if there are not enough bytes.
pub fn decode_eoscuc(buf: &[u8]) -> Result<DateTime<Utc>> {
    let cuc = EosCuc::decode(buf)?;

    let secs = i64::from(cuc.seconds) - EosCuc::LEAP_SECONDS;
    let nanos =
        u32::try_from((u64::from(cuc.sub_seconds) * 1_000_000_000) >> 32).expect("nanos < 1e9");

    let epoch = Utc
        .timestamp_opt(secs, nanos)
        .single()
        .expect("in-range timestamp");
    Ok(epoch - Duration::seconds(EPOCH_DELTA_SECONDS))
}

/// Decode EOS unsegmented timecode bytes to UTC milliseconds since the
/// Unix epoch.
///
/// # Errors
/// [Error::Truncated] if there are not enough bytes.
pub fn decode_eoscuc_timecode(buf: &[u8]) -> Result<i64> {
    Ok(decode_eoscuc(buf)?.timestamp_millis())
}
