//! Endian probe — the fixed "known bytes" block between the sensor list
//! and the record stream.
//!
//! Layout (16 bytes): tag `'s'`, byte `'a'`, `i16` 0x1234, `f32` 123.456,
//! `f64` 123456789.12345, all written in the machine order of the glider
//! that produced the file.  The i16 decides the byte order; the two
//! floats must round-trip in that order within [`FLOAT_TOLERANCE`].

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::error::{DbdError, Result};

pub const PROBE_LEN: usize = 16;

const PROBE_TAG: u8 = b's';
const PROBE_MARK: u8 = b'a';
const PROBE_I16: i16 = 0x1234;
const PROBE_F32: f32 = 123.456;
const PROBE_F64: f64 = 123_456_789.123_45;
const FLOAT_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Byte-order oracle for one file's record stream.
#[derive(Debug, Clone, Copy)]
pub struct KnownBytes {
    order: Endian,
}

impl KnownBytes {
    /// Read and validate the probe block; the stream is left positioned
    /// at the first record tag.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut block = [0u8; PROBE_LEN];
        reader.read_exact(&mut block).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                DbdError::CorruptEndianProbe
            } else {
                DbdError::Io(e)
            }
        })?;

        if block[0] != PROBE_TAG || block[1] != PROBE_MARK {
            return Err(DbdError::CorruptEndianProbe);
        }

        let i16_bytes = [block[2], block[3]];
        let order = if i16::from_le_bytes(i16_bytes) == PROBE_I16 {
            Endian::Little
        } else if i16::from_be_bytes(i16_bytes) == PROBE_I16 {
            Endian::Big
        } else {
            return Err(DbdError::CorruptEndianProbe);
        };

        let f32_bytes = [block[4], block[5], block[6], block[7]];
        let f32_val = match order {
            Endian::Little => f32::from_le_bytes(f32_bytes),
            Endian::Big => f32::from_be_bytes(f32_bytes),
        };
        if (f32_val as f64 - PROBE_F32 as f64).abs() > FLOAT_TOLERANCE {
            return Err(DbdError::CorruptEndianProbe);
        }

        let mut f64_bytes = [0u8; 8];
        f64_bytes.copy_from_slice(&block[8..16]);
        let f64_val = match order {
            Endian::Little => f64::from_le_bytes(f64_bytes),
            Endian::Big => f64::from_be_bytes(f64_bytes),
        };
        if (f64_val - PROBE_F64).abs() > FLOAT_TOLERANCE {
            return Err(DbdError::CorruptEndianProbe);
        }

        Ok(Self { order })
    }

    pub fn order(&self) -> Endian {
        self.order
    }

    pub fn read_i8<R: Read>(&self, reader: &mut R) -> io::Result<i8> {
        reader.read_i8()
    }

    pub fn read_i16<R: Read>(&self, reader: &mut R) -> io::Result<i16> {
        match self.order {
            Endian::Little => reader.read_i16::<LittleEndian>(),
            Endian::Big => reader.read_i16::<BigEndian>(),
        }
    }

    pub fn read_f32<R: Read>(&self, reader: &mut R) -> io::Result<f32> {
        match self.order {
            Endian::Little => reader.read_f32::<LittleEndian>(),
            Endian::Big => reader.read_f32::<BigEndian>(),
        }
    }

    pub fn read_f64<R: Read>(&self, reader: &mut R) -> io::Result<f64> {
        match self.order {
            Endian::Little => reader.read_f64::<LittleEndian>(),
            Endian::Big => reader.read_f64::<BigEndian>(),
        }
    }
}

/// Encode the probe block in the given order (test fixtures and the
/// criterion bench build synthetic streams with this).
pub fn encode_probe(order: Endian) -> [u8; PROBE_LEN] {
    let mut block = [0u8; PROBE_LEN];
    block[0] = PROBE_TAG;
    block[1] = PROBE_MARK;
    match order {
        Endian::Little => {
            block[2..4].copy_from_slice(&PROBE_I16.to_le_bytes());
            block[4..8].copy_from_slice(&PROBE_F32.to_le_bytes());
            block[8..16].copy_from_slice(&PROBE_F64.to_le_bytes());
        }
        Endian::Big => {
            block[2..4].copy_from_slice(&PROBE_I16.to_be_bytes());
            block[4..8].copy_from_slice(&PROBE_F32.to_be_bytes());
            block[8..16].copy_from_slice(&PROBE_F64.to_be_bytes());
        }
    }
    block
}
