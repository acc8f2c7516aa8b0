//! Record decoder — turns the `'d'`-framed record stream into typed
//! columns.
//!
//! # Record frame
//!
//! Tag byte `'d'` (data) or `'X'` (end); then `ceil(n_sensors/4)`
//! presence bytes, each packing four sensors as 2-bit codes from high to
//! low bits; then, for each code-2 sensor in catalog order, `size` bytes
//! in the byte order the endian probe detected.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | absent — the cell keeps its fill value |
//! | 1 | repeat the sensor's previous value |
//! | 2 | new value follows in the payload |
//! | 3 | reserved — treated like absent |
//!
//! # Row retention
//!
//! A row commits only when at least one criteria sensor is present
//! (code 1 or 2).  When the catalog tags no criteria sensors at all,
//! every record commits.
//!
//! # Failure policy
//!
//! Any error inside the record loop — short read, I/O failure, an
//! undecodable sensor width — ends the parse: columns are truncated to
//! the last committed row and returned as a successful result, so a
//! corrupt or truncated tail never loses the clean prefix.  A row is
//! either fully materialized into every kept column or entirely absent.
//!
//! With `repair` set, an unexpected tag byte triggers a byte-at-a-time
//! scan for the next `'d'` and the parse resumes there; without it the
//! parse ends at the first unexpected tag.

use byteorder::ReadBytesExt;
use std::io::{self, Read};

use crate::catalog::{Sensor, SensorCatalog};
use crate::column::{CellValue, ColumnDataResult, SensorInfo, TypedColumn};
use crate::error::{DbdError, Result};
use crate::known_bytes::KnownBytes;

pub const TAG_DATA: u8 = b'd';
pub const TAG_END: u8 = b'X';

/// Decode the record stream into one column per kept sensor.
///
/// `est_bytes` sizes the initial column allocation (bytes remaining in
/// the stream, or any rough guess); columns double as needed and are
/// trimmed to the committed row count on return.
///
/// Errors surface only from pre-loop setup (a *kept* sensor whose
/// declared width is not 1/2/4/8); everything that goes wrong inside
/// the loop truncates instead.
pub fn read_columns<R: Read>(
    reader: &mut R,
    kb: &KnownBytes,
    catalog: &SensorCatalog,
    repair: bool,
    est_bytes: u64,
) -> Result<ColumnDataResult> {
    let n_sensors = catalog.len();
    let n_presence = n_sensors.div_ceil(4);

    // Output layout.  out_index values may be sparse (union indices in
    // multi-file mode); positions no sensor claims become placeholders.
    let mut sensor_info: Vec<SensorInfo> = Vec::new();
    for sensor in catalog {
        if let Some(oi) = sensor.out_index {
            if oi >= sensor_info.len() {
                sensor_info.resize(oi + 1, SensorInfo::default());
            }
            sensor_info[oi] = SensorInfo {
                name: sensor.name.clone(),
                units: sensor.units.clone(),
                size: sensor.size,
            };
        }
    }

    let init_capacity = (2 * est_bytes as usize / (n_presence + 1) + 1).max(256);

    let mut columns: Vec<TypedColumn> = Vec::with_capacity(sensor_info.len());
    let mut prev: Vec<CellValue> = Vec::with_capacity(sensor_info.len());
    for info in &sensor_info {
        if info.is_placeholder() {
            columns.push(TypedColumn::F64(vec![f64::NAN; init_capacity]));
            prev.push(CellValue::F64(f64::NAN));
        } else {
            let col = TypedColumn::for_size(info.size, init_capacity).ok_or_else(|| {
                DbdError::BadSensorSize { name: info.name.clone(), size: info.size }
            })?;
            prev.push(CellValue::fill_for(info.size).unwrap_or(CellValue::F64(f64::NAN)));
            columns.push(col);
        }
    }

    let mut n_rows = 0usize;
    let outcome = decode_records(
        reader,
        kb,
        catalog,
        repair,
        n_presence,
        &mut columns,
        &mut prev,
        &mut n_rows,
    );
    if let Err(e) = outcome {
        // Corrupt or truncated tail: keep the clean prefix.
        log::debug!("record stream ended early after {n_rows} rows: {e}");
    }

    for col in &mut columns {
        col.finish(n_rows);
    }

    Ok(ColumnDataResult { columns, sensor_info, n_records: n_rows })
}

/// The record loop.  `Ok(())` is a clean end (`'X'`, EOF, or an
/// unexpected tag without repair); `Err` is a mid-stream failure the
/// caller converts into truncation.
#[allow(clippy::too_many_arguments)]
fn decode_records<R: Read>(
    reader: &mut R,
    kb: &KnownBytes,
    catalog: &SensorCatalog,
    repair: bool,
    n_presence: usize,
    columns: &mut [TypedColumn],
    prev: &mut [CellValue],
    n_rows: &mut usize,
) -> Result<()> {
    let keep_without_criteria = catalog.n_criteria() == 0;
    let mut presence = vec![0u8; n_presence];

    loop {
        let tag = match reader.read_u8() {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if tag == TAG_END {
            return Ok(());
        }
        if tag != TAG_DATA {
            // Scan forward for the next data tag; only resume when
            // repair is requested.
            let found = scan_for_data_tag(reader)?;
            if !repair || !found {
                return Ok(());
            }
        }

        match reader.read_exact(&mut presence) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut row_keep = keep_without_criteria;

        for (i, sensor) in catalog.iter().enumerate() {
            let code = (presence[i >> 2] >> (6 - ((i & 0x3) << 1))) & 0x03;
            match code {
                1 => {
                    row_keep |= sensor.criteria;
                    if let Some(oi) = sensor.out_index {
                        columns[oi].put(*n_rows, prev[oi]);
                    }
                }
                2 => {
                    row_keep |= sensor.criteria;
                    // The payload must be consumed even for dropped sensors.
                    let value = read_value(reader, kb, sensor)?;
                    if let Some(oi) = sensor.out_index {
                        columns[oi].put(*n_rows, value);
                        prev[oi] = value;
                    }
                }
                _ => {} // absent or reserved
            }
        }

        if row_keep {
            *n_rows += 1;
        }
    }
}

/// Consume bytes until a `'d'` tag or EOF.  True when a tag was found.
fn scan_for_data_tag<R: Read>(reader: &mut R) -> Result<bool> {
    loop {
        match reader.read_u8() {
            Ok(c) if c == TAG_DATA => return Ok(true),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read one sensor payload in the probed byte order, coercing float
/// infinities to NaN.
fn read_value<R: Read>(reader: &mut R, kb: &KnownBytes, sensor: &Sensor) -> Result<CellValue> {
    match sensor.size {
        1 => Ok(CellValue::I8(kb.read_i8(reader)?)),
        2 => Ok(CellValue::I16(kb.read_i16(reader)?)),
        4 => {
            let v = kb.read_f32(reader)?;
            Ok(CellValue::F32(if v.is_infinite() { f32::NAN } else { v }))
        }
        8 => {
            let v = kb.read_f64(reader)?;
            Ok(CellValue::F64(if v.is_infinite() { f64::NAN } else { v }))
        }
        _ => Err(DbdError::BadSensorSize { name: sensor.name.clone(), size: sensor.size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known_bytes::{encode_probe, Endian};
    use std::io::Cursor;

    fn catalog(lines: &[&str]) -> SensorCatalog {
        let mut cat = SensorCatalog::default();
        for line in lines {
            cat.push(crate::catalog::Sensor::parse(line).unwrap());
        }
        cat.assign_out_indices();
        cat
    }

    fn little_kb() -> KnownBytes {
        KnownBytes::read(&mut Cursor::new(encode_probe(Endian::Little).to_vec())).unwrap()
    }

    /// Presence byte for up to four sensors, high bits first.
    fn presence(codes: &[u8]) -> u8 {
        let mut byte = 0u8;
        for (i, &c) in codes.iter().enumerate() {
            byte |= (c & 0x3) << (6 - 2 * i);
        }
        byte
    }

    #[test]
    fn absent_repeat_new_sequence() {
        // One f32 sensor; codes 2 (3.5), 1, 0 across three records.
        let cat = catalog(&["s: T 0 0 4 x counts"]);
        let kb = little_kb();

        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&3.5f32.to_le_bytes());
        stream.push(TAG_DATA);
        stream.push(presence(&[1]));
        stream.push(TAG_DATA);
        stream.push(presence(&[0]));
        stream.push(TAG_END);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.n_records, 3);
        let col = &res.columns[0];
        assert_eq!(col.value_f64(0), 3.5);
        assert_eq!(col.value_f64(1), 3.5);
        assert!(col.value_f64(2).is_nan());
    }

    #[test]
    fn criteria_filters_rows() {
        // t (f64) is the only criteria sensor; x (f32) is kept but not
        // criteria.  Rows where t is absent are dropped.
        let mut cat = catalog(&["s: T 0 0 8 t timestamp", "s: T 1 1 4 x counts"]);
        cat.apply_criteria(&["t".into()]);

        let kb = little_kb();
        let mut stream = Vec::new();
        // Row 1: t absent, x new 1.0 — dropped.
        stream.push(TAG_DATA);
        stream.push(presence(&[0, 2]));
        stream.extend_from_slice(&1.0f32.to_le_bytes());
        // Row 2: t new 10.0, x repeat — kept.
        stream.push(TAG_DATA);
        stream.push(presence(&[2, 1]));
        stream.extend_from_slice(&10.0f64.to_le_bytes());
        // Row 3: t repeat, x absent — kept.
        stream.push(TAG_DATA);
        stream.push(presence(&[1, 0]));
        stream.push(TAG_END);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.n_records, 2);
        assert_eq!(res.columns[0].value_f64(0), 10.0);
        assert_eq!(res.columns[0].value_f64(1), 10.0);
        // x carried the dropped row's new value into the first kept row
        // via its repeat code; it is absent in the second kept row.
        assert_eq!(res.columns[1].value_f64(0), 1.0);
        assert!(res.columns[1].value_f64(1).is_nan());
    }

    #[test]
    fn repair_resyncs_across_junk() {
        let cat = catalog(&["s: T 0 0 2 x counts"]);
        let kb = little_kb();

        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&42i16.to_le_bytes());
        stream.extend_from_slice(&[0xFF, 0xFF, 0xFF]); // junk
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&43i16.to_le_bytes());
        stream.push(TAG_END);

        let plain = read_columns(&mut Cursor::new(stream.clone()), &kb, &cat, false, 64).unwrap();
        assert_eq!(plain.n_records, 1);
        assert_eq!(plain.columns[0].value_f64(0), 42.0);

        let repaired = read_columns(&mut Cursor::new(stream), &kb, &cat, true, 64).unwrap();
        assert_eq!(repaired.n_records, 2);
        assert_eq!(repaired.columns[0].value_f64(1), 43.0);
    }

    #[test]
    fn truncated_record_keeps_clean_prefix() {
        let cat = catalog(&["s: T 0 0 8 t timestamp"]);
        let kb = little_kb();

        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&5.0f64.to_le_bytes());
        // Second record dies three bytes into its payload.
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&[0x01, 0x02, 0x03]);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.n_records, 1);
        assert_eq!(res.columns[0].value_f64(0), 5.0);
        assert_eq!(res.columns[0].len(), 1);
    }

    #[test]
    fn infinities_become_nan() {
        let cat = catalog(&["s: T 0 0 4 x counts"]);
        let kb = little_kb();

        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&f32::INFINITY.to_le_bytes());
        stream.push(TAG_END);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.n_records, 1);
        assert!(res.columns[0].value_f64(0).is_nan());
    }

    #[test]
    fn dropped_sensor_payload_is_still_consumed() {
        // y is not kept; its payload bytes must be skipped, not left to
        // desync the stream.
        let mut cat = catalog(&["s: T 0 0 4 x counts", "s: T 1 1 2 y counts"]);
        cat.apply_keep(&["x".into()]);
        cat.assign_out_indices();

        let kb = little_kb();
        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2, 2]));
        stream.extend_from_slice(&1.5f32.to_le_bytes());
        stream.extend_from_slice(&7i16.to_le_bytes());
        stream.push(TAG_DATA);
        stream.push(presence(&[2, 0]));
        stream.extend_from_slice(&2.5f32.to_le_bytes());
        stream.push(TAG_END);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.columns.len(), 1);
        assert_eq!(res.n_records, 2);
        assert_eq!(res.columns[0].value_f64(0), 1.5);
        assert_eq!(res.columns[0].value_f64(1), 2.5);
    }

    #[test]
    fn big_endian_payloads_decode() {
        let cat = catalog(&["s: T 0 0 2 x counts"]);
        let kb =
            KnownBytes::read(&mut Cursor::new(encode_probe(Endian::Big).to_vec())).unwrap();

        let mut stream = Vec::new();
        stream.push(TAG_DATA);
        stream.push(presence(&[2]));
        stream.extend_from_slice(&300i16.to_be_bytes());
        stream.push(TAG_END);

        let res = read_columns(&mut Cursor::new(stream), &kb, &cat, false, 64).unwrap();
        assert_eq!(res.columns[0].value_f64(0), 300.0);
    }
}
