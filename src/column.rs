//! Typed output columns.
//!
//! Each sensor's declared byte width maps to a concrete element type
//! (1 → i8, 2 → i16, 4 → f32, 8 → f64); a column is one contiguous
//! buffer of that type.  Cells start at the type-appropriate fill value
//! (integer minimum / NaN) and keep it for rows where the sensor is
//! absent.

use serde::Serialize;

pub const FILL_I8: i8 = i8::MIN;
pub const FILL_I16: i16 = i16::MIN;

/// Floor for the doubling growth policy, so tiny initial estimates do
/// not degenerate into per-row reallocation.
const MIN_GROWTH: usize = 256;

/// One decoded value (or a per-column "previous value" slot).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue {
    I8(i8),
    I16(i16),
    F32(f32),
    F64(f64),
}

impl CellValue {
    /// The fill sentinel for a sensor of the given byte width.
    pub fn fill_for(size: u8) -> Option<CellValue> {
        match size {
            1 => Some(CellValue::I8(FILL_I8)),
            2 => Some(CellValue::I16(FILL_I16)),
            4 => Some(CellValue::F32(f32::NAN)),
            8 => Some(CellValue::F64(f64::NAN)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            CellValue::I8(v) => v as f64,
            CellValue::I16(v) => v as f64,
            CellValue::F32(v) => v as f64,
            CellValue::F64(v) => v,
        }
    }
}

/// Column store: a tagged union over the four element types.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    I8(Vec<i8>),
    I16(Vec<i16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TypedColumn {
    /// Allocate a column for a sensor of `size` bytes, pre-filled to
    /// `capacity` rows.  `None` for sizes outside {1, 2, 4, 8}.
    pub fn for_size(size: u8, capacity: usize) -> Option<Self> {
        match size {
            1 => Some(TypedColumn::I8(vec![FILL_I8; capacity])),
            2 => Some(TypedColumn::I16(vec![FILL_I16; capacity])),
            4 => Some(TypedColumn::F32(vec![f32::NAN; capacity])),
            8 => Some(TypedColumn::F64(vec![f64::NAN; capacity])),
            _ => None,
        }
    }

    pub fn size(&self) -> u8 {
        match self {
            TypedColumn::I8(_) => 1,
            TypedColumn::I16(_) => 2,
            TypedColumn::F32(_) => 4,
            TypedColumn::F64(_) => 8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedColumn::I8(v) => v.len(),
            TypedColumn::I16(v) => v.len(),
            TypedColumn::F32(v) => v.len(),
            TypedColumn::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Double the buffer, padding the tail with fill.  The row index
    /// about to be written must already be < the new length.
    fn grow(&mut self) {
        fn doubled(len: usize) -> usize {
            (len * 2).max(MIN_GROWTH)
        }
        match self {
            TypedColumn::I8(v) => v.resize(doubled(v.len()), FILL_I8),
            TypedColumn::I16(v) => v.resize(doubled(v.len()), FILL_I16),
            TypedColumn::F32(v) => v.resize(doubled(v.len()), f32::NAN),
            TypedColumn::F64(v) => v.resize(doubled(v.len()), f64::NAN),
        }
    }

    /// Write `value` at `row`, growing as needed.  The value's type must
    /// match the column's; a mismatch is a caller bug and is ignored.
    pub fn put(&mut self, row: usize, value: CellValue) {
        while row >= self.len() {
            self.grow();
        }
        match (self, value) {
            (TypedColumn::I8(v), CellValue::I8(x)) => v[row] = x,
            (TypedColumn::I16(v), CellValue::I16(x)) => v[row] = x,
            (TypedColumn::F32(v), CellValue::F32(x)) => v[row] = x,
            (TypedColumn::F64(v), CellValue::F64(x)) => v[row] = x,
            _ => debug_assert!(false, "typed column / cell width mismatch"),
        }
    }

    pub fn get(&self, row: usize) -> CellValue {
        match self {
            TypedColumn::I8(v) => CellValue::I8(v[row]),
            TypedColumn::I16(v) => CellValue::I16(v[row]),
            TypedColumn::F32(v) => CellValue::F32(v[row]),
            TypedColumn::F64(v) => CellValue::F64(v[row]),
        }
    }

    /// Convenience for tests and the CLI: the value at `row` widened to f64.
    pub fn value_f64(&self, row: usize) -> f64 {
        self.get(row).as_f64()
    }

    /// Truncate to exactly `n_rows` and release excess capacity.
    pub fn finish(&mut self, n_rows: usize) {
        match self {
            TypedColumn::I8(v) => {
                v.truncate(n_rows);
                v.shrink_to_fit();
            }
            TypedColumn::I16(v) => {
                v.truncate(n_rows);
                v.shrink_to_fit();
            }
            TypedColumn::F32(v) => {
                v.truncate(n_rows);
                v.shrink_to_fit();
            }
            TypedColumn::F64(v) => {
                v.truncate(n_rows);
                v.shrink_to_fit();
            }
        }
    }

    /// Drop the first `n` rows in place.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.len());
        match self {
            TypedColumn::I8(v) => drop(v.drain(..n)),
            TypedColumn::I16(v) => drop(v.drain(..n)),
            TypedColumn::F32(v) => drop(v.drain(..n)),
            TypedColumn::F64(v) => drop(v.drain(..n)),
        }
    }

    /// Copy `n` elements from `src[src_off..]` into `self[dst_off..]`.
    /// Returns false (and copies nothing) when the variants differ.
    pub fn copy_from(
        &mut self,
        dst_off: usize,
        src: &TypedColumn,
        src_off: usize,
        n: usize,
    ) -> bool {
        match (self, src) {
            (TypedColumn::I8(d), TypedColumn::I8(s)) => {
                d[dst_off..dst_off + n].copy_from_slice(&s[src_off..src_off + n]);
            }
            (TypedColumn::I16(d), TypedColumn::I16(s)) => {
                d[dst_off..dst_off + n].copy_from_slice(&s[src_off..src_off + n]);
            }
            (TypedColumn::F32(d), TypedColumn::F32(s)) => {
                d[dst_off..dst_off + n].copy_from_slice(&s[src_off..src_off + n]);
            }
            (TypedColumn::F64(d), TypedColumn::F64(s)) => {
                d[dst_off..dst_off + n].copy_from_slice(&s[src_off..src_off + n]);
            }
            _ => return false,
        }
        true
    }
}

/// Catalog entry projected to what an output column needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SensorInfo {
    pub name: String,
    pub units: String,
    pub size: u8,
}

impl SensorInfo {
    /// Placeholder entries mark union indices this file does not carry.
    pub fn is_placeholder(&self) -> bool {
        self.name.is_empty()
    }
}

/// Output of one file's record decode.
#[derive(Debug)]
pub struct ColumnDataResult {
    pub columns: Vec<TypedColumn>,
    pub sensor_info: Vec<SensorInfo>,
    pub n_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_values_match_widths() {
        let col = TypedColumn::for_size(1, 3).unwrap();
        assert_eq!(col.get(0), CellValue::I8(FILL_I8));
        let col = TypedColumn::for_size(2, 3).unwrap();
        assert_eq!(col.get(2), CellValue::I16(FILL_I16));
        let col = TypedColumn::for_size(4, 1).unwrap();
        assert!(col.value_f64(0).is_nan());
        assert!(TypedColumn::for_size(3, 1).is_none());
    }

    #[test]
    fn put_grows_with_fill_tail() {
        let mut col = TypedColumn::for_size(8, 2).unwrap();
        col.put(5, CellValue::F64(1.5));
        assert!(col.len() >= 6);
        assert_eq!(col.value_f64(5), 1.5);
        assert!(col.value_f64(4).is_nan());
    }

    #[test]
    fn finish_truncates_exactly() {
        let mut col = TypedColumn::for_size(2, 100).unwrap();
        col.put(0, CellValue::I16(7));
        col.finish(1);
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(0), CellValue::I16(7));
    }

    #[test]
    fn copy_from_requires_matching_variant() {
        let mut dst = TypedColumn::for_size(4, 4).unwrap();
        let mut src = TypedColumn::for_size(4, 2).unwrap();
        src.put(0, CellValue::F32(1.0));
        src.put(1, CellValue::F32(2.0));
        assert!(dst.copy_from(1, &src, 0, 2));
        assert_eq!(dst.value_f64(1), 1.0);
        assert_eq!(dst.value_f64(2), 2.0);

        let other = TypedColumn::for_size(8, 2).unwrap();
        assert!(!dst.copy_from(0, &other, 0, 1));
    }

    #[test]
    fn trim_front_drops_rows() {
        let mut col = TypedColumn::I16(vec![1, 2, 3]);
        col.trim_front(1);
        assert_eq!(col, TypedColumn::I16(vec![2, 3]));
    }
}
