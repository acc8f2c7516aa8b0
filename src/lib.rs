pub mod catalog;
pub mod column;
pub mod decoder;
pub mod decompress;
pub mod error;
pub mod header;
pub mod known_bytes;
pub mod reader;
pub mod sensors_map;

pub use catalog::{Sensor, SensorCatalog};
pub use column::{CellValue, ColumnDataResult, SensorInfo, TypedColumn, FILL_I16, FILL_I8};
pub use error::{DbdError, Result};
pub use header::DbdHeader;
pub use known_bytes::{Endian, KnownBytes};
pub use reader::{
    read_many, read_single, scan_headers, scan_sensors, ColumnSet, FileReadResult, HeaderScan,
    MultiReadResult, ReadOptions,
};
pub use sensors_map::SensorsMap;
