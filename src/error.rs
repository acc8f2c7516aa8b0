use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Cannot open file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("Empty or unrecognized header in {}", .0.display())]
    EmptyHeader(PathBuf),
    #[error("No cached sensor list for CRC {crc} (looked in {})", .cache_dir.display())]
    NoCatalog { crc: String, cache_dir: PathBuf },
    #[error("Sensor catalog conflict for {name}: {detail}")]
    CatalogConflict { name: String, detail: String },
    #[error("Endian probe did not match any known byte order")]
    CorruptEndianProbe,
    #[error("Unknown sensor size {size} for sensor {name}")]
    BadSensorSize { name: String, size: u8 },
    #[error("Malformed sensor line: {0}")]
    BadSensorLine(String),
}

pub type Result<T> = std::result::Result<T, DbdError>;
