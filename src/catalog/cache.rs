//! Sensor-list disk cache.
//!
//! Factored DBD files carry no inline sensor block; the catalog is
//! reconstructed from `<cache_dir>/<crc>.cac`, where `crc` is the
//! lowercased `sensor_list_crc` header value.  Cache files hold the
//! active `s:` lines verbatim.  Writes go through a temporary file and
//! an atomic rename, so concurrent readers see a complete file or none.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::catalog::{Sensor, SensorCatalog};
use crate::error::{DbdError, Result};
use crate::header::DbdHeader;

pub const CACHE_EXT: &str = "cac";

/// Cache file path for a header's sensor-list CRC.
pub fn cache_path(cache_dir: &Path, crc: &str) -> PathBuf {
    cache_dir.join(format!("{}.{}", crc.to_lowercase(), CACHE_EXT))
}

/// Reconstruct a catalog from the cache.  Fails with [`DbdError::NoCatalog`]
/// when the CRC has never been dumped.
pub fn load(cache_dir: &Path, header: &DbdHeader) -> Result<SensorCatalog> {
    let path = cache_path(cache_dir, header.sensor_list_crc());
    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DbdError::NoCatalog {
                crc: header.sensor_list_crc().to_owned(),
                cache_dir: cache_dir.to_owned(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut catalog = SensorCatalog::default();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("s:") {
            continue;
        }
        let sensor = Sensor::parse(line)?;
        if sensor.available {
            catalog.push(sensor);
        }
    }
    if catalog.is_empty() {
        log::warn!("cache file {} holds no available sensors", path.display());
    }
    Ok(catalog)
}

/// Persist a non-empty catalog under the header's CRC.  Idempotent;
/// overwrites any existing entry.
pub fn dump(catalog: &SensorCatalog, cache_dir: &Path, header: &DbdHeader) -> Result<()> {
    if catalog.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(cache_dir)?;

    let path = cache_path(cache_dir, header.sensor_list_crc());
    let tmp = path.with_extension(format!("{}.tmp.{}", CACHE_EXT, std::process::id()));

    let mut out = fs::File::create(&tmp)?;
    for sensor in catalog {
        writeln!(out, "{}", sensor.to_line())?;
    }
    out.flush()?;
    drop(out);

    fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(crc: &str) -> DbdHeader {
        let text = format!("num_ascii_tags: 2\nsensor_list_crc: {crc}\n");
        DbdHeader::read(&mut Cursor::new(text.into_bytes())).unwrap()
    }

    #[test]
    fn dump_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = header("ABCD1234");

        let mut cat = SensorCatalog::default();
        cat.push(Sensor::parse("s: T 0 0 8 t timestamp").unwrap());
        cat.push(Sensor::parse("s: T 1 1 4 x counts").unwrap());

        dump(&cat, dir.path(), &hdr).unwrap();
        assert!(cache_path(dir.path(), "ABCD1234").exists());

        let loaded = load(dir.path(), &hdr).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(0).name, "t");
        assert_eq!(loaded.get(1).size, 4);
    }

    #[test]
    fn missing_key_is_no_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path(), &header("DEADBEEF")).unwrap_err();
        assert!(matches!(err, DbdError::NoCatalog { .. }));
    }

    #[test]
    fn dump_overwrites_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = header("00FF00FF");

        let mut first = SensorCatalog::default();
        first.push(Sensor::parse("s: T 0 0 8 t timestamp").unwrap());
        dump(&first, dir.path(), &hdr).unwrap();

        let mut second = SensorCatalog::default();
        second.push(Sensor::parse("s: T 0 0 8 t timestamp").unwrap());
        second.push(Sensor::parse("s: T 1 1 2 y counts").unwrap());
        dump(&second, dir.path(), &hdr).unwrap();

        assert_eq!(load(dir.path(), &hdr).unwrap().len(), 2);
    }
}
