//! Union sensor catalog across many files.
//!
//! Pass 1 of a multi-file read feeds every header (and inline sensor
//! block) through [`SensorsMap::insert`], building a union-by-name
//! catalog plus one per-file catalog per distinct (mission, CRC)
//! identity.  [`SensorsMap::setup_for_data`] then freezes the union's
//! output indices and propagates them back to the per-file catalogs, so
//! Pass 2 decodes each file straight into union column positions.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;

use crate::catalog::{cache, Sensor, SensorCatalog};
use crate::error::{DbdError, Result};
use crate::header::DbdHeader;

/// Identity of one file's sensor list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatalogKey {
    mission: String,
    crc: String,
}

impl CatalogKey {
    fn of(header: &DbdHeader) -> Self {
        Self {
            mission: header.mission_name().to_lowercase(),
            crc: header.sensor_list_crc().to_lowercase(),
        }
    }
}

pub struct SensorsMap {
    cache_dir: Option<PathBuf>,
    union: SensorCatalog,
    files: HashMap<CatalogKey, SensorCatalog>,
}

impl SensorsMap {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            union: SensorCatalog::default(),
            files: HashMap::new(),
        }
    }

    /// Merge one file's catalog into the union.
    ///
    /// For an unfactored header with `consume_inline_sensors` set, the
    /// inline sensor block is read off the stream (and dumped to the
    /// cache when a cache directory is configured).  A factored header
    /// consumes nothing and loads from the cache; an unseen CRC fails
    /// with [`DbdError::NoCatalog`].
    pub fn insert<R: BufRead>(
        &mut self,
        reader: &mut R,
        header: &DbdHeader,
        consume_inline_sensors: bool,
    ) -> Result<()> {
        let key = CatalogKey::of(header);

        let catalog = if !header.is_factored() && consume_inline_sensors {
            // Consume the inline block even for an already-known key, so
            // the caller's stream cursor lands on the endian probe.
            let parsed = SensorCatalog::parse_inline(reader, header)?;
            if let Some(dir) = &self.cache_dir {
                if let Err(e) = cache::dump(&parsed, dir, header) {
                    log::warn!("cannot dump sensor cache for {}: {e}", key.crc);
                }
            }
            parsed
        } else if self.files.contains_key(&key) {
            return Ok(());
        } else {
            let Some(dir) = &self.cache_dir else {
                return Err(DbdError::NoCatalog {
                    crc: header.sensor_list_crc().to_owned(),
                    cache_dir: PathBuf::new(),
                });
            };
            cache::load(dir, header)?
        };

        if self.files.contains_key(&key) {
            return Ok(());
        }

        for sensor in &catalog {
            self.merge_into_union(sensor)?;
        }
        self.files.insert(key, catalog);
        Ok(())
    }

    /// A name new to the union is appended; a known name must agree on
    /// units and size.
    fn merge_into_union(&mut self, sensor: &Sensor) -> Result<()> {
        match self.union.find_by_name(&sensor.name) {
            None => {
                let mut fresh = sensor.clone();
                fresh.keep = true;
                fresh.criteria = false;
                fresh.out_index = None;
                self.union.push(fresh);
                Ok(())
            }
            Some(existing) => {
                if existing.units != sensor.units || existing.size != sensor.size {
                    return Err(DbdError::CatalogConflict {
                        name: sensor.name.clone(),
                        detail: format!(
                            "{} ({} bytes) vs {} ({} bytes)",
                            existing.units, existing.size, sensor.units, sensor.size
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    pub fn apply_keep(&mut self, names: &[String]) {
        self.union.apply_keep(names);
    }

    pub fn apply_criteria(&mut self, names: &[String]) {
        self.union.apply_criteria(names);
    }

    /// Freeze union output indices and propagate keep/criteria/index
    /// state to every per-file catalog by sensor name.  Call once, after
    /// all inserts and keep/criteria filtering.
    pub fn setup_for_data(&mut self) {
        self.union.assign_out_indices();

        let by_name: HashMap<&str, &Sensor> =
            self.union.iter().map(|s| (s.name.as_str(), s)).collect();

        for catalog in self.files.values_mut() {
            for sensor in catalog.iter_mut() {
                if let Some(u) = by_name.get(sensor.name.as_str()) {
                    sensor.keep = u.keep;
                    sensor.criteria = u.criteria;
                    sensor.out_index = u.out_index;
                } else {
                    sensor.keep = false;
                    sensor.criteria = false;
                    sensor.out_index = None;
                }
            }
        }
    }

    /// The frozen per-file catalog for a header's identity.
    pub fn find(&self, header: &DbdHeader) -> Option<&SensorCatalog> {
        self.files.get(&CatalogKey::of(header))
    }

    pub fn union(&self) -> &SensorCatalog {
        &self.union
    }

    pub fn n_catalogs(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(text: &str) -> DbdHeader {
        DbdHeader::read(&mut Cursor::new(text.as_bytes().to_vec())).unwrap()
    }

    fn unfactored_header(mission: &str, crc: &str, n: usize) -> DbdHeader {
        header(&format!(
            "num_ascii_tags: 4\nmission_name: {mission}\nsensor_list_crc: {crc}\n\
             total_num_sensors: {n}\n"
        ))
    }

    #[test]
    fn union_is_by_name_with_stable_indices() {
        let mut smap = SensorsMap::new(None);

        let hdr_a = unfactored_header("m.mi", "AAAA", 2);
        let mut stream_a = Cursor::new(b"s: T 0 0 8 a units\ns: T 1 1 4 b units\n".to_vec());
        smap.insert(&mut stream_a, &hdr_a, true).unwrap();

        let hdr_b = unfactored_header("m.mi", "BBBB", 2);
        let mut stream_b = Cursor::new(b"s: T 0 0 4 b units\ns: T 1 1 2 c units\n".to_vec());
        smap.insert(&mut stream_b, &hdr_b, true).unwrap();

        assert_eq!(smap.union().len(), 3);
        smap.setup_for_data();

        let cat_a = smap.find(&hdr_a).unwrap();
        let cat_b = smap.find(&hdr_b).unwrap();
        assert_eq!(cat_a.find_by_name("a").unwrap().out_index, Some(0));
        assert_eq!(cat_a.find_by_name("b").unwrap().out_index, Some(1));
        assert_eq!(cat_b.find_by_name("b").unwrap().out_index, Some(1));
        assert_eq!(cat_b.find_by_name("c").unwrap().out_index, Some(2));
    }

    #[test]
    fn conflicting_size_is_rejected() {
        let mut smap = SensorsMap::new(None);

        let hdr_a = unfactored_header("m.mi", "AAAA", 1);
        let mut stream_a = Cursor::new(b"s: T 0 0 8 a units\n".to_vec());
        smap.insert(&mut stream_a, &hdr_a, true).unwrap();

        let hdr_b = unfactored_header("m.mi", "BBBB", 1);
        let mut stream_b = Cursor::new(b"s: T 0 0 4 a units\n".to_vec());
        let err = smap.insert(&mut stream_b, &hdr_b, true).unwrap_err();
        assert!(matches!(err, DbdError::CatalogConflict { .. }));
    }

    #[test]
    fn factored_without_cache_is_no_catalog() {
        let mut smap = SensorsMap::new(None);
        let hdr = header(
            "num_ascii_tags: 3\nsensor_list_factored: 1\nsensor_list_crc: CAFE\n",
        );
        let mut stream = Cursor::new(Vec::new());
        let err = smap.insert(&mut stream, &hdr, true).unwrap_err();
        assert!(matches!(err, DbdError::NoCatalog { .. }));
    }

    #[test]
    fn factored_loads_from_cache_dumped_by_unfactored() {
        let dir = tempfile::tempdir().unwrap();
        let mut smap = SensorsMap::new(Some(dir.path().to_owned()));

        let hdr_a = unfactored_header("m.mi", "FEED", 1);
        let mut stream_a = Cursor::new(b"s: T 0 0 8 t timestamp\n".to_vec());
        smap.insert(&mut stream_a, &hdr_a, true).unwrap();

        let hdr_b = header(
            "num_ascii_tags: 4\nmission_name: other.mi\nsensor_list_factored: 1\n\
             sensor_list_crc: FEED\n",
        );
        let mut stream_b = Cursor::new(Vec::new());
        smap.insert(&mut stream_b, &hdr_b, true).unwrap();

        assert_eq!(smap.n_catalogs(), 2);
        assert_eq!(smap.union().len(), 1);
    }

    #[test]
    fn keep_and_criteria_propagate_to_files() {
        let mut smap = SensorsMap::new(None);
        let hdr = unfactored_header("m.mi", "AAAA", 2);
        let mut stream = Cursor::new(b"s: T 0 0 8 t timestamp\ns: T 1 1 4 x units\n".to_vec());
        smap.insert(&mut stream, &hdr, true).unwrap();

        smap.apply_keep(&["t".into()]);
        smap.apply_criteria(&["t".into()]);
        smap.setup_for_data();

        let cat = smap.find(&hdr).unwrap();
        let t = cat.find_by_name("t").unwrap();
        let x = cat.find_by_name("x").unwrap();
        assert!(t.keep && t.criteria);
        assert_eq!(t.out_index, Some(0));
        assert!(!x.keep && !x.criteria);
        assert_eq!(x.out_index, None);
    }
}
