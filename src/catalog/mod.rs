//! Sensor catalog — the ordered sensor list of one DBD file.
//!
//! Catalog order is file order and is what the per-record presence
//! bitmap is decoded against.  Only *available* sensors (`s: T ...`)
//! enter the catalog; the on-wire bitmap covers exactly those.
//!
//! Sensor line syntax:
//! ```text
//! s: <T|F> <file_index> <storage_index> <size> <name> <units>
//! ```

pub mod cache;

use std::io::BufRead;

use crate::error::{DbdError, Result};
use crate::header::DbdHeader;

#[derive(Debug, Clone)]
pub struct Sensor {
    pub available: bool,
    pub file_index: u32,
    pub storage_index: u32,
    /// Declared byte width; {1, 2, 4, 8} for decodable sensors.
    pub size: u8,
    pub name: String,
    pub units: String,
    /// Emit this sensor as an output column.
    pub keep: bool,
    /// Presence of this sensor decides row retention.
    pub criteria: bool,
    /// Dense output-column index, assigned after keep filtering.
    pub out_index: Option<usize>,
}

impl Sensor {
    /// Parse one `s:` line.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 7 || parts[0] != "s:" {
            return Err(DbdError::BadSensorLine(line.to_owned()));
        }
        let file_index = parts[2]
            .parse()
            .map_err(|_| DbdError::BadSensorLine(line.to_owned()))?;
        let storage_index = parts[3]
            .parse()
            .map_err(|_| DbdError::BadSensorLine(line.to_owned()))?;
        let size = parts[4]
            .parse()
            .map_err(|_| DbdError::BadSensorLine(line.to_owned()))?;
        Ok(Self {
            available: parts[1] == "T",
            file_index,
            storage_index,
            size,
            name: parts[5].to_owned(),
            units: parts[6].to_owned(),
            keep: true,
            criteria: false,
            out_index: None,
        })
    }

    /// Render back to the on-disk `s:` line form used by the cache.
    pub fn to_line(&self) -> String {
        format!(
            "s: {} {} {} {} {} {}",
            if self.available { "T" } else { "F" },
            self.file_index,
            self.storage_index,
            self.size,
            self.name,
            self.units,
        )
    }
}

/// Ordered sensor list of one file, plus keep/criteria state.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<Sensor>,
}

impl SensorCatalog {
    /// Read the inline sensor block of an unfactored file, consuming
    /// `total_num_sensors` lines from the stream.  For a factored header
    /// nothing is consumed and the catalog comes back empty (load it
    /// from the cache instead).
    pub fn parse_inline<R: BufRead>(reader: &mut R, header: &DbdHeader) -> Result<Self> {
        let mut catalog = SensorCatalog::default();
        if header.is_factored() {
            return Ok(catalog);
        }

        let expected = header.num_sensors();
        let mut buf = Vec::new();
        for n in 0..expected {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                log::warn!("sensor list truncated: expected {expected} lines, got {n}");
                break;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                log::warn!("sensor list truncated by binary data at line {n}");
                break;
            };
            let sensor = Sensor::parse(line.trim())?;
            if sensor.available {
                catalog.push(sensor);
            }
        }
        Ok(catalog)
    }

    pub fn push(&mut self, sensor: Sensor) {
        self.sensors.push(sensor);
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sensor> {
        self.sensors.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Sensor> {
        self.sensors.iter_mut()
    }

    pub fn get(&self, index: usize) -> &Sensor {
        &self.sensors[index]
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.name == name)
    }

    /// Restrict output columns to the named sensors.  An empty list
    /// keeps everything (the initial policy).
    pub fn apply_keep(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        for sensor in &mut self.sensors {
            sensor.keep = names.iter().any(|n| n == &sensor.name);
        }
    }

    /// Tag the named sensors as row-retention criteria.
    pub fn apply_criteria(&mut self, names: &[String]) {
        for sensor in &mut self.sensors {
            sensor.criteria = names.iter().any(|n| n == &sensor.name);
        }
    }

    /// Enumerate kept sensors in catalog order and assign dense output
    /// indices 0..n_kept.
    pub fn assign_out_indices(&mut self) {
        let mut next = 0usize;
        for sensor in &mut self.sensors {
            sensor.out_index = if sensor.keep {
                let idx = next;
                next += 1;
                Some(idx)
            } else {
                None
            };
        }
    }

    pub fn n_kept(&self) -> usize {
        self.sensors.iter().filter(|s| s.keep).count()
    }

    pub fn n_criteria(&self) -> usize {
        self.sensors.iter().filter(|s| s.criteria).count()
    }
}

impl<'a> IntoIterator for &'a SensorCatalog {
    type Item = &'a Sensor;
    type IntoIter = std::slice::Iter<'a, Sensor>;
    fn into_iter(self) -> Self::IntoIter {
        self.sensors.iter()
    }
}
