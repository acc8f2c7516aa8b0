//! Read engine — single-file reads and the two-pass multi-file merge.
//!
//! # Multi-file reads
//!
//! Pass 1 scans every header, applies the mission filters, and feeds
//! each file's catalog into a [`SensorsMap`] union.  Pass 2 re-opens
//! each valid file, decodes it against its frozen per-file catalog, and
//! scatter-copies the per-file columns into union columns sized for the
//! total record count.  Per-file failures in either pass skip the file
//! (with a warning) — the call succeeds with whatever was usable.
//!
//! Filenames are de-duplicated and sorted lexicographically before
//! Pass 1; glider filename order is time order.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::catalog::{cache, SensorCatalog};
use crate::column::{ColumnDataResult, SensorInfo, TypedColumn};
use crate::decoder::read_columns;
use crate::decompress::open_dbd;
use crate::error::{DbdError, Result};
use crate::header::DbdHeader;
use crate::known_bytes::KnownBytes;
use crate::sensors_map::SensorsMap;

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration shared by all read operations.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Sensor-list cache directory (factored files require it).
    pub cache_dir: Option<PathBuf>,
    /// Sensors to emit as columns; empty keeps every sensor.
    pub to_keep: Vec<String>,
    /// Sensors whose presence decides row retention; empty keeps every row.
    pub criteria: Vec<String>,
    /// Missions to exclude (case-insensitive).
    pub skip_missions: Vec<String>,
    /// When non-empty, only these missions are processed.
    pub keep_missions: Vec<String>,
    /// Drop the first record of each file (continuation files repeat the
    /// previous file's last record).  On by default.
    pub skip_first_record: bool,
    /// Resynchronize on unexpected tag bytes instead of stopping.
    pub repair: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            cache_dir: None,
            to_keep: Vec::new(),
            criteria: Vec::new(),
            skip_missions: Vec::new(),
            keep_missions: Vec::new(),
            skip_first_record: true,
            repair: false,
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Column-oriented result surface: column `i` holds `n_records` elements
/// of width `sensor_sizes[i]`.
#[derive(Debug, Default)]
pub struct ColumnSet {
    pub columns: Vec<TypedColumn>,
    pub sensor_names: Vec<String>,
    pub sensor_units: Vec<String>,
    pub sensor_sizes: Vec<u8>,
    pub n_records: usize,
}

impl ColumnSet {
    fn from_parts(columns: Vec<TypedColumn>, info: &[SensorInfo], n_records: usize) -> Self {
        Self {
            columns,
            sensor_names: info.iter().map(|s| s.name.clone()).collect(),
            sensor_units: info.iter().map(|s| s.units.clone()).collect(),
            sensor_sizes: info.iter().map(|s| s.size).collect(),
            n_records,
        }
    }
}

#[derive(Debug)]
pub struct FileReadResult {
    pub data: ColumnSet,
    pub header: DbdHeader,
    pub filename: PathBuf,
}

#[derive(Debug)]
pub struct MultiReadResult {
    pub data: ColumnSet,
    pub n_files: usize,
}

/// One row of a header scan.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderScan {
    pub filename: PathBuf,
    pub mission_name: String,
    pub sensor_list_crc: String,
}

// ── Single-file read ─────────────────────────────────────────────────────────

/// Read one DBD file into typed columns.
///
/// Pre-decode failures (missing file, empty header, unknown catalog,
/// corrupt endian probe) surface as errors; anything that goes wrong
/// inside the record stream truncates to the clean prefix instead.
pub fn read_single(path: &Path, opts: &ReadOptions) -> Result<FileReadResult> {
    let mut stream = open_file(path)?;

    let header = DbdHeader::read(&mut stream)?;
    if header.is_empty() {
        return Err(DbdError::EmptyHeader(path.to_owned()));
    }

    let mut catalog = SensorCatalog::parse_inline(&mut stream, &header)?;
    if catalog.is_empty() {
        let Some(dir) = &opts.cache_dir else {
            return Err(DbdError::NoCatalog {
                crc: header.sensor_list_crc().to_owned(),
                cache_dir: PathBuf::new(),
            });
        };
        catalog = cache::load(dir, &header)?;
    } else if let Some(dir) = &opts.cache_dir {
        if let Err(e) = cache::dump(&catalog, dir, &header) {
            log::warn!("cannot dump sensor cache for {}: {e}", path.display());
        }
    }

    catalog.apply_keep(&opts.to_keep);
    catalog.apply_criteria(&opts.criteria);
    catalog.assign_out_indices();

    let kb = KnownBytes::read(&mut stream)?;
    let mut result = read_columns(&mut stream, &kb, &catalog, opts.repair, estimate_bytes(path))?;

    if opts.skip_first_record && result.n_records > 0 {
        for col in &mut result.columns {
            col.trim_front(1);
        }
        result.n_records -= 1;
    }

    log::debug!("{}: {} records, {} columns", path.display(), result.n_records,
        result.columns.len());

    Ok(FileReadResult {
        data: ColumnSet::from_parts(result.columns, &result.sensor_info, result.n_records),
        header,
        filename: path.to_owned(),
    })
}

// ── Multi-file read ──────────────────────────────────────────────────────────

/// Read many DBD files into union columns.
pub fn read_many(paths: &[PathBuf], opts: &ReadOptions) -> Result<MultiReadResult> {
    let files = sorted_unique(paths);

    // Pass 1: headers + union catalog.
    let mut smap = SensorsMap::new(opts.cache_dir.clone());
    let valid = scan_into_map(&files, opts, &mut smap);

    if valid.is_empty() {
        return Ok(MultiReadResult { data: ColumnSet::default(), n_files: 0 });
    }

    smap.apply_keep(&opts.to_keep);
    smap.apply_criteria(&opts.criteria);
    smap.setup_for_data();

    // Union output layout, ordered by the frozen indices.
    let n_out = smap.union().n_kept();
    let mut union_info = vec![SensorInfo::default(); n_out];
    for sensor in smap.union() {
        if let Some(oi) = sensor.out_index {
            union_info[oi] = SensorInfo {
                name: sensor.name.clone(),
                units: sensor.units.clone(),
                size: sensor.size,
            };
        }
    }

    // Pass 2: decode each valid file.
    let mut per_file: Vec<ColumnDataResult> = Vec::with_capacity(valid.len());
    for path in &valid {
        match decode_one(path, &smap, opts) {
            Ok(result) => per_file.push(result),
            Err(e) => log::warn!("skipping {}: {e}", path.display()),
        }
    }

    // Record counting: every contributing file after the first drops its
    // first row when skip_first_record is set.
    let total_records: usize = per_file
        .iter()
        .enumerate()
        .map(|(fi, r)| r.n_records - skip_of(fi, r.n_records, opts))
        .sum();

    // Union columns, exactly total_records rows of type-appropriate fill.
    let mut union_columns: Vec<TypedColumn> = Vec::with_capacity(n_out);
    for info in &union_info {
        let col = TypedColumn::for_size(info.size, total_records).ok_or_else(|| {
            DbdError::BadSensorSize { name: info.name.clone(), size: info.size }
        })?;
        union_columns.push(col);
    }

    let union_index: HashMap<&str, usize> = union_info
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // Scatter.
    let mut offset = 0usize;
    for (fi, result) in per_file.iter().enumerate() {
        let start = skip_of(fi, result.n_records, opts);
        let n_eff = result.n_records - start;
        if n_eff == 0 {
            continue;
        }
        for (ci, col) in result.columns.iter().enumerate() {
            let info = &result.sensor_info[ci];
            if info.is_placeholder() {
                continue;
            }
            let Some(&ui) = union_index.get(info.name.as_str()) else {
                continue;
            };
            if !union_columns[ui].copy_from(offset, col, start, n_eff) {
                log::warn!("column width drift for sensor {}", info.name);
            }
        }
        offset += n_eff;
    }

    log::debug!("merged {} files into {} records", per_file.len(), total_records);

    Ok(MultiReadResult {
        data: ColumnSet::from_parts(union_columns, &union_info, total_records),
        n_files: valid.len(),
    })
}

/// Pass 1 only: the union sensor catalog across the given files, with
/// keep/criteria applied and output indices frozen.
pub fn scan_sensors(paths: &[PathBuf], opts: &ReadOptions) -> Result<SensorCatalog> {
    let files = sorted_unique(paths);
    let mut smap = SensorsMap::new(opts.cache_dir.clone());
    scan_into_map(&files, opts, &mut smap);
    smap.apply_keep(&opts.to_keep);
    smap.apply_criteria(&opts.criteria);
    smap.setup_for_data();
    Ok(smap.union().clone())
}

/// Header extraction only.
pub fn scan_headers(paths: &[PathBuf], opts: &ReadOptions) -> Result<Vec<HeaderScan>> {
    let mut out = Vec::new();
    for path in sorted_unique(paths) {
        let mut stream = match open_file(&path) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        let header = match DbdHeader::read(&mut stream) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        if header.is_empty()
            || !header.should_process_mission(&opts.skip_missions, &opts.keep_missions)
        {
            continue;
        }
        out.push(HeaderScan {
            filename: path.clone(),
            mission_name: header.mission_name().to_owned(),
            sensor_list_crc: header.sensor_list_crc().to_owned(),
        });
    }
    Ok(out)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn open_file(path: &Path) -> Result<Box<dyn BufRead>> {
    open_dbd(path).map_err(|_| DbdError::MissingFile(path.to_owned()))
}

fn sorted_unique(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = paths.to_vec();
    files.sort();
    files.dedup();
    files
}

fn estimate_bytes(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(1024 * 1024)
}

fn skip_of(file_index: usize, n_records: usize, opts: &ReadOptions) -> usize {
    usize::from(opts.skip_first_record && file_index > 0 && n_records > 0)
}

/// Pass 1 over `files`: feed every usable header into `smap`.
/// Returns the files that passed (in order).
fn scan_into_map(files: &[PathBuf], opts: &ReadOptions, smap: &mut SensorsMap) -> Vec<PathBuf> {
    let mut valid = Vec::new();
    for path in files {
        let outcome = (|| -> Result<bool> {
            let mut stream = open_file(path)?;
            let header = DbdHeader::read(&mut stream)?;
            if header.is_empty()
                || !header.should_process_mission(&opts.skip_missions, &opts.keep_missions)
            {
                return Ok(false);
            }
            smap.insert(&mut stream, &header, true)?;
            Ok(true)
        })();
        match outcome {
            Ok(true) => valid.push(path.clone()),
            Ok(false) => {}
            Err(e) => log::warn!("skipping {}: {e}", path.display()),
        }
    }
    valid
}

/// Pass 2 for one file: re-open, re-read the header, advance past any
/// inline sensor block ([`SensorsMap::find`] is pure lookup and moves no
/// cursor), then decode against the frozen per-file catalog.
fn decode_one(path: &Path, smap: &SensorsMap, opts: &ReadOptions) -> Result<ColumnDataResult> {
    let mut stream = open_file(path)?;
    let header = DbdHeader::read(&mut stream)?;
    if header.is_empty() {
        return Err(DbdError::EmptyHeader(path.to_owned()));
    }

    let catalog = smap.find(&header).ok_or_else(|| DbdError::NoCatalog {
        crc: header.sensor_list_crc().to_owned(),
        cache_dir: opts.cache_dir.clone().unwrap_or_default(),
    })?;

    if !header.is_factored() {
        skip_lines(&mut stream, header.num_sensors())?;
    }

    let kb = KnownBytes::read(&mut stream)?;
    read_columns(&mut stream, &kb, catalog, opts.repair, estimate_bytes(path))
}

fn skip_lines<R: BufRead>(reader: &mut R, n: usize) -> Result<()> {
    let mut buf = Vec::new();
    for _ in 0..n {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
    }
    Ok(())
}
