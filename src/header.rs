//! DBD file header — ASCII `key: value` lines preceding the sensor list.
//!
//! The first header line announces `num_ascii_tags`, the total number of
//! header lines; parsing stops once that many records are read, or at the
//! first line that is not `key: value` (binary data reached).

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::io::BufRead;

/// Hard cap on header lines, so a corrupt file cannot run the parser
/// into the binary section indefinitely.
const MAX_HEADER_LINES: usize = 1000;

/// Number of header lines assumed until `num_ascii_tags` is seen.
const DEFAULT_NUM_TAGS: usize = 10;

#[derive(Debug, Clone)]
pub struct DbdHeader {
    records: HashMap<String, String>,
}

impl DbdHeader {
    /// Parse the header from a stream positioned at the start of the file.
    ///
    /// The stream is left positioned at the first byte after the last
    /// header line (the sensor list for unfactored files, the endian
    /// probe for factored ones).
    pub fn read<R: BufRead>(reader: &mut R) -> std::io::Result<Self> {
        let mut records = HashMap::new();
        let mut num_tags = DEFAULT_NUM_TAGS;
        let mut buf = Vec::new();

        for _ in 0..MAX_HEADER_LINES {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break; // EOF
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(s) if s.is_ascii() => s.trim(),
                _ => break, // binary data reached
            };
            let Some((key, value)) = line.split_once(':') else {
                break; // sensor list or record stream reached
            };
            let key = key.trim().to_owned();
            let value = value.trim().to_owned();

            if key == "num_ascii_tags" {
                if let Ok(n) = value.parse::<usize>() {
                    num_tags = n;
                }
            }
            records.insert(key, value);

            if records.len() >= num_tags {
                break;
            }
        }

        Ok(Self { records })
    }

    pub fn get(&self, key: &str) -> &str {
        self.records.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).parse().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mission_name(&self) -> &str {
        self.get("mission_name")
    }

    pub fn num_sensors(&self) -> usize {
        self.get_int("total_num_sensors").max(0) as usize
    }

    pub fn sensor_list_crc(&self) -> &str {
        self.get("sensor_list_crc")
    }

    /// True when the sensor list lives in the cache rather than inline.
    pub fn is_factored(&self) -> bool {
        self.get_int("sensor_list_factored") != 0
    }

    pub fn fileopen_time(&self) -> &str {
        self.get("fileopen_time")
    }

    pub fn encoding_version(&self) -> &str {
        self.get("encoding_ver")
    }

    pub fn full_filename(&self) -> &str {
        self.get("full_filename")
    }

    pub fn the8x3_filename(&self) -> &str {
        self.get("the8x3_filename")
    }

    pub fn filename_extension(&self) -> &str {
        self.get("filename_extension")
    }

    /// `fileopen_time` as Unix seconds (UTC).
    ///
    /// The firmware writes ctime-style stamps with underscores, e.g.
    /// `Thu_Feb_27_14:02:52_2020`; single-digit days are double
    /// underscored (`Fri_Jan__3_18:58:13_2020`).
    pub fn fileopen_epoch(&self) -> Option<i64> {
        let joined = self
            .fileopen_time()
            .split('_')
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        NaiveDateTime::parse_from_str(&joined, "%a %b %d %H:%M:%S %Y")
            .ok()
            .map(|dt| dt.and_utc().timestamp())
    }

    /// Mission filter: process iff the mission is not skipped and, when a
    /// keep list is given, is in it. Comparison is case-insensitive.
    pub fn should_process_mission(&self, skip: &[String], keep: &[String]) -> bool {
        if skip.is_empty() && keep.is_empty() {
            return true;
        }
        let mission = self.mission_name().to_lowercase();
        if skip.iter().any(|m| m.to_lowercase() == mission) {
            return false;
        }
        if !keep.is_empty() {
            return keep.iter().any(|m| m.to_lowercase() == mission);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(text: &str) -> DbdHeader {
        DbdHeader::read(&mut Cursor::new(text.as_bytes())).unwrap()
    }

    #[test]
    fn parses_key_values() {
        let hdr = parse(
            "dbd_label: DBD(dinkum_binary_data)file\n\
             num_ascii_tags: 5\n\
             mission_name: micro.mi\n\
             sensor_list_crc: 0A1B2C3D\n\
             total_num_sensors: 12\n",
        );
        assert_eq!(hdr.mission_name(), "micro.mi");
        assert_eq!(hdr.num_sensors(), 12);
        assert_eq!(hdr.sensor_list_crc(), "0A1B2C3D");
        assert!(!hdr.is_factored());
        assert!(!hdr.is_empty());
    }

    #[test]
    fn stops_at_num_ascii_tags() {
        let mut cursor = Cursor::new(
            b"num_ascii_tags: 2\nmission_name: m.mi\ns: T 0 0 8 x units\n".to_vec(),
        );
        let hdr = DbdHeader::read(&mut cursor).unwrap();
        assert_eq!(hdr.mission_name(), "m.mi");
        // Next line is still readable: the sensor list was not consumed.
        let mut rest = String::new();
        cursor.read_line(&mut rest).unwrap();
        assert!(rest.starts_with("s:"));
    }

    #[test]
    fn empty_on_binary_input() {
        let hdr = DbdHeader::read(&mut Cursor::new(&[0xFFu8, 0xFE, 0x00][..])).unwrap();
        assert!(hdr.is_empty());
    }

    #[test]
    fn fileopen_epoch_handles_padded_days() {
        let hdr = parse("fileopen_time: Fri_Jan__3_18:58:13_2020\n");
        assert_eq!(hdr.fileopen_epoch(), Some(1578077893));
        let hdr = parse("fileopen_time: Thu_Feb_27_14:02:52_2020\n");
        assert_eq!(hdr.fileopen_epoch(), Some(1582812172));
    }

    #[test]
    fn mission_filters() {
        let hdr = parse("mission_name: Micro.MI\n");
        assert!(hdr.should_process_mission(&[], &[]));
        assert!(!hdr.should_process_mission(&["micro.mi".into()], &[]));
        assert!(hdr.should_process_mission(&[], &["MICRO.MI".into()]));
        assert!(!hdr.should_process_mission(&[], &["other.mi".into()]));
    }
}
