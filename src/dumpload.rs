//! Dump/load file format (§6): a line-oriented, UTF-8 snapshot of a
//! display's identity plus its current non-table and table VCP values,
//! used to replicate settings across an identical monitor.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::registry::EdidId;

#[derive(Debug, Error, PartialEq)]
pub enum DumpLoadError {
    #[error("unknown keyword {0:?} on line {1}")]
    UnknownKeyword(String, usize),
    #[error("malformed line {0}: {1:?}")]
    Malformed(usize, String),
    #[error("missing required keyword {0}")]
    MissingKeyword(&'static str),
}

/// One fully decoded VCP feature-code/value pair (§6 `VCP` line).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VcpValueRecord {
    pub feature_code: u8,
    pub value: u16,
}

/// One table feature's raw bytes (§6 `VCP_TABLE` line), hex-encoded on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VcpTableRecord {
    pub feature_code: u8,
    pub bytes: Vec<u8>,
}

/// A full dump/load record: identity, timestamp, and VCP state (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRecord {
    pub timestamp_millis: u128,
    pub timestamp_text: String,
    pub mfg_id: String,
    pub model: String,
    pub product_code: u16,
    pub serial: String,
    pub edid_hex: String,
    pub vcp_values: Vec<VcpValueRecord>,
    pub vcp_table_values: Vec<VcpTableRecord>,
}

impl DumpRecord {
    /// ddcutil's `create_simple_vcp_fn_by_edid`: `mfg-model-serial.vcp`
    /// with spaces replaced by underscores.
    pub fn filename(&self) -> String {
        let sanitize = |s: &str| s.replace(' ', "_");
        format!(
            "{}-{}-{}.vcp",
            sanitize(&self.mfg_id),
            sanitize(&self.model),
            sanitize(&self.serial)
        )
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        writeln!(out, "TIMESTAMP_MILLIS {}", self.timestamp_millis).unwrap();
        writeln!(out, "TIMESTAMP_TEXT {}", self.timestamp_text).unwrap();
        writeln!(out, "MFG_ID {}", self.mfg_id).unwrap();
        writeln!(out, "MODEL {}", self.model).unwrap();
        writeln!(out, "PRODUCT_CODE {}", self.product_code).unwrap();
        writeln!(out, "SN {}", self.serial).unwrap();
        writeln!(out, "EDID {}", self.edid_hex).unwrap();
        for v in &self.vcp_values {
            writeln!(out, "VCP {:02X} {}", v.feature_code, v.value).unwrap();
        }
        for t in &self.vcp_table_values {
            let hex: String = t.bytes.iter().map(|b| format!("{b:02X}")).collect();
            writeln!(out, "VCP_TABLE {:02X} {}", t.feature_code, hex).unwrap();
        }
        out
    }

    pub fn from_text(text: &str) -> Result<Self, DumpLoadError> {
        let mut fields: BTreeMap<&str, String> = BTreeMap::new();
        let mut vcp_values = Vec::new();
        let mut vcp_table_values = Vec::new();

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let (keyword, rest) = line
                .split_once(' ')
                .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
            match keyword {
                "TIMESTAMP_MILLIS" | "TIMESTAMP_TEXT" | "MFG_ID" | "MODEL" | "PRODUCT_CODE"
                | "SN" | "EDID" => {
                    fields.insert(keyword, rest.trim().to_string());
                }
                "VCP" => {
                    let mut parts = rest.split_whitespace();
                    let code = parts
                        .next()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                        .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
                    let value = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
                    vcp_values.push(VcpValueRecord {
                        feature_code: code,
                        value,
                    });
                }
                "VCP_TABLE" => {
                    let mut parts = rest.split_whitespace();
                    let code = parts
                        .next()
                        .and_then(|s| u8::from_str_radix(s, 16).ok())
                        .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
                    let hex = parts
                        .next()
                        .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
                    let bytes = decode_hex(hex)
                        .ok_or_else(|| DumpLoadError::Malformed(lineno, raw_line.to_string()))?;
                    vcp_table_values.push(VcpTableRecord {
                        feature_code: code,
                        bytes,
                    });
                }
                other => return Err(DumpLoadError::UnknownKeyword(other.to_string(), lineno)),
            }
        }

        let take = |key: &'static str| {
            fields
                .get(key)
                .cloned()
                .ok_or(DumpLoadError::MissingKeyword(key))
        };

        Ok(DumpRecord {
            timestamp_millis: take("TIMESTAMP_MILLIS")?
                .parse()
                .map_err(|_| DumpLoadError::Malformed(0, "TIMESTAMP_MILLIS".into()))?,
            timestamp_text: take("TIMESTAMP_TEXT")?,
            mfg_id: take("MFG_ID")?,
            model: take("MODEL")?,
            product_code: take("PRODUCT_CODE")?
                .parse()
                .map_err(|_| DumpLoadError::Malformed(0, "PRODUCT_CODE".into()))?,
            serial: take("SN")?,
            edid_hex: take("EDID")?,
            vcp_values,
            vcp_table_values,
        })
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

pub fn edid_id_from_record(record: &DumpRecord) -> Option<EdidId> {
    let mfg_chars: Vec<char> = record.mfg_id.chars().collect();
    if mfg_chars.len() != 3 {
        return None;
    }
    Some(EdidId {
        mfg_id: [mfg_chars[0], mfg_chars[1], mfg_chars[2]],
        model: record.product_code,
        serial: record.serial.parse().unwrap_or(0),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> DumpRecord {
        DumpRecord {
            timestamp_millis: 1_700_000_000_000,
            timestamp_text: "2023-11-14 12:00:00".into(),
            mfg_id: "DEL".into(),
            model: "U2720Q".into(),
            product_code: 0x1234,
            serial: "987654321".into(),
            edid_hex: "00FFFFFFFFFFFF00".into(),
            vcp_values: vec![
                VcpValueRecord {
                    feature_code: 0x10,
                    value: 75,
                },
                VcpValueRecord {
                    feature_code: 0x12,
                    value: 50,
                },
            ],
            vcp_table_values: vec![VcpTableRecord {
                feature_code: 0xe2,
                bytes: vec![0xde, 0xad, 0xbe, 0xef],
            }],
        }
    }

    #[test]
    fn roundtrips_through_text() {
        let record = sample();
        let text = record.to_text();
        let parsed = DumpRecord::from_text(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn filename_replaces_spaces() {
        let mut record = sample();
        record.model = "U27 20Q".into();
        assert_eq!(record.filename(), "DEL-U27_20Q-987654321.vcp");
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let text = "TIMESTAMP_MILLIS 1\nTIMESTAMP_TEXT x\nMFG_ID DEL\nMODEL X\nPRODUCT_CODE 1\nSN 1\nEDID 00\nBOGUS foo\n";
        assert!(matches!(
            DumpRecord::from_text(text),
            Err(DumpLoadError::UnknownKeyword(kw, _)) if kw == "BOGUS"
        ));
    }

    #[test]
    fn missing_keyword_is_rejected() {
        let text = "MFG_ID DEL\n";
        assert!(matches!(
            DumpRecord::from_text(text),
            Err(DumpLoadError::MissingKeyword("TIMESTAMP_MILLIS"))
        ));
    }
}
