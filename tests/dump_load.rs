//! Dump/load file format coverage (§6 / §8) from outside the crate: a
//! record built by hand, written out, and parsed back, plus the
//! unknown-keyword rejection the format promises.

use ddcutil_core::dumpload::{edid_id_from_record, DumpLoadError, DumpRecord, VcpTableRecord, VcpValueRecord};
use ddcutil_core::registry::EdidId;

fn sample() -> DumpRecord {
    DumpRecord {
        timestamp_millis: 1_701_000_000_000,
        timestamp_text: "2023-11-26 09:00:00".into(),
        mfg_id: "ACI".into(),
        model: "P27Q".into(),
        product_code: 0x2222,
        serial: "55512345".into(),
        edid_hex: "00FF".into(),
        vcp_values: vec![VcpValueRecord {
            feature_code: 0x10,
            value: 80,
        }],
        vcp_table_values: vec![VcpTableRecord {
            feature_code: 0xe3,
            bytes: vec![0x01, 0x02],
        }],
    }
}

#[test]
fn writes_and_reads_back_identically() {
    let record = sample();
    let text = record.to_text();
    let parsed = DumpRecord::from_text(&text).unwrap();
    assert_eq!(parsed, record);
}

#[test]
fn edid_id_is_derived_from_mfg_model_serial() {
    let record = sample();
    let id = edid_id_from_record(&record).unwrap();
    assert_eq!(
        id,
        EdidId {
            mfg_id: ['A', 'C', 'I'],
            model: 0x2222,
            serial: 55512345,
        }
    );
}

#[test]
fn rejects_an_unknown_keyword_with_its_line_number() {
    let text = "TIMESTAMP_MILLIS 1\nTIMESTAMP_TEXT x\nMFG_ID ACI\nMODEL X\nPRODUCT_CODE 1\nSN 1\nEDID 00\nWEIRD foo\n";
    let err = DumpRecord::from_text(text).unwrap_err();
    assert_eq!(err, DumpLoadError::UnknownKeyword("WEIRD".into(), 7));
}
