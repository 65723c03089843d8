use std::fs;
use std::path::PathBuf;

use crate::errors::ParserError;
use crate::model::InputColumn;
use crate::{parse_input, parse_input_str};

fn fixture(path: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let full_path = base.join("tests/data").join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|err| panic!("failed to read fixture {}: {}", full_path.display(), err))
}

#[test]
fn parses_export_with_extra_columns() {
    let content = fixture("shipments_basic.csv");
    let parsed = parse_input_str(&content).expect("basic export parse failed");

    assert_eq!(parsed.len(), 3);
    assert!(parsed.missing_optional.is_empty());
    assert_eq!(parsed.headers.len(), 8);
    assert_eq!(parsed.headers.get(0), Some("Order ID"));

    let first = &parsed.rows[0];
    assert_eq!(first.tracking_number, "RR123456785PT");
    assert_eq!(first.nature_of_transaction, "11");
    assert_eq!(first.declared_value, "24.90");
    assert_eq!(first.currency_code, "EUR");
    assert_eq!(first.country_of_origin, "P T");
    assert_eq!(first.shipper_account_id, "SHP-0042");
    assert_eq!(first.line, 2);
}

#[test]
fn keeps_raw_record_untouched() {
    let content = fixture("shipments_basic.csv");
    let parsed = parse_input_str(&content).expect("basic export parse failed");

    let first = parsed.rows[0].raw();
    assert_eq!(first.get(0), Some("ZN-1001"));
    assert_eq!(first.get(3), Some("Cotton shirt, blue"));

    let third = &parsed.rows[2];
    assert_eq!(third.country_of_origin, " C N ");
    assert_eq!(third.raw().get(6), Some(" C N "));
}

#[test]
fn missing_country_column_defaults_to_empty() {
    let content = fixture("shipments_no_country.csv");
    let parsed = parse_input_str(&content).expect("export without country parse failed");

    assert_eq!(parsed.missing_optional, vec![InputColumn::CountryOfOrigin]);
    assert_eq!(parsed.rows[0].country_of_origin, "");
    assert_eq!(parsed.rows[0].tracking_number, "RR123456785PT");
}

#[test]
fn missing_required_column_is_rejected() {
    let content = fixture("shipments_missing_tracking.csv");
    let err = parse_input_str(&content).expect_err("missing tracking column should fail");

    match err {
        ParserError::MissingColumns { missing } => {
            assert_eq!(missing, vec![InputColumn::TrackingNumber]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_column_error_names_the_header() {
    let content = fixture("shipments_missing_tracking.csv");
    let err = parse_input_str(&content).expect_err("missing tracking column should fail");
    assert!(err.to_string().contains("'Tracking Number'"));
}

#[test]
fn header_only_file_has_no_rows() {
    let content = fixture("header_only.csv");
    let parsed = parse_input_str(&content).expect("header-only parse failed");
    assert!(parsed.is_empty());
}

#[test]
fn empty_file_has_no_rows() {
    let parsed = parse_input(&b""[..]).expect("empty file parse failed");
    assert!(parsed.is_empty());
    assert!(parsed.headers.is_empty());
}

#[test]
fn short_rows_fill_missing_fields_with_empty_values() {
    let content = fixture("shipments_short_row.csv");
    let parsed = parse_input_str(&content).expect("short row parse failed");

    let row = &parsed.rows[0];
    assert_eq!(row.declared_value, "24.90");
    assert_eq!(row.currency_code, "");
    assert_eq!(row.shipper_account_id, "");
    assert_eq!(row.raw().len(), 3);
}

#[test]
fn byte_order_mark_does_not_hide_first_header() {
    let content = "\u{feff}Tracking Number,Nature of Transaction,Item Content Declared Value,Item Content Currency Code,Shipper Account ID\nAB1,11,1.00,EUR,S1\n";
    let parsed = parse_input_str(content).expect("BOM-prefixed parse failed");
    assert_eq!(parsed.rows[0].tracking_number, "AB1");
}
