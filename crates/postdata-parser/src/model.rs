use std::fmt;

use csv::StringRecord;
use serde::Serialize;

/// Columns of the shipment export that the enrichment job reads.
///
/// Every other column in an input file is carried along untouched so the
/// skipped-rows log can reproduce the original record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InputColumn {
    TrackingNumber,
    NatureOfTransaction,
    DeclaredValue,
    CurrencyCode,
    CountryOfOrigin,
    ShipperAccountId,
}

impl InputColumn {
    pub const ALL: [InputColumn; 6] = [
        InputColumn::TrackingNumber,
        InputColumn::NatureOfTransaction,
        InputColumn::DeclaredValue,
        InputColumn::CurrencyCode,
        InputColumn::CountryOfOrigin,
        InputColumn::ShipperAccountId,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            InputColumn::TrackingNumber => "Tracking Number",
            InputColumn::NatureOfTransaction => "Nature of Transaction",
            InputColumn::DeclaredValue => "Item Content Declared Value",
            InputColumn::CurrencyCode => "Item Content Currency Code",
            InputColumn::CountryOfOrigin => "Item Content Country of Origin Code",
            InputColumn::ShipperAccountId => "Shipper Account ID",
        }
    }

    /// Only the country of origin may be absent; it defaults to an empty value.
    pub fn is_required(&self) -> bool {
        !matches!(self, InputColumn::CountryOfOrigin)
    }
}

impl fmt::Display for InputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// One shipment record from an input file.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    /// 1-based line in the source file, header included.
    pub line: u64,
    pub tracking_number: String,
    pub nature_of_transaction: String,
    pub declared_value: String,
    pub currency_code: String,
    pub country_of_origin: String,
    pub shipper_account_id: String,
    raw: StringRecord,
}

impl InputRow {
    pub(crate) fn new(
        line: u64,
        raw: StringRecord,
        field: impl Fn(&StringRecord, InputColumn) -> String,
    ) -> Self {
        Self {
            line,
            tracking_number: field(&raw, InputColumn::TrackingNumber),
            nature_of_transaction: field(&raw, InputColumn::NatureOfTransaction),
            declared_value: field(&raw, InputColumn::DeclaredValue),
            currency_code: field(&raw, InputColumn::CurrencyCode),
            country_of_origin: field(&raw, InputColumn::CountryOfOrigin),
            shipper_account_id: field(&raw, InputColumn::ShipperAccountId),
            raw,
        }
    }

    /// The record exactly as it appeared in the input file.
    pub fn raw(&self) -> &StringRecord {
        &self.raw
    }
}

#[derive(Debug, Clone)]
pub struct InputFile {
    pub headers: StringRecord,
    pub rows: Vec<InputRow>,
    /// Optional columns that were absent from the header.
    pub missing_optional: Vec<InputColumn>,
}

impl InputFile {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
