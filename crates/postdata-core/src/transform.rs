use chrono::{NaiveDate, NaiveDateTime};
use postdata_parser::InputRow;
use serde::Serialize;
use thiserror::Error;

use crate::normalize::EnrichmentResult;

const ARRIVAL_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const ARRIVAL_DATE_FORMAT: &str = "%Y-%m-%d";
const OUTPUT_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("arrival date '{0}' matches neither YYYY-MM-DD HH:MM nor YYYY-MM-DD")]
    DateParse(String),
}

/// One line of the postal data export. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    #[serde(rename = "Carrier Code")]
    pub carrier_code: String,
    #[serde(rename = "Flight/ Trip Number")]
    pub trip_number: String,
    #[serde(rename = "Tracking Number")]
    pub tracking_number: String,
    #[serde(rename = "Nature of Transaction")]
    pub nature_of_transaction: String,
    #[serde(rename = "Arrival Port Code")]
    pub arrival_port_code: String,
    #[serde(rename = "Arrival Date")]
    pub arrival_date: String,
    #[serde(rename = "Declared Value")]
    pub declared_value: String,
    #[serde(rename = "Currency Code")]
    pub currency_code: String,
    #[serde(rename = "Country of Origin")]
    pub country_of_origin: String,
    #[serde(rename = "Shipper Account ID")]
    pub shipper_account_id: String,
}

pub fn transform(
    input: &InputRow,
    enrichment: &EnrichmentResult,
) -> Result<OutputRow, TransformError> {
    Ok(OutputRow {
        carrier_code: carrier_code(&enrichment.carrier),
        trip_number: trip_number(&enrichment.flight),
        tracking_number: input.tracking_number.clone(),
        nature_of_transaction: input.nature_of_transaction.clone(),
        arrival_port_code: port_code(&enrichment.arrival_port),
        arrival_date: format_arrival_date(&enrichment.arrival_date)?,
        declared_value: input.declared_value.clone(),
        currency_code: input.currency_code.clone(),
        country_of_origin: strip_whitespace(&input.country_of_origin),
        shipper_account_id: input.shipper_account_id.clone(),
    })
}

/// First two characters of the carrier.
pub fn carrier_code(carrier: &str) -> String {
    carrier.chars().take(2).collect()
}

/// Flight code minus its two-letter carrier prefix; empty when shorter than three.
pub fn trip_number(flight: &str) -> String {
    if flight.chars().count() >= 3 {
        flight.chars().skip(2).collect()
    } else {
        String::new()
    }
}

/// Characters 2..5 of the arrival port; empty when shorter than five.
pub fn port_code(arrival_port: &str) -> String {
    if arrival_port.chars().count() >= 5 {
        arrival_port.chars().skip(2).take(3).collect()
    } else {
        String::new()
    }
}

pub fn format_arrival_date(value: &str) -> Result<String, TransformError> {
    let trimmed = value.trim();
    NaiveDateTime::parse_from_str(trimmed, ARRIVAL_DATE_TIME_FORMAT)
        .map(|datetime| datetime.date())
        .or_else(|_| NaiveDate::parse_from_str(trimmed, ARRIVAL_DATE_FORMAT))
        .map(|date| date.format(OUTPUT_DATE_FORMAT).to_string())
        .map_err(|_| TransformError::DateParse(value.to_string()))
}

/// Removes every whitespace character, not just the surrounding ones.
pub fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}
