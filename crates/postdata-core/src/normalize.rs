//! Decoding of the routing procedure's result row.
//!
//! The procedure returns a wide, unnamed row whose column positions are the
//! only contract. The indices below are that contract.

use serde::Serialize;
use thiserror::Error;

use crate::source::RawRow;

pub const UAT_NUMBER: usize = 0;
pub const ARRIVAL_PORT: usize = 3;
pub const EXPEDITION_DATE: usize = 13;
pub const CONSIGNMENT: usize = 15;
pub const ARRIVAL_DATE: usize = 29;

/// Flight/carrier candidates, most preferred first.
pub const FLIGHT_PREFERRED: [usize; 3] = [26, 23, 20];
/// Taken when every preferred candidate is empty, even if it is empty too.
pub const FLIGHT_FALLBACK: usize = 18;

/// Minimum number of columns a routing row must carry.
pub const ROUTE_ROW_WIDTH: usize = ARRIVAL_DATE + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("routing row has {actual} columns, expected at least {expected}")]
    ShortRow { actual: usize, expected: usize },
}

/// Routing attributes attached to one tracking number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentResult {
    pub uat_number: String,
    pub expedition_date: String,
    pub consignment: String,
    pub arrival_date: String,
    pub flight: String,
    pub carrier: String,
    pub arrival_port: String,
}

pub fn normalize(row: &RawRow) -> Result<EnrichmentResult, NormalizeError> {
    if row.len() < ROUTE_ROW_WIDTH {
        return Err(NormalizeError::ShortRow {
            actual: row.len(),
            expected: ROUTE_ROW_WIDTH,
        });
    }

    let text = |index: usize| row[index].clone().unwrap_or_default();
    let flight = select_flight(row);

    Ok(EnrichmentResult {
        uat_number: text(UAT_NUMBER),
        expedition_date: text(EXPEDITION_DATE),
        consignment: text(CONSIGNMENT),
        arrival_date: text(ARRIVAL_DATE),
        carrier: flight.clone(),
        flight,
        arrival_port: text(ARRIVAL_PORT),
    })
}

/// In this feed carrier and flight share one source column.
fn select_flight(row: &RawRow) -> String {
    FLIGHT_PREFERRED
        .iter()
        .filter_map(|&index| row[index].as_deref())
        .find(|value| !value.is_empty())
        .or(row[FLIGHT_FALLBACK].as_deref())
        .unwrap_or_default()
        .to_string()
}
