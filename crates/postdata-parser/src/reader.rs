use std::collections::HashMap;
use std::io::Read;

use csv::StringRecord;

use crate::errors::ParserError;
use crate::model::{InputColumn, InputFile, InputRow};

const BYTE_ORDER_MARK: char = '\u{feff}';

pub fn parse_input_str(content: &str) -> Result<InputFile, ParserError> {
    parse_input(content.as_bytes())
}

/// Reads a comma-delimited shipment export with a header row.
///
/// Required columns are only enforced once the file has at least one data
/// row, so a header-only (or entirely empty) file parses to zero rows.
pub fn parse_input<R: Read>(source: R) -> Result<InputFile, ParserError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    let columns = locate_columns(&headers);

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(record_error)?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        records.push((line, record));
    }

    let missing_optional: Vec<InputColumn> = InputColumn::ALL
        .into_iter()
        .filter(|column| !column.is_required() && !columns.contains_key(column))
        .collect();

    if records.is_empty() {
        return Ok(InputFile {
            headers,
            rows: Vec::new(),
            missing_optional,
        });
    }

    let missing: Vec<InputColumn> = InputColumn::ALL
        .into_iter()
        .filter(|column| column.is_required() && !columns.contains_key(column))
        .collect();
    if !missing.is_empty() {
        return Err(ParserError::MissingColumns { missing });
    }

    let field = |raw: &StringRecord, column: InputColumn| {
        columns
            .get(&column)
            .and_then(|&index| raw.get(index))
            .unwrap_or_default()
            .to_string()
    };

    let rows = records
        .into_iter()
        .map(|(line, raw)| InputRow::new(line, raw, field))
        .collect();

    Ok(InputFile {
        headers,
        rows,
        missing_optional,
    })
}

fn locate_columns(headers: &StringRecord) -> HashMap<InputColumn, usize> {
    let mut columns = HashMap::new();
    for (index, name) in headers.iter().enumerate() {
        let name = name.trim_start_matches(BYTE_ORDER_MARK).trim();
        if let Some(column) = InputColumn::ALL
            .into_iter()
            .find(|column| column.header() == name)
        {
            columns.entry(column).or_insert(index);
        }
    }
    columns
}

fn record_error(err: csv::Error) -> ParserError {
    match err.position() {
        Some(pos) => ParserError::DataRow {
            line: pos.line(),
            message: err.to_string(),
        },
        None => ParserError::from(err),
    }
}
