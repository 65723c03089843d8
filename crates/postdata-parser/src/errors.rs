use thiserror::Error;

use crate::model::InputColumn;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("CSV error: {source}")]
    Csv {
        #[source]
        source: csv::Error,
    },

    #[error("input header is missing required columns: {}", format_columns(.missing))]
    MissingColumns { missing: Vec<InputColumn> },

    #[error("data row {line} could not be read: {message}")]
    DataRow { line: u64, message: String },
}

impl From<csv::Error> for ParserError {
    fn from(source: csv::Error) -> Self {
        ParserError::Csv { source }
    }
}

fn format_columns(columns: &[InputColumn]) -> String {
    columns
        .iter()
        .map(|column| format!("'{}'", column.header()))
        .collect::<Vec<_>>()
        .join(", ")
}
