pub mod errors;
pub mod model;
mod reader;

pub use errors::ParserError;
pub use model::{InputColumn, InputFile, InputRow};
pub use reader::{parse_input, parse_input_str};

#[cfg(test)]
mod tests;
