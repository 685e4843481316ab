//! Input line parsing.
//!
//! Lines have the form `operand1,operand2,operator`. The operator symbol is
//! carried through untouched; mapping it to an operation is the
//! dispatcher's job.

use crate::error::ParseError;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub operand1: f64,
    pub operand2: f64,
    pub symbol: String,
}

impl Entry {
    pub fn new(operand1: f64, operand2: f64, symbol: impl Into<String>) -> Self {
        Self {
            operand1,
            operand2,
            symbol: symbol.into(),
        }
    }
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Entry>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(ParseError::FieldCount(fields.len()));
    }

    Ok(Some(Entry::new(
        parse_operand(fields[0])?,
        parse_operand(fields[1])?,
        fields[2],
    )))
}

fn parse_operand(field: &str) -> Result<f64, ParseError> {
    field
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidOperand(field.to_string()))
}
