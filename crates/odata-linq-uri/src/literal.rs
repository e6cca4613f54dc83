//! Literal formatting
//!
//! The converter and the segment visitor never format values themselves;
//! they go through a [`LiteralConverter`] and escape its output.

use odata_linq_diagnostics::Result;
use odata_linq_types::ScalarValue;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Characters escaped inside rendered literals
const LITERAL_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^')
    .add(b'[')
    .add(b']');

/// Formats scalar values as OData URI literals
pub trait LiteralConverter: Send + Sync {
    fn to_literal(&self, value: &ScalarValue) -> Result<String>;
}

/// OData v3 literal forms
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLiteralConverter;

impl DefaultLiteralConverter {
    pub fn new() -> Self {
        Self
    }
}

impl LiteralConverter for DefaultLiteralConverter {
    fn to_literal(&self, value: &ScalarValue) -> Result<String> {
        Ok(match value {
            ScalarValue::Null => "null".to_string(),
            ScalarValue::Boolean(b) => b.to_string(),
            ScalarValue::Byte(v) => v.to_string(),
            ScalarValue::Int16(v) => v.to_string(),
            ScalarValue::Int32(v) => v.to_string(),
            ScalarValue::Int64(v) => format!("{v}L"),
            ScalarValue::Single(v) => format!("{}f", floating(f64::from(*v))),
            ScalarValue::Double(v) => format!("{}d", floating(*v)),
            ScalarValue::Decimal(d) => format!("{d}M"),
            ScalarValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            ScalarValue::DateTime(dt) => {
                format!("datetime'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.f"))
            }
            ScalarValue::DateTimeOffset(dt) => format!("datetimeoffset'{}'", dt.to_rfc3339()),
            ScalarValue::Guid(g) => format!("guid'{g}'"),
            ScalarValue::Binary(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
        })
    }
}

fn floating(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        value.to_string()
    }
}

/// Percent-escape a rendered literal for use inside a URI
pub fn escape_literal(literal: &str) -> String {
    utf8_percent_encode(literal, LITERAL_ESCAPE).to_string()
}
