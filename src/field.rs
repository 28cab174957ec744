//! Field schema descriptors for import/export configs.
//!
//! A descriptor defines one spreadsheet column: the header text shown to the
//! user, the record key it maps to, and how raw cell text is coerced.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Column type. Enum values live inside the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    Enum(Vec<String>),
}

impl FieldType {
    pub fn enum_values(&self) -> Option<&[String]> {
        match self {
            FieldType::Enum(values) => Some(values),
            _ => None,
        }
    }
}

type ParseFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;

/// Custom coercion for a single field. Takes precedence over the type rules.
#[derive(Clone)]
pub struct FieldParser {
    name: String,
    func: Arc<ParseFn>,
}

impl FieldParser {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Look up one of the built-in parsers usable from JSON configs.
    pub fn named(name: &str) -> Option<Self> {
        let parser = match name {
            "strip_whitespace" => Self::new(name, |raw| {
                Ok(Value::String(raw.split_whitespace().collect::<Vec<_>>().join(" ")))
            }),
            "to_uppercase" => Self::new(name, |raw| Ok(Value::String(raw.trim().to_uppercase()))),
            "to_lowercase" => Self::new(name, |raw| Ok(Value::String(raw.trim().to_lowercase()))),
            "to_number" => Self::new(name, |raw| {
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(number_value)
                    .ok_or_else(|| format!("\"{}\" is not a number", raw.trim()))
            }),
            "to_integer" => Self::new(name, |raw| {
                let v = raw.trim();
                v.parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| match v.parse::<f64>() {
                        Ok(n) if n.is_finite() && n.fract() == 0.0 => Ok(Value::from(n as i64)),
                        _ => Err(format!("\"{}\" is not an integer", v)),
                    })
            }),
            "parse_currency_usd" => Self::new(name, |raw| {
                let cleaned: String = raw
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                parse_amount(raw, &cleaned)
            }),
            "parse_currency_brl" => Self::new(name, |raw| {
                let cleaned: String = raw
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '-')
                    .map(|c| if c == ',' { '.' } else { c })
                    .collect();
                parse_amount(raw, &cleaned)
            }),
            "parse_date_br" => Self::new(name, |raw| parse_date_with(raw, "%d/%m/%Y")),
            "parse_date_us" => Self::new(name, |raw| parse_date_with(raw, "%m/%d/%Y")),
            _ => return None,
        };
        Some(parser)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, raw: &str) -> Result<Value, String> {
        (self.func)(raw)
    }
}

impl fmt::Debug for FieldParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldParser").field(&self.name).finish()
    }
}

/// Declarative definition of one importable/exportable column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawFieldDescriptor", into = "RawFieldDescriptor")]
pub struct FieldDescriptor {
    pub header_name: String,
    pub field_name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub example: Value,
    pub parser: Option<FieldParser>,
    pub description: Option<String>,
    /// Number column rendered with the config's currency format on export.
    pub currency: bool,
}

impl FieldDescriptor {
    pub fn new(header_name: impl Into<String>, field_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            header_name: header_name.into(),
            field_name: field_name.into(),
            field_type,
            required: false,
            example: Value::Null,
            parser: None,
            description: None,
            currency: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn example(mut self, example: impl Into<Value>) -> Self {
        self.example = example.into();
        self
    }

    pub fn with_parser(mut self, parser: FieldParser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Header text as written into templates: required columns carry a trailing `*`.
    pub fn header_label(&self) -> String {
        if self.required {
            format!("{}*", self.header_name)
        } else {
            self.header_name.clone()
        }
    }

    /// Coerce raw (non-empty) cell text into the record value.
    pub fn coerce(&self, raw: &str) -> Result<Value, String> {
        if let Some(parser) = &self.parser {
            return parser.apply(raw);
        }

        match &self.field_type {
            FieldType::Text => Ok(Value::String(raw.trim().to_string())),
            FieldType::Number => Ok(number_value(parse_float_prefix(raw).unwrap_or(0.0))),
            FieldType::Boolean => {
                let v = raw.trim().to_lowercase();
                Ok(Value::Bool(v == "yes" || v == "true"))
            }
            FieldType::Date => parse_date(raw)
                .map(Value::String)
                .ok_or_else(|| format!("Invalid date \"{}\" for {}", raw.trim(), self.header_name)),
            FieldType::Enum(values) => {
                let v = raw.trim();
                if values.iter().any(|allowed| allowed == v) {
                    Ok(Value::String(v.to_string()))
                } else {
                    Err(format!(
                        "Invalid value \"{}\" for {}. Must be one of: {}",
                        v,
                        self.header_name,
                        values.join(", ")
                    ))
                }
            }
        }
    }
}

/// Normalise header text for column matching: trim, drop the required
/// marker, compare case-insensitively.
pub fn normalize_header(header: &str) -> String {
    header.trim().trim_end_matches('*').trim().to_lowercase()
}

/// Read-only lookup list shown in template instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDataSet {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub items: Vec<ReferenceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ============================================================================
// Wire form
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawFieldType {
    #[default]
    Text,
    Number,
    Boolean,
    Date,
    Enum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFieldDescriptor {
    header_name: String,
    field_name: String,
    #[serde(rename = "type", default)]
    field_type: RawFieldType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    example: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    currency: bool,
}

impl TryFrom<RawFieldDescriptor> for FieldDescriptor {
    type Error = String;

    fn try_from(raw: RawFieldDescriptor) -> Result<Self, Self::Error> {
        let field_type = match raw.field_type {
            RawFieldType::Text => FieldType::Text,
            RawFieldType::Number => FieldType::Number,
            RawFieldType::Boolean => FieldType::Boolean,
            RawFieldType::Date => FieldType::Date,
            RawFieldType::Enum => {
                if raw.enum_values.is_empty() {
                    return Err(format!(
                        "Field \"{}\" is an enum but has no enum_values",
                        raw.header_name
                    ));
                }
                FieldType::Enum(raw.enum_values)
            }
        };

        let parser = match raw.parser {
            Some(name) => Some(FieldParser::named(&name).ok_or_else(|| {
                format!("Unknown parser \"{}\" on field \"{}\"", name, raw.header_name)
            })?),
            None => None,
        };

        let mut field = Self::new(raw.header_name, raw.field_name, field_type).example(raw.example);
        if raw.required {
            field = field.required();
        }
        if let Some(parser) = parser {
            field = field.with_parser(parser);
        }
        if let Some(description) = raw.description {
            field = field.describe(description);
        }
        field.currency = raw.currency;
        Ok(field)
    }
}

impl From<FieldDescriptor> for RawFieldDescriptor {
    fn from(field: FieldDescriptor) -> Self {
        let (field_type, enum_values) = match field.field_type {
            FieldType::Text => (RawFieldType::Text, Vec::new()),
            FieldType::Number => (RawFieldType::Number, Vec::new()),
            FieldType::Boolean => (RawFieldType::Boolean, Vec::new()),
            FieldType::Date => (RawFieldType::Date, Vec::new()),
            FieldType::Enum(values) => (RawFieldType::Enum, values),
        };
        Self {
            header_name: field.header_name,
            field_name: field.field_name,
            field_type,
            required: field.required,
            example: field.example,
            enum_values,
            parser: field.parser.as_ref().map(|p| p.name().to_string()),
            description: field.description,
            currency: field.currency,
        }
    }
}

// ============================================================================
// Coercion helpers
// ============================================================================

/// JSON number for a parsed float; integral values are emitted as integers.
fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::from(0);
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

/// Longest leading decimal literal, the way `parseFloat` reads "12.5kg" as 12.5.
fn parse_float_prefix(raw: &str) -> Option<f64> {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut end = 0;

    if end < len && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < len && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < len && bytes[end] == b'.' {
        let mut frac_end = end + 1;
        while frac_end < len && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        let frac_digits = frac_end - end - 1;
        if frac_digits > 0 {
            digits += frac_digits;
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < len && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < len && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < len && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse the date shapes users type into spreadsheets; all treated as UTC.
pub(crate) fn parse_date(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(to_iso(dt.with_timezone(&Utc)));
    }

    const DATE_TIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in DATE_TIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(to_iso(ndt.and_utc()));
        }
    }

    const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(v, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|ndt| to_iso(ndt.and_utc()));
        }
    }

    None
}

fn parse_date_with(raw: &str, fmt: &str) -> Result<Value, String> {
    NaiveDate::parse_from_str(raw.trim(), fmt)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ndt| Value::String(to_iso(ndt.and_utc())))
        .ok_or_else(|| format!("\"{}\" is not a valid date", raw.trim()))
}

fn parse_amount(raw: &str, cleaned: &str) -> Result<Value, String> {
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(number_value)
        .ok_or_else(|| format!("\"{}\" is not a valid amount", raw.trim()))
}
