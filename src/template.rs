//! Template generation: an `Instructions` sheet plus a headers-only data sheet.

use crate::config::ImportExportConfig;
use crate::error::EngineError;
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Format, Workbook, Worksheet};
use serde_json::Value;
use tracing::info;

pub const INSTRUCTIONS_SHEET: &str = "Instructions";

/// A generated spreadsheet ready for download.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Workbook with fixed document properties so identical input produces identical content.
pub(crate) fn new_workbook() -> Result<Workbook, EngineError> {
    let mut workbook = Workbook::new();
    let created = ExcelDateTime::from_ymd(2000, 1, 1)?;
    let properties = DocProperties::new()
        .set_author("sheet-porter")
        .set_creation_datetime(&created);
    workbook.set_properties(&properties);
    Ok(workbook)
}

/// Cell text for an example or exported scalar.
pub(crate) fn value_to_cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Build the downloadable import template for a config.
pub fn generate_template(config: &ImportExportConfig) -> Result<GeneratedFile, EngineError> {
    config.validate().map_err(EngineError::InvalidConfig)?;

    let mut workbook = new_workbook()?;
    workbook.push_worksheet(build_instructions(config)?);
    workbook.push_worksheet(build_data_sheet(config)?);

    let bytes = workbook.save_to_buffer()?;
    let file_name = format!("{}_Import_Template.xlsx", config.file_prefix());

    info!(
        "Generated template {} ({} fields, {} bytes)",
        file_name,
        config.fields.len(),
        bytes.len()
    );

    Ok(GeneratedFile { file_name, bytes })
}

fn build_instructions(config: &ImportExportConfig) -> Result<Worksheet, EngineError> {
    let bold = Format::new().set_bold();
    let title = Format::new().set_bold().set_font_size(14);

    let mut sheet = Worksheet::new();
    sheet.set_name(INSTRUCTIONS_SHEET)?;
    sheet.set_column_width(0, 60)?;

    let mut row: u32 = 0;
    sheet.write_string_with_format(row, 0, format!("{} Import Template", config.entity_name), &title)?;
    row += 2;

    sheet.write_string_with_format(row, 0, "Instructions:", &bold)?;
    row += 1;
    let steps = [
        format!("1. Fill in your data in the '{}' sheet", config.sheet_name()),
        "2. Fields marked with * are required".to_string(),
        "3. Do not change the header row".to_string(),
        "4. Use only the listed options for fields that have them".to_string(),
        "5. Save the file and upload it with the Import button".to_string(),
    ];
    for step in steps {
        sheet.write_string(row, 0, step)?;
        row += 1;
    }
    row += 1;

    sheet.write_string_with_format(row, 0, "Field Descriptions:", &bold)?;
    row += 1;
    for field in &config.fields {
        let mut line = format!(
            "{}: {}",
            field.header_name,
            if field.required { "Required" } else { "Optional" }
        );
        if let Some(description) = &field.description {
            line.push_str(&format!(" - {}", description));
        }
        if let Some(values) = field.field_type.enum_values() {
            line.push_str(&format!(" (Options: {})", values.join(", ")));
        }
        sheet.write_string(row, 0, line)?;
        row += 1;
    }

    for reference in config.reference_data.iter().filter(|r| !r.items.is_empty()) {
        row += 1;
        sheet.write_string_with_format(row, 0, format!("Valid {}:", reference.display_name), &bold)?;
        row += 1;
        for item in &reference.items {
            sheet.write_string(row, 0, format!("- {}", item.name))?;
            row += 1;
        }
    }
    row += 1;

    sheet.write_string_with_format(row, 0, "Example:", &bold)?;
    row += 1;
    for (col, field) in config.fields.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(row, col, field.header_label(), &bold)?;
        sheet.write_string(row + 1, col, value_to_cell_text(&field.example))?;
    }

    Ok(sheet)
}

fn build_data_sheet(config: &ImportExportConfig) -> Result<Worksheet, EngineError> {
    let bold = Format::new().set_bold();

    let mut sheet = Worksheet::new();
    sheet.set_name(config.sheet_name())?;

    for (col, field) in config.fields.iter().enumerate() {
        let col = col as u16;
        let label = field.header_label();
        sheet.set_column_width(col, (label.chars().count() + 5).max(12) as f64)?;
        sheet.write_string_with_format(0, col, label, &bold)?;
    }

    Ok(sheet)
}
