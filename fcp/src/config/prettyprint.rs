//! Configuration pretty-printing
// (c) 2026 Ross Younger

use std::fmt::Display;

use figment::{Metadata, value::Value};
use tabled::{Table, Tabled, settings::Style};

use super::{Configuration, Manager};

/// Data type used when rendering the config table
#[derive(Tabled)]
struct PrettyConfig {
    field: String,
    value: String,
    source: String,
}

impl PrettyConfig {
    fn render_source(meta: Option<&Metadata>) -> String {
        if let Some(m) = meta {
            m.source
                .as_ref()
                .map_or_else(|| m.name.to_string(), figment::Source::to_string)
        } else {
            String::new()
        }
    }

    fn render_value(value: &Value) -> String {
        match value {
            Value::String(_tag, s) => s.clone(),
            Value::Char(_tag, c) => c.to_string(),
            Value::Bool(_tag, b) => b.to_string(),
            Value::Num(_tag, num) => num
                .to_i128()
                .map(|i| i.to_string())
                .or_else(|| num.to_u128().map(|u| u.to_string()))
                .or_else(|| num.to_f64().map(|f| f.to_string()))
                .unwrap_or_default(),
            Value::Empty(_tag, _) => "<empty>".into(),
            Value::Dict(_tag, dict) => format!("{{{} entries}}", dict.len()),
            Value::Array(_tag, vec) => format!(
                "[{}]",
                vec.iter()
                    .map(PrettyConfig::render_value)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }
}

/// Pretty-printing type wrapper to [`Manager`]
#[derive(Debug)]
pub struct DisplayAdapter<'a> {
    source: &'a Manager,
}

impl Manager {
    /// Creates a `DisplayAdapter` for this struct.
    ///
    /// The adapter renders each [`Configuration`] field with its current value and where that came from.
    #[must_use]
    pub fn to_display_adapter(&self) -> DisplayAdapter<'_> {
        DisplayAdapter { source: self }
    }
}

impl Display for DisplayAdapter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = &self.source.data;
        let output: Vec<_> = Configuration::FIELD_NAMES
            .iter()
            .filter_map(|field| {
                let value = data.find_value(field).ok()?;
                Some(PrettyConfig {
                    field: (*field).to_owned(),
                    value: PrettyConfig::render_value(&value),
                    source: PrettyConfig::render_source(data.get_metadata(value.tag())),
                })
            })
            .collect();
        let mut table = Table::new(output);
        let _ = table.with(Style::sharp());
        write!(f, "{table}")
    }
}
