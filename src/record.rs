//! Field records and destination-path templates
//!
//! A [`FieldRecord`] is the ordered column → value map produced for every
//! ingested sequence. Its values feed the `{Field}` placeholders of a
//! category's path template; the rendered string becomes the record's
//! Preview and, later, the real copy destination.

use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};

/// Text used when a null field is rendered
pub const NULL_TEXT: &str = "None";

/// Value of a single record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// No value
    Null,
    /// Plain text
    Scalar(String),
    /// Ordered choices; the first entry is the current selection
    Choices(Vec<String>),
}

impl FieldValue {
    /// Build a scalar value
    pub fn text<S: Into<String>>(s: S) -> Self {
        FieldValue::Scalar(s.into())
    }

    /// Collapse to the value used during path formatting
    ///
    /// Choices collapse to their first entry, empty text collapses to null.
    pub fn representative(&self) -> Option<&str> {
        match self {
            FieldValue::Null => None,
            FieldValue::Scalar(s) if s.is_empty() => None,
            FieldValue::Scalar(s) => Some(s),
            FieldValue::Choices(choices) => choices.first().map(String::as_str),
        }
    }

    /// Whether the value is missing for publishing purposes
    pub fn is_blank(&self) -> bool {
        match self.representative() {
            None => true,
            Some(s) => s.contains(NULL_TEXT),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str(NULL_TEXT),
            FieldValue::Scalar(s) => f.write_str(s),
            FieldValue::Choices(choices) => f.write_str(choices.first().map_or("", String::as_str)),
        }
    }
}

/// Ordered mapping from column name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldRecord {
    fields: Vec<(String, FieldValue)>,
}

impl FieldRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping its original position on replace
    pub fn set<S: Into<String>>(&mut self, name: S, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field rendered as display text, empty when absent
    pub fn text(&self, name: &str) -> String {
        self.get(name).map(ToString::to_string).unwrap_or_default()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only the given columns, in the given order
    ///
    /// A column with no computed value fails the whole projection.
    pub fn project(&self, columns: &[String]) -> Result<FieldRecord> {
        let mut projected = FieldRecord::new();
        for column in columns {
            let value = self.get(column).ok_or_else(|| Error::MissingField {
                template: columns.join(", "),
                field: column.clone(),
            })?;
            projected.set(column.clone(), value.clone());
        }
        Ok(projected)
    }
}

impl FromIterator<(String, FieldValue)> for FieldRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut record = FieldRecord::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}

/// Render a `{Field}` template against a record
///
/// `{{` and `}}` produce literal braces. Field names may contain spaces
/// (`{Frame Range}`). Null and empty values render as `None`; choice
/// values render as their first entry.
pub fn render_template(template: &str, record: &FieldRecord) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => {
                            return Err(template_error(template, "nested '{' in placeholder"));
                        }
                        _ => name.push(c),
                    }
                }
                if !closed {
                    return Err(template_error(template, "expected '}' before end of string"));
                }
                let value = record.get(&name).ok_or_else(|| Error::MissingField {
                    template: template.to_string(),
                    field: name.clone(),
                })?;
                out.push_str(value.representative().unwrap_or(NULL_TEXT));
            }
            '}' => {
                return Err(template_error(template, "single '}' encountered"));
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

fn template_error(template: &str, message: &str) -> Error {
    Error::Template {
        template: template.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> FieldRecord {
        let mut record = FieldRecord::new();
        record.set("server", FieldValue::text("studio"));
        record.set("Show", FieldValue::text("DEMO"));
        record.set("Sequence", FieldValue::text("SEQ"));
        record.set("Shot", FieldValue::text("SEQ_0010"));
        record.set(
            "Dept",
            FieldValue::Choices(vec!["comp".into(), "roto".into()]),
        );
        record.set("Scan ID", FieldValue::Null);
        record.set("Frame Range", FieldValue::text("1001-1010"));
        record.set("Res", FieldValue::text(""));
        record
    }

    #[test]
    fn test_render_collapses_values() {
        let record = sample_record();
        let rendered = render_template(
            "/{server}/{Show}/{Sequence}/{Shot}/{Dept}/{Scan ID}/{Res}/{Frame Range}",
            &record,
        )
        .unwrap();
        assert_eq!(rendered, "/studio/DEMO/SEQ/SEQ_0010/comp/None/None/1001-1010");
    }

    #[test]
    fn test_render_escaped_braces() {
        let record = sample_record();
        let rendered = render_template("{{literal}}/{Shot}", &record).unwrap();
        assert_eq!(rendered, "{literal}/SEQ_0010");
    }

    #[test]
    fn test_render_missing_field() {
        let record = sample_record();
        let err = render_template("/{Show}/{Version}", &record).unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field, .. } if field == "Version"));
    }

    #[test]
    fn test_render_malformed_template() {
        let record = sample_record();
        assert!(matches!(
            render_template("/{Show", &record),
            Err(Error::Template { .. })
        ));
        assert!(matches!(
            render_template("/Show}", &record),
            Err(Error::Template { .. })
        ));
        assert!(matches!(
            render_template("/{Sh{ow}", &record),
            Err(Error::Template { .. })
        ));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut record = sample_record();
        record.set("Show", FieldValue::text("OTHER"));
        let columns: Vec<&str> = record.columns().collect();
        assert_eq!(columns[1], "Show");
        assert_eq!(record.text("Show"), "OTHER");
    }

    #[test]
    fn test_project_keeps_declared_order() {
        let record = sample_record();
        let columns = vec!["Shot".to_string(), "server".to_string()];
        let projected = record.project(&columns).unwrap();
        let names: Vec<&str> = projected.columns().collect();
        assert_eq!(names, vec!["Shot", "server"]);

        let missing = vec!["Nope".to_string()];
        assert!(record.project(&missing).is_err());
    }

    #[test]
    fn test_blank_values() {
        assert!(FieldValue::Null.is_blank());
        assert!(FieldValue::text("").is_blank());
        assert!(FieldValue::text("/a/None/b").is_blank());
        assert!(FieldValue::Choices(vec![]).is_blank());
        assert!(!FieldValue::Choices(vec!["comp".into()]).is_blank());
        assert!(!FieldValue::text("SEQ_0010").is_blank());
    }
}
