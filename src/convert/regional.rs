//! Reference regional converter.
//!
//! Currency and unit fields are multiplied by a fixed factor, dates swap
//! their first two components (`MM/DD/YYYY` ↔ `DD/MM/YYYY`), and locale
//! numbers exchange decimal and grouping separators (`1,234.5` ↔ `1.234,5`).

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::config::ConversionConfig;
use crate::convert::{ConvertError, Converter};
use crate::pipeline::Record;

pub struct RegionalConverter {
    name: String,
    rules: ConversionConfig,
}

impl RegionalConverter {
    pub fn new(name: impl Into<String>, rules: ConversionConfig) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    fn convert_payload(&self, payload: &Value) -> Result<Value, ConvertError> {
        let Value::Object(fields) = payload else {
            return Err(invalid("payload", "expected a JSON object"));
        };
        let mut out: Map<String, Value> = fields.clone();

        for field in &self.rules.currency_fields {
            scale(&mut out, field, self.rules.currency_rate, Some(2))?;
        }
        for field in &self.rules.unit_fields {
            scale(&mut out, field, self.rules.unit_factor, None)?;
        }
        for field in &self.rules.date_fields {
            if let Some(value) = out.get_mut(field) {
                let text = value.as_str().ok_or_else(|| invalid(field, "expected a date string"))?;
                *value = Value::String(swap_date(text).ok_or_else(|| invalid(field, "unrecognized date"))?);
            }
        }
        for field in &self.rules.number_fields {
            if let Some(value) = out.get_mut(field) {
                let text = value.as_str().ok_or_else(|| invalid(field, "expected a number string"))?;
                *value = Value::String(swap_separators(text));
            }
        }

        Ok(Value::Object(out))
    }
}

#[async_trait]
impl Converter for RegionalConverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(&self, record: &Record) -> Result<Record, ConvertError> {
        let payload = self.convert_payload(&record.payload)?;
        Ok(Record::new(record.id.clone(), record.kind.clone(), payload))
    }
}

fn invalid(field: &str, reason: &str) -> ConvertError {
    ConvertError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn scale(
    fields: &mut Map<String, Value>,
    field: &str,
    factor: f64,
    decimals: Option<i32>,
) -> Result<(), ConvertError> {
    let Some(value) = fields.get_mut(field) else {
        return Ok(());
    };
    let n = value.as_f64().ok_or_else(|| invalid(field, "expected a number"))?;
    let mut scaled = n * factor;
    if let Some(places) = decimals {
        let p = 10f64.powi(places);
        scaled = (scaled * p).round() / p;
    }
    let number = Number::from_f64(scaled).ok_or_else(|| invalid(field, "result is not finite"))?;
    *value = Value::Number(number);
    Ok(())
}

fn swap_date(text: &str) -> Option<String> {
    let sep = ['/', '-', '.'].into_iter().find(|c| text.contains(*c))?;
    let parts: Vec<&str> = text.split(sep).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }
    Some(format!("{}{sep}{}{sep}{}", parts[1], parts[0], parts[2]))
}

fn swap_separators(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '.' => ',',
            ',' => '.',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn converter() -> RegionalConverter {
        RegionalConverter::new(
            "regional",
            ConversionConfig {
                currency_rate: 0.5,
                unit_factor: 2.0,
                currency_fields: vec!["price".into()],
                unit_fields: vec!["weight".into()],
                date_fields: vec!["date".into()],
                number_fields: vec!["total".into()],
            },
        )
    }

    #[tokio::test]
    async fn test_converts_all_field_kinds() {
        let record = Record::new(
            "r1",
            "order",
            json!({"price": 10.25, "weight": 3, "date": "12/31/2024", "total": "1,234.5", "note": "x"}),
        );

        let out = converter().convert(&record).await.unwrap();
        assert_eq!(out.id, "r1");
        assert_eq!(out.payload["price"], json!(5.13));
        assert_eq!(out.payload["weight"], json!(6.0));
        assert_eq!(out.payload["date"], json!("31/12/2024"));
        assert_eq!(out.payload["total"], json!("1.234,5"));
        assert_eq!(out.payload["note"], json!("x"));
    }

    #[tokio::test]
    async fn test_bad_fields_are_permanent_errors() {
        use crate::resilience::RetryableError;

        let record = Record::new("r2", "order", json!({"date": "yesterday"}));
        let err = converter().convert(&record).await.unwrap_err();
        assert!(matches!(err, ConvertError::InvalidField { ref field, .. } if field == "date"));
        assert!(err.is_permanent());

        let record = Record::new("r3", "order", json!([1, 2]));
        assert!(converter().convert(&record).await.is_err());
    }
}
