//! Extratores de referência e conversão de texto para valores tipados

pub mod memory;

#[cfg(feature = "csv")]
pub mod csv;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;
use crate::error::{ExtractError, Result};
use crate::types::{FieldType, FieldValue};

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Converte um valor textual para o tipo declarado do campo
///
/// Vazio e `null` (qualquer caixa) viram nulo do tipo. Strings emprestam o
/// texto de origem.
pub fn parse_value(raw: &str, field_type: FieldType) -> Result<FieldValue<'_>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Ok(FieldValue::null_of(field_type));
    }

    let invalid = || -> crate::error::ETLError {
        ExtractError::ParseError(format!("'{}' não é um valor {} válido", raw, field_type)).into()
    };
    let trimmed = raw.trim();

    let value = match field_type {
        FieldType::Null => FieldValue::null_of(FieldType::Null),
        FieldType::String => FieldValue::from(raw),
        FieldType::Int16 => FieldValue::Int16(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int32 => FieldValue::Int32(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Int64 => FieldValue::Int64(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Byte => FieldValue::Byte(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Float => FieldValue::Float(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Double => FieldValue::Double(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Decimal => FieldValue::Decimal(trimmed.parse().map_err(|_| invalid())?),
        FieldType::Boolean => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "sim" | "s" => FieldValue::Boolean(true),
            "false" | "0" | "no" | "n" | "não" => FieldValue::Boolean(false),
            _ => return Err(invalid()),
        },
        FieldType::DateTime => FieldValue::DateTime(parse_datetime(trimmed).ok_or_else(invalid)?),
        FieldType::Guid => FieldValue::Guid(Uuid::parse_str(trimmed).map_err(|_| invalid())?),
    };

    Ok(value)
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decimal;

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_value("42", FieldType::Int32).unwrap(), FieldValue::Int32(42));
        assert_eq!(parse_value("sim", FieldType::Boolean).unwrap(), FieldValue::Boolean(true));
        assert_eq!(
            parse_value("10.50", FieldType::Decimal).unwrap(),
            FieldValue::Decimal(Decimal::new(1050, 2))
        );
        assert_eq!(parse_value("Alice", FieldType::String).unwrap().as_string().unwrap(), Some("Alice"));
    }

    #[test]
    fn test_parse_null_keeps_type() {
        let value = parse_value("NULL", FieldType::Double).unwrap();
        assert_eq!(value, FieldValue::Null(FieldType::Double));
        assert!(parse_value("", FieldType::Int64).unwrap().is_null());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let full = parse_value("2024-03-01 12:30:00", FieldType::DateTime).unwrap();
        let date_only = parse_value("2024-03-01", FieldType::DateTime).unwrap();
        assert!(full.as_datetime().unwrap().is_some());
        assert_eq!(
            date_only.as_datetime().unwrap().unwrap().to_string(),
            "2024-03-01 00:00:00"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_value("abc", FieldType::Int32).is_err());
        assert!(parse_value("300", FieldType::Byte).is_err());
        assert!(parse_value("talvez", FieldType::Boolean).is_err());
        assert!(parse_value("não-é-guid", FieldType::Guid).is_err());
    }
}
