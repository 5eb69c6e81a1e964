//! # Common Utilities
//!
//! Helpers de formatação compartilhados pelos loaders.

use std::collections::HashMap;
use crate::error::Result;
use crate::record::RecordView;
use crate::types::{FieldType, FieldValue};

/// Utilitários para formatação de dados
pub struct DataFormatter;

impl DataFormatter {
    /// Formata um valor para exibição em texto
    pub fn format_value(value: &FieldValue<'_>) -> String {
        match value {
            FieldValue::Null(_) => "null".to_string(),
            FieldValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            other => other.to_string(),
        }
    }

    /// Formata um registro completo, na ordem do schema
    pub fn format_row(row: &RecordView<'_>) -> Result<String> {
        let mut fields = Vec::with_capacity(row.len());
        for (descriptor, value) in row.values() {
            fields.push(format!("{}: {}", descriptor.name, Self::format_value(&value?)));
        }
        Ok(fields.join(" | "))
    }

    /// Conta os tipos dos valores não nulos e os nulos em um conjunto de linhas
    pub fn count_value_types(rows: &[Vec<FieldValue<'_>>]) -> HashMap<String, usize> {
        let mut type_counts = HashMap::new();

        for row in rows {
            for value in row {
                let type_name = match value {
                    FieldValue::Null(_) => FieldType::Null.name(),
                    other => other.field_type().name(),
                };
                *type_counts.entry(type_name.to_string()).or_insert(0) += 1;
            }
        }

        type_counts
    }
}
