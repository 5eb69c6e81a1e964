//! Schema de linha: lista ordenada, nomeada e tipada de campos
//!
//! Cada campo ocupa um slot de largura fixa no buffer do registro:
//!
//! ```text
//! +----------+------------------------------+
//! | presença | payload                      |
//! | (u8)     | (FieldType::fixed_width)     |
//! +----------+------------------------------+
//! ```
//!
//! Strings usam `2 + max_length` bytes de payload (comprimento u16 seguido
//! dos bytes UTF-8). Offsets e larguras são calculados uma única vez, na
//! ordem declarada, e nunca mudam depois que o schema é construído.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use crate::error::{Result, SchemaError};
use crate::types::FieldType;

/// Largura máxima padrão de campos String, em bytes
pub const DEFAULT_STRING_WIDTH: usize = 256;

/// Byte de presença que precede cada payload
pub const PRESENCE_WIDTH: usize = 1;

/// Referência compartilhada a um schema imutável
pub type SchemaRef = Arc<Schema>;

/// Descrição de um campo dentro de um schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Início do slot no buffer
    pub offset: usize,
    /// Largura total do slot, incluindo o byte de presença
    pub width: usize,
    /// Bytes máximos do payload de String (0 para os demais tipos)
    pub max_length: usize,
}

impl FieldDescriptor {
    /// Intervalo de bytes do payload (sem o byte de presença)
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.offset + PRESENCE_WIDTH..self.offset + self.width
    }
}

/// Schema imutável de uma linha
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    buffer_size: usize,
}

impl Schema {
    /// Cria um schema a partir de pares `(nome, tipo)`, na ordem dada
    ///
    /// Strings recebem a largura padrão (`DEFAULT_STRING_WIDTH`). Falha com
    /// `SchemaError::DuplicateField` se algum nome se repetir.
    pub fn new<I, N>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, FieldType)>,
        N: Into<String>,
    {
        let mut builder = SchemaBuilder::new();
        for (name, field_type) in fields {
            builder = builder.field(name, field_type);
        }
        builder.build()
    }

    /// Cria um builder de schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Campos na ordem declarada
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Índice de um campo pelo nome, O(1)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Tamanho do buffer exigido por um registro deste schema
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Mesmos nomes, tipos e larguras, na mesma ordem
    pub fn same_layout(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| {
                a.field_type == b.field_type && a.offset == b.offset && a.width == b.width
            })
    }

    /// Valida que registros deste schema podem ser entregues a quem espera `expected`
    ///
    /// Exige a mesma quantidade de campos e, posição a posição, o mesmo nome e
    /// tipo. Strings precisam da mesma largura: os registros atravessam as
    /// fronteiras sem cópia, então o layout do buffer tem que ser idêntico.
    pub fn check_compatible(&self, expected: &Schema, boundary: &str) -> Result<()> {
        let mismatch = |detail: String| SchemaError::Mismatch {
            boundary: boundary.to_string(),
            detail,
        };

        if self.fields.len() != expected.fields.len() {
            return Err(mismatch(format!(
                "{} campos produzidos, {} esperados",
                self.fields.len(),
                expected.fields.len()
            ))
            .into());
        }

        for (position, (actual, wanted)) in self.fields.iter().zip(&expected.fields).enumerate() {
            if actual.name != wanted.name {
                return Err(mismatch(format!(
                    "posição {}: campo '{}' no lugar de '{}'",
                    position, actual.name, wanted.name
                ))
                .into());
            }
            if actual.field_type != wanted.field_type {
                return Err(mismatch(format!(
                    "campo '{}': tipo {} no lugar de {}",
                    actual.name, actual.field_type, wanted.field_type
                ))
                .into());
            }
            if actual.max_length != wanted.max_length {
                return Err(mismatch(format!(
                    "campo '{}': largura {} no lugar de {}",
                    actual.name, actual.max_length, wanted.max_length
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Envolve o schema em um `Arc`
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Schema {}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|d| format!("{}: {}", d.name, d.field_type))
            .collect();
        write!(f, "({})", fields.join(", "))
    }
}

/// Soma das larguras dos campos; função pura do schema
pub fn calculate_buffer_size(schema: &Schema) -> usize {
    schema.fields().iter().map(|field| field.width).sum()
}

/// Largura total do slot para um tipo
fn slot_width(field_type: FieldType, max_length: usize) -> usize {
    let payload = field_type.fixed_width().unwrap_or(2 + max_length);
    PRESENCE_WIDTH + payload
}

/// Builder para schemas com larguras de String por campo
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldType, usize)>,
    string_width: usize,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            string_width: DEFAULT_STRING_WIDTH,
        }
    }

    /// Largura padrão para Strings adicionadas depois desta chamada
    pub fn default_string_width(mut self, width: usize) -> Self {
        self.string_width = width;
        self
    }

    /// Adiciona um campo
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let max_length = if field_type == FieldType::String { self.string_width } else { 0 };
        self.fields.push((name.into(), field_type, max_length));
        self
    }

    /// Adiciona um campo String com largura explícita
    pub fn string_field(mut self, name: impl Into<String>, max_length: usize) -> Self {
        self.fields.push((name.into(), FieldType::String, max_length));
        self
    }

    /// Constrói o schema, atribuindo offsets na ordem declarada
    pub fn build(self) -> Result<Schema> {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut index = HashMap::with_capacity(self.fields.len());
        let mut offset = 0;

        for (position, (name, field_type, max_length)) in self.fields.into_iter().enumerate() {
            if field_type == FieldType::String && max_length > u16::MAX as usize {
                return Err(SchemaError::InvalidWidth { field: name, width: max_length }.into());
            }
            if index.insert(name.clone(), position).is_some() {
                return Err(SchemaError::DuplicateField(name).into());
            }

            let width = slot_width(field_type, max_length);
            fields.push(FieldDescriptor {
                name,
                field_type,
                offset,
                width,
                max_length,
            });
            offset += width;
        }

        let mut schema = Schema {
            fields,
            index,
            buffer_size: 0,
        };
        schema.buffer_size = calculate_buffer_size(&schema);
        Ok(schema)
    }
}
