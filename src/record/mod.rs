//! # Registros sem alocação por linha
//!
//! Um registro é uma visão `{buffer, schema}`: os valores vivem em slots de
//! largura fixa dentro de um buffer alugado do [`RecordBufferPool`], e o
//! schema diz onde cada campo começa e como interpretar os bytes.
//!
//! - [`Record`]: visão mutável, empresta o buffer pelo escopo de uma unidade
//!   de trabalho
//! - [`RecordView`]: visão somente leitura
//! - [`PooledRecord`]: registro com posse exclusiva do buffer; é o valor que
//!   atravessa as filas entre estágios (movido, nunca compartilhado), e que
//!   devolve o buffer ao pool quando descartado
//!
//! Leitura e escrita são O(1) por índice e por nome (mapa nome→índice do
//! schema). Strings lidas emprestam os bytes do buffer.

pub mod pool;

use std::borrow::Cow;
use std::fmt;
use chrono::{DateTime, NaiveDateTime};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;
use crate::error::{ETLError, RecordError, Result, SchemaError};
use crate::schema::{FieldDescriptor, Schema, SchemaRef};
use crate::types::{Decimal, FieldType, FieldValue};

pub use pool::{PooledBuffer, RecordBufferPool};

/// Endereçamento de campo por índice ou por nome
pub trait FieldIndex {
    fn resolve(&self, schema: &Schema) -> Result<usize>;
}

impl FieldIndex for usize {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        if *self < schema.len() {
            Ok(*self)
        } else {
            Err(RecordError::IndexOutOfRange { index: *self, len: schema.len() }.into())
        }
    }
}

impl FieldIndex for str {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        schema
            .index_of(self)
            .ok_or_else(|| RecordError::UnknownField(self.to_string()).into())
    }
}

impl FieldIndex for String {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        self.as_str().resolve(schema)
    }
}

impl<T: FieldIndex + ?Sized> FieldIndex for &T {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        (**self).resolve(schema)
    }
}

fn payload_array<const N: usize>(payload: &[u8], field: &FieldDescriptor) -> Result<[u8; N]> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| RecordError::Corrupted(field.name.clone()).into())
}

/// Valida e grava um valor no slot; nada é escrito se a validação falhar
fn write_field(field: &FieldDescriptor, slot: &mut [u8], value: &FieldValue<'_>) -> Result<()> {
    if value.field_type() != field.field_type {
        return Err(ETLError::TypeMismatch {
            expected: field.field_type,
            found: value.field_type(),
        });
    }

    let (presence, payload) = slot.split_at_mut(1);
    match value {
        FieldValue::Null(_) => {
            presence[0] = 0;
            return Ok(());
        }
        FieldValue::String(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > field.max_length {
                return Err(RecordError::FieldOverflow {
                    field: field.name.clone(),
                    len: bytes.len(),
                    max: field.max_length,
                }
                .into());
            }
            payload[..2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
            payload[2..2 + bytes.len()].copy_from_slice(bytes);
        }
        FieldValue::Int16(v) => payload[..2].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Int32(v) => payload[..4].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Int64(v) => payload[..8].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Byte(v) => payload[0] = *v,
        FieldValue::Float(v) => payload[..4].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Double(v) => payload[..8].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Decimal(v) => {
            if v.scale > Decimal::MAX_SCALE {
                return Err(RecordError::FieldOverflow {
                    field: field.name.clone(),
                    len: v.scale as usize,
                    max: Decimal::MAX_SCALE as usize,
                }
                .into());
            }
            payload[..16].copy_from_slice(&v.mantissa.to_le_bytes());
            payload[16] = v.scale;
        }
        FieldValue::Boolean(v) => payload[0] = u8::from(*v),
        FieldValue::DateTime(v) => {
            payload[..8].copy_from_slice(&v.and_utc().timestamp_micros().to_le_bytes())
        }
        FieldValue::Guid(v) => payload[..16].copy_from_slice(v.as_bytes()),
    }
    presence[0] = 1;
    Ok(())
}

/// Lê o slot e reconstrói o valor com a tag do schema
fn read_field<'b>(field: &FieldDescriptor, slot: &'b [u8]) -> Result<FieldValue<'b>> {
    if slot[0] == 0 {
        return Ok(FieldValue::Null(field.field_type));
    }
    let payload = &slot[1..];

    let value = match field.field_type {
        FieldType::Null => FieldValue::Null(FieldType::Null),
        FieldType::String => {
            let len = u16::from_le_bytes(payload_array(payload, field)?) as usize;
            if len > field.max_length {
                return Err(RecordError::Corrupted(field.name.clone()).into());
            }
            let text = std::str::from_utf8(&payload[2..2 + len])
                .map_err(|_| RecordError::Corrupted(field.name.clone()))?;
            FieldValue::String(Cow::Borrowed(text))
        }
        FieldType::Int16 => FieldValue::Int16(i16::from_le_bytes(payload_array(payload, field)?)),
        FieldType::Int32 => FieldValue::Int32(i32::from_le_bytes(payload_array(payload, field)?)),
        FieldType::Int64 => FieldValue::Int64(i64::from_le_bytes(payload_array(payload, field)?)),
        FieldType::Byte => FieldValue::Byte(payload[0]),
        FieldType::Float => FieldValue::Float(f32::from_le_bytes(payload_array(payload, field)?)),
        FieldType::Double => FieldValue::Double(f64::from_le_bytes(payload_array(payload, field)?)),
        FieldType::Decimal => FieldValue::Decimal(Decimal {
            mantissa: i128::from_le_bytes(payload_array(payload, field)?),
            scale: payload[16],
        }),
        FieldType::Boolean => FieldValue::Boolean(payload[0] != 0),
        FieldType::DateTime => {
            let micros = i64::from_le_bytes(payload_array(payload, field)?);
            let value: NaiveDateTime = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| RecordError::Corrupted(field.name.clone()))?
                .naive_utc();
            FieldValue::DateTime(value)
        }
        FieldType::Guid => FieldValue::Guid(Uuid::from_bytes(payload_array(payload, field)?)),
    };
    Ok(value)
}

fn slot_range(field: &FieldDescriptor) -> std::ops::Range<usize> {
    field.offset..field.offset + field.width
}

fn check_size(buffer_len: usize, schema: &Schema) -> Result<()> {
    if buffer_len < schema.buffer_size() {
        return Err(RecordError::BufferTooSmall {
            required: schema.buffer_size(),
            actual: buffer_len,
        }
        .into());
    }
    Ok(())
}

/// Visão mutável de um registro sobre um buffer emprestado
pub struct Record<'b> {
    buffer: &'b mut [u8],
    schema: &'b Schema,
}

impl<'b> Record<'b> {
    /// Cria a visão; falha se o buffer for menor que o schema exige
    pub fn new(buffer: &'b mut [u8], schema: &'b Schema) -> Result<Self> {
        check_size(buffer.len(), schema)?;
        Ok(Self { buffer, schema })
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Grava um valor; o tipo deve ser igual ao declarado no schema
    pub fn set_value(&mut self, field: impl FieldIndex, value: FieldValue<'_>) -> Result<()> {
        let index = field.resolve(self.schema)?;
        let descriptor = &self.schema.fields()[index];
        write_field(descriptor, &mut self.buffer[slot_range(descriptor)], &value)
    }

    /// Marca o campo como nulo
    pub fn set_null(&mut self, field: impl FieldIndex) -> Result<()> {
        let index = field.resolve(self.schema)?;
        let descriptor = &self.schema.fields()[index];
        self.buffer[descriptor.offset] = 0;
        Ok(())
    }

    pub fn get_value(&self, field: impl FieldIndex) -> Result<FieldValue<'_>> {
        let index = field.resolve(self.schema)?;
        let descriptor = &self.schema.fields()[index];
        read_field(descriptor, &self.buffer[slot_range(descriptor)])
    }

    /// Anula todos os campos
    pub fn clear(&mut self) {
        self.buffer[..self.schema.buffer_size()].fill(0);
    }

    pub fn as_view(&self) -> RecordView<'_> {
        RecordView {
            buffer: &*self.buffer,
            schema: self.schema,
        }
    }
}

/// Visão somente leitura de um registro
#[derive(Clone, Copy)]
pub struct RecordView<'b> {
    buffer: &'b [u8],
    schema: &'b Schema,
}

impl<'b> RecordView<'b> {
    pub fn new(buffer: &'b [u8], schema: &'b Schema) -> Result<Self> {
        check_size(buffer.len(), schema)?;
        Ok(Self { buffer, schema })
    }

    pub fn schema(&self) -> &'b Schema {
        self.schema
    }

    pub fn len(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Lê um valor; strings emprestam o buffer
    pub fn get_value(&self, field: impl FieldIndex) -> Result<FieldValue<'b>> {
        let index = field.resolve(self.schema)?;
        let descriptor = &self.schema.fields()[index];
        read_field(descriptor, &self.buffer[slot_range(descriptor)])
    }

    /// Itera sobre `(descritor, valor)` na ordem do schema
    pub fn values(&self) -> impl Iterator<Item = (&'b FieldDescriptor, Result<FieldValue<'b>>)> + 'b {
        let buffer = self.buffer;
        self.schema
            .fields()
            .iter()
            .map(move |descriptor| (descriptor, read_field(descriptor, &buffer[slot_range(descriptor)])))
    }

    /// Copia todos os valores para fora do buffer
    pub fn to_owned_values(&self) -> Result<Vec<FieldValue<'static>>> {
        self.values().map(|(_, value)| value.map(FieldValue::into_owned)).collect()
    }

    /// Bytes brutos usados pelo schema
    pub fn as_bytes(&self) -> &'b [u8] {
        &self.buffer[..self.schema.buffer_size()]
    }
}

impl fmt::Display for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (position, (descriptor, value)) in self.values().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            match value {
                Ok(value) => write!(f, "{}: {}", descriptor.name, value)?,
                Err(_) => write!(f, "{}: <corrompido>", descriptor.name)?,
            }
        }
        f.write_str("}")
    }
}

impl fmt::Debug for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordView{}", self)
    }
}

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (descriptor, value) in self.values() {
            let value = value.map_err(serde::ser::Error::custom)?;
            map.serialize_entry(&descriptor.name, &value)?;
        }
        map.end()
    }
}

/// Registro com posse exclusiva de um buffer do pool
///
/// É a unidade que atravessa as filas: enviar um `PooledRecord` transfere a
/// posse do buffer para o estágio seguinte. O buffer volta ao pool quando o
/// registro é descartado, normalmente no estágio de carga.
pub struct PooledRecord {
    buffer: PooledBuffer,
    schema: SchemaRef,
}

impl PooledRecord {
    pub fn new(buffer: PooledBuffer, schema: SchemaRef) -> Result<Self> {
        check_size(buffer.len(), &schema)?;
        Ok(Self { buffer, schema })
    }

    /// Aluga um buffer do tamanho do schema; todos os campos começam nulos
    pub fn rent(pool: &RecordBufferPool, schema: SchemaRef) -> Result<Self> {
        let buffer = pool.rent(schema.buffer_size())?;
        Ok(Self { buffer, schema })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn view(&self) -> RecordView<'_> {
        RecordView {
            buffer: &self.buffer,
            schema: &self.schema,
        }
    }

    pub fn record(&mut self) -> Record<'_> {
        Record {
            buffer: &mut self.buffer,
            schema: &self.schema,
        }
    }

    pub fn get_value(&self, field: impl FieldIndex) -> Result<FieldValue<'_>> {
        self.view().get_value(field)
    }

    pub fn set_value(&mut self, field: impl FieldIndex, value: FieldValue<'_>) -> Result<()> {
        self.record().set_value(field, value)
    }

    /// Cópia em um novo buffer do mesmo pool
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            buffer: self.buffer.try_clone()?,
            schema: SchemaRef::clone(&self.schema),
        })
    }

    /// Reinterpreta o registro com outro schema de layout idêntico
    /// (por exemplo, com campos renomeados), sem copiar bytes
    pub fn with_schema(self, schema: SchemaRef) -> Result<Self> {
        if !self.schema.same_layout(&schema) {
            return Err(SchemaError::Mismatch {
                boundary: "registro".to_string(),
                detail: format!("layout {} difere de {}", self.schema, schema),
            }
            .into());
        }
        Ok(Self {
            buffer: self.buffer,
            schema,
        })
    }

    /// Representação textual para relatórios de erro
    pub fn row_context(&self) -> String {
        self.view().to_string()
    }

    pub fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

impl fmt::Debug for PooledRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PooledRecord{}", self.view())
    }
}
