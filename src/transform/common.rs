use std::collections::HashMap;
use async_trait::async_trait;
use crate::error::{RecordError, Result};
use crate::record::{Record, RecordView};
use crate::schema::{FieldDescriptor, Schema, SchemaBuilder, SchemaRef};
use crate::traits::Transformer;
use crate::transform::TransformContext;
use crate::types::{FieldType, FieldValue};

fn push_field(builder: SchemaBuilder, name: &str, descriptor: &FieldDescriptor) -> SchemaBuilder {
    match descriptor.field_type {
        FieldType::String => builder.string_field(name, descriptor.max_length),
        other => builder.field(name, other),
    }
}

fn lookup<'s>(schema: &'s Schema, name: &str) -> Result<(usize, &'s FieldDescriptor)> {
    schema
        .index_of(name)
        .and_then(|index| schema.field(index).map(|descriptor| (index, descriptor)))
        .ok_or_else(|| RecordError::UnknownField(name.to_string()).into())
}

/// Encaminha cada registro sem alteração
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl IdentityTransform {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for IdentityTransform {
    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        ctx.forward()
    }
}

/// Transformador que filtra linhas baseado em uma condição
#[derive(Clone)]
pub struct FilterTransform<F> {
    filter_fn: F,
}

impl<F> FilterTransform<F>
where
    F: Fn(&RecordView<'_>) -> Result<bool> + Send + Sync,
{
    pub fn new(filter_fn: F) -> Self {
        Self { filter_fn }
    }
}

#[async_trait]
impl<F> Transformer for FilterTransform<F>
where
    F: Fn(&RecordView<'_>) -> Result<bool> + Send + Sync,
{
    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        if (self.filter_fn)(&ctx.input()?)? {
            ctx.forward()?;
        }
        Ok(())
    }
}

/// Emite `copies` registros idênticos para cada entrada (0 descarta)
#[derive(Debug, Clone, Copy)]
pub struct DuplicateTransform {
    copies: usize,
}

impl DuplicateTransform {
    pub fn new(copies: usize) -> Self {
        Self { copies }
    }
}

#[async_trait]
impl Transformer for DuplicateTransform {
    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        if self.copies == 0 {
            return Ok(());
        }
        for _ in 1..self.copies {
            ctx.duplicate_input()?;
        }
        ctx.forward()
    }
}

/// Transformador que mapeia cada linha para um registro do schema de saída
pub struct MapTransform<F> {
    output: SchemaRef,
    map_fn: F,
}

impl<F> MapTransform<F>
where
    F: Fn(&RecordView<'_>, &mut Record<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(output: SchemaRef, map_fn: F) -> Self {
        Self { output, map_fn }
    }
}

#[async_trait]
impl<F> Transformer for MapTransform<F>
where
    F: Fn(&RecordView<'_>, &mut Record<'_>) -> Result<()> + Send + Sync,
{
    fn output_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.output))
    }

    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        ctx.emit_from_input(|input, output| (self.map_fn)(input, output))
    }
}

/// Transformador que adiciona uma coluna com valor constante
#[derive(Debug, Clone)]
pub struct AddColumnTransform {
    input: SchemaRef,
    output: SchemaRef,
    value: FieldValue<'static>,
}

impl AddColumnTransform {
    /// A coluna nova é anexada ao fim; Strings usam o tamanho do valor como largura
    pub fn new(input: &SchemaRef, column_name: impl Into<String>, value: FieldValue<'static>) -> Result<Self> {
        let column_name = column_name.into();
        let mut builder = Schema::builder();
        for descriptor in input.fields() {
            builder = push_field(builder, &descriptor.name, descriptor);
        }
        builder = match &value {
            FieldValue::String(s) => builder.string_field(column_name, s.len()),
            other => builder.field(column_name, other.field_type()),
        };

        Ok(Self {
            input: SchemaRef::clone(input),
            output: builder.build()?.into_ref(),
            value,
        })
    }
}

#[async_trait]
impl Transformer for AddColumnTransform {
    fn input_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.input))
    }

    fn output_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.output))
    }

    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        let added = self.output.len() - 1;
        ctx.emit_from_input(|input, output| {
            for index in 0..added {
                output.set_value(index, input.get_value(index)?)?;
            }
            output.set_value(added, self.value.clone())
        })
    }
}

/// Transformador que renomeia colunas (sem copiar o buffer)
#[derive(Debug, Clone)]
pub struct RenameColumnsTransform {
    input: SchemaRef,
    output: SchemaRef,
}

impl RenameColumnsTransform {
    pub fn new(input: &SchemaRef, mappings: HashMap<String, String>) -> Result<Self> {
        for old_name in mappings.keys() {
            lookup(input, old_name)?;
        }
        let mut builder = Schema::builder();
        for descriptor in input.fields() {
            let name = mappings.get(&descriptor.name).unwrap_or(&descriptor.name);
            builder = push_field(builder, name, descriptor);
        }

        Ok(Self {
            input: SchemaRef::clone(input),
            output: builder.build()?.into_ref(),
        })
    }

    pub fn single(input: &SchemaRef, old_name: impl Into<String>, new_name: impl Into<String>) -> Result<Self> {
        let mut mappings = HashMap::new();
        mappings.insert(old_name.into(), new_name.into());
        Self::new(input, mappings)
    }
}

#[async_trait]
impl Transformer for RenameColumnsTransform {
    fn input_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.input))
    }

    fn output_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.output))
    }

    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        ctx.forward_as(SchemaRef::clone(&self.output))
    }
}

/// Transformador que seleciona apenas colunas específicas, na ordem dada
#[derive(Debug, Clone)]
pub struct SelectColumnsTransform {
    input: SchemaRef,
    output: SchemaRef,
    /// Índice de origem de cada coluna de saída
    sources: Vec<usize>,
}

impl SelectColumnsTransform {
    pub fn new(input: &SchemaRef, columns: &[&str]) -> Result<Self> {
        let mut builder = Schema::builder();
        let mut sources = Vec::with_capacity(columns.len());
        for column in columns {
            let (index, descriptor) = lookup(input, column)?;
            sources.push(index);
            builder = push_field(builder, column, descriptor);
        }

        Ok(Self {
            input: SchemaRef::clone(input),
            output: builder.build()?.into_ref(),
            sources,
        })
    }
}

#[async_trait]
impl Transformer for SelectColumnsTransform {
    fn input_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.input))
    }

    fn output_schema(&self) -> Option<SchemaRef> {
        Some(SchemaRef::clone(&self.output))
    }

    async fn transform(&self, ctx: &mut TransformContext) -> Result<()> {
        ctx.emit_from_input(|input, output| {
            for (target, &source) in self.sources.iter().enumerate() {
                output.set_value(target, input.get_value(source)?)?;
            }
            Ok(())
        })
    }
}
