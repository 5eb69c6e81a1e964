//! Transformações registro a registro
//!
//! O estágio de transformação entrega cada registro extraído a um
//! [`TransformContext`]. O transformador decide o que sai:
//!
//! - nada (filtro)
//! - o próprio registro de entrada, sem cópia ([`TransformContext::forward`])
//! - cópias da entrada ([`TransformContext::duplicate_input`])
//! - registros novos no schema de saída ([`TransformContext::emit`])

pub mod common;

use crate::error::{Result, SchemaError, TransformError};
use crate::record::{PooledRecord, Record, RecordBufferPool, RecordView};
use crate::schema::SchemaRef;

/// Entrada corrente e saídas de uma unidade de transformação
pub struct TransformContext {
    pool: RecordBufferPool,
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    input: Option<PooledRecord>,
    outputs: Vec<PooledRecord>,
}

impl TransformContext {
    pub fn new(pool: RecordBufferPool, input_schema: SchemaRef, output_schema: SchemaRef) -> Self {
        Self {
            pool,
            input_schema,
            output_schema,
            input: None,
            outputs: Vec::with_capacity(1),
        }
    }

    pub fn input_schema(&self) -> &SchemaRef {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    pub fn pool(&self) -> &RecordBufferPool {
        &self.pool
    }

    /// Registro de entrada; indisponível depois de `forward`
    pub fn input(&self) -> Result<RecordView<'_>> {
        self.input
            .as_ref()
            .map(PooledRecord::view)
            .ok_or_else(|| consumed().into())
    }

    /// Encaminha a entrada para a saída, sem copiar o buffer
    ///
    /// Se o schema de saída tiver o mesmo layout com outros nomes, o registro
    /// é reinterpretado com ele.
    pub fn forward(&mut self) -> Result<()> {
        let output_schema = SchemaRef::clone(&self.output_schema);
        self.forward_as(output_schema)
    }

    /// Encaminha a entrada reinterpretada com `schema` (mesmo layout)
    pub fn forward_as(&mut self, schema: SchemaRef) -> Result<()> {
        let record = self.input.take().ok_or_else(consumed)?;
        let record = if SchemaRef::ptr_eq(record.schema(), &schema) {
            record
        } else {
            record.with_schema(schema)?
        };
        self.outputs.push(record);
        Ok(())
    }

    /// Emite uma cópia da entrada em um buffer novo e devolve a cópia
    pub fn duplicate_input(&mut self) -> Result<&mut PooledRecord> {
        let input = self.input.as_ref().ok_or_else(consumed)?;
        let mut copy = input.try_clone()?;
        if !SchemaRef::ptr_eq(copy.schema(), &self.output_schema) {
            copy = copy.with_schema(SchemaRef::clone(&self.output_schema))?;
        }
        Ok(self.push(copy))
    }

    /// Emite um registro novo (todos os campos nulos) no schema de saída
    pub fn emit(&mut self) -> Result<&mut PooledRecord> {
        let record = PooledRecord::rent(&self.pool, SchemaRef::clone(&self.output_schema))?;
        Ok(self.push(record))
    }

    /// Emite um registro novo preenchido por `fill` a partir da entrada
    ///
    /// Se `fill` falhar, o registro não é emitido.
    pub fn emit_from_input<F>(&mut self, fill: F) -> Result<()>
    where
        F: FnOnce(&RecordView<'_>, &mut Record<'_>) -> Result<()>,
    {
        let input = self.input.as_ref().ok_or_else(consumed)?;
        let mut output = PooledRecord::rent(&self.pool, SchemaRef::clone(&self.output_schema))?;
        fill(&input.view(), &mut output.record())?;
        self.outputs.push(output);
        Ok(())
    }

    /// Quantidade de registros emitidos para a entrada corrente
    pub fn emitted(&self) -> usize {
        self.outputs.len()
    }

    fn push(&mut self, record: PooledRecord) -> &mut PooledRecord {
        let index = self.outputs.len();
        self.outputs.push(record);
        &mut self.outputs[index]
    }

    /// Prepara o contexto para um novo registro de entrada
    pub(crate) fn begin(&mut self, record: PooledRecord) {
        self.outputs.clear();
        self.input = Some(record);
    }

    /// Retira as saídas; a entrada não encaminhada é descartada (volta ao pool)
    pub(crate) fn take_outputs(&mut self) -> std::vec::Drain<'_, PooledRecord> {
        self.input = None;
        self.outputs.drain(..)
    }

    /// Descarta entrada e saídas pendentes
    pub(crate) fn reset(&mut self) {
        self.input = None;
        self.outputs.clear();
    }

    /// Texto do registro em processamento, para relatórios de erro
    pub(crate) fn row_context(&self) -> Option<String> {
        self.input
            .as_ref()
            .or_else(|| self.outputs.first())
            .map(PooledRecord::row_context)
    }
}

impl std::fmt::Debug for TransformContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformContext")
            .field("input_schema", &self.input_schema.to_string())
            .field("output_schema", &self.output_schema.to_string())
            .field("has_input", &self.input.is_some())
            .field("emitted", &self.outputs.len())
            .finish()
    }
}

fn consumed() -> TransformError {
    TransformError::InvalidTransformation("registro de entrada já encaminhado".to_string())
}

/// Valida que um registro emitido pertence ao schema de saída
pub(crate) fn check_output(record: &PooledRecord, output_schema: &SchemaRef) -> Result<()> {
    if SchemaRef::ptr_eq(record.schema(), output_schema) {
        return Ok(());
    }
    if record.schema().same_layout(output_schema) {
        return Ok(());
    }
    Err(SchemaError::Mismatch {
        boundary: "transform→load".to_string(),
        detail: format!("registro emitido com schema {}", record.schema()),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::error::ETLError;
    use crate::schema::Schema;
    use crate::types::{FieldType, FieldValue};
    use std::sync::Arc;

    fn setup() -> (TransformContext, RecordBufferPool, SchemaRef) {
        let pool = RecordBufferPool::new(&PoolConfig::default());
        let schema: SchemaRef = Arc::new(
            Schema::new([("id", FieldType::Int32), ("name", FieldType::String)]).unwrap(),
        );
        let ctx = TransformContext::new(pool.clone(), Arc::clone(&schema), Arc::clone(&schema));
        (ctx, pool, schema)
    }

    fn input(pool: &RecordBufferPool, schema: &SchemaRef, id: i32) -> PooledRecord {
        let mut record = PooledRecord::rent(pool, Arc::clone(schema)).unwrap();
        record.set_value("id", FieldValue::from_int32(id)).unwrap();
        record.set_value("name", FieldValue::from_string("Ana")).unwrap();
        record
    }

    #[test]
    fn test_forward_moves_same_buffer() {
        let (mut ctx, pool, schema) = setup();
        let record = input(&pool, &schema, 1);
        let address = record.view().as_bytes().as_ptr();
        ctx.begin(record);

        ctx.forward().unwrap();
        assert!(ctx.input().is_err());
        assert!(ctx.forward().is_err());

        let outputs: Vec<PooledRecord> = ctx.take_outputs().collect();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].view().as_bytes().as_ptr(), address);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_filter_releases_input() {
        let (mut ctx, pool, schema) = setup();
        ctx.begin(input(&pool, &schema, 1));
        assert_eq!(ctx.emitted(), 0);
        assert_eq!(ctx.take_outputs().count(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_duplicate_then_forward() {
        let (mut ctx, pool, schema) = setup();
        ctx.begin(input(&pool, &schema, 7));

        let copy = ctx.duplicate_input().unwrap();
        copy.set_value("id", FieldValue::from_int32(8)).unwrap();
        ctx.forward().unwrap();
        assert_eq!(ctx.emitted(), 2);

        let ids: Vec<i32> = ctx
            .take_outputs()
            .map(|r| r.get_value("id").unwrap().as_int32().unwrap().unwrap())
            .collect();
        assert_eq!(ids, vec![8, 7]);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_emit_from_input_skips_failed_fill() {
        let (mut ctx, pool, schema) = setup();
        ctx.begin(input(&pool, &schema, 3));

        let result = ctx.emit_from_input(|_, output| {
            output.set_value("id", FieldValue::from_string("três"))
        });
        assert!(matches!(result, Err(ETLError::TypeMismatch { .. })));
        assert_eq!(ctx.emitted(), 0);
        assert!(ctx.row_context().unwrap().contains("id: 3"));

        ctx.emit_from_input(|input, output| {
            let id = input.get_value("id")?.as_int32()?.unwrap_or_default();
            output.set_value("id", FieldValue::from_int32(id * 10))
        })
        .unwrap();
        assert_eq!(ctx.emitted(), 1);
        ctx.reset();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_check_output_rejects_foreign_layout() {
        let (_, pool, schema) = setup();
        let other: SchemaRef = Arc::new(Schema::new([("x", FieldType::Int64)]).unwrap());
        let record = PooledRecord::rent(&pool, Arc::clone(&other)).unwrap();
        assert!(check_output(&record, &schema).is_err());
        assert!(check_output(&record, &other).is_ok());
    }
}
