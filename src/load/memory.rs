//! # Memory Loader
//!
//! Carregamento em memória, útil para testes e para inspecionar a saída de
//! um pipeline.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use crate::error::{RecordError, Result};
use crate::record::{PooledRecord, RecordView};
use crate::schema::SchemaRef;
use crate::traits::Loader;
use crate::types::FieldValue;

#[derive(Debug, Default)]
struct Stored {
    columns: Vec<String>,
    rows: Vec<Vec<FieldValue<'static>>>,
    batches: usize,
    finalized: bool,
}

/// Carregador que acumula linhas em memória
///
/// Os valores são copiados para fora do buffer do pool (`into_owned`), então
/// as linhas sobrevivem ao registro. Clones compartilham o mesmo
/// armazenamento.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    schema: Option<SchemaRef>,
    data: Arc<Mutex<Stored>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader que exige registros compatíveis com `schema`
    pub fn with_schema(schema: SchemaRef) -> Self {
        Self {
            schema: Some(schema),
            data: Arc::default(),
        }
    }

    fn stored(&self) -> std::sync::MutexGuard<'_, Stored> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cópia das linhas armazenadas, na ordem de chegada
    pub fn get_data(&self) -> Vec<Vec<FieldValue<'static>>> {
        self.stored().rows.clone()
    }

    /// Valores de uma coluna, na ordem de chegada
    pub fn column(&self, name: &str) -> Result<Vec<FieldValue<'static>>> {
        let stored = self.stored();
        let index = stored
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| RecordError::UnknownField(name.to_string()))?;
        Ok(stored.rows.iter().map(|row| row[index].clone()).collect())
    }

    /// Limpa todos os dados armazenados
    pub fn clear(&self) {
        let mut stored = self.stored();
        stored.rows.clear();
        stored.batches = 0;
        stored.finalized = false;
    }

    pub fn len(&self) -> usize {
        self.stored().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored().rows.is_empty()
    }

    /// Quantidade de chamadas a `load_batch`
    pub fn batches(&self) -> usize {
        self.stored().batches
    }

    /// Indica se `finalize` foi chamado
    pub fn is_finalized(&self) -> bool {
        self.stored().finalized
    }

    fn push(stored: &mut Stored, record: &RecordView<'_>) -> Result<()> {
        if stored.columns.is_empty() {
            stored.columns = record.schema().fields().iter().map(|f| f.name.clone()).collect();
        }
        stored.rows.push(record.to_owned_values()?);
        Ok(())
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    async fn load(&self, record: &RecordView<'_>) -> Result<()> {
        Self::push(&mut self.stored(), record)
    }

    async fn load_batch(&self, batch: &[PooledRecord]) -> Result<()> {
        let mut stored = self.stored();
        for (offset, record) in batch.iter().enumerate() {
            Self::push(&mut stored, &record.view()).map_err(|e| e.at_batch_offset(offset))?;
        }
        stored.batches += 1;
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        self.stored().finalized = true;
        Ok(())
    }
}
