use async_trait::async_trait;
use crate::error::Result;
use crate::record::Record;
use crate::schema::SchemaRef;
use crate::traits::Extractor;
use crate::types::FieldValue;

/// Extrator sobre linhas mantidas em memória
///
/// Cada linha traz os valores na ordem dos campos do schema.
#[derive(Debug, Clone)]
pub struct MemoryExtractor {
    schema: SchemaRef,
    rows: Vec<Vec<FieldValue<'static>>>,
    position: usize,
}

impl MemoryExtractor {
    pub fn new(schema: SchemaRef, rows: Vec<Vec<FieldValue<'static>>>) -> Self {
        Self {
            schema,
            rows,
            position: 0,
        }
    }

    /// Adiciona uma linha ao final
    pub fn push_row(&mut self, row: Vec<FieldValue<'static>>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl Extractor for MemoryExtractor {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    fn total_estimate(&self) -> Option<u64> {
        Some(self.rows.len() as u64)
    }

    async fn open(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    async fn next_row(&mut self, record: &mut Record<'_>) -> Result<bool> {
        let Some(row) = self.rows.get(self.position) else {
            return Ok(false);
        };
        for (index, value) in row.iter().enumerate() {
            record.set_value(index, value.clone())?;
        }
        self.position += 1;
        Ok(true)
    }
}

/// Extrator dirigido por closure
///
/// `produce(índice, registro)` preenche a linha `índice` e devolve `false`
/// quando a fonte acabou.
pub struct FnExtractor<F> {
    schema: SchemaRef,
    total: Option<u64>,
    produce: F,
    position: u64,
}

impl<F> FnExtractor<F>
where
    F: FnMut(u64, &mut Record<'_>) -> Result<bool> + Send,
{
    pub fn new(schema: SchemaRef, produce: F) -> Self {
        Self {
            schema,
            total: None,
            produce,
            position: 0,
        }
    }

    /// Informa o total esperado de linhas, usado no progresso
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

impl<F> std::fmt::Debug for FnExtractor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExtractor")
            .field("schema", &self.schema.to_string())
            .field("total", &self.total)
            .field("position", &self.position)
            .finish()
    }
}

#[async_trait]
impl<F> Extractor for FnExtractor<F>
where
    F: FnMut(u64, &mut Record<'_>) -> Result<bool> + Send,
{
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    fn total_estimate(&self) -> Option<u64> {
        self.total
    }

    async fn open(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    async fn next_row(&mut self, record: &mut Record<'_>) -> Result<bool> {
        let produced = (self.produce)(self.position, record)?;
        if produced {
            self.position += 1;
        }
        Ok(produced)
    }
}
