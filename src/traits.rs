use async_trait::async_trait;
use crate::error::Result;
use crate::record::{PooledRecord, Record, RecordView};
use crate::schema::SchemaRef;
use crate::transform::TransformContext;
use crate::types::PipelineEvent;

/// Trait para componentes que extraem dados
///
/// O extrator é dirigido por uma única task: `open`, chamadas sucessivas a
/// `next_row` e `close`. Cada linha é escrita diretamente no buffer alugado
/// pelo pipeline.
#[async_trait]
pub trait Extractor: Send {
    /// Schema das linhas produzidas
    fn schema(&self) -> SchemaRef;

    /// Estimativa do total de linhas, quando conhecida
    fn total_estimate(&self) -> Option<u64>;

    /// Bytes lidos da fonte até agora
    fn bytes_read(&self) -> Option<u64> {
        None
    }

    /// Tamanho total da fonte em bytes
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// Abre a fonte antes da primeira linha
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Preenche `record` com a próxima linha; `false` indica fim da fonte
    ///
    /// O registro chega com todos os campos nulos.
    async fn next_row(&mut self, record: &mut Record<'_>) -> Result<bool>;

    /// Libera a fonte; chamado também quando a execução falha ou é cancelada
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Trait para componentes que transformam dados
///
/// Recebe um registro por vez no `TransformContext` e emite zero, um ou
/// vários registros de saída.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Schema esperado na entrada; `None` aceita o schema da extração
    fn input_schema(&self) -> Option<SchemaRef> {
        None
    }

    /// Schema produzido; `None` mantém o schema de entrada
    fn output_schema(&self) -> Option<SchemaRef> {
        None
    }

    /// Transforma o registro corrente do contexto
    async fn transform(&self, ctx: &mut TransformContext) -> Result<()>;
}

/// Trait para componentes que carregam dados
#[async_trait]
pub trait Loader: Send + Sync {
    /// Schema esperado; `None` aceita o schema da transformação
    fn schema(&self) -> Option<SchemaRef> {
        None
    }

    /// Carrega um registro no destino
    async fn load(&self, record: &RecordView<'_>) -> Result<()>;

    /// Carrega um lote, na ordem recebida
    ///
    /// Falhas de um registro específico devem ser marcadas com
    /// [`at_batch_offset`](crate::error::ETLError::at_batch_offset), para que
    /// o pipeline aponte a linha certa.
    async fn load_batch(&self, batch: &[PooledRecord]) -> Result<()> {
        for (offset, record) in batch.iter().enumerate() {
            self.load(&record.view()).await.map_err(|e| e.at_batch_offset(offset))?;
        }
        Ok(())
    }

    /// Finaliza o carregamento (flush, commit, etc.)
    async fn finalize(&self) -> Result<()> {
        Ok(())
    }

    /// Verifica se o destino está disponível
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Trait para emissão de eventos do pipeline
///
/// Pode ser chamado a partir da task de qualquer estágio.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emite um evento do pipeline
    async fn emit(&self, event: PipelineEvent) -> Result<()>;
}
