//! # ETLStream - Motor ETL em streaming para Rust
//!
//! Pipelines Extract → Transform → Load que processam uma linha por vez,
//! com registros escritos diretamente em buffers reaproveitados de um pool.
//!
//! ## Características Principais
//!
//! - **Sem alocação por linha**: cada registro é uma visão tipada sobre um
//!   buffer de largura fixa alugado do [`RecordBufferPool`]
//! - **Concorrência**: os três estágios rodam em tasks Tokio ligadas por
//!   filas limitadas (back-pressure)
//! - **Fail-fast**: a primeira falha cancela a execução e é notificada uma
//!   única vez
//! - **Telemetria**: progresso por estágio e um Global derivado, com vazão e
//!   tempo restante estimado
//!
//! ## Exemplo Rápido
//!
//! ```rust,no_run
//! use etlstream::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let schema = Schema::builder()
//!         .string_field("name", 64)
//!         .field("active", FieldType::Boolean)
//!         .build()?
//!         .into_ref();
//!
//!     // Pipeline simples: CSV → Filtro → JSONL
//!     let pipeline = Pipeline::builder()
//!         .extract(CsvExtractor::new("users.csv", schema))
//!         .transform(FilterTransform::new(|row| {
//!             Ok(row.get_value("active")?.as_boolean()? == Some(true))
//!         }))
//!         .load(JsonLinesLoader::new("output.jsonl"))
//!         .build()?;
//!
//!     let result = pipeline.execute().await?;
//!     println!("{} linhas carregadas", result.rows_loaded);
//!     Ok(())
//! }
//! ```
//!
//! ## Arquitetura
//!
//! ### Modelo de registro
//! [`Schema`] fixa o layout; [`FieldValue`] é o valor tipado; [`Record`] e
//! [`RecordView`] leem e escrevem sobre o buffer; [`PooledRecord`] é a
//! unidade que atravessa as filas.
//!
//! ### Estágios
//! [`Extractor`], [`Transformer`] e [`Loader`] são dirigidos pelo
//! [`Pipeline`], que também agrega a telemetria e publica [`PipelineEvent`]s.

pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod telemetry;
pub mod traits;
pub mod transform;
pub mod types;

// Re-exports para facilitar o uso
pub use config::ETLConfig;
pub use error::{ETLError, Result};
pub use events::{CallbackEmitter, EventBus, InMemoryEventEmitter, LoggingEventEmitter};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use record::{PooledRecord, Record, RecordBufferPool, RecordView};
pub use schema::{Schema, SchemaRef};
pub use telemetry::{StageProgress, TelemetryAggregator};
pub use traits::*;
pub use transform::TransformContext;
pub use types::{
    Decimal, FieldType, FieldValue, PipelineEvent, PipelineResult, PipelineState, StageFailure,
    StageId, StageStatus,
};

/// Prelude com imports mais comuns
pub mod prelude {
    pub use crate::config::{ETLConfig, LogFormat};
    pub use crate::error::{ETLError, Result};
    pub use crate::events::{CallbackEmitter, InMemoryEventEmitter, LoggingEventEmitter};
    pub use crate::logging::init_logging;
    pub use crate::pipeline::Pipeline;
    pub use crate::record::{PooledRecord, Record, RecordBufferPool, RecordView};
    pub use crate::schema::{Schema, SchemaRef};
    pub use crate::telemetry::StageProgress;
    pub use crate::traits::{EventEmitter, Extractor, Loader, Transformer};
    pub use crate::transform::TransformContext;
    pub use crate::types::{
        Decimal, FieldType, FieldValue, PipelineEvent, PipelineResult, PipelineState, StageId,
        StageStatus,
    };

    // Extractors
    #[cfg(feature = "csv")]
    pub use crate::extract::csv::CsvExtractor;
    pub use crate::extract::memory::{FnExtractor, MemoryExtractor};

    // Transformers
    pub use crate::transform::common::{
        AddColumnTransform, DuplicateTransform, FilterTransform, IdentityTransform, MapTransform,
        RenameColumnsTransform, SelectColumnsTransform,
    };

    // Loaders
    pub use crate::load::common::DataFormatter;
    pub use crate::load::console::ConsoleLoader;
    pub use crate::load::json::JsonLinesLoader;
    pub use crate::load::memory::MemoryLoader;
}

/// Informações sobre a versão da biblioteca
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Informações sobre a biblioteca
pub fn about() -> &'static str {
    env!("CARGO_PKG_DESCRIPTION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_about() {
        assert!(!about().is_empty());
    }
}
