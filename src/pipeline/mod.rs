//! Orquestrador do pipeline
//!
//! Cada execução cria duas filas e três tasks (extração, transformação e
//! carga) ligadas por um token de cancelamento próprio. A primeira falha
//! irrecuperável cancela a execução inteira.

pub mod queue;
mod stages;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::config::ETLConfig;
use crate::error::{ETLError, LoadError, PoolError, Result};
use crate::events::{EventBus, LoggingEventEmitter};
use crate::record::RecordBufferPool;
use crate::schema::SchemaRef;
use crate::telemetry::{StageProgress, TelemetryAggregator};
use crate::traits::{EventEmitter, Extractor, Loader, Transformer};
use crate::transform::common::IdentityTransform;
use crate::transform::TransformContext;
use crate::types::{PipelineEvent, PipelineResult, PipelineState, StageFailure, StageId, StageStatus};
use self::queue::StageQueue;
use self::stages::{RunContext, StageReport};

/// Pipeline ETL em streaming
pub struct Pipeline<E, T, L> {
    extractor: Arc<tokio::sync::Mutex<E>>,
    transformer: Arc<T>,
    loader: Arc<L>,
    config: ETLConfig,
    extract_schema: SchemaRef,
    transform_schema: SchemaRef,
    output_schema: SchemaRef,
    pool: RecordBufferPool,
    events: Arc<EventBus>,
    telemetry: Arc<TelemetryAggregator>,
    state: Arc<Mutex<PipelineState>>,
    metrics: Arc<Mutex<PipelineMetrics>>,
    shutdown: CancellationToken,
    active_run: Mutex<Option<CancellationToken>>,
    pipeline_id: Arc<str>,
}

/// Execuções mantidas no histórico de métricas
pub const MAX_EXECUTION_HISTORY: usize = 100;

/// Métricas do pipeline
///
/// Os totais cobrem todas as execuções; `executions` guarda só as
/// [`MAX_EXECUTION_HISTORY`] mais recentes.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub executions: VecDeque<PipelineExecution>,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub total_rows_loaded: u64,
    pub total_execution_time_ms: u64,
    /// Fração das execuções concluídas com sucesso
    pub success_rate: f64,
}

/// Informações de uma execução do pipeline
#[derive(Debug, Clone)]
pub struct PipelineExecution {
    pub timestamp: SystemTime,
    pub result: PipelineResult,
    pub state: PipelineState,
}

impl Pipeline<(), IdentityTransform, ()> {
    /// Cria um novo builder de pipeline
    pub fn builder() -> PipelineBuilder<(), IdentityTransform, ()> {
        PipelineBuilder::new()
    }

    /// Cria um builder com configuração personalizada
    pub fn with_config(config: ETLConfig) -> PipelineBuilder<(), IdentityTransform, ()> {
        PipelineBuilder::with_config(config)
    }
}

impl<E, T, L> Pipeline<E, T, L>
where
    E: Extractor + 'static,
    T: Transformer + 'static,
    L: Loader + 'static,
{
    /// Monta um pipeline com a configuração padrão e a capacidade de fila dada
    ///
    /// `queue_capacity == 0` cria filas sem limite.
    pub fn new(extractor: E, transformer: T, loader: L, queue_capacity: usize) -> Result<Self> {
        PipelineBuilder::new()
            .extract(extractor)
            .transform(transformer)
            .load(loader)
            .queue_capacity(queue_capacity)
            .build()
    }

    /// Retorna o ID do pipeline
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn config(&self) -> &ETLConfig {
        &self.config
    }

    /// Pool de buffers compartilhado pelos estágios
    pub fn pool(&self) -> &RecordBufferPool {
        &self.pool
    }

    /// Retorna o estado atual do pipeline
    pub fn current_state(&self) -> PipelineState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stage_status(&self, stage: StageId) -> StageStatus {
        self.telemetry.status(stage)
    }

    /// Snapshot de Extract, Transform, Load e Global
    pub fn progress(&self) -> Vec<StageProgress> {
        self.telemetry.snapshot()
    }

    /// Cancela a execução em andamento, se houver
    pub fn cancel(&self) {
        let active = self.active_run.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = active.as_ref() {
            info!(pipeline_id = %self.pipeline_id, "Cancelamento solicitado");
            token.cancel();
        }
    }

    /// Token pai das execuções
    ///
    /// Cancelá-lo interrompe a execução atual e todas as seguintes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn set_state(&self, new_state: PipelineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = new_state;
    }

    /// Executa o pipeline até o fim da fonte, uma falha ou um cancelamento
    ///
    /// Cancelamento devolve `ETLError::Cancelled`; uma falha de estágio
    /// devolve `ETLError::Stage` com o erro original.
    pub async fn execute(&self) -> Result<PipelineResult> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == PipelineState::Running {
                return Err(ETLError::Pipeline("pipeline já está em execução".to_string()));
            }
            *state = PipelineState::Running;
        }

        let run_token = self.shutdown.child_token();
        *self.active_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(run_token.clone());

        let outcome = self.run(run_token).await;

        *self.active_run.lock().unwrap_or_else(PoisonError::into_inner) = None;
        outcome
    }

    async fn run(&self, run_token: CancellationToken) -> Result<PipelineResult> {
        let start_time = Instant::now();
        info!(pipeline_id = %self.pipeline_id, "Iniciando execução do pipeline");

        self.telemetry.start();
        self.events
            .emit(PipelineEvent::Started {
                pipeline_id: self.pipeline_id.to_string(),
                timestamp: SystemTime::now(),
            })
            .await;

        let ctx = Arc::new(RunContext::new(
            Arc::clone(&self.pipeline_id),
            self.pool.clone(),
            run_token,
            Arc::clone(&self.telemetry),
            Arc::clone(&self.events),
            self.config.pipeline.progress_interval,
        ));

        let reports = match self.health_check().await {
            Ok(()) => self.run_stages(&ctx).await,
            Err(e) => {
                ctx.fail(StageFailure::new(StageId::Load, e)).await;
                Vec::new()
            }
        };
        self.telemetry.finish();

        let mut result = PipelineResult::new();
        for report in &reports {
            match report.stage {
                StageId::Extract => result.rows_extracted = report.rows,
                StageId::Transform => result.rows_transformed = report.rows,
                StageId::Load => result.rows_loaded = report.rows,
                StageId::Global => {}
            }
        }
        result.execution_time_ms = start_time.elapsed().as_millis() as u64;
        result.stages = self.telemetry.snapshot();

        if let Some(failure) = ctx.failure() {
            error!(
                pipeline_id = %self.pipeline_id,
                failure = %failure,
                rows_loaded = result.rows_loaded,
                "Pipeline falhou"
            );
            let state = PipelineState::Failed(failure.to_string());
            self.set_state(state.clone());
            self.record_execution(&result, state);
            return Err(match failure.error.as_ref() {
                ETLError::Timeout(seconds) => ETLError::Timeout(*seconds),
                _ => failure.to_error(),
            });
        }

        let completed = reports.len() == 3
            && reports.iter().all(|r| r.status == StageStatus::Completed);
        if completed {
            self.set_state(PipelineState::Completed);
            self.events
                .emit(PipelineEvent::Completed {
                    pipeline_id: self.pipeline_id.to_string(),
                    result: result.clone(),
                    timestamp: SystemTime::now(),
                })
                .await;
            self.record_execution(&result, PipelineState::Completed);

            info!(
                pipeline_id = %self.pipeline_id,
                rows_extracted = result.rows_extracted,
                rows_loaded = result.rows_loaded,
                execution_time_ms = result.execution_time_ms,
                "Pipeline executado com sucesso"
            );
            return Ok(result);
        }

        warn!(
            pipeline_id = %self.pipeline_id,
            rows_loaded = result.rows_loaded,
            "Pipeline cancelado"
        );
        self.set_state(PipelineState::Cancelled);
        self.events
            .emit(PipelineEvent::Cancelled {
                pipeline_id: self.pipeline_id.to_string(),
                timestamp: SystemTime::now(),
            })
            .await;
        self.record_execution(&result, PipelineState::Cancelled);
        Err(ETLError::Cancelled)
    }

    async fn health_check(&self) -> Result<()> {
        if self.loader.health_check().await? {
            Ok(())
        } else {
            Err(LoadError::Unavailable("health check do loader falhou".to_string()).into())
        }
    }

    async fn run_stages(&self, ctx: &Arc<RunContext>) -> Vec<StageReport> {
        let prewarm = self.config.pool.prewarm_buffers;
        if prewarm > 0 {
            if let Err(e) = self.pool.prewarm(self.extract_schema.buffer_size(), prewarm) {
                warn!(error = %e, "Falha ao pré-aquecer o pool");
            }
        }

        let (total_lines, total_bytes) = {
            let extractor = self.extractor.lock().await;
            (extractor.total_estimate(), extractor.total_bytes())
        };

        let capacity = self.config.pipeline.queue_capacity;
        let (extract_tx, extract_rx) = StageQueue::new(capacity, ctx.cancel.clone()).split();
        let (transform_tx, transform_rx) = StageQueue::new(capacity, ctx.cancel.clone()).split();

        let extract = tokio::spawn(stages::run_extract(
            Arc::clone(&self.extractor),
            SchemaRef::clone(&self.extract_schema),
            extract_tx,
            ctx.tracker(StageId::Extract).with_totals(total_lines, total_bytes),
            Arc::clone(ctx),
        ));
        let transform = tokio::spawn(stages::run_transform(
            Arc::clone(&self.transformer),
            TransformContext::new(
                self.pool.clone(),
                SchemaRef::clone(&self.transform_schema),
                SchemaRef::clone(&self.output_schema),
            ),
            extract_rx,
            transform_tx,
            ctx.tracker(StageId::Transform).with_totals(total_lines, None),
            Arc::clone(ctx),
        ));
        let load = tokio::spawn(stages::run_load(
            Arc::clone(&self.loader),
            transform_rx,
            Arc::new(ctx.tracker(StageId::Load).with_totals(total_lines, None)),
            Arc::clone(ctx),
            self.config.pipeline.load_batch_size,
            self.config.pipeline.load_workers,
        ));

        let joined = async { tokio::join!(extract, transform, load) };
        tokio::pin!(joined);

        let timeout = self.config.pipeline.timeout_seconds;
        let (extract, transform, load) = if timeout == 0 {
            joined.await
        } else {
            tokio::select! {
                results = &mut joined => results,
                _ = tokio::time::sleep(Duration::from_secs(timeout)) => {
                    warn!(pipeline_id = %self.pipeline_id, timeout_seconds = timeout, "Tempo limite excedido");
                    ctx.fail(StageFailure::new(StageId::Global, ETLError::Timeout(timeout))).await;
                    joined.await
                }
            }
        };

        vec![
            joined_report(ctx, StageId::Extract, extract).await,
            joined_report(ctx, StageId::Transform, transform).await,
            joined_report(ctx, StageId::Load, load).await,
        ]
    }

    /// Obtém métricas do pipeline
    pub async fn get_metrics(&self) -> PipelineMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reseta métricas do pipeline
    pub async fn reset_metrics(&self) {
        *self.metrics.lock().unwrap_or_else(PoisonError::into_inner) = PipelineMetrics::default();
    }

    fn record_execution(&self, result: &PipelineResult, state: PipelineState) {
        let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);

        metrics.total_executions += 1;
        if state == PipelineState::Completed {
            metrics.successful_executions += 1;
        }
        metrics.total_rows_loaded += result.rows_loaded;
        metrics.total_execution_time_ms += result.execution_time_ms;
        metrics.success_rate = metrics.successful_executions as f64 / metrics.total_executions as f64;

        if metrics.executions.len() == MAX_EXECUTION_HISTORY {
            metrics.executions.pop_front();
        }
        metrics.executions.push_back(PipelineExecution {
            timestamp: SystemTime::now(),
            result: result.clone(),
            state,
        });
    }
}

impl<E, T, L> std::fmt::Debug for Pipeline<E, T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipeline_id", &self.pipeline_id)
            .field("extract_schema", &self.extract_schema.to_string())
            .field("output_schema", &self.output_schema.to_string())
            .field("config", &self.config)
            .finish()
    }
}

/// Converte o resultado de uma task em relatório; pânico conta como falha
async fn joined_report(
    ctx: &RunContext,
    stage: StageId,
    joined: std::result::Result<StageReport, JoinError>,
) -> StageReport {
    match joined {
        Ok(report) => report,
        Err(join_error) => {
            ctx.fail(StageFailure::new(
                stage,
                ETLError::Pipeline(format!("task do estágio terminou inesperadamente: {}", join_error)),
            ))
            .await;
            ctx.aggregator.set_status(stage, StageStatus::Failed);
            StageReport {
                stage,
                status: StageStatus::Failed,
                rows: ctx.aggregator.stage(stage).lines_processed,
            }
        }
    }
}

/// Builder para criação de pipelines
pub struct PipelineBuilder<E, T, L> {
    extractor: E,
    transformer: T,
    loader: L,
    config: ETLConfig,
    emitters: Vec<Arc<dyn EventEmitter>>,
    _phantom: PhantomData<(E, T, L)>,
}

impl PipelineBuilder<(), IdentityTransform, ()> {
    /// Cria um novo builder; a transformação padrão é a identidade
    pub fn new() -> Self {
        Self::with_config(ETLConfig::default())
    }

    /// Cria um builder com configuração personalizada
    pub fn with_config(config: ETLConfig) -> Self {
        Self {
            extractor: (),
            transformer: IdentityTransform,
            loader: (),
            config,
            emitters: Vec::new(),
            _phantom: PhantomData,
        }
    }
}

impl Default for PipelineBuilder<(), IdentityTransform, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, T, L> PipelineBuilder<E, T, L> {
    /// Define o extrator
    pub fn extract<NewE: Extractor>(self, extractor: NewE) -> PipelineBuilder<NewE, T, L> {
        PipelineBuilder {
            extractor,
            transformer: self.transformer,
            loader: self.loader,
            config: self.config,
            emitters: self.emitters,
            _phantom: PhantomData,
        }
    }

    /// Define o transformador
    pub fn transform<NewT: Transformer>(self, transformer: NewT) -> PipelineBuilder<E, NewT, L> {
        PipelineBuilder {
            extractor: self.extractor,
            transformer,
            loader: self.loader,
            config: self.config,
            emitters: self.emitters,
            _phantom: PhantomData,
        }
    }

    /// Define o carregador
    pub fn load<NewL: Loader>(self, loader: NewL) -> PipelineBuilder<E, T, NewL> {
        PipelineBuilder {
            extractor: self.extractor,
            transformer: self.transformer,
            loader,
            config: self.config,
            emitters: self.emitters,
            _phantom: PhantomData,
        }
    }

    /// Define a configuração
    pub fn config(mut self, config: ETLConfig) -> Self {
        self.config = config;
        self
    }

    /// Adiciona um observador de eventos
    pub fn event_emitter<Em: EventEmitter + 'static>(self, emitter: Em) -> Self {
        self.subscribe(Arc::new(emitter))
    }

    /// Adiciona um observador já compartilhado
    pub fn subscribe(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitters.push(emitter);
        self
    }

    /// Capacidade das filas entre estágios (0 = sem limite)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.pipeline.queue_capacity = capacity;
        self
    }

    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.config.pipeline.progress_interval = interval;
        self
    }

    /// Registros por chamada a `load_batch`
    pub fn load_batch_size(mut self, size: usize) -> Self {
        self.config.pipeline.load_batch_size = size;
        self
    }

    /// Workers de carga; acima de 1 a ordem deixa de ser garantida no destino
    pub fn load_workers(mut self, workers: usize) -> Self {
        self.config.pipeline.load_workers = workers;
        self
    }

    /// Define o timeout
    pub fn timeout_seconds(mut self, timeout: u64) -> Self {
        self.config.pipeline.timeout_seconds = timeout;
        self
    }

    /// Habilita o `LoggingEventEmitter` padrão
    pub fn enable_event_logging(mut self, enable: bool) -> Self {
        self.config.observability.enable_event_logging = enable;
        self
    }
}

impl<E, T, L> PipelineBuilder<E, T, L>
where
    E: Extractor + 'static,
    T: Transformer + 'static,
    L: Loader + 'static,
{
    /// Valida configuração e schemas e constrói o pipeline
    ///
    /// Incompatibilidades de schema são detectadas aqui, antes de qualquer
    /// estágio começar.
    pub fn build(self) -> Result<Pipeline<E, T, L>> {
        self.config.validate()?;

        let extract_schema = self.extractor.schema();
        let transform_schema = match self.transformer.input_schema() {
            Some(expected) => {
                extract_schema.check_compatible(&expected, "extract→transform")?;
                expected
            }
            None => SchemaRef::clone(&extract_schema),
        };
        let output_schema = self
            .transformer
            .output_schema()
            .unwrap_or_else(|| SchemaRef::clone(&extract_schema));
        if let Some(expected) = self.loader.schema() {
            output_schema.check_compatible(&expected, "transform→load")?;
        }

        let pool = RecordBufferPool::new(&self.config.pool);
        for schema in [&extract_schema, &output_schema] {
            if pool.class_size_for(schema.buffer_size()).is_none() {
                return Err(PoolError::BufferTooLarge {
                    requested: schema.buffer_size(),
                    max: pool.max_buffer_size(),
                }
                .into());
            }
        }

        let mut events = EventBus::new();
        if self.config.observability.enable_event_logging {
            events.subscribe(Arc::new(LoggingEventEmitter::new()));
        }
        for emitter in self.emitters {
            events.subscribe(emitter);
        }

        let pipeline_id: Arc<str> = Arc::from(format!("pipeline-{}", Uuid::new_v4()));
        info!(
            pipeline_id = %pipeline_id,
            schema = %extract_schema,
            queue_capacity = self.config.pipeline.queue_capacity,
            "Pipeline construído"
        );

        Ok(Pipeline {
            extractor: Arc::new(tokio::sync::Mutex::new(self.extractor)),
            transformer: Arc::new(self.transformer),
            loader: Arc::new(self.loader),
            config: self.config,
            extract_schema,
            transform_schema,
            output_schema,
            pool,
            events: Arc::new(events),
            telemetry: Arc::new(TelemetryAggregator::new()),
            state: Arc::new(Mutex::new(PipelineState::default())),
            metrics: Arc::new(Mutex::new(PipelineMetrics::default())),
            shutdown: CancellationToken::new(),
            active_run: Mutex::new(None),
            pipeline_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::events::InMemoryEventEmitter;
    use crate::extract::csv::CsvExtractor;
    use crate::extract::memory::MemoryExtractor;
    use crate::load::memory::MemoryLoader;
    use crate::schema::Schema;
    use crate::transform::common::FilterTransform;
    use crate::types::{FieldType, FieldValue};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn people_schema() -> SchemaRef {
        Schema::builder()
            .string_field("name", 32)
            .field("age", FieldType::Int32)
            .build()
            .unwrap()
            .into_ref()
    }

    fn people(n: i32) -> MemoryExtractor {
        let rows = (0..n)
            .map(|i| vec![FieldValue::from(format!("p{}", i)), FieldValue::from_int32(i)])
            .collect();
        MemoryExtractor::new(people_schema(), rows)
    }

    #[tokio::test]
    async fn test_pipeline_builder() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "name,age").unwrap();
        writeln!(temp_file, "Alice,30").unwrap();
        writeln!(temp_file, "Bob,17").unwrap();

        let loader = MemoryLoader::new();
        let pipeline = Pipeline::builder()
            .extract(CsvExtractor::new(temp_file.path(), people_schema()))
            .transform(FilterTransform::new(|row| {
                Ok(row.get_value("age")?.as_int32()?.unwrap_or(0) >= 18)
            }))
            .load(loader.clone())
            .load_batch_size(100)
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();

        assert_eq!(result.rows_extracted, 2);
        assert_eq!(result.rows_loaded, 1);
        assert_eq!(loader.len(), 1);
        assert_eq!(pipeline.current_state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_pipeline_metrics() {
        let pipeline = Pipeline::new(people(3), IdentityTransform, MemoryLoader::new(), 2).unwrap();

        pipeline.execute().await.unwrap();
        pipeline.execute().await.unwrap();

        let metrics = pipeline.get_metrics().await;
        assert_eq!(metrics.executions.len(), 2);
        assert_eq!(metrics.total_rows_loaded, 6);
        assert_eq!(metrics.success_rate, 1.0);

        pipeline.reset_metrics().await;
        assert!(pipeline.get_metrics().await.executions.is_empty());
    }

    #[tokio::test]
    async fn test_execution_history_is_capped() {
        let pipeline = Pipeline::new(people(1), IdentityTransform, MemoryLoader::new(), 2).unwrap();

        let runs = MAX_EXECUTION_HISTORY + 5;
        for _ in 0..runs {
            pipeline.execute().await.unwrap();
        }

        let metrics = pipeline.get_metrics().await;
        assert_eq!(metrics.executions.len(), MAX_EXECUTION_HISTORY);
        assert_eq!(metrics.total_executions, runs as u64);
        assert_eq!(metrics.total_rows_loaded, runs as u64);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_pipeline_with_config() {
        let config = ETLConfig::builder()
            .queue_capacity(4)
            .load_batch_size(3)
            .load_workers(2)
            .progress_interval(2)
            .build()
            .unwrap();

        let loader = MemoryLoader::new();
        let pipeline = Pipeline::with_config(config)
            .extract(people(10))
            .load(loader.clone())
            .build()
            .unwrap();

        let result = pipeline.execute().await.unwrap();
        assert_eq!(result.rows_loaded, 10);
        assert_eq!(loader.len(), 10);
    }

    #[tokio::test]
    async fn test_events_and_progress() {
        let memory = InMemoryEventEmitter::new();
        let pipeline = Pipeline::builder()
            .extract(people(5))
            .load(MemoryLoader::new())
            .progress_interval(2)
            .event_emitter(memory.clone())
            .build()
            .unwrap();

        pipeline.execute().await.unwrap();

        assert_eq!(memory.count_of("started"), 1);
        assert_eq!(memory.count_of("stage_finished"), 3);
        assert_eq!(memory.count_of("completed"), 1);
        assert_eq!(memory.count_of("error"), 0);

        let progress = pipeline.progress();
        assert_eq!(progress.len(), 4);
        let global = &progress[3];
        assert_eq!(global.stage, StageId::Global);
        assert_eq!(global.status, StageStatus::Completed);
        assert_eq!(global.percent_complete, Some(100.0));
        assert_eq!(pipeline.stage_status(StageId::Load), StageStatus::Completed);
    }

    #[tokio::test]
    async fn test_schema_mismatch_before_start() {
        let other = Schema::new([("id", FieldType::Int64)]).unwrap().into_ref();
        let result = Pipeline::builder()
            .extract(people(1))
            .load(MemoryLoader::with_schema(other))
            .build();

        assert!(matches!(result, Err(ETLError::Schema(SchemaError::Mismatch { .. }))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Pipeline::builder()
            .extract(people(1))
            .load(MemoryLoader::new())
            .load_batch_size(0)
            .build();
        assert!(matches!(result, Err(ETLError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_run_via_parent_token() {
        let memory = InMemoryEventEmitter::new();
        let pipeline = Pipeline::builder()
            .extract(people(100))
            .load(MemoryLoader::new())
            .event_emitter(memory.clone())
            .build()
            .unwrap();

        pipeline.cancellation_token().cancel();
        let result = pipeline.execute().await;

        assert!(matches!(result, Err(ETLError::Cancelled)));
        assert_eq!(pipeline.current_state(), PipelineState::Cancelled);
        assert_eq!(memory.count_of("cancelled"), 1);
        assert_eq!(memory.count_of("completed"), 0);
        assert_eq!(memory.count_of("error"), 0);
        assert_eq!(pipeline.pool().outstanding(), 0);
    }
}
