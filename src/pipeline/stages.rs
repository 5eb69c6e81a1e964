//! Drivers dos estágios de extração, transformação e carga
//!
//! Cada driver roda em sua própria task. Toda espera (fila cheia, fila vazia
//! ou I/O dentro de um componente) corre contra o token de cancelamento da
//! execução. A primeira falha irrecuperável é registrada no [`RunContext`],
//! que cancela o token e emite o único evento `Error` da execução.

use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use crate::error::{ETLError, Result};
use crate::events::EventBus;
use crate::pipeline::queue::{QueueReceiver, QueueSender, StageQueue};
use crate::record::{PooledRecord, RecordBufferPool};
use crate::schema::SchemaRef;
use crate::telemetry::{StageTracker, TelemetryAggregator};
use crate::traits::{Extractor, Loader, Transformer};
use crate::transform::{check_output, TransformContext};
use crate::types::{PipelineEvent, StageFailure, StageId, StageStatus};

/// Estado compartilhado pelos drivers durante uma execução
pub(crate) struct RunContext {
    pub pipeline_id: Arc<str>,
    pub pool: RecordBufferPool,
    pub cancel: CancellationToken,
    pub aggregator: Arc<TelemetryAggregator>,
    pub events: Arc<EventBus>,
    pub progress_interval: u64,
    failure: Mutex<Option<StageFailure>>,
}

impl RunContext {
    pub fn new(
        pipeline_id: Arc<str>,
        pool: RecordBufferPool,
        cancel: CancellationToken,
        aggregator: Arc<TelemetryAggregator>,
        events: Arc<EventBus>,
        progress_interval: u64,
    ) -> Self {
        Self {
            pipeline_id,
            pool,
            cancel,
            aggregator,
            events,
            progress_interval,
            failure: Mutex::new(None),
        }
    }

    pub fn tracker(&self, stage: StageId) -> StageTracker {
        StageTracker::new(
            stage,
            Arc::clone(&self.pipeline_id),
            Arc::clone(&self.aggregator),
            Arc::clone(&self.events),
            self.progress_interval,
        )
    }

    /// Registra uma falha e cancela a execução
    ///
    /// Só a primeira falha é guardada e notificada; as seguintes são ignoradas.
    pub async fn fail(&self, failure: StageFailure) {
        let first = {
            let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(failure.clone());
                true
            } else {
                false
            }
        };
        self.cancel.cancel();

        if first {
            error!(
                pipeline_id = %self.pipeline_id,
                stage = %failure.stage,
                error = %failure.error,
                row_index = ?failure.row_index,
                "Falha irrecuperável, cancelando execução"
            );
            self.events
                .emit(PipelineEvent::Error {
                    pipeline_id: self.pipeline_id.to_string(),
                    failure,
                    timestamp: SystemTime::now(),
                })
                .await;
        }
    }

    pub fn failure(&self) -> Option<StageFailure> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Resultado de um driver
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageReport {
    pub stage: StageId,
    pub status: StageStatus,
    /// Linhas extraídas, emitidas pela transformação ou carregadas
    pub rows: u64,
}

/// Erro de um laço de estágio, com a linha em que ocorreu
struct RowError {
    error: ETLError,
    row_index: Option<u64>,
    row_context: Option<String>,
}

impl RowError {
    fn at(error: ETLError, row_index: u64, row_context: Option<String>) -> Self {
        Self {
            error,
            row_index: Some(row_index),
            row_context,
        }
    }

    fn into_failure(self, stage: StageId) -> StageFailure {
        let failure = StageFailure::new(stage, self.error);
        match self.row_index {
            Some(index) => failure.with_row(index, self.row_context),
            None => failure,
        }
    }
}

impl From<ETLError> for RowError {
    fn from(error: ETLError) -> Self {
        Self {
            error,
            row_index: None,
            row_context: None,
        }
    }
}

/// Aguarda `fut`, desistindo com `Cancelled` se o token disparar antes
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ETLError::Cancelled),
        result = fut => result,
    }
}

async fn conclude(
    ctx: &RunContext,
    tracker: &StageTracker,
    result: std::result::Result<(), StageFailure>,
    rows: u64,
) -> StageReport {
    let status = match result {
        Ok(()) => StageStatus::Completed,
        Err(failure) if failure.error.is_cancelled() => StageStatus::Cancelled,
        Err(failure) => {
            ctx.fail(failure).await;
            StageStatus::Failed
        }
    };
    tracker.finish(status).await;

    info!(
        pipeline_id = %ctx.pipeline_id,
        stage = %tracker.stage(),
        status = %status,
        rows = rows,
        "Estágio encerrado"
    );

    StageReport {
        stage: tracker.stage(),
        status,
        rows,
    }
}

/// Driver de extração: aluga um buffer por linha e o envia à transformação
pub(crate) async fn run_extract<E>(
    extractor: Arc<tokio::sync::Mutex<E>>,
    schema: SchemaRef,
    output: QueueSender<PooledRecord>,
    tracker: StageTracker,
    ctx: Arc<RunContext>,
) -> StageReport
where
    E: Extractor + ?Sized,
{
    tracker.start().await;
    debug!(pipeline_id = %ctx.pipeline_id, "Iniciando extração");

    let mut extractor = extractor.lock().await;
    let mut result = extract_rows(&mut *extractor, &schema, &output, &tracker, &ctx).await;

    if let Err(e) = extractor.close().await {
        match result {
            Ok(()) => result = Err(RowError::from(e)),
            Err(_) => debug!(error = %e, "Falha ao fechar a fonte após erro"),
        }
    }

    let result = result.map_err(|e| e.into_failure(StageId::Extract));
    conclude(&ctx, &tracker, result, tracker.lines()).await
}

async fn extract_rows<E>(
    extractor: &mut E,
    schema: &SchemaRef,
    output: &QueueSender<PooledRecord>,
    tracker: &StageTracker,
    ctx: &RunContext,
) -> std::result::Result<(), RowError>
where
    E: Extractor + ?Sized,
{
    cancellable(&ctx.cancel, extractor.open()).await?;

    let mut row_index = 0u64;
    loop {
        let mut record = PooledRecord::rent(&ctx.pool, SchemaRef::clone(schema))
            .map_err(|e| RowError::at(e, row_index, None))?;

        let fetched = {
            let mut target = record.record();
            cancellable(&ctx.cancel, extractor.next_row(&mut target)).await
        };
        match fetched {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(RowError::at(e, row_index, Some(record.row_context()))),
        }

        output.send(record).await?;
        row_index += 1;
        tracker.record(1, extractor.bytes_read()).await;
    }

    Ok(())
}

/// Driver de transformação: zero, um ou vários registros por entrada
pub(crate) async fn run_transform<T>(
    transformer: Arc<T>,
    mut tctx: TransformContext,
    mut input: QueueReceiver<PooledRecord>,
    output: QueueSender<PooledRecord>,
    tracker: StageTracker,
    ctx: Arc<RunContext>,
) -> StageReport
where
    T: Transformer + ?Sized,
{
    tracker.start().await;
    debug!(pipeline_id = %ctx.pipeline_id, "Iniciando transformação");

    let mut emitted = 0u64;
    let result = transform_rows(
        &*transformer,
        &mut tctx,
        &mut input,
        &output,
        &tracker,
        &ctx,
        &mut emitted,
    )
    .await;
    tctx.reset();

    let result = result.map_err(|e| e.into_failure(StageId::Transform));
    conclude(&ctx, &tracker, result, emitted).await
}

async fn transform_rows<T>(
    transformer: &T,
    tctx: &mut TransformContext,
    input: &mut QueueReceiver<PooledRecord>,
    output: &QueueSender<PooledRecord>,
    tracker: &StageTracker,
    ctx: &RunContext,
    emitted: &mut u64,
) -> std::result::Result<(), RowError>
where
    T: Transformer + ?Sized,
{
    let output_schema = SchemaRef::clone(tctx.output_schema());
    let mut row_index = 0u64;

    while let Some(record) = input.recv().await? {
        tctx.begin(record);
        let transformed = cancellable(&ctx.cancel, transformer.transform(&mut *tctx)).await;
        if let Err(e) = transformed {
            return Err(RowError::at(e, row_index, tctx.row_context()));
        }

        for out in tctx.take_outputs() {
            if let Err(e) = check_output(&out, &output_schema) {
                return Err(RowError::at(e, row_index, Some(out.row_context())));
            }
            output.send(out).await?;
            *emitted += 1;
        }

        row_index += 1;
        tracker.record(1, None).await;
    }

    Ok(())
}

/// Driver de carga: agrupa registros em lotes e os entrega ao loader
///
/// Com `workers > 1` os lotes são distribuídos em rodízio entre workers que
/// compartilham o loader; a ordem só é garantida até a fronteira da carga.
pub(crate) async fn run_load<L>(
    loader: Arc<L>,
    mut input: QueueReceiver<PooledRecord>,
    tracker: Arc<StageTracker>,
    ctx: Arc<RunContext>,
    batch_size: usize,
    workers: usize,
) -> StageReport
where
    L: Loader + ?Sized + 'static,
{
    tracker.start().await;
    debug!(pipeline_id = %ctx.pipeline_id, workers = workers, "Iniciando carga");

    let batch_size = batch_size.max(1);
    let mut result = if workers <= 1 {
        load_sequential(&*loader, &mut input, &tracker, &ctx, batch_size)
            .await
            .map_err(|e| e.into_failure(StageId::Load))
    } else {
        load_fan_out(&loader, &mut input, &tracker, &ctx, batch_size, workers).await
    };

    if result.is_ok() {
        if let Err(e) = cancellable(&ctx.cancel, loader.finalize()).await {
            result = Err(StageFailure::new(StageId::Load, e));
        }
    }

    conclude(&ctx, &tracker, result, tracker.lines()).await
}

async fn load_sequential<L>(
    loader: &L,
    input: &mut QueueReceiver<PooledRecord>,
    tracker: &StageTracker,
    ctx: &RunContext,
    batch_size: usize,
) -> std::result::Result<(), RowError>
where
    L: Loader + ?Sized,
{
    let mut batch = Vec::with_capacity(batch_size);
    let mut row_index = 0u64;

    while let Some(record) = input.recv().await? {
        batch.push(record);
        if batch.len() >= batch_size {
            let written = write_batch(loader, &mut batch, row_index, tracker, ctx).await?;
            row_index += written;
        }
    }
    if !batch.is_empty() {
        write_batch(loader, &mut batch, row_index, tracker, ctx).await?;
    }

    Ok(())
}

/// Entrega um lote ao loader e devolve os buffers ao pool
async fn write_batch<L>(
    loader: &L,
    batch: &mut Vec<PooledRecord>,
    first_index: u64,
    tracker: &StageTracker,
    ctx: &RunContext,
) -> std::result::Result<u64, RowError>
where
    L: Loader + ?Sized,
{
    let loaded = cancellable(&ctx.cancel, loader.load_batch(batch.as_slice())).await;
    if let Err(e) = loaded {
        let (offset, error) = e.split_batch_offset();
        let offset = offset.filter(|&o| o < batch.len()).unwrap_or(0);
        let context = batch.get(offset).map(PooledRecord::row_context);
        batch.clear();
        return Err(RowError::at(error, first_index + offset as u64, context));
    }

    let written = batch.len() as u64;
    batch.clear();
    tracker.record(written, None).await;
    Ok(written)
}

type Batch = (u64, Vec<PooledRecord>);

async fn load_fan_out<L>(
    loader: &Arc<L>,
    input: &mut QueueReceiver<PooledRecord>,
    tracker: &Arc<StageTracker>,
    ctx: &Arc<RunContext>,
    batch_size: usize,
    workers: usize,
) -> std::result::Result<(), StageFailure>
where
    L: Loader + ?Sized + 'static,
{
    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let (tx, rx) = StageQueue::<Batch>::new(1, ctx.cancel.clone()).split();
        senders.push(tx);
        handles.push(tokio::spawn(load_worker(
            worker,
            Arc::clone(loader),
            rx,
            Arc::clone(tracker),
            Arc::clone(ctx),
        )));
    }

    let mut outcome = dispatch(input, &senders, batch_size)
        .await
        .map_err(|e| e.into_failure(StageId::Load));
    drop(senders);

    for joined in join_all(handles).await {
        let worker_result = match joined {
            Ok(result) => result,
            Err(join_error) => Err(StageFailure::new(
                StageId::Load,
                ETLError::Pipeline(format!("worker de carga abortou: {}", join_error)),
            )),
        };
        if let Err(failure) = worker_result {
            let replace = match &outcome {
                Ok(()) => true,
                Err(current) => current.error.is_cancelled() && !failure.error.is_cancelled(),
            };
            if replace {
                outcome = Err(failure);
            }
        }
    }

    outcome
}

async fn dispatch(
    input: &mut QueueReceiver<PooledRecord>,
    senders: &[QueueSender<Batch>],
    batch_size: usize,
) -> std::result::Result<(), RowError> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut first_index = 0u64;
    let mut next_worker = 0usize;

    while let Some(record) = input.recv().await? {
        batch.push(record);
        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            let len = full.len() as u64;
            senders[next_worker].send((first_index, full)).await?;
            first_index += len;
            next_worker = (next_worker + 1) % senders.len();
        }
    }
    if !batch.is_empty() {
        senders[next_worker].send((first_index, batch)).await?;
    }

    Ok(())
}

async fn load_worker<L>(
    worker: usize,
    loader: Arc<L>,
    mut input: QueueReceiver<Batch>,
    tracker: Arc<StageTracker>,
    ctx: Arc<RunContext>,
) -> std::result::Result<(), StageFailure>
where
    L: Loader + ?Sized,
{
    loop {
        let next = input
            .recv()
            .await
            .map_err(|e| StageFailure::new(StageId::Load, e))?;
        let Some((first_index, mut batch)) = next else {
            break;
        };

        if let Err(e) = write_batch(&*loader, &mut batch, first_index, &tracker, &ctx).await {
            let failure = e.into_failure(StageId::Load);
            if !failure.error.is_cancelled() {
                debug!(worker = worker, "Worker de carga falhou");
                ctx.fail(failure.clone()).await;
            }
            return Err(failure);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::events::InMemoryEventEmitter;
    use crate::error::LoadError;

    fn context() -> (Arc<RunContext>, InMemoryEventEmitter) {
        let memory = InMemoryEventEmitter::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(memory.clone()));
        let ctx = RunContext::new(
            Arc::from("stages"),
            RecordBufferPool::new(&PoolConfig::default()),
            CancellationToken::new(),
            Arc::new(TelemetryAggregator::new()),
            Arc::new(bus),
            10,
        );
        (Arc::new(ctx), memory)
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let (ctx, memory) = context();
        ctx.fail(StageFailure::new(
            StageId::Load,
            LoadError::SinkFault("primeira".to_string()).into(),
        ))
        .await;
        ctx.fail(StageFailure::new(StageId::Extract, ETLError::Pipeline("segunda".to_string())))
            .await;

        assert!(ctx.cancel.is_cancelled());
        assert_eq!(memory.count_of("error"), 1);
        assert_eq!(ctx.failure().unwrap().stage, StageId::Load);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32> = cancellable(&token, async { Ok(1) }).await;
        assert!(matches!(result, Err(ETLError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_stage_does_not_record_failure() {
        let (ctx, memory) = context();
        let tracker = ctx.tracker(StageId::Transform);
        tracker.start().await;
        let report = conclude(
            &ctx,
            &tracker,
            Err(StageFailure::new(StageId::Transform, ETLError::Cancelled)),
            0,
        )
        .await;
        assert_eq!(report.status, StageStatus::Cancelled);
        assert!(ctx.failure().is_none());
        assert_eq!(memory.count_of("error"), 0);
    }
}
