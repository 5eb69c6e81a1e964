//! Sistema de eventos para observabilidade do pipeline

use std::sync::{Arc, Mutex, PoisonError};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use crate::error::Result;
use crate::telemetry::StageProgress;
use crate::traits::EventEmitter;
use crate::types::{PipelineEvent, PipelineResult, StageFailure, StageId};

/// Distribui eventos para todos os observadores registrados
///
/// Falhas de um observador são registradas em log e não interrompem a
/// execução nem a entrega aos demais.
#[derive(Clone, Default)]
pub struct EventBus {
    emitters: Vec<Arc<dyn EventEmitter>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um observador
    pub fn subscribe(&mut self, emitter: Arc<dyn EventEmitter>) {
        self.emitters.push(emitter);
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    pub async fn emit(&self, event: PipelineEvent) {
        for emitter in &self.emitters {
            if let Err(e) = emitter.emit(event.clone()).await {
                warn!(event = event.kind(), error = %e, "Observador falhou ao processar evento");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("emitters", &self.emitters.len())
            .finish()
    }
}

/// Implementação simples de EventEmitter que logga eventos
#[derive(Debug, Clone, Default)]
pub struct LoggingEventEmitter;

impl LoggingEventEmitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventEmitter for LoggingEventEmitter {
    async fn emit(&self, event: PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::Started { pipeline_id, timestamp } => {
                info!(
                    pipeline_id = %pipeline_id,
                    timestamp = ?timestamp,
                    "Pipeline iniciado"
                );
            }
            PipelineEvent::StageStateChanged {
                pipeline_id,
                stage,
                old_status,
                new_status,
                ..
            } => {
                debug!(
                    pipeline_id = %pipeline_id,
                    stage = %stage,
                    old_status = %old_status,
                    new_status = %new_status,
                    "Estado do estágio alterado"
                );
            }
            PipelineEvent::Progress { pipeline_id, progress, .. } => {
                debug!(
                    pipeline_id = %pipeline_id,
                    stage = %progress.stage,
                    lines = progress.lines_processed,
                    percent = ?progress.percent_complete,
                    throughput = progress.throughput,
                    "Progresso"
                );
            }
            PipelineEvent::StageFinished { pipeline_id, progress, .. } => {
                info!(
                    pipeline_id = %pipeline_id,
                    stage = %progress.stage,
                    lines = progress.lines_processed,
                    elapsed_ms = progress.elapsed.as_millis() as u64,
                    "Estágio concluído"
                );
            }
            PipelineEvent::Error { pipeline_id, failure, timestamp } => {
                error!(
                    pipeline_id = %pipeline_id,
                    stage = %failure.stage,
                    error = %failure.error,
                    row_index = ?failure.row_index,
                    row = ?failure.row_context,
                    timestamp = ?timestamp,
                    "Erro no pipeline"
                );
            }
            PipelineEvent::Cancelled { pipeline_id, .. } => {
                warn!(pipeline_id = %pipeline_id, "Pipeline cancelado");
            }
            PipelineEvent::Completed { pipeline_id, result, timestamp } => {
                info!(
                    pipeline_id = %pipeline_id,
                    rows_extracted = result.rows_extracted,
                    rows_transformed = result.rows_transformed,
                    rows_loaded = result.rows_loaded,
                    execution_time_ms = result.execution_time_ms,
                    throughput = result.throughput(),
                    timestamp = ?timestamp,
                    "Pipeline concluído"
                );
            }
        }

        Ok(())
    }
}

/// EventEmitter que armazena eventos em memória para testes
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventEmitter {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl InMemoryEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<PipelineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retorna todos os eventos capturados
    pub fn get_events(&self) -> Vec<PipelineEvent> {
        self.guard().clone()
    }

    /// Limpa todos os eventos armazenados
    pub fn clear(&self) {
        self.guard().clear();
    }

    /// Retorna o número de eventos capturados
    pub fn event_count(&self) -> usize {
        self.guard().len()
    }

    /// Número de eventos de um tipo (ver `PipelineEvent::kind`)
    pub fn count_of(&self, kind: &str) -> usize {
        self.guard().iter().filter(|e| e.kind() == kind).count()
    }
}

#[async_trait]
impl EventEmitter for InMemoryEventEmitter {
    async fn emit(&self, event: PipelineEvent) -> Result<()> {
        self.guard().push(event);
        Ok(())
    }
}

type ProgressCallback = Box<dyn Fn(&StageProgress) + Send + Sync>;

/// Observador baseado em closures, um gancho por tipo de notificação
///
/// `on_read`, `on_transform` e `on_write` recebem o progresso periódico da
/// extração, transformação e carga, respectivamente.
#[derive(Default)]
pub struct CallbackEmitter {
    on_read: Option<ProgressCallback>,
    on_transform: Option<ProgressCallback>,
    on_write: Option<ProgressCallback>,
    on_finish: Option<ProgressCallback>,
    on_error: Option<Box<dyn Fn(&StageFailure) + Send + Sync>>,
    on_complete: Option<Box<dyn Fn(&PipelineResult) + Send + Sync>>,
    on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

impl CallbackEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read(mut self, f: impl Fn(&StageProgress) + Send + Sync + 'static) -> Self {
        self.on_read = Some(Box::new(f));
        self
    }

    pub fn on_transform(mut self, f: impl Fn(&StageProgress) + Send + Sync + 'static) -> Self {
        self.on_transform = Some(Box::new(f));
        self
    }

    pub fn on_write(mut self, f: impl Fn(&StageProgress) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Box::new(f));
        self
    }

    pub fn on_finish(mut self, f: impl Fn(&StageProgress) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&StageFailure) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&PipelineResult) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for CallbackEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEmitter")
            .field("on_read", &self.on_read.is_some())
            .field("on_transform", &self.on_transform.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

#[async_trait]
impl EventEmitter for CallbackEmitter {
    async fn emit(&self, event: PipelineEvent) -> Result<()> {
        match &event {
            PipelineEvent::Progress { progress, .. } => {
                let callback = match progress.stage {
                    StageId::Extract => self.on_read.as_ref(),
                    StageId::Transform => self.on_transform.as_ref(),
                    StageId::Load => self.on_write.as_ref(),
                    StageId::Global => None,
                };
                if let Some(callback) = callback {
                    callback(progress);
                }
            }
            PipelineEvent::StageFinished { progress, .. } => {
                if let Some(callback) = &self.on_finish {
                    callback(progress);
                }
            }
            PipelineEvent::Error { failure, .. } => {
                if let Some(callback) = &self.on_error {
                    callback(failure);
                }
            }
            PipelineEvent::Completed { result, .. } => {
                if let Some(callback) = &self.on_complete {
                    callback(result);
                }
            }
            PipelineEvent::Cancelled { .. } => {
                if let Some(callback) = &self.on_cancel {
                    callback();
                }
            }
            PipelineEvent::Started { .. } | PipelineEvent::StageStateChanged { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ETLError, LoadError};
    use crate::types::StageStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    struct FailingEmitter;

    #[async_trait]
    impl EventEmitter for FailingEmitter {
        async fn emit(&self, _event: PipelineEvent) -> Result<()> {
            Err(ETLError::Pipeline("observador quebrado".to_string()))
        }
    }

    fn started() -> PipelineEvent {
        PipelineEvent::Started {
            pipeline_id: "test-pipeline".to_string(),
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_logging_event_emitter() {
        let emitter = LoggingEventEmitter::new();

        // Deve loggar sem erro
        assert!(emitter.emit(started()).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_event_emitter() {
        let emitter = InMemoryEventEmitter::new();

        assert_eq!(emitter.event_count(), 0);

        let event2 = PipelineEvent::StageStateChanged {
            pipeline_id: "test-pipeline".to_string(),
            stage: StageId::Extract,
            old_status: StageStatus::NotStarted,
            new_status: StageStatus::Running,
            timestamp: SystemTime::now(),
        };

        emitter.emit(started()).await.unwrap();
        emitter.emit(event2).await.unwrap();

        assert_eq!(emitter.event_count(), 2);
        assert_eq!(emitter.count_of("started"), 1);
        assert_eq!(emitter.get_events().len(), 2);

        emitter.clear();
        assert_eq!(emitter.event_count(), 0);
    }

    #[tokio::test]
    async fn test_bus_isolates_failing_observer() {
        let memory = InMemoryEventEmitter::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(FailingEmitter));
        bus.subscribe(Arc::new(memory.clone()));
        assert_eq!(bus.len(), 2);

        bus.emit(started()).await;
        assert_eq!(memory.event_count(), 1);
    }

    #[tokio::test]
    async fn test_callbacks_route_by_stage() {
        let reads = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let emitter = {
            let reads = Arc::clone(&reads);
            let writes = Arc::clone(&writes);
            let errors = Arc::clone(&errors);
            CallbackEmitter::new()
                .on_read(move |_| {
                    reads.fetch_add(1, Ordering::SeqCst);
                })
                .on_write(move |_| {
                    writes.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |failure| {
                    assert_eq!(failure.stage, StageId::Load);
                    errors.fetch_add(1, Ordering::SeqCst);
                })
        };

        for stage in [StageId::Extract, StageId::Extract, StageId::Transform, StageId::Load] {
            emitter
                .emit(PipelineEvent::Progress {
                    pipeline_id: "p".to_string(),
                    progress: StageProgress::new(stage),
                    timestamp: SystemTime::now(),
                })
                .await
                .unwrap();
        }
        emitter
            .emit(PipelineEvent::Error {
                pipeline_id: "p".to_string(),
                failure: StageFailure::new(
                    StageId::Load,
                    LoadError::SinkFault("disco cheio".to_string()).into(),
                ),
                timestamp: SystemTime::now(),
            })
            .await
            .unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
