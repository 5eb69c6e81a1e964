//! Telemetria dos estágios e visão agregada (Global) do pipeline

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};
use serde::Serialize;
use crate::events::EventBus;
use crate::types::{PipelineEvent, StageId, StageStatus};

/// Percentual máximo do Global enquanto algum estágio não concluiu
const GLOBAL_PERCENT_CAP: f64 = 99.9;

/// Snapshot de progresso de um estágio
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    pub stage: StageId,
    pub lines_processed: u64,
    pub total_lines: Option<u64>,
    pub bytes_processed: Option<u64>,
    pub total_bytes: Option<u64>,
    pub percent_complete: Option<f64>,
    /// Linhas por segundo
    pub throughput: f64,
    pub estimated_time_remaining: Option<Duration>,
    pub elapsed: Duration,
    pub status: StageStatus,
}

impl StageProgress {
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            lines_processed: 0,
            total_lines: None,
            bytes_processed: None,
            total_bytes: None,
            percent_complete: None,
            throughput: 0.0,
            estimated_time_remaining: None,
            elapsed: Duration::ZERO,
            status: StageStatus::NotStarted,
        }
    }
}

fn rate(lines: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        lines as f64 / secs
    } else {
        0.0
    }
}

fn eta(lines: u64, total: Option<u64>, throughput: f64) -> Option<Duration> {
    let total = total?;
    if throughput <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(lines) as f64;
    Some(Duration::from_secs_f64(remaining / throughput))
}

fn percent(lines: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(0) => None,
        Some(total) => Some((lines as f64 / total as f64 * 100.0).min(100.0)),
        None => None,
    }
}

/// Conjunção dos estados dos três estágios
pub fn combine_status(statuses: &[StageStatus]) -> StageStatus {
    if statuses.iter().any(|s| *s == StageStatus::Failed) {
        StageStatus::Failed
    } else if statuses.iter().any(|s| *s == StageStatus::Cancelled) {
        StageStatus::Cancelled
    } else if statuses.iter().all(|s| *s == StageStatus::Completed) {
        StageStatus::Completed
    } else if statuses.iter().all(|s| *s == StageStatus::NotStarted) {
        StageStatus::NotStarted
    } else {
        StageStatus::Running
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    stages: HashMap<StageId, StageProgress>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

/// Agrega o progresso publicado pelos estágios e deriva o Global
///
/// Atualizado a partir das tasks dos três estágios; leituras devolvem cópias.
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    state: RwLock<AggregatorState>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zera o estado para uma nova execução
    pub fn start(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.stages.clear();
        for stage in [StageId::Extract, StageId::Transform, StageId::Load] {
            state.stages.insert(stage, StageProgress::new(stage));
        }
        state.started_at = Some(Instant::now());
        state.finished_at = None;
    }

    /// Congela o relógio do Global
    pub fn finish(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.finished_at.is_none() {
            state.finished_at = Some(Instant::now());
        }
    }

    /// Substitui o snapshot de um estágio, preservando o estado atual
    pub fn publish(&self, mut progress: StageProgress) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = state.stages.get(&progress.stage) {
            progress.status = current.status;
        }
        state.stages.insert(progress.stage, progress);
    }

    /// Altera o estado de um estágio; devolve o estado anterior
    ///
    /// Estados finais não são sobrescritos.
    pub fn set_status(&self, stage: StageId, status: StageStatus) -> StageStatus {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let entry = state
            .stages
            .entry(stage)
            .or_insert_with(|| StageProgress::new(stage));
        let old = entry.status;
        if !old.is_terminal() {
            entry.status = status;
        }
        old
    }

    pub fn status(&self, stage: StageId) -> StageStatus {
        if stage == StageId::Global {
            return self.global().status;
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .stages
            .get(&stage)
            .map(|p| p.status)
            .unwrap_or_default()
    }

    /// Snapshot de um estágio (Global é derivado)
    pub fn stage(&self, stage: StageId) -> StageProgress {
        if stage == StageId::Global {
            return self.global();
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .stages
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| StageProgress::new(stage))
    }

    /// Deriva o Global a partir dos estados dos estágios
    ///
    /// Linhas, vazão e ETA vêm da carga, medidos contra o total estimado da
    /// extração; com filtro ou duplicação o percentual é aproximado. Bytes vêm
    /// da extração.
    pub fn global(&self) -> StageProgress {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let extract = state
            .stages
            .get(&StageId::Extract)
            .cloned()
            .unwrap_or_else(|| StageProgress::new(StageId::Extract));
        let loaded = state
            .stages
            .get(&StageId::Load)
            .map(|p| p.lines_processed)
            .unwrap_or(0);

        let statuses: Vec<StageStatus> = [StageId::Extract, StageId::Transform, StageId::Load]
            .iter()
            .map(|id| state.stages.get(id).map(|p| p.status).unwrap_or_default())
            .collect();
        let status = combine_status(&statuses);

        let elapsed = match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };

        let lines = loaded;
        let throughput = rate(lines, elapsed);
        let percent_complete = if status == StageStatus::Completed {
            Some(100.0)
        } else {
            percent(lines, extract.total_lines).map(|p| p.min(GLOBAL_PERCENT_CAP))
        };

        StageProgress {
            stage: StageId::Global,
            lines_processed: lines,
            total_lines: extract.total_lines,
            bytes_processed: extract.bytes_processed,
            total_bytes: extract.total_bytes,
            percent_complete,
            throughput,
            estimated_time_remaining: eta(lines, extract.total_lines, throughput),
            elapsed,
            status,
        }
    }

    /// Extract, Transform, Load e Global, nesta ordem
    pub fn snapshot(&self) -> Vec<StageProgress> {
        let mut stages: Vec<StageProgress> = [StageId::Extract, StageId::Transform, StageId::Load]
            .into_iter()
            .map(|id| self.stage(id))
            .collect();
        stages.push(self.global());
        stages
    }
}

/// Contador de linhas de um estágio
///
/// Publica no agregador e emite `Progress` a cada `interval` linhas. Pode ser
/// compartilhado entre os workers de carga.
pub struct StageTracker {
    stage: StageId,
    pipeline_id: Arc<str>,
    lines: AtomicU64,
    bytes: Mutex<Option<u64>>,
    total_lines: Option<u64>,
    total_bytes: Option<u64>,
    interval: u64,
    started: Mutex<Option<Instant>>,
    aggregator: Arc<TelemetryAggregator>,
    events: Arc<EventBus>,
}

impl StageTracker {
    pub fn new(
        stage: StageId,
        pipeline_id: Arc<str>,
        aggregator: Arc<TelemetryAggregator>,
        events: Arc<EventBus>,
        interval: u64,
    ) -> Self {
        Self {
            stage,
            pipeline_id,
            lines: AtomicU64::new(0),
            bytes: Mutex::new(None),
            total_lines: None,
            total_bytes: None,
            interval: interval.max(1),
            started: Mutex::new(None),
            aggregator,
            events,
        }
    }

    /// Totais conhecidos de antemão (estimativa do extrator)
    pub fn with_totals(mut self, total_lines: Option<u64>, total_bytes: Option<u64>) -> Self {
        self.total_lines = total_lines;
        self.total_bytes = total_bytes;
        self
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Acquire)
    }

    /// Marca o estágio como em execução
    pub async fn start(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.transition(StageStatus::Running).await;
        self.aggregator.publish(self.progress());
    }

    /// Contabiliza `rows` linhas; publica ao cruzar um múltiplo do intervalo
    pub async fn record(&self, rows: u64, bytes: Option<u64>) {
        if rows == 0 {
            return;
        }
        if bytes.is_some() {
            *self.bytes.lock().unwrap_or_else(PoisonError::into_inner) = bytes;
        }
        let before = self.lines.fetch_add(rows, Ordering::AcqRel);
        let after = before + rows;
        if before / self.interval != after / self.interval {
            let progress = self.progress();
            self.aggregator.publish(progress.clone());
            self.events
                .emit(PipelineEvent::Progress {
                    pipeline_id: self.pipeline_id.to_string(),
                    progress,
                    timestamp: SystemTime::now(),
                })
                .await;
        }
    }

    /// Publica o snapshot final e o estado terminal do estágio
    pub async fn finish(&self, status: StageStatus) {
        self.aggregator.publish(self.progress());
        let old = self.transition(status).await;
        if status == StageStatus::Completed && !old.is_terminal() {
            let mut progress = self.progress();
            progress.status = status;
            self.events
                .emit(PipelineEvent::StageFinished {
                    pipeline_id: self.pipeline_id.to_string(),
                    progress,
                    timestamp: SystemTime::now(),
                })
                .await;
        }
    }

    async fn transition(&self, status: StageStatus) -> StageStatus {
        let old = self.aggregator.set_status(self.stage, status);
        if old != status && !old.is_terminal() {
            self.events
                .emit(PipelineEvent::StageStateChanged {
                    pipeline_id: self.pipeline_id.to_string(),
                    stage: self.stage,
                    old_status: old,
                    new_status: status,
                    timestamp: SystemTime::now(),
                })
                .await;
        }
        old
    }

    /// Snapshot atual do estágio
    pub fn progress(&self) -> StageProgress {
        let lines = self.lines();
        let elapsed = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|start| start.elapsed())
            .unwrap_or_default();
        let throughput = rate(lines, elapsed);

        StageProgress {
            stage: self.stage,
            lines_processed: lines,
            total_lines: self.total_lines,
            bytes_processed: *self.bytes.lock().unwrap_or_else(PoisonError::into_inner),
            total_bytes: self.total_bytes,
            percent_complete: percent(lines, self.total_lines),
            throughput,
            estimated_time_remaining: eta(lines, self.total_lines, throughput),
            elapsed,
            status: self.aggregator.status(self.stage),
        }
    }
}

impl std::fmt::Debug for StageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTracker")
            .field("stage", &self.stage)
            .field("lines", &self.lines())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventEmitter;

    fn tracker(
        stage: StageId,
        interval: u64,
    ) -> (StageTracker, Arc<TelemetryAggregator>, InMemoryEventEmitter) {
        let aggregator = Arc::new(TelemetryAggregator::new());
        aggregator.start();
        let memory = InMemoryEventEmitter::new();
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(memory.clone()));
        let tracker = StageTracker::new(
            stage,
            Arc::from("test"),
            Arc::clone(&aggregator),
            Arc::new(bus),
            interval,
        );
        (tracker, aggregator, memory)
    }

    #[test]
    fn test_combine_status() {
        use StageStatus::*;
        assert_eq!(combine_status(&[NotStarted, NotStarted, NotStarted]), NotStarted);
        assert_eq!(combine_status(&[Running, NotStarted, NotStarted]), Running);
        assert_eq!(combine_status(&[Completed, Completed, Running]), Running);
        assert_eq!(combine_status(&[Completed, Completed, Completed]), Completed);
        assert_eq!(combine_status(&[Completed, Failed, Cancelled]), Failed);
        assert_eq!(combine_status(&[Cancelled, Running, Running]), Cancelled);
    }

    #[test]
    fn test_eta_needs_throughput_and_total() {
        assert_eq!(eta(10, None, 5.0), None);
        assert_eq!(eta(10, Some(100), 0.0), None);
        assert_eq!(eta(10, Some(100), 10.0), Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(percent(50, Some(100)), Some(50.0));
        assert_eq!(percent(150, Some(100)), Some(100.0));
        assert_eq!(percent(1, None), None);
    }

    #[tokio::test]
    async fn test_tracker_publishes_on_interval() {
        let (tracker, aggregator, memory) = tracker(StageId::Extract, 10);
        tracker.start().await;

        for _ in 0..25 {
            tracker.record(1, None).await;
        }

        let progress_events = memory
            .get_events()
            .iter()
            .filter(|e| e.kind() == "progress")
            .count();
        assert_eq!(progress_events, 2);
        assert_eq!(aggregator.stage(StageId::Extract).lines_processed, 20);
        assert_eq!(tracker.lines(), 25);

        tracker.finish(StageStatus::Completed).await;
        assert_eq!(aggregator.stage(StageId::Extract).lines_processed, 25);
        assert_eq!(aggregator.status(StageId::Extract), StageStatus::Completed);
        assert_eq!(memory.count_of("stage_finished"), 1);
    }

    #[tokio::test]
    async fn test_batch_increment_crossing_interval() {
        let (tracker, _aggregator, memory) = tracker(StageId::Load, 100);
        tracker.start().await;
        tracker.record(250, None).await;
        assert_eq!(memory.count_of("progress"), 1);
        tracker.record(10, None).await;
        assert_eq!(memory.count_of("progress"), 1);
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let (tracker, aggregator, memory) = tracker(StageId::Transform, 10);
        tracker.start().await;
        tracker.finish(StageStatus::Failed).await;
        tracker.finish(StageStatus::Completed).await;
        assert_eq!(aggregator.status(StageId::Transform), StageStatus::Failed);
        assert_eq!(memory.count_of("stage_finished"), 0);
    }

    #[test]
    fn test_global_capped_until_all_complete() {
        let aggregator = TelemetryAggregator::new();
        aggregator.start();
        let mut extract = StageProgress::new(StageId::Extract);
        extract.lines_processed = 100;
        extract.total_lines = Some(100);
        aggregator.publish(extract);
        aggregator.set_status(StageId::Extract, StageStatus::Completed);
        aggregator.set_status(StageId::Transform, StageStatus::Running);

        let mut load = StageProgress::new(StageId::Load);
        load.lines_processed = 100;
        aggregator.publish(load);

        let global = aggregator.global();
        assert_eq!(global.status, StageStatus::Running);
        assert_eq!(global.percent_complete, Some(GLOBAL_PERCENT_CAP));
        assert_eq!(global.lines_processed, 100);

        aggregator.set_status(StageId::Transform, StageStatus::Completed);
        aggregator.set_status(StageId::Load, StageStatus::Completed);
        aggregator.finish();
        let global = aggregator.global();
        assert_eq!(global.status, StageStatus::Completed);
        assert_eq!(global.percent_complete, Some(100.0));
    }

    #[test]
    fn test_global_follows_load_not_extract() {
        let aggregator = TelemetryAggregator::new();
        aggregator.start();
        let mut extract = StageProgress::new(StageId::Extract);
        extract.lines_processed = 1000;
        extract.total_lines = Some(1000);
        aggregator.publish(extract);
        aggregator.set_status(StageId::Extract, StageStatus::Completed);

        let global = aggregator.global();
        assert_eq!(global.lines_processed, 0);
        assert_eq!(global.total_lines, Some(1000));
        assert_eq!(global.percent_complete, Some(0.0));

        let mut load = StageProgress::new(StageId::Load);
        load.lines_processed = 250;
        aggregator.publish(load);

        let global = aggregator.global();
        assert_eq!(global.lines_processed, 250);
        assert_eq!(global.percent_complete, Some(25.0));
    }

    #[test]
    fn test_global_without_estimate_has_no_eta() {
        let aggregator = TelemetryAggregator::new();
        aggregator.start();
        let mut extract = StageProgress::new(StageId::Extract);
        extract.lines_processed = 10;
        aggregator.publish(extract);
        let global = aggregator.global();
        assert_eq!(global.estimated_time_remaining, None);
        assert_eq!(global.percent_complete, None);
    }

    #[test]
    fn test_snapshot_order() {
        let aggregator = TelemetryAggregator::new();
        aggregator.start();
        let stages: Vec<StageId> = aggregator.snapshot().iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec![StageId::Extract, StageId::Transform, StageId::Load, StageId::Global]
        );
    }
}
