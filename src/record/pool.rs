//! Pool de buffers reutilizáveis para registros
//!
//! Buffers são agrupados em classes de tamanho (potências de dois a partir de
//! 64 bytes). Cada classe mantém uma fila lock-free de buffers livres, o que
//! torna `rent`/`release` seguros quando chamados ao mesmo tempo pelos três
//! estágios do pipeline.
//!
//! Um `PooledBuffer` devolve a si mesmo ao pool no `Drop`. Como o handle é
//! movido (nunca copiado), um buffer não pode ser liberado duas vezes nem
//! usado depois de liberado.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use crossbeam::queue::ArrayQueue;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};

/// Menor classe de tamanho, em bytes
pub const MIN_CLASS_SIZE: usize = 64;

/// Métricas de uso do pool
#[derive(Debug, Default)]
pub struct BufferPoolMetrics {
    /// Buffers reaproveitados
    pub hits: AtomicU64,
    /// Buffers alocados porque a classe estava vazia
    pub misses: AtomicU64,
    /// Buffers devolvidos à classe
    pub returns: AtomicU64,
    /// Buffers descartados porque a classe estava cheia
    pub drops: AtomicU64,
    /// Buffers alugados e ainda não devolvidos
    pub outstanding: AtomicUsize,
}

impl BufferPoolMetrics {
    /// Snapshot pontual das métricas
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Acquire),
        }
    }
}

/// Snapshot das métricas do pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
    pub outstanding: usize,
}

impl PoolMetricsSnapshot {
    /// Taxa de reaproveitamento (0.0 a 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct PoolInner {
    classes: Vec<ArrayQueue<Vec<u8>>>,
    class_sizes: Vec<usize>,
    max_buffer_size: usize,
    metrics: BufferPoolMetrics,
}

impl PoolInner {
    fn class_for(&self, size: usize) -> Option<usize> {
        self.class_sizes.iter().position(|&class_size| class_size >= size)
    }

    fn give_back(&self, class: usize, buffer: Vec<u8>) {
        debug_assert!(
            buffer.capacity() >= self.class_sizes[class],
            "buffer devolvido com capacidade menor que a classe"
        );
        self.metrics.outstanding.fetch_sub(1, Ordering::AcqRel);
        match self.classes[class].push(buffer) {
            Ok(()) => {
                self.metrics.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Pool de buffers de registros, compartilhável entre tasks (clone barato)
#[derive(Clone)]
pub struct RecordBufferPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for RecordBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBufferPool")
            .field("class_sizes", &self.inner.class_sizes)
            .field("max_buffer_size", &self.inner.max_buffer_size)
            .field("metrics", &self.inner.metrics.snapshot())
            .finish()
    }
}

impl Default for RecordBufferPool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl RecordBufferPool {
    /// Cria o pool com classes de `MIN_CLASS_SIZE` até `max_buffer_size`
    /// (arredondado para a próxima potência de dois)
    pub fn new(config: &PoolConfig) -> Self {
        let max_buffer_size = config.max_buffer_size.max(MIN_CLASS_SIZE).next_power_of_two();
        let per_class = config.buffers_per_class.max(1);

        let mut class_sizes = Vec::new();
        let mut size = MIN_CLASS_SIZE;
        while size <= max_buffer_size {
            class_sizes.push(size);
            size *= 2;
        }
        let classes = class_sizes.iter().map(|_| ArrayQueue::new(per_class)).collect();

        Self {
            inner: Arc::new(PoolInner {
                classes,
                class_sizes,
                max_buffer_size,
                metrics: BufferPoolMetrics::default(),
            }),
        }
    }

    /// Aluga um buffer com pelo menos `min_size` bytes, zerado
    ///
    /// Usa a menor classe que comporta o tamanho; aloca um buffer novo se a
    /// classe estiver vazia.
    pub fn rent(&self, min_size: usize) -> Result<PooledBuffer> {
        let class = self.inner.class_for(min_size).ok_or(PoolError::BufferTooLarge {
            requested: min_size,
            max: self.inner.max_buffer_size,
        })?;

        let mut data = match self.inner.classes[class].pop() {
            Some(buffer) => {
                self.inner.metrics.hits.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.inner.class_sizes[class])
            }
        };
        data.clear();
        data.resize(min_size, 0);
        self.inner.metrics.outstanding.fetch_add(1, Ordering::AcqRel);

        Ok(PooledBuffer {
            data,
            class,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Devolve um buffer ao pool (equivalente a descartá-lo)
    pub fn release(&self, buffer: PooledBuffer) {
        debug_assert!(
            Arc::ptr_eq(&buffer.pool, &self.inner),
            "buffer devolvido a um pool diferente do de origem"
        );
        drop(buffer);
    }

    /// Pré-aloca `count` buffers na classe que comporta `size`
    pub fn prewarm(&self, size: usize, count: usize) -> Result<usize> {
        let class = self.inner.class_for(size).ok_or(PoolError::BufferTooLarge {
            requested: size,
            max: self.inner.max_buffer_size,
        })?;
        let capacity = self.inner.class_sizes[class];
        let mut added = 0;
        for _ in 0..count {
            if self.inner.classes[class].push(Vec::with_capacity(capacity)).is_err() {
                break;
            }
            added += 1;
        }
        Ok(added)
    }

    /// Tamanho da classe usada para `size`, se houver
    pub fn class_size_for(&self, size: usize) -> Option<usize> {
        self.inner.class_for(size).map(|class| self.inner.class_sizes[class])
    }

    /// Maior buffer que o pool aceita alugar
    pub fn max_buffer_size(&self) -> usize {
        self.inner.max_buffer_size
    }

    /// Buffers livres em todas as classes
    pub fn available(&self) -> usize {
        self.inner.classes.iter().map(|queue| queue.len()).sum()
    }

    /// Buffers alugados e ainda não devolvidos
    pub fn outstanding(&self) -> usize {
        self.inner.metrics.outstanding.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &BufferPoolMetrics {
        &self.inner.metrics
    }
}

/// Buffer alugado do pool, com posse exclusiva
///
/// Devolvido automaticamente ao pool quando descartado.
pub struct PooledBuffer {
    data: Vec<u8>,
    class: usize,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Classe de tamanho de origem
    pub fn size_class(&self) -> usize {
        self.pool.class_sizes[self.class]
    }

    /// Aluga outro buffer do mesmo pool com o mesmo conteúdo
    pub fn try_clone(&self) -> Result<PooledBuffer> {
        let pool = RecordBufferPool {
            inner: Arc::clone(&self.pool),
        };
        let mut copy = pool.rent(self.data.len())?;
        copy.copy_from_slice(&self.data);
        Ok(copy)
    }

    /// Pool de origem
    pub fn pool(&self) -> RecordBufferPool {
        RecordBufferPool {
            inner: Arc::clone(&self.pool),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("size_class", &self.size_class())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(self.class, data);
    }
}
