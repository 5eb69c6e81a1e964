//! Filas entre estágios
//!
//! Cada fila transporta registros por valor: enviar transfere a posse do
//! buffer ao estágio seguinte. `send` aguarda espaço quando a fila está cheia
//! (back-pressure) e `recv` aguarda o próximo item; ambos desistem assim que
//! o token de cancelamento da execução dispara. Itens ainda na fila são
//! descartados junto com ela, devolvendo seus buffers ao pool.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::error::{ETLError, Result};

enum SenderInner<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

enum ReceiverInner<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

/// Par produtor/consumidor entre dois estágios
pub struct StageQueue<T> {
    pub sender: QueueSender<T>,
    pub receiver: QueueReceiver<T>,
}

impl<T> StageQueue<T> {
    /// `capacity == 0` cria uma fila sem limite
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (SenderInner::Unbounded(tx), ReceiverInner::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (SenderInner::Bounded(tx), ReceiverInner::Bounded(rx))
        };

        Self {
            sender: QueueSender {
                inner: sender,
                cancel: cancel.clone(),
            },
            receiver: QueueReceiver {
                inner: receiver,
                cancel,
            },
        }
    }

    pub fn split(self) -> (QueueSender<T>, QueueReceiver<T>) {
        (self.sender, self.receiver)
    }
}

/// Lado produtor; descartá-lo sinaliza fim de dados ao consumidor
pub struct QueueSender<T> {
    inner: SenderInner<T>,
    cancel: CancellationToken,
}

impl<T> QueueSender<T> {
    /// Envia um item, aguardando espaço se a fila estiver cheia
    ///
    /// Falha com `Cancelled` se a execução for cancelada durante a espera ou
    /// se o consumidor já tiver encerrado; o item é descartado nesses casos.
    pub async fn send(&self, item: T) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ETLError::Cancelled);
        }
        match &self.inner {
            SenderInner::Bounded(tx) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(ETLError::Cancelled),
                    sent = tx.send(item) => sent.map_err(|_| ETLError::Cancelled),
                }
            }
            SenderInner::Unbounded(tx) => tx.send(item).map_err(|_| ETLError::Cancelled),
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self.inner, SenderInner::Bounded(_))
    }
}

/// Lado consumidor
pub struct QueueReceiver<T> {
    inner: ReceiverInner<T>,
    cancel: CancellationToken,
}

impl<T> QueueReceiver<T> {
    /// Próximo item; `Ok(None)` quando todos os produtores encerraram
    pub async fn recv(&mut self) -> Result<Option<T>> {
        let cancel = &self.cancel;
        let inner = &mut self.inner;
        let next = async move {
            match inner {
                ReceiverInner::Bounded(rx) => rx.recv().await,
                ReceiverInner::Unbounded(rx) => rx.recv().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ETLError::Cancelled),
            item = next => Ok(item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_and_end_of_stream() {
        let (tx, mut rx) = StageQueue::new(4, CancellationToken::new()).split();
        for i in 0..3 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let mut received = Vec::new();
        while let Some(item) = rx.recv().await.unwrap() {
            received.push(item);
        }
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unbounded_when_capacity_zero() {
        let (tx, mut rx) = StageQueue::new(0, CancellationToken::new()).split();
        assert!(!tx.is_bounded());
        for i in 0..10_000 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(rx.recv().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_sender() {
        let (tx, mut rx) = StageQueue::new(1, CancellationToken::new()).split();
        tx.send(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await.unwrap(), Some(1));
        tx.send(3).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_sender_and_receiver() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = StageQueue::new(1, cancel.clone()).split();
        tx.send(1).await.unwrap();

        let sender = tokio::spawn(async move { tx.send(2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(matches!(sender.await.unwrap(), Err(ETLError::Cancelled)));
        assert!(matches!(rx.recv().await, Err(ETLError::Cancelled)));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = StageQueue::new(2, CancellationToken::new()).split();
        drop(rx);
        assert!(matches!(tx.send(1).await, Err(ETLError::Cancelled)));
    }
}
