use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Trait for processing messages concurrently
///
/// OOP interface pattern - implement this for any message type
#[async_trait::async_trait]
pub trait MessageProcessor: Send + Sync {
    type Message: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Process a single message
    async fn process(&self, message: Self::Message) -> Result<(), Self::Error>;

    /// Called when processor starts
    async fn on_start(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called when processor stops
    async fn on_stop(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Worker pool sizing (spec §4.11: "a configurable `minThreads` and
/// `maxThreads`; threads above `minThreads` terminate after an idle
/// timeout").
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min_threads: 1, max_threads: 1, idle_timeout: Duration::from_secs(30) }
    }
}

/// Concurrent message processor using an elastic worker pool.
///
/// Pattern: N worker tasks pull from a shared channel (work-stealing).
/// `min_threads` workers block forever waiting for work; workers spawned
/// above that floor (up to `max_threads`, one at a time, only when no
/// worker is currently idle) exit once `idle_timeout` passes with nothing
/// to do, shrinking the pool back toward the floor.
pub struct ConcurrentProcessor<P: MessageProcessor> {
    tx: mpsc::UnboundedSender<P::Message>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<P::Message>>>,
    processor: Arc<P>,
    active: Arc<AtomicUsize>,
    idle: Arc<AtomicUsize>,
    config: PoolConfig,
}

impl<P: MessageProcessor + 'static> ConcurrentProcessor<P> {
    /// Create a processor with `config.min_threads` permanent workers.
    pub fn new(processor: P, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let processor = Arc::new(processor);
        let active = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(AtomicUsize::new(0));

        let this = Self { tx, rx, processor, active, idle, config };
        for _ in 0..this.config.min_threads.max(1) {
            this.spawn_worker(None);
        }
        this
    }

    /// Submit message for processing (non-blocking). Grows the pool by one
    /// elastic worker if every existing worker looks busy and there's
    /// still room under `max_threads`.
    pub fn submit(&self, message: P::Message) {
        let _ = self.tx.send(message);
        if self.idle.load(Ordering::SeqCst) == 0 && self.active.load(Ordering::SeqCst) < self.config.max_threads {
            self.spawn_worker(Some(self.config.idle_timeout));
        }
    }

    /// `idle_timeout: None` means the worker never shrinks (a `min_threads`
    /// worker); `Some(d)` means it exits after `d` with nothing to do.
    fn spawn_worker(&self, idle_timeout: Option<Duration>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let rx = self.rx.clone();
        let processor = self.processor.clone();
        let active = self.active.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            if let Err(e) = processor.on_start().await {
                tracing::warn!(error = %e, "worker on_start failed");
                active.fetch_sub(1, Ordering::SeqCst);
                return;
            }

            loop {
                idle.fetch_add(1, Ordering::SeqCst);
                let received = {
                    let mut guard = rx.lock().await;
                    match idle_timeout {
                        Some(d) => tokio::time::timeout(d, guard.recv()).await.ok(),
                        None => Some(guard.recv().await),
                    }
                };
                idle.fetch_sub(1, Ordering::SeqCst);

                match received {
                    Some(Some(msg)) => {
                        if let Err(e) = processor.process(msg).await {
                            tracing::warn!(error = %e, "message processing failed");
                        }
                    }
                    Some(None) => break, // channel closed
                    None => break,       // idle timeout elapsed: shrink
                }
            }

            let _ = processor.on_stop().await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Number of workers currently alive (for tests/metrics).
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestProcessor {
        counter: Arc<AtomicUsize>,
    }

    #[derive(thiserror::Error, Debug)]
    enum TestError {
        #[error("test error")]
        #[allow(dead_code)]
        Test,
    }

    #[async_trait::async_trait]
    impl MessageProcessor for TestProcessor {
        type Message = u32;
        type Error = TestError;

        async fn process(&self, _message: Self::Message) -> Result<(), Self::Error> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_processor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let processor = TestProcessor { counter: counter.clone() };
        let config = PoolConfig { min_threads: 4, max_threads: 4, idle_timeout: Duration::from_millis(50) };
        let concurrent = ConcurrentProcessor::new(processor, config);

        // Submit 100 messages
        for i in 0..100 {
            concurrent.submit(i);
        }

        // Wait for processing
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        // All messages should be processed
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn pool_grows_above_min_then_shrinks_back_after_idle_timeout() {
        let counter = Arc::new(AtomicUsize::new(0));
        let processor = TestProcessor { counter: counter.clone() };
        let config = PoolConfig { min_threads: 1, max_threads: 3, idle_timeout: Duration::from_millis(30) };
        let concurrent = ConcurrentProcessor::new(processor, config);
        assert_eq!(concurrent.active_workers(), 1);

        for i in 0..10 {
            concurrent.submit(i);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(concurrent.active_workers() >= 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(concurrent.active_workers(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
