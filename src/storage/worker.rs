use super::attribute_store::AttributeStore;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread compressing a store's volumes on a fixed period
///
/// Holds only a weak reference: once the store is gone the thread exits on
/// its next tick. Dropping the worker stops and joins it.
pub struct CompressionWorker {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl CompressionWorker {
    /// Start the worker; the first pass runs immediately
    pub fn spawn(target: Weak<AttributeStore>, period: Duration) -> Result<Self> {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("attrstore-compression".to_string())
            .spawn(move || run(target, period, thread_signal))
            .map_err(|e| Error::Compression(format!("Failed to spawn compression worker: {}", e)))?;

        info!(period_secs = period.as_secs(), "Started compression worker");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for an in-flight pass to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Compression worker panicked");
            }
            debug!("Stopped compression worker");
        }
    }
}

impl Drop for CompressionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(target: Weak<AttributeStore>, period: Duration, signal: Arc<Signal>) {
    loop {
        match target.upgrade() {
            Some(store) => {
                if let Err(e) = store.compress_all() {
                    warn!(error = %e, "Compression pass failed");
                }
            }
            None => {
                debug!("Store dropped, compression worker exiting");
                return;
            }
        }

        let mut stopped = signal.stopped.lock();
        if !*stopped {
            signal.wake.wait_for(&mut stopped, period);
        }
        if *stopped {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{adopt, Attribute, StoreId};
    use crate::pool::StringPool;
    use crate::storage::{ColumnLayout, Compression};

    #[test]
    fn test_worker_compresses_and_stops() -> Result<()> {
        let keys = Arc::new(StringPool::keys(None));
        let store_id = StoreId::new();
        let store = Arc::new(AttributeStore::new(
            store_id,
            keys.clone(),
            Arc::new(StringPool::new()),
            ColumnLayout {
                block_shift: 8,
                initial_blocks: 2,
                compression: Compression::default(),
            },
        ));
        let attribute = adopt(Attribute::discrete("n", 1), store_id, &keys, |_| Ok(0))?;
        store.set(3, &attribute)?;

        let worker = CompressionWorker::spawn(Arc::downgrade(&store), Duration::from_secs(3600))?;
        let mut compressed = 0;
        for _ in 0..200 {
            compressed = store.stats().volumes.compressed_blocks;
            if compressed == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(compressed, 2);
        worker.stop();
        Ok(())
    }

    #[test]
    fn test_worker_exits_when_store_dropped() -> Result<()> {
        let store = Arc::new(AttributeStore::new(
            StoreId::new(),
            Arc::new(StringPool::keys(None)),
            Arc::new(StringPool::new()),
            ColumnLayout {
                block_shift: 4,
                initial_blocks: 0,
                compression: Compression::default(),
            },
        ));
        let worker = CompressionWorker::spawn(Arc::downgrade(&store), Duration::from_millis(5))?;
        drop(store);
        thread::sleep(Duration::from_millis(50));
        drop(worker);
        Ok(())
    }
}
