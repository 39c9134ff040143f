use super::PumpService;
use crate::error::{Error, Result};
use crate::map::divert_hot;
use crate::model::{Attribute, Owner, OwnerId};
use crate::pool::StringId;
use crate::store::InMemoryStore;
use std::collections::HashMap;
use tracing::{debug, info};

/// Pump of the in-heap store
///
/// Values are buffered per key and written with batched volume puts, so
/// each block is locked once per flush rather than once per value.
pub struct BufferedPump {
    store: InMemoryStore,
    buffer: HashMap<StringId, Vec<(OwnerId, Attribute)>>,
    buffered_owners: usize,
    flush_threshold: usize,
    pumped_owners: u64,
    finished: bool,
}

impl BufferedPump {
    pub(crate) fn start(store: InMemoryStore) -> Result<Self> {
        store.inner().lifecycle.begin_pump()?;
        let flush_threshold = store.config().block_size();
        info!(store = %store.id(), flush_threshold, "Started data pump");
        Ok(Self {
            store,
            buffer: HashMap::new(),
            buffered_owners: 0,
            flush_threshold,
            pumped_owners: 0,
            finished: false,
        })
    }

    fn flush(&mut self) -> Result<()> {
        let core = self.store.inner();
        let mut values = 0;
        for (key, mut batch) in self.buffer.drain() {
            values += batch.len();
            core.attributes.set_batch(key, &mut batch)?;
        }
        if values > 0 {
            metrics::counter!("attrstore_pump_batches_total").increment(1);
            debug!(owners = self.buffered_owners, values, "Flushed pump buffer");
        }
        self.buffered_owners = 0;
        Ok(())
    }
}

impl PumpService for BufferedPump {
    fn pump_attributes(&mut self, owner: &Owner, attributes: Vec<Attribute>) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let core = self.store.inner();
        let columnar = divert_hot(owner, attributes, core.hot_codec())?;
        for attribute in columnar {
            let attribute = core.adopt(attribute)?;
            let key = attribute.key_id().ok_or_else(|| {
                Error::Pump(format!("attribute '{}' has no key id", attribute.key()))
            })?;
            self.buffer
                .entry(key)
                .or_default()
                .push((owner.id(), attribute));
        }

        self.pumped_owners += 1;
        self.buffered_owners += 1;
        if self.buffered_owners >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn finish_pump(mut self) -> Result<()> {
        self.flush()?;
        self.store.inner().commit()?;
        self.store.inner().lifecycle.finish_pump()?;
        self.finished = true;
        info!(store = %self.store.id(), owners = self.pumped_owners, "Finished data pump");
        Ok(())
    }
}

impl Drop for BufferedPump {
    fn drop(&mut self) {
        if !self.finished {
            self.store.inner().lifecycle.fail_pump();
        }
    }
}
