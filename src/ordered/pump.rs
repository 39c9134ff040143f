use super::{OrderedBackend, OrderedCore, Records};
use crate::codec::CompositeKey;
use crate::error::{Error, Result};
use crate::id::Direction;
use crate::map::divert_hot;
use crate::model::{Attribute, Owner, OwnerId};
use crate::pump::PumpService;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owner batches in flight between the caller and the build thread
const QUEUE_DEPTH: usize = 1024;

enum Message {
    Batch {
        owner: OwnerId,
        records: Records,
        nested: bool,
    },
    EndOfData,
}

/// Outcome of the build thread, handed to `finish_pump`
struct Completion {
    outcome: Mutex<Option<Result<u64>>>,
    done: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<u64>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            if self.done.wait_until(&mut outcome, deadline).timed_out() && outcome.is_none() {
                return Err(Error::Pump(format!(
                    "Bulk build did not finish within {}s",
                    timeout.as_secs()
                )));
            }
        }
    }
}

/// Reports a panic of the build thread as a failure
struct PanicGuard(Arc<Completion>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0
                .complete(Err(Error::Pump("Bulk build thread panicked".to_string())));
        }
    }
}

/// Records for the backend, batch by batch as they arrive
///
/// Owner batches are sorted by key id in the pump direction and streamed;
/// meta-attribute batches are set aside for a second build.
struct Feed {
    receiver: mpsc::Receiver<Message>,
    direction: Direction,
    interval: u64,
    current: std::vec::IntoIter<(u64, Bytes)>,
    nested: BTreeMap<u64, Bytes>,
    batches: u64,
    ended: bool,
}

impl Feed {
    fn keyed(&self, owner: OwnerId, mut records: Records) -> Result<Vec<(u64, Bytes)>> {
        match self.direction {
            Direction::Increasing => records.sort_unstable_by_key(|(key, _)| *key),
            Direction::Decreasing => records.sort_unstable_by(|a, b| b.0.cmp(&a.0)),
        }
        records
            .into_iter()
            .map(|(key, bytes)| Ok((CompositeKey::new(owner, key, self.interval)?.raw(), bytes)))
            .collect()
    }
}

impl Iterator for Feed {
    type Item = Result<(u64, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            if self.ended {
                return None;
            }
            match self.receiver.blocking_recv() {
                Some(Message::Batch {
                    owner,
                    records,
                    nested,
                }) => {
                    let keyed = match self.keyed(owner, records) {
                        Ok(keyed) => keyed,
                        Err(e) => return Some(Err(e)),
                    };
                    self.batches += 1;
                    if nested {
                        self.nested.extend(keyed);
                    } else {
                        self.current = keyed.into_iter();
                    }
                }
                Some(Message::EndOfData) => {
                    self.ended = true;
                    return None;
                }
                None => return None,
            }
        }
    }
}

fn build<B: OrderedBackend>(core: &OrderedCore<B>, mut feed: Feed) -> Result<u64> {
    let mut written = core.backend.bulk_build(&mut feed)?;
    if !feed.ended {
        return Err(Error::Pump(
            "Data pump was dropped before end of data".to_string(),
        ));
    }
    let nested = std::mem::take(&mut feed.nested);
    if !nested.is_empty() {
        written += core.backend.bulk_build(&mut nested.into_iter().map(Ok))?;
    }
    core.backend.flush()?;
    metrics::counter!("attrstore_pump_batches_total").increment(feed.batches);
    Ok(written)
}

/// Pump of the ordered store
///
/// The calling thread diverts hot keys, encodes values and checks that
/// owner ids arrive in the id factory's direction. A named build thread
/// sorts each owner's records by key id and streams them into
/// [`OrderedBackend::bulk_build`]; meta-attributes follow in a second build.
pub struct OrderedPump<B: OrderedBackend> {
    core: Arc<OrderedCore<B>>,
    direction: Direction,
    sender: Option<mpsc::Sender<Message>>,
    completion: Arc<Completion>,
    handle: Option<JoinHandle<()>>,
    last_owner: Option<OwnerId>,
    pumped_owners: u64,
    finished: bool,
}

impl<B: OrderedBackend> OrderedPump<B> {
    pub(crate) fn start(core: Arc<OrderedCore<B>>, direction: Direction) -> Result<Self> {
        core.lifecycle.begin_pump()?;
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let completion = Arc::new(Completion::new());
        let feed = Feed {
            receiver,
            direction,
            interval: core.interval(),
            current: Vec::new().into_iter(),
            nested: BTreeMap::new(),
            batches: 0,
            ended: false,
        };

        let thread_core = core.clone();
        let thread_completion = completion.clone();
        let spawned = thread::Builder::new()
            .name("attrstore-pump".to_string())
            .spawn(move || {
                let guard = PanicGuard(thread_completion);
                let outcome = build(&thread_core, feed);
                guard.0.complete(outcome);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                core.lifecycle.fail_pump();
                return Err(Error::Pump(format!("Failed to spawn pump thread: {}", e)));
            }
        };

        info!(store = %core.id, ?direction, "Started ordered data pump");
        Ok(Self {
            core,
            direction,
            sender: Some(sender),
            completion,
            handle: Some(handle),
            last_owner: None,
            pumped_owners: 0,
            finished: false,
        })
    }

    fn check_order(&self, owner: OwnerId) -> Result<()> {
        let Some(last) = self.last_owner else {
            return Ok(());
        };
        let in_order = match self.direction {
            Direction::Increasing => owner > last,
            Direction::Decreasing => owner < last,
        };
        if !in_order {
            return Err(Error::Pump(format!(
                "owner {} pumped out of order after {} ({:?} ids expected)",
                owner, last, self.direction
            )));
        }
        Ok(())
    }

    fn send(&self, message: Message) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Pump("Data pump is closed".to_string()))?;
        sender.blocking_send(message).map_err(|_| {
            Error::Pump("Bulk build stopped; finish_pump reports the cause".to_string())
        })
    }
}

impl<B: OrderedBackend> PumpService for OrderedPump<B> {
    fn pump_attributes(&mut self, owner: &Owner, attributes: Vec<Attribute>) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        self.check_order(owner.id())?;
        let core = self.core.clone();
        let columnar = divert_hot(owner, attributes, core.hot_codec())?;

        let event = owner.kind().is_event();
        let mut pending = Vec::new();
        let mut records = HashMap::with_capacity(columnar.len());
        for attribute in columnar {
            let (key, bytes) = core.encode(attribute, event, &mut |nested, children| {
                pending.push(Message::Batch {
                    owner: nested,
                    records: children,
                    nested: true,
                });
                Ok(())
            })?;
            records.insert(key, bytes);
        }

        self.last_owner = Some(owner.id());
        if !records.is_empty() {
            self.send(Message::Batch {
                owner: owner.id(),
                records: records.into_iter().collect(),
                nested: false,
            })?;
        }
        for message in pending {
            self.send(message)?;
        }
        self.pumped_owners += 1;
        Ok(())
    }

    fn finish_pump(mut self) -> Result<()> {
        if self.send(Message::EndOfData).is_err() {
            debug!("Build thread stopped before end of data");
        }
        self.sender = None;

        let written = self.completion.wait(self.core.config.pump_timeout())?;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(Error::Pump("Bulk build thread panicked".to_string()));
            }
        }
        self.core.lifecycle.finish_pump()?;
        self.finished = true;
        info!(
            store = %self.core.id,
            owners = self.pumped_owners,
            records = written,
            "Finished ordered data pump"
        );
        Ok(())
    }
}

impl<B: OrderedBackend> Drop for OrderedPump<B> {
    fn drop(&mut self) {
        // Disconnect so the build thread stops waiting for batches
        self.sender = None;
        if !self.finished {
            warn!(store = %self.core.id, "Ordered data pump dropped without finishing");
            self.core.lifecycle.fail_pump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::id::{DecreasingIdFactory, SequentialIdFactory};
    use crate::map::AttributeMap;
    use crate::model::{AttributeValue, OwnerKind};
    use crate::ordered::{BTreeBackend, OrderedStore};
    use crate::store::PumpState;

    #[test]
    fn test_pump_then_read() -> Result<()> {
        let store = OrderedStore::new(BTreeBackend::new())?;
        let events: Vec<Owner> = (0..50).map(|_| store.new_owner(OwnerKind::Event)).collect();
        let mut pump = store.start_pump()?;
        assert!(store.is_pumping());
        for (i, event) in events.iter().enumerate() {
            pump.pump_attributes(
                event,
                vec![
                    Attribute::literal("concept:name", "A"),
                    Attribute::discrete("cost", i as i64),
                    Attribute::literal("org:group", "G").with_meta(vec![Attribute::boolean("lead", i == 0)]),
                ],
            )?;
        }
        pump.finish_pump()?;

        assert_eq!(store.state(), PumpState::Pumped);
        // cost + org:group per event, plus one meta record each
        assert_eq!(store.backend().len(), 150);
        let map = store.attributes(&events[7])?;
        assert_eq!(map.len()?, 3);
        assert_eq!(map.get("cost")?, Some(Attribute::discrete("cost", 7)));
        let group = map.get("org:group")?.ok_or_else(|| Error::Usage("missing".into()))?;
        let meta = store.meta_owner(&group).ok_or_else(|| Error::Usage("no meta".into()))?;
        assert_eq!(
            store.attributes(&meta)?.get("lead")?.map(|a| a.into_value()),
            Some(AttributeValue::Boolean(false))
        );
        Ok(())
    }

    #[test]
    fn test_decreasing_ids() -> Result<()> {
        let store = OrderedStore::with_pump_ids(
            BTreeBackend::new(),
            StoreConfig::ordered(),
            DecreasingIdFactory::new(12),
        )?;
        let traces: Vec<Owner> = (0..10).map(|_| store.new_owner(OwnerKind::Trace)).collect();
        let mut pump = store.start_pump()?;
        for trace in &traces {
            pump.pump_attributes(
                trace,
                vec![Attribute::literal("b", "x"), Attribute::literal("a", "y")],
            )?;
        }
        pump.finish_pump()?;
        assert_eq!(store.attributes(&traces[9])?.len()?, 2);
        Ok(())
    }

    #[test]
    fn test_out_of_order_owner_rejected() -> Result<()> {
        let store = OrderedStore::with_pump_ids(
            BTreeBackend::new(),
            StoreConfig::ordered(),
            SequentialIdFactory::new(12),
        )?;
        let first = store.new_owner(OwnerKind::Trace);
        let second = store.new_owner(OwnerKind::Trace);
        let mut pump = store.start_pump()?;
        pump.pump_attributes(&second, vec![Attribute::discrete("n", 1)])?;
        assert!(matches!(
            pump.pump_attributes(&first, vec![Attribute::discrete("n", 2)]),
            Err(Error::Pump(_))
        ));
        pump.finish_pump()?;
        assert_eq!(store.backend().len(), 1);
        Ok(())
    }

    #[test]
    fn test_dropped_pump_fails_store() -> Result<()> {
        let store = OrderedStore::new(BTreeBackend::new())?;
        let owner = store.new_owner(OwnerKind::Trace);
        {
            let mut pump = store.start_pump()?;
            pump.pump_attributes(&owner, vec![Attribute::discrete("n", 1)])?;
        }
        assert_eq!(store.state(), PumpState::Failed);
        assert!(store.start_pump().is_err());
        Ok(())
    }

    #[test]
    fn test_build_error_surfaces_on_finish() -> Result<()> {
        let store = OrderedStore::new(BTreeBackend::new())?;
        let owner = store.new_owner(OwnerKind::Trace);
        let mut pump = store.start_pump()?;
        pump.pump_attributes(&owner, vec![Attribute::discrete("n", 1)])?;
        // Same owner again: the composite key repeats
        pump.last_owner = None;
        pump.pump_attributes(&owner, vec![Attribute::discrete("n", 2)])?;
        assert!(matches!(pump.finish_pump(), Err(Error::Pump(_))));
        assert_eq!(store.state(), PumpState::Failed);
        Ok(())
    }
}
