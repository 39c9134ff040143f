use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Bulk-import state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PumpState {
    /// Ordinary reads and writes
    Idle = 0,
    /// A pump is active; per-attribute access is rejected
    Pumping = 1,
    /// The one pump this store allows has finished
    Pumped = 2,
    /// A pump was abandoned or failed; data may be partial
    Failed = 3,
    Disposed = 4,
}

impl PumpState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PumpState::Idle,
            1 => PumpState::Pumping,
            2 => PumpState::Pumped,
            3 => PumpState::Failed,
            _ => PumpState::Disposed,
        }
    }
}

/// Atomic state machine shared by a store and its maps and pumps
///
/// ```text
/// Idle ──begin_pump──► Pumping ──finish──► Pumped
///                         └──────fail────► Failed
/// any but Pumping ──dispose──► Disposed
/// ```
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PumpState::Idle as u8),
        }
    }

    pub fn state(&self) -> PumpState {
        PumpState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Fails while pumping or after dispose
    pub fn ensure_usable(&self) -> Result<()> {
        match self.state() {
            PumpState::Pumping => Err(Error::Usage(
                "Cannot be used during data pump!".to_string(),
            )),
            PumpState::Disposed => Err(Error::Usage("Store has been disposed".to_string())),
            _ => Ok(()),
        }
    }

    pub fn begin_pump(&self) -> Result<()> {
        match self.state.compare_exchange(
            PumpState::Idle as u8,
            PumpState::Pumping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(actual) => Err(Error::Usage(match PumpState::from_u8(actual) {
                PumpState::Pumping => "A data pump is already running".to_string(),
                PumpState::Pumped => "The data pump of this store has already finished".to_string(),
                PumpState::Failed => "A previous data pump failed; the store cannot pump again".to_string(),
                _ => "Store has been disposed".to_string(),
            })),
        }
    }

    pub fn finish_pump(&self) -> Result<()> {
        self.transition(PumpState::Pumping, PumpState::Pumped)
    }

    pub fn fail_pump(&self) {
        if self.transition(PumpState::Pumping, PumpState::Failed).is_ok() {
            warn!("Data pump failed or was abandoned; store is marked failed");
        }
    }

    pub fn dispose(&self) -> Result<()> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == PumpState::Pumping as u8 {
                return Err(Error::Usage(
                    "Cannot dispose a store during data pump".to_string(),
                ));
            }
            match self.state.compare_exchange_weak(
                current,
                PumpState::Disposed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn transition(&self, from: PumpState, to: PumpState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                Error::Usage(format!(
                    "Expected store state {:?}, found {:?}",
                    from,
                    PumpState::from_u8(actual)
                ))
            })
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pump_is_one_shot() -> Result<()> {
        let lifecycle = Lifecycle::new();
        lifecycle.ensure_usable()?;
        lifecycle.begin_pump()?;
        assert!(lifecycle.ensure_usable().is_err());
        assert!(lifecycle.begin_pump().is_err());
        assert!(lifecycle.dispose().is_err());

        lifecycle.finish_pump()?;
        assert_eq!(lifecycle.state(), PumpState::Pumped);
        lifecycle.ensure_usable()?;
        assert!(lifecycle.begin_pump().is_err());
        Ok(())
    }

    #[test]
    fn test_failed_pump() -> Result<()> {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_pump()?;
        lifecycle.fail_pump();
        assert_eq!(lifecycle.state(), PumpState::Failed);
        assert!(lifecycle.finish_pump().is_err());
        assert!(lifecycle.begin_pump().is_err());

        lifecycle.dispose()?;
        assert!(matches!(lifecycle.ensure_usable(), Err(Error::Usage(_))));
        Ok(())
    }
}
