use crate::domain::InstanceKey;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegistrationState {
    Unregistered = 0,
    Gating = 1,
    Registering = 2,
    Registered = 3,
    Deregistering = 4,
    Deregistered = 5,
}

impl RegistrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "UNREGISTERED",
            RegistrationState::Gating => "GATING",
            RegistrationState::Registering => "REGISTERING",
            RegistrationState::Registered => "REGISTERED",
            RegistrationState::Deregistering => "DEREGISTERING",
            RegistrationState::Deregistered => "DEREGISTERED",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RegistrationState::Gating,
            2 => RegistrationState::Registering,
            3 => RegistrationState::Registered,
            4 => RegistrationState::Deregistering,
            5 => RegistrationState::Deregistered,
            _ => RegistrationState::Unregistered,
        }
    }

    pub fn is_valid_transition(current: Self, next: Self) -> bool {
        use RegistrationState::*;
        match current {
            Unregistered => matches!(next, Gating | Registering),
            Gating => matches!(next, Registering | Unregistered),
            Registering => matches!(next, Registered | Unregistered),
            Registered => matches!(next, Deregistering),
            Deregistering => matches!(next, Deregistered | Registered),
            Deregistered => matches!(next, Unregistered),
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("instance {instance} has no registration state")]
    InstanceUnknown { instance: String },
    #[error("instance {instance} cannot move from {from} to {to}")]
    InvalidTransition {
        instance: String,
        from: RegistrationState,
        to: RegistrationState,
    },
}

/// Lock-free state cell shared between the orchestrator (writer) and probe handlers (readers).
#[derive(Debug)]
pub struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    fn new(state: RegistrationState) -> Self {
        Self {
            value: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> RegistrationState {
        RegistrationState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Moves `from -> to` only if the cell still holds `from`.
    fn compare_and_set(
        &self,
        from: RegistrationState,
        to: RegistrationState,
    ) -> Result<(), RegistrationState> {
        self.value
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RegistrationState::from_u8)
    }
}

/// Registration state of every instance this process manages.
#[derive(Debug, Default)]
pub struct RegistrationStates {
    cells: DashMap<InstanceKey, Arc<StateCell>>,
}

impl RegistrationStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &InstanceKey) -> Option<RegistrationState> {
        self.cells.get(key).map(|cell| cell.load())
    }

    /// Prepares a cell for a fresh registration attempt. Instances that were fully
    /// deregistered start over; anything in flight or registered is rejected.
    pub fn begin_attempt(&self, key: &InstanceKey) -> Result<(), TransitionError> {
        let cell = Arc::clone(
            self.cells
                .entry(key.clone())
                .or_insert_with(|| Arc::new(StateCell::new(RegistrationState::Unregistered)))
                .value(),
        );

        match cell.load() {
            RegistrationState::Unregistered => Ok(()),
            RegistrationState::Deregistered => self.apply(
                key,
                &cell,
                RegistrationState::Deregistered,
                RegistrationState::Unregistered,
            ),
            current => Err(TransitionError::InvalidTransition {
                instance: key.to_string(),
                from: current,
                to: RegistrationState::Unregistered,
            }),
        }
    }

    pub fn transition(
        &self,
        key: &InstanceKey,
        from: RegistrationState,
        to: RegistrationState,
    ) -> Result<(), TransitionError> {
        let cell = self
            .cells
            .get(key)
            .map(|cell| Arc::clone(cell.value()))
            .ok_or_else(|| TransitionError::InstanceUnknown {
                instance: key.to_string(),
            })?;
        self.apply(key, &cell, from, to)
    }

    fn apply(
        &self,
        key: &InstanceKey,
        cell: &StateCell,
        from: RegistrationState,
        to: RegistrationState,
    ) -> Result<(), TransitionError> {
        if !RegistrationState::is_valid_transition(from, to) {
            return Err(TransitionError::InvalidTransition {
                instance: key.to_string(),
                from,
                to,
            });
        }

        cell.compare_and_set(from, to)
            .map_err(|actual| TransitionError::InvalidTransition {
                instance: key.to_string(),
                from: actual,
                to,
            })?;

        tracing::info!(
            instance = %key,
            state_from = from.as_str(),
            state_to = to.as_str(),
            "registration state changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> InstanceKey {
        InstanceKey {
            namespace: "default".to_string(),
            service: "echo".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }

    #[test]
    fn happy_path_walks_the_whole_lifecycle() {
        use RegistrationState::*;
        let states = RegistrationStates::new();
        let key = key();
        states.begin_attempt(&key).expect("begin");
        for (from, to) in [
            (Unregistered, Gating),
            (Gating, Registering),
            (Registering, Registered),
            (Registered, Deregistering),
            (Deregistering, Deregistered),
        ] {
            states.transition(&key, from, to).expect("valid transition");
            assert_eq!(states.get(&key), Some(to));
        }
        states.begin_attempt(&key).expect("deregistered instances may register again");
        assert_eq!(states.get(&key), Some(Unregistered));
    }

    #[test]
    fn registered_cannot_jump_to_deregistered() {
        let states = RegistrationStates::new();
        let key = key();
        states.begin_attempt(&key).expect("begin");
        states
            .transition(&key, RegistrationState::Unregistered, RegistrationState::Registering)
            .expect("registering");
        states
            .transition(&key, RegistrationState::Registering, RegistrationState::Registered)
            .expect("registered");

        let err = states
            .transition(&key, RegistrationState::Registered, RegistrationState::Deregistered)
            .expect_err("must pass through deregistering");
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert!(states.begin_attempt(&key).is_err(), "registered instance is busy");
    }

    #[test]
    fn stale_expected_state_is_rejected() {
        let states = RegistrationStates::new();
        let key = key();
        states.begin_attempt(&key).expect("begin");
        let err = states
            .transition(&key, RegistrationState::Gating, RegistrationState::Registering)
            .expect_err("cell still unregistered");
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                instance: key.to_string(),
                from: RegistrationState::Unregistered,
                to: RegistrationState::Registering,
            }
        );
    }

    #[test]
    fn unknown_instance_is_reported() {
        let states = RegistrationStates::new();
        assert!(states.get(&key()).is_none());
        assert!(matches!(
            states.transition(&key(), RegistrationState::Registered, RegistrationState::Deregistering),
            Err(TransitionError::InstanceUnknown { .. })
        ));
    }
}
