use crate::error::{Result, TrainerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Lifecycle stage of one device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Link up, identity write and init sequence in progress
    Authenticating,
    /// Fully initialized and ready for commands
    Connected,
    /// Intentional teardown in progress
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Workout engagement stage, independent of the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    /// No recording
    Idle,
    /// Start command issued, device arming
    Preparing,
    /// Device armed, waiting for first movement
    Ready,
    /// Set in progress
    Active,
    /// Stop command issued, device winding down
    Stopping,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Preparing => write!(f, "Preparing"),
            Self::Ready => write!(f, "Ready"),
            Self::Active => write!(f, "Active"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Verdict of validating one requested transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionVerdict<S> {
    /// The transition is in the table
    Allowed,
    /// The transition violates the table
    Rejected {
        /// State the machine was in
        from: S,
        /// State that was requested
        to: S,
    },
}

/// A state type with a closed transition table
pub trait TransitionTable: Copy + Eq + fmt::Display {
    /// Whether `from -> to` is a valid transition. Self-transitions are
    /// never valid.
    fn allowed(from: Self, to: Self) -> bool;
}

impl TransitionTable for ConnectionState {
    fn allowed(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Authenticating | Self::Disconnected)
                | (Self::Authenticating, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected)
        )
    }
}

impl TransitionTable for RecordingState {
    fn allowed(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Idle, Self::Preparing)
                | (Self::Preparing, Self::Ready | Self::Idle)
                | (Self::Ready, Self::Active | Self::Idle)
                | (Self::Active, Self::Stopping)
                | (Self::Stopping, Self::Idle)
        )
    }
}

/// Validate one requested transition against the table, as a pure function.
/// Strict and permissive callers layer their policies on this one verdict.
pub fn validate_transition<S: TransitionTable>(from: S, to: S) -> TransitionVerdict<S> {
    if S::allowed(from, to) {
        TransitionVerdict::Allowed
    } else {
        TransitionVerdict::Rejected { from, to }
    }
}

/// How a state machine treats a transition request the table rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Rejected transitions are hard errors and leave the state unchanged.
    /// Used for deterministic unit testing of the table itself.
    Strict,
    /// Rejected transitions are logged as warnings but the state is still
    /// forcibly set. Transport callbacks can race; refusing the update risks
    /// a permanently stuck state, which is worse than a logged anomaly.
    Permissive,
}

/// One lifecycle state machine with a configurable enforcement policy
#[derive(Debug)]
pub struct StateMachine<S: TransitionTable> {
    current: S,
    mode: EnforcementMode,
    label: &'static str,
    forced: u32,
}

impl<S: TransitionTable> StateMachine<S> {
    /// Create a machine starting in `initial`
    pub const fn new(initial: S, mode: EnforcementMode, label: &'static str) -> Self {
        Self {
            current: initial,
            mode,
            label,
            forced: 0,
        }
    }

    /// Current state
    pub const fn current(&self) -> S {
        self.current
    }

    /// Request a transition to `to`.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`TrainerError::InvalidTransition`] when the
    /// table rejects the request; the state is left unchanged. Permissive
    /// mode never fails.
    pub fn transition(&mut self, to: S) -> Result<()> {
        match validate_transition(self.current, to) {
            TransitionVerdict::Allowed => {
                self.current = to;
                Ok(())
            }
            TransitionVerdict::Rejected { from, to } => match self.mode {
                EnforcementMode::Strict => Err(TrainerError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
                EnforcementMode::Permissive => {
                    warn!(
                        "{}: forcing invalid transition {} -> {}",
                        self.label, from, to
                    );
                    self.forced = self.forced.saturating_add(1);
                    self.current = to;
                    Ok(())
                }
            },
        }
    }

    /// Set the state unconditionally, bypassing the table. Used only for
    /// explicit resets during teardown.
    pub fn force_state(&mut self, to: S) {
        self.current = to;
    }

    /// How many rejected transitions permissive mode has force-applied.
    /// This is the observable warning signal alongside the log line.
    pub const fn forced_transitions(&self) -> u32 {
        self.forced
    }
}
