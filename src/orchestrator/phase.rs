//! Explicit lifecycle phases for the auth orchestrator.
//!
//! All phase changes go through [`AuthPhase::transition`], so reacting to
//! anything after disposal is rejected in one place.

use serde::Serialize;

use crate::session::Session;

#[derive(Debug, Clone, Default)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Initializing,
    Ready {
        session: Option<Session>,
    },
    Disposed,
}

/// Derived view of a `Ready` phase, combined with cache staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NoSession,
    StaleProfile,
    FreshProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    #[error("auth orchestrator is disposed")]
    Disposed,
    #[error("illegal auth phase transition {from} -> {to}")]
    Illegal { from: &'static str, to: &'static str },
}

impl AuthPhase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready { .. } => "ready",
            Self::Disposed => "disposed",
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Ready { session } => session.as_ref(),
            _ => None,
        }
    }

    /// Move to `next` if the edge is legal.
    ///
    /// Legal edges: `Uninitialized -> Initializing`, `Initializing -> Ready`,
    /// `Uninitialized -> Ready` (an auth event or OAuth completion arriving
    /// before initialization), `Ready -> Ready`, `Ready -> Initializing`
    /// (re-initialization), and anything `-> Disposed`. Nothing leaves
    /// `Disposed` and nothing returns to `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError`] and leaves the phase unchanged on an illegal edge.
    pub fn transition(&mut self, next: AuthPhase) -> Result<(), PhaseError> {
        let legal = match (&*self, &next) {
            (Self::Disposed, _) => return Err(PhaseError::Disposed),
            (_, Self::Disposed)
            | (Self::Uninitialized | Self::Ready { .. }, Self::Initializing)
            | (Self::Uninitialized | Self::Initializing | Self::Ready { .. }, Self::Ready { .. }) => true,
            _ => false,
        };
        if !legal {
            return Err(PhaseError::Illegal { from: self.name(), to: next.name() });
        }
        *self = next;
        Ok(())
    }

    /// Readiness of a `Ready` phase; `None` for every other phase.
    #[must_use]
    pub fn readiness(&self, profile_stale: bool) -> Option<Readiness> {
        match self {
            Self::Ready { session: None } => Some(Readiness::NoSession),
            Self::Ready { session: Some(_) } if profile_stale => Some(Readiness::StaleProfile),
            Self::Ready { session: Some(_) } => Some(Readiness::FreshProfile),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "phase_test.rs"]
mod tests;
