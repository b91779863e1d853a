//! Item lifecycle state machine
//!
//! Every status change of an [`InventoryItem`](super::InventoryItem) goes
//! through [`TRANSITIONS`]. Anything not listed there is rejected with
//! [`AppError::StateTransition`] and leaves the item untouched.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a physical item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Freshly seen, not yet placed for sale
    Pending,
    /// In production
    OnJobs,
    /// Available for sale
    InStock,
    /// Sold
    Sales,
    /// Administratively removed
    Deleted,
}

impl ItemState {
    pub const ALL: [ItemState; 5] = [
        ItemState::Pending,
        ItemState::OnJobs,
        ItemState::InStock,
        ItemState::Sales,
        ItemState::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::OnJobs => "onjobs",
            ItemState::InStock => "instock",
            ItemState::Sales => "sales",
            ItemState::Deleted => "deleted",
        }
    }

    /// Whether `event` is legal from this state
    pub fn may(self, event: LifecycleEvent) -> bool {
        next_state(self, event).is_some()
    }

    /// Terminal under normal (non-administrative) flow
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Sales | ItemState::Deleted)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ItemState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown item state '{}'", s)))
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEvent {
    ActivateJob,
    MoveToStock,
    MarkSold,
    MarkDeleted,
    Reactivate,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::ActivateJob => "activateJob",
            LifecycleEvent::MoveToStock => "moveToStock",
            LifecycleEvent::MarkSold => "markSold",
            LifecycleEvent::MarkDeleted => "markDeleted",
            LifecycleEvent::Reactivate => "reactivate",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use ItemState::*;
use LifecycleEvent::*;

/// Legal `(from, event) -> to` edges
pub const TRANSITIONS: &[(ItemState, LifecycleEvent, ItemState)] = &[
    (Pending, ActivateJob, OnJobs),
    (Pending, MoveToStock, InStock),
    (OnJobs, MoveToStock, InStock),
    (OnJobs, MarkSold, Sales),
    (InStock, MarkSold, Sales),
    (Pending, MarkDeleted, Deleted),
    (OnJobs, MarkDeleted, Deleted),
    (InStock, MarkDeleted, Deleted),
    (Sales, Reactivate, InStock),
    (Deleted, Reactivate, InStock),
];

/// Look up the target state for `event` fired in `from`
pub fn next_state(from: ItemState, event: LifecycleEvent) -> Option<ItemState> {
    TRANSITIONS
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| *to)
}

/// Checked transition; returns the new state or a `StateTransition` error
pub fn transition(from: ItemState, event: LifecycleEvent) -> Result<ItemState> {
    next_state(from, event).ok_or(AppError::StateTransition { from, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_edges() {
        assert_eq!(transition(Pending, ActivateJob).unwrap(), OnJobs);
        assert_eq!(transition(Pending, MoveToStock).unwrap(), InStock);
        assert_eq!(transition(OnJobs, MoveToStock).unwrap(), InStock);
        assert_eq!(transition(OnJobs, MarkSold).unwrap(), Sales);
        assert_eq!(transition(InStock, MarkSold).unwrap(), Sales);
        assert_eq!(transition(Sales, Reactivate).unwrap(), InStock);
        assert_eq!(transition(Deleted, Reactivate).unwrap(), InStock);
    }

    #[test]
    fn test_illegal_edges_are_rejected() {
        assert!(matches!(
            transition(Sales, ActivateJob),
            Err(AppError::StateTransition { from: Sales, event: ActivateJob })
        ));
        assert!(transition(Pending, MarkSold).is_err());
        assert!(transition(InStock, ActivateJob).is_err());
        assert!(transition(Deleted, MarkDeleted).is_err());
        assert!(transition(InStock, Reactivate).is_err());
    }

    #[test]
    fn test_every_pair_matches_table() {
        let events = [ActivateJob, MoveToStock, MarkSold, MarkDeleted, Reactivate];
        let mut legal = 0;
        for state in ItemState::ALL {
            for event in events {
                let listed = TRANSITIONS.iter().any(|(f, e, _)| *f == state && *e == event);
                assert_eq!(state.may(event), listed, "{} {}", state, event);
                if listed {
                    legal += 1;
                }
            }
        }
        assert_eq!(legal, TRANSITIONS.len());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in ItemState::ALL {
            assert_eq!(state.as_str().parse::<ItemState>().unwrap(), state);
        }
        assert!("for_sale".parse::<ItemState>().is_err());
    }
}
