//! # Order State Machine
//!
//! Lifecycle management for orders: `pending → paid → completed`, with
//! `failed` and `cancelled` as alternate terminal paths. Transitions are
//! resolved from and persisted to the append-only `order_transitions` table.

pub mod events;
pub mod order_state_machine;
pub mod persistence;
pub mod states;

pub use events::OrderEvent;
pub use order_state_machine::OrderStateMachine;
pub use persistence::{OrderTransitionPersistence, TransitionPersistence};
pub use states::OrderState;
