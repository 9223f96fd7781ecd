use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Initial state when the order is submitted
    Pending,
    /// Payment has been authorized but completion has not run
    Paid,
    /// Payment completed; decrement intents are (being) dispatched
    Completed,
    /// Terminal failure (payment failure or insufficient stock compensation)
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl OrderState {
    /// Check if this is a terminal state (no further transitions allowed,
    /// except the insufficient-stock compensation out of `Completed`)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States from which payment completion is legal
    pub fn can_complete_payment(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    /// States from which cancellation is legal. A completed order cannot be
    /// cancelled through this machine; reversal is a distinct refund flow.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid order state: {s}")),
        }
    }
}

/// Default state for new orders
impl Default for OrderState {
    fn default() -> Self {
        Self::Pending
    }
}
