use serde::{Deserialize, Serialize};

/// Events that drive order lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OrderEvent {
    /// Payment authorized (pending → paid)
    Pay,
    /// Payment completed (pending|paid → completed)
    Complete,
    /// Terminal failure with an operator-visible reason. Legal from
    /// pending and paid, and from completed as the insufficient-stock
    /// compensation path.
    Fail(String),
    /// Cancellation before completion (pending|paid → cancelled)
    Cancel,
}

impl OrderEvent {
    /// Event name for transition metadata and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pay => "pay",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(OrderEvent::Pay.name(), "pay");
        assert_eq!(OrderEvent::Fail("oversell".to_string()).name(), "fail");
    }

    #[test]
    fn test_event_serde() {
        let event = OrderEvent::Fail("insufficient stock".to_string());
        let json = serde_json::to_string(&event).unwrap();
        let parsed: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
