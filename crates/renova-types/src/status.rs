//! Subscription status codes.
//!
//! The subscriptions table is owned by the billing service; this crate
//! only defines the closed status vocabulary that event handlers write.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Awaiting first renewal, or reverted to neutral after a rollback.
    Pending,
    /// Last renewal succeeded.
    Active,
    /// Last renewal failed; the renewal workflow will retry.
    Retrying,
    /// Cancelled by the subscriber.
    Cancelled,
    /// Lapsed past its final retry.
    Expired,
}

/// Error returned when a stored status string is not in the vocabulary.
#[derive(Debug, thiserror::Error)]
#[error("unknown subscription status: {0}")]
pub struct UnknownStatus(pub String);

impl SubscriptionStatus {
    /// The stable string stored in the `subscriptions.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Retrying => "retrying",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "retrying" => Ok(SubscriptionStatus::Retrying),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Active,
            SubscriptionStatus::Retrying,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()).expect("parse"), status);
        }
    }

    #[test]
    fn test_unknown_status() {
        let err = SubscriptionStatus::parse("suspended").expect_err("should fail");
        assert_eq!(err.to_string(), "unknown subscription status: suspended");
    }
}
