//! Outcome codes returned to flash-sale callers.
//!
//! The enumeration is fixed: every code a caller can observe, whichever tier
//! produced it, is listed here with a stable numeric value. Numeric codes are
//! what HTTP clients see in the `code` field of a response body.

use serde::{Deserialize, Serialize};

/// Terminal result of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The front tier could not hand the request to its dispatchers in time.
    ServiceBusy,
    Success,
    NotFound,
    SoldOut,
    /// The user already holds `per_person_limit` units of the product.
    AlreadyBought,
    /// Shed by a probabilistic throttle; the caller may try again.
    Retry,
    RateLimited,
    Blacklisted,
    NotStarted,
    Ended,
    /// No reply arrived within the front tier's wait budget.
    ProcessTimeout,
    /// The caller went away before a reply arrived.
    ClientClosed,
    /// The request sat in the broker longer than the back tier accepts.
    Expired,
    /// Another call for the same (user, product) is still waiting.
    DuplicateInFlight,
}

impl Outcome {
    /// Every outcome, in code order.
    pub const ALL: [Outcome; 14] = [
        Outcome::ServiceBusy,
        Outcome::Success,
        Outcome::NotFound,
        Outcome::SoldOut,
        Outcome::AlreadyBought,
        Outcome::Retry,
        Outcome::RateLimited,
        Outcome::Blacklisted,
        Outcome::NotStarted,
        Outcome::Ended,
        Outcome::ProcessTimeout,
        Outcome::ClientClosed,
        Outcome::Expired,
        Outcome::DuplicateInFlight,
    ];

    /// Stable numeric code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::ServiceBusy => 1001,
            Self::Success => 1002,
            Self::NotFound => 1003,
            Self::SoldOut => 1004,
            Self::AlreadyBought => 1005,
            Self::Retry => 1006,
            Self::RateLimited => 1007,
            Self::Blacklisted => 1008,
            Self::NotStarted => 1009,
            Self::Ended => 1010,
            Self::ProcessTimeout => 1011,
            Self::ClientClosed => 1012,
            Self::Expired => 1013,
            Self::DuplicateInFlight => 1014,
        }
    }

    /// Inverse of [`Outcome::code`].
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    /// Label used in logs and metric tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceBusy => "service_busy",
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::SoldOut => "sold_out",
            Self::AlreadyBought => "already_bought",
            Self::Retry => "retry",
            Self::RateLimited => "rate_limited",
            Self::Blacklisted => "blacklisted",
            Self::NotStarted => "not_started",
            Self::Ended => "ended",
            Self::ProcessTimeout => "process_timeout",
            Self::ClientClosed => "client_closed",
            Self::Expired => "expired",
            Self::DuplicateInFlight => "duplicate_in_flight",
        }
    }

    /// Human-readable message for response bodies.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::ServiceBusy => "service busy, try again later",
            Self::Success => "purchase succeeded",
            Self::NotFound => "product not found",
            Self::SoldOut => "product is sold out",
            Self::AlreadyBought => "purchase limit reached for this product",
            Self::Retry => "please retry",
            Self::RateLimited => "too many requests",
            Self::Blacklisted => "access denied",
            Self::NotStarted => "sale has not started",
            Self::Ended => "sale has already ended",
            Self::ProcessTimeout => "request timed out",
            Self::ClientClosed => "client already closed",
            Self::Expired => "request expired",
            Self::DuplicateInFlight => "a request for this product is already in flight",
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn codes_are_unique_and_invertible() {
        let codes: HashSet<u16> = Outcome::ALL.iter().map(|o| o.code()).collect();
        assert_eq!(codes.len(), Outcome::ALL.len());

        for outcome in Outcome::ALL {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(Outcome::from_code(42), None);
    }

    #[test]
    fn wire_name_matches_label() {
        for outcome in Outcome::ALL {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
        }
    }

    #[test]
    fn only_success_is_success() {
        assert!(Outcome::Success.is_success());
        assert_eq!(Outcome::ALL.iter().filter(|o| o.is_success()).count(), 1);
    }
}
