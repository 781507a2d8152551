use flashsale_core::Outcome;

/// Why a purchase call did not succeed.
///
/// Every variant corresponds to exactly one non-success [`Outcome`], so the
/// caller always learns a typed code and never mistakes a failure for a sale.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleError {
    #[error("user or client address is blacklisted")]
    Blacklisted,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("product not found")]
    NotFound,
    #[error("sale has not started")]
    NotStarted,
    #[error("sale has already ended")]
    Ended,
    #[error("product is sold out")]
    SoldOut,
    #[error("purchase limit reached for this product")]
    AlreadyBought,
    #[error("request shed by throttle, retry")]
    Retry,
    #[error("service busy, try again later")]
    ServiceBusy,
    #[error("no result within {timeout_ms}ms")]
    ProcessTimeout { timeout_ms: u64 },
    #[error("client already closed")]
    ClientClosed,
    #[error("request expired before processing")]
    Expired,
    #[error("a request for this product is already in flight")]
    DuplicateInFlight,
}

impl SaleError {
    /// The outcome code reported to the caller.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Blacklisted => Outcome::Blacklisted,
            Self::RateLimited => Outcome::RateLimited,
            Self::NotFound => Outcome::NotFound,
            Self::NotStarted => Outcome::NotStarted,
            Self::Ended => Outcome::Ended,
            Self::SoldOut => Outcome::SoldOut,
            Self::AlreadyBought => Outcome::AlreadyBought,
            Self::Retry => Outcome::Retry,
            Self::ServiceBusy => Outcome::ServiceBusy,
            Self::ProcessTimeout { .. } => Outcome::ProcessTimeout,
            Self::ClientClosed => Outcome::ClientClosed,
            Self::Expired => Outcome::Expired,
            Self::DuplicateInFlight => Outcome::DuplicateInFlight,
        }
    }

    /// Maps a back-tier outcome to the error the caller sees.
    ///
    /// Returns `None` for [`Outcome::Success`].
    #[must_use]
    pub fn from_outcome(outcome: Outcome) -> Option<Self> {
        let err = match outcome {
            Outcome::Success => return None,
            Outcome::ServiceBusy => Self::ServiceBusy,
            Outcome::NotFound => Self::NotFound,
            Outcome::SoldOut => Self::SoldOut,
            Outcome::AlreadyBought => Self::AlreadyBought,
            Outcome::Retry => Self::Retry,
            Outcome::RateLimited => Self::RateLimited,
            Outcome::Blacklisted => Self::Blacklisted,
            Outcome::NotStarted => Self::NotStarted,
            Outcome::Ended => Self::Ended,
            Outcome::ProcessTimeout => Self::ProcessTimeout { timeout_ms: 0 },
            Outcome::ClientClosed => Self::ClientClosed,
            Outcome::Expired => Self::Expired,
            Outcome::DuplicateInFlight => Self::DuplicateInFlight,
        };
        Some(err)
    }
}
