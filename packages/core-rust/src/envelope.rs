//! Envelopes exchanged between the front and back tier over the broker.
//!
//! Both envelopes encode to `MsgPack` with named fields via
//! `rmp_serde::to_vec_named()`, so payloads stay self-describing and survive
//! field reordering between releases.

use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;
use crate::types::{ProductId, RequestId, RequestKey, UserId};

/// Errors from encoding or decoding a queue payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("malformed envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A purchase attempt admitted by the front tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub client_ip: String,
    /// Front-tier wall clock at submission, epoch milliseconds.
    pub submitted_at_ms: u64,
}

impl SaleRequest {
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.user_id, self.product_id)
    }

    /// Milliseconds the request has existed as of `now_ms`.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.submitted_at_ms)
    }
}

/// The back tier's decision for one [`SaleRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleResult {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub outcome: Outcome,
    /// Present only when `outcome` is [`Outcome::Success`].
    #[serde(default)]
    pub token: Option<String>,
    /// Epoch seconds at which the token was minted; 0 without a token.
    #[serde(default)]
    pub token_time: i64,
}

impl SaleResult {
    /// A result carrying no token.
    #[must_use]
    pub fn rejected(request: &SaleRequest, outcome: Outcome) -> Self {
        Self {
            request_id: request.request_id,
            user_id: request.user_id,
            product_id: request.product_id,
            outcome,
            token: None,
            token_time: 0,
        }
    }

    /// A successful result carrying the minted token.
    #[must_use]
    pub fn granted(request: &SaleRequest, token: String, token_time: i64) -> Self {
        Self {
            request_id: request.request_id,
            user_id: request.user_id,
            product_id: request.product_id,
            outcome: Outcome::Success,
            token: Some(token),
            token_time,
        }
    }

    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.user_id, self.product_id)
    }
}

/// Encodes an envelope for the broker.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Decodes an envelope popped from the broker.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the payload is not a valid envelope.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SaleRequest {
        SaleRequest {
            request_id: 77,
            user_id: 1,
            product_id: 2,
            client_ip: "10.0.0.1".to_string(),
            submitted_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn request_survives_the_broker() {
        let req = request();
        let bytes = encode(&req).unwrap();
        let back: SaleRequest = decode(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn granted_result_keeps_token() {
        let res = SaleResult::granted(&request(), "abc".to_string(), 1_700_000_000);
        let back: SaleResult = decode(&encode(&res).unwrap()).unwrap();
        assert_eq!(back.outcome, Outcome::Success);
        assert_eq!(back.token.as_deref(), Some("abc"));
        assert_eq!(back.key(), RequestKey::new(1, 2));
    }

    #[test]
    fn rejected_result_has_no_token() {
        let res = SaleResult::rejected(&request(), Outcome::SoldOut);
        assert_eq!(res.request_id, 77);
        assert!(res.token.is_none());
        assert_eq!(res.token_time, 0);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode::<SaleRequest>(b"\xc1not msgpack").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn age_saturates_on_clock_skew() {
        let req = request();
        assert_eq!(req.age_ms(req.submitted_at_ms + 250), 250);
        assert_eq!(req.age_ms(req.submitted_at_ms - 5), 0);
    }
}
