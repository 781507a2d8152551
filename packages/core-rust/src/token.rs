//! Fulfillment tokens: proof that the back tier granted a purchase.
//!
//! A token is a BLAKE3 keyed hash over the user id, product id, mint
//! timestamp, and the product's secret material. Integers are hashed as
//! fixed-width little-endian bytes and the secret is length-prefixed, so no
//! two field tuples share an input. The key is derived from the
//! server secret, so a token cannot be produced or checked without it.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::types::{ProductId, UserId};

/// Key-derivation context. Changing it invalidates every outstanding token.
const KEY_CONTEXT: &str = "flashsale 2024-01-01 fulfillment token v1";

/// Mints and verifies fulfillment tokens with a key derived from the server secret.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    #[must_use]
    pub fn new(server_secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, server_secret.as_bytes()),
        }
    }

    /// Mints the hex-encoded token for a successful purchase.
    #[must_use]
    pub fn mint(
        &self,
        user_id: UserId,
        product_id: ProductId,
        minted_at: i64,
        product_secret: &str,
    ) -> String {
        hex::encode(self.digest(user_id, product_id, minted_at, product_secret).as_bytes())
    }

    /// Recomputes the token and compares it in constant time.
    #[must_use]
    pub fn verify(
        &self,
        token: &str,
        user_id: UserId,
        product_id: ProductId,
        minted_at: i64,
        product_secret: &str,
    ) -> bool {
        let Ok(presented) = hex::decode(token) else {
            return false;
        };
        let expected = self.digest(user_id, product_id, minted_at, product_secret);
        presented.ct_eq(expected.as_bytes()).into()
    }

    fn digest(&self, user_id: UserId, product_id: ProductId, minted_at: i64, product_secret: &str) -> blake3::Hash {
        let secret = product_secret.as_bytes();
        blake3::Hasher::new_keyed(&self.key)
            .update(&user_id.to_le_bytes())
            .update(&product_id.to_le_bytes())
            .update(&minted_at.to_le_bytes())
            .update(&(secret.len() as u64).to_le_bytes())
            .update(secret)
            .finalize()
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}
