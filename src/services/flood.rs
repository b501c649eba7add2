//! Flood protection tokens
//!
//! The topic form carries a token bound to the visitor's session (or, with
//! no session, to the client address). A submission whose token does not
//! match the one issued for the same key is rejected.

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct FloodProtection {
    mac: HmacSha256,
}

impl FloodProtection {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid flood protection key: {}", e))?;
        Ok(Self { mac })
    }

    fn mac(&self, key: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        mac
    }

    /// Token to embed in the form for `key`
    pub fn token(&self, key: &str) -> String {
        HEXLOWER.encode(&self.mac(key).finalize().into_bytes())
    }

    /// Whether `token` was issued for `key`
    pub fn verify(&self, key: &str, token: &str) -> bool {
        match HEXLOWER.decode(token.as_bytes()) {
            Ok(bytes) => self.mac(key).verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }
    }
}
