use crate::error::{RelayError, RelayResult};
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

/// Verifies `X-Line-Signature`, the base64 HMAC-SHA256 of the raw request
/// body keyed with the channel secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    channel_secret: String,
}
impl SignatureVerifier {
    pub fn new(channel_secret: impl Into<String>) -> Self {
        Self {
            channel_secret: channel_secret.into(),
        }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> RelayResult<()> {
        let signature = match signature.map(str::trim) {
            Some(signature) if !signature.is_empty() => signature,
            _ => return Err(RelayError::MissingSignature),
        };

        let provided = general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| RelayError::InvalidSignature)?;

        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| RelayError::InvalidSignature)
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(self.channel_secret.as_bytes())
            .expect("HMAC accepts any key length")
    }
}
