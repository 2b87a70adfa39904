//! ORG signatures.
//!
//! A page URL may name a non-default Apps Script deployment through `org`. Such a URL must
//! also carry `sig`: an ECDSA P-256 / SHA-256 signature over the UTF-8 bytes of `org`, in the
//! raw `r || s` form WebCrypto produces, base64url-encoded. Signatures are checked against the
//! site's public key, configured as a JWK.

use std::sync::LazyLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::Engine as _;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::bridge::error::{invalid_argument, BridgeResult};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/page"));

const COORDINATE_LEN: usize = 32;

/// An EC public key in JWK form. Only `EC`/`P-256` keys are usable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    /// Base64url affine x coordinate.
    pub x: String,
    /// Base64url affine y coordinate.
    pub y: String,
}

impl PublicKeyJwk {
    pub fn p256(x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: x.into(),
            y: y.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrgVerifier {
    key: VerifyingKey,
}

impl OrgVerifier {
    pub fn from_jwk(jwk: &PublicKeyJwk) -> BridgeResult<Self> {
        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(invalid_argument(format!(
                "unsupported public key {}/{}",
                jwk.kty, jwk.crv
            )));
        }
        let x = decode_base64_url(&jwk.x)
            .ok_or_else(|| invalid_argument("public key x is not base64url"))?;
        let y = decode_base64_url(&jwk.y)
            .ok_or_else(|| invalid_argument("public key y is not base64url"))?;
        if x.len() != COORDINATE_LEN || y.len() != COORDINATE_LEN {
            return Err(invalid_argument("public key coordinates must be 32 bytes"));
        }

        let mut sec1 = Vec::with_capacity(1 + 2 * COORDINATE_LEN);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        let key = VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|_| invalid_argument("public key is not a P-256 point"))?;
        Ok(Self { key })
    }

    /// `true` when `signature` signs `org`. Malformed signatures are simply invalid.
    pub fn verify(&self, org: &str, signature: &str) -> bool {
        let Some(bytes) = decode_base64_url(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.key.verify(org.as_bytes(), &signature).is_ok()
    }
}

/// Checks `signature` over `org`. No key, no signature, or an unusable key all fail.
pub fn verify_org(key: Option<&PublicKeyJwk>, org: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    let Some(key) = key else {
        LOGGER.error("no public key configured to verify org");
        return false;
    };
    match OrgVerifier::from_jwk(key) {
        Ok(verifier) => verifier.verify(org, signature),
        Err(err) => {
            LOGGER.error(format!("Error verifying script: {err}"));
            false
        }
    }
}

/// Accepts padded or unpadded input.
fn decode_base64_url(input: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.trim().trim_end_matches('='))
        .ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    pub(crate) fn signing_key() -> (SigningKey, PublicKeyJwk) {
        let signing = SigningKey::from_slice(&[7u8; 32]).unwrap();
        let point = p256::PublicKey::from(signing.verifying_key()).to_encoded_point(false);
        let jwk = PublicKeyJwk::p256(
            URL_SAFE_NO_PAD.encode(point.x().unwrap()),
            URL_SAFE_NO_PAD.encode(point.y().unwrap()),
        );
        (signing, jwk)
    }

    pub(crate) fn sign(key: &SigningKey, org: &str) -> String {
        let signature: Signature = key.sign(org.as_bytes());
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let (signing, jwk) = signing_key();
        let signature = sign(&signing, "AKfycb-partner");
        assert!(verify_org(Some(&jwk), "AKfycb-partner", &signature));
        assert!(verify_org(Some(&jwk), "AKfycb-partner", &format!("{signature}==")));
    }

    #[test]
    fn tampered_signature_or_org_fails() {
        let (signing, jwk) = signing_key();
        let signature = sign(&signing, "AKfycb-partner");
        assert!(!verify_org(Some(&jwk), "AKfycb-other", &signature));

        let mut bytes = URL_SAFE_NO_PAD.decode(&signature).unwrap();
        bytes[10] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(!verify_org(Some(&jwk), "AKfycb-partner", &tampered));
        assert!(!verify_org(Some(&jwk), "AKfycb-partner", "not*base64"));
    }

    #[test]
    fn missing_signature_or_key_fails() {
        let (signing, jwk) = signing_key();
        assert!(!verify_org(Some(&jwk), "AKfycb-partner", ""));
        assert!(!verify_org(None, "AKfycb-partner", &sign(&signing, "AKfycb-partner")));
    }

    #[test]
    fn rejects_unusable_keys() {
        let (_, jwk) = signing_key();
        let mut rsa = jwk.clone();
        rsa.kty = "RSA".into();
        assert!(OrgVerifier::from_jwk(&rsa).is_err());

        let short = PublicKeyJwk::p256("AAAA", jwk.y.clone());
        assert!(OrgVerifier::from_jwk(&short).is_err());

        let off_curve = PublicKeyJwk::p256(jwk.x.clone(), URL_SAFE_NO_PAD.encode([1u8; 32]));
        assert!(OrgVerifier::from_jwk(&off_curve).is_err());
    }
}
