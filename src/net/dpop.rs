//! DPoP proof-of-possession: verification and client-side proof generation.
//!
//! A proof is a compact JWT whose header carries the presenting key as a
//! JWK (`typ = "dpop+jwt"`) and whose payload binds the HTTP method and URL
//! (`htm`/`htu`) with a freshness stamp (`iat`) and a unique id (`jti`).
//! On top of the RFC semantics the verifier binds the proof to the mTLS
//! identity: the JWK must produce byte-identical SubjectPublicKeyInfo DER
//! to the verified client certificate's key.
//!
//! Verification order: header shape, key binding, signature, claims. Any
//! failure collapses to Unauthorized with a reason code for the audit log.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, Jwk, RSAKeyParameters, RSAKeyType,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use p256::elliptic_curve::sec1::FromEncodedPoint;
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::errors::{PalioxisError, Result};

/// Maximum accepted clock skew between proof `iat` and server time.
pub const FRESHNESS_WINDOW_SECS: i64 = 300;

/// Minimum RSA modulus size the verifier accepts.
const MIN_RSA_BITS: usize = 2048;

/// Why a proof was rejected. Stable strings, used in log lines of the form
/// `DpopInvalid/<reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpopReason {
    /// Token did not decode as a compact JWT.
    Malformed,
    /// Header `typ` is not `dpop+jwt`.
    Typ,
    /// Header `alg` is outside the accepted set.
    Alg,
    /// Header `jwk` missing or not a usable public key.
    Jwk,
    /// JWK key does not match the mTLS client certificate key.
    KeyBinding,
    /// Signature did not verify under the declared algorithm.
    Signature,
    /// `htm` claim does not match the request method.
    Htm,
    /// `htu` claim does not match the request URL.
    Htu,
    /// `iat` outside the freshness window.
    Iat,
    /// `jti` missing or empty.
    Jti,
    /// `jti` already seen inside the freshness window.
    Replay,
}

impl DpopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Typ => "typ",
            Self::Alg => "alg",
            Self::Jwk => "jwk",
            Self::KeyBinding => "key-binding",
            Self::Signature => "signature",
            Self::Htm => "htm",
            Self::Htu => "htu",
            Self::Iat => "iat",
            Self::Jti => "jti",
            Self::Replay => "replay",
        }
    }
}

impl fmt::Display for DpopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload claims of a proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DpopClaims {
    pub iat: i64,
    pub jti: String,
    pub htm: String,
    pub htu: String,
}

/// Result of a successful verification, for audit logging.
#[derive(Debug, Clone)]
pub struct VerifiedProof {
    pub claims: DpopClaims,
    /// RFC 7638 thumbprint of the bound key, base64url.
    pub thumbprint: Option<String>,
}

// ──────────────────── verifier ────────────────────

/// Verifies proofs against the peer certificate key. Holds the replay cache,
/// so one verifier instance must live as long as the server.
pub struct DpopVerifier {
    replay: Mutex<ReplayCache>,
}

impl DpopVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replay: Mutex::new(ReplayCache::default()),
        }
    }

    /// Validate a proof for the given method/URL against the peer's
    /// SubjectPublicKeyInfo DER. Produces only accept/reject plus a reason.
    pub fn verify(
        &self,
        token: &str,
        expected_method: &str,
        expected_url: &str,
        peer_spki_der: &[u8],
    ) -> Result<VerifiedProof> {
        self.verify_at(token, expected_method, expected_url, peer_spki_der, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        token: &str,
        expected_method: &str,
        expected_url: &str,
        peer_spki_der: &[u8],
        now: i64,
    ) -> Result<VerifiedProof> {
        // 1. Header shape, without verifying.
        let header = decode_header(token).map_err(|_| reject(DpopReason::Malformed))?;
        if header.typ.as_deref() != Some("dpop+jwt") {
            return Err(reject(DpopReason::Typ));
        }
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
            return Err(reject(DpopReason::Alg));
        }
        let jwk = header.jwk.as_ref().ok_or_else(|| reject(DpopReason::Jwk))?;

        // 2–3. Materialise the embedded key and require byte-equal SPKI with
        // the mTLS client certificate. This is the possession check.
        let jwk_spki = jwk_spki_der(jwk).map_err(reject)?;
        if jwk_spki != peer_spki_der {
            return Err(reject(DpopReason::KeyBinding));
        }

        // 4. Signature under the declared algorithm with the jwk-derived key.
        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|_| reject(DpopReason::Jwk))?;
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = std::collections::HashSet::new();
        let data = decode::<DpopClaims>(token, &decoding_key, &validation)
            .map_err(|_| reject(DpopReason::Signature))?;
        let claims = data.claims;

        // 5. Claims.
        if claims.htm != expected_method {
            return Err(reject(DpopReason::Htm));
        }
        if claims.htu != expected_url {
            return Err(reject(DpopReason::Htu));
        }
        if (now - claims.iat).abs() >= FRESHNESS_WINDOW_SECS {
            return Err(reject(DpopReason::Iat));
        }
        if claims.jti.trim().is_empty() {
            return Err(reject(DpopReason::Jti));
        }
        if !self.replay.lock().observe(&claims.jti, now) {
            return Err(reject(DpopReason::Replay));
        }

        let thumbprint = jwk_thumbprint(jwk);
        Ok(VerifiedProof { claims, thumbprint })
    }
}

impl Default for DpopVerifier {
    fn default() -> Self {
        Self::new()
    }
}

const fn reject(reason: DpopReason) -> PalioxisError {
    PalioxisError::DpopInvalid { reason }
}

/// Seen `jti` values inside the freshness window. The window doubles as the
/// retention bound, so the cache stays small for a one-shot protocol.
#[derive(Default)]
struct ReplayCache {
    seen: HashMap<String, i64>,
}

impl ReplayCache {
    fn observe(&mut self, jti: &str, now: i64) -> bool {
        self.seen.retain(|_, at| now - *at < FRESHNESS_WINDOW_SECS);
        if self.seen.contains_key(jti) {
            return false;
        }
        self.seen.insert(jti.to_string(), now);
        true
    }
}

// ──────────────────── JWK handling ────────────────────

/// DER SubjectPublicKeyInfo of the key a JWK describes.
fn jwk_spki_der(jwk: &Jwk) -> std::result::Result<Vec<u8>, DpopReason> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(params) => {
            let n = URL_SAFE_NO_PAD
                .decode(&params.n)
                .map_err(|_| DpopReason::Jwk)?;
            let e = URL_SAFE_NO_PAD
                .decode(&params.e)
                .map_err(|_| DpopReason::Jwk)?;
            let key = rsa::RsaPublicKey::new(
                rsa::BigUint::from_bytes_be(&n),
                rsa::BigUint::from_bytes_be(&e),
            )
            .map_err(|_| DpopReason::Jwk)?;
            if key.n().bits() < MIN_RSA_BITS {
                return Err(DpopReason::Jwk);
            }
            Ok(key
                .to_public_key_der()
                .map_err(|_| DpopReason::Jwk)?
                .as_bytes()
                .to_vec())
        }
        AlgorithmParameters::EllipticCurve(params) => {
            if params.curve != EllipticCurve::P256 {
                return Err(DpopReason::Jwk);
            }
            let x = URL_SAFE_NO_PAD
                .decode(&params.x)
                .map_err(|_| DpopReason::Jwk)?;
            let y = URL_SAFE_NO_PAD
                .decode(&params.y)
                .map_err(|_| DpopReason::Jwk)?;
            if x.len() != 32 || y.len() != 32 {
                return Err(DpopReason::Jwk);
            }
            let point = p256::EncodedPoint::from_affine_coordinates(
                p256::FieldBytes::from_slice(&x),
                p256::FieldBytes::from_slice(&y),
                false,
            );
            let key: Option<p256::PublicKey> = p256::PublicKey::from_encoded_point(&point).into();
            let key = key.ok_or(DpopReason::Jwk)?;
            use p256::pkcs8::EncodePublicKey as _;
            Ok(key
                .to_public_key_der()
                .map_err(|_| DpopReason::Jwk)?
                .as_bytes()
                .to_vec())
        }
        _ => Err(DpopReason::Jwk),
    }
}

/// RFC 7638 JWK thumbprint (SHA-256 over the canonical required members),
/// base64url without padding. Used for audit logging only.
#[must_use]
pub fn jwk_thumbprint(jwk: &Jwk) -> Option<String> {
    let canonical = match &jwk.algorithm {
        AlgorithmParameters::RSA(p) => {
            format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, p.e, p.n)
        }
        AlgorithmParameters::EllipticCurve(p) if p.curve == EllipticCurve::P256 => {
            format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, p.x, p.y)
        }
        _ => return None,
    };
    let digest = Sha256::digest(canonical.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(digest))
}

// ──────────────────── client-side proof generation ────────────────────

/// Builds proofs with the client's own key: public JWK in the header, fresh
/// `jti`, `iat = now`, signed with the private key. RSA (RS256) material,
/// matching the certificates the fleet deploys with.
pub struct ProofSigner {
    signing_key: EncodingKey,
    jwk: Jwk,
    spki_der: Vec<u8>,
}

impl ProofSigner {
    /// Load the client's RSA private key (PKCS#8 or PKCS#1 PEM).
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(pem).map_err(|_| PalioxisError::TlsSetup {
            details: "client key is not valid PEM text".to_string(),
        })?;
        let private = RsaPrivateKey::from_pkcs8_pem(text)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(text))
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("client key unreadable: {err}"),
            })?;
        let public = private.to_public_key();

        let jwk = Jwk {
            common: CommonParameters::default(),
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
            }),
        };
        let spki_der = public
            .to_public_key_der()
            .map_err(|err| PalioxisError::TlsSetup {
                details: format!("client key SPKI encoding: {err}"),
            })?
            .as_bytes()
            .to_vec();
        let signing_key = EncodingKey::from_rsa_pem(pem).map_err(|err| PalioxisError::TlsSetup {
            details: format!("client key unusable for signing: {err}"),
        })?;

        Ok(Self {
            signing_key,
            jwk,
            spki_der,
        })
    }

    /// Load from a key file on disk.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let pem = fs::read(path).map_err(|source| PalioxisError::io(path, source))?;
        Self::from_rsa_pem(&pem)
    }

    /// Fresh proof for a request happening now.
    pub fn proof(&self, method: &str, url: &str) -> Result<String> {
        self.proof_at(method, url, Utc::now().timestamp())
    }

    /// Proof with an explicit `iat` (backdating is useful for drills and
    /// freshness tests; the server will reject anything outside the window).
    pub fn proof_at(&self, method: &str, url: &str, iat: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("dpop+jwt".to_string());
        header.jwk = Some(self.jwk.clone());

        let claims = DpopClaims {
            iat,
            jti: Uuid::new_v4().to_string(),
            htm: method.to_string(),
            htu: url.to_string(),
        };

        encode(&header, &claims, &self.signing_key).map_err(|err| PalioxisError::TlsSetup {
            details: format!("proof signing: {err}"),
        })
    }

    /// The public JWK embedded in generated proofs.
    #[must_use]
    pub const fn public_jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// DER SubjectPublicKeyInfo of the signing key.
    #[must_use]
    pub fn public_spki_der(&self) -> &[u8] {
        &self.spki_der
    }
}
