//! Deliverable manifests: canonical hashing and keyed signing.
//!
//! The manifest hash is content-addressed (SHA-256 of the canonical
//! encoding) and the signature is an HMAC-SHA-256 over the same bytes, so
//! identical manifests always produce byte-identical hashes and signatures.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::canonical::{canonical_json, sha256_hex};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

#[derive(Error, Debug)]
pub enum SignError {
    #[error("could not canonicalize manifest: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("signing key rejected")]
    InvalidKey,

    #[error("manifest signature mismatch")]
    SignatureMismatch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverableManifest {
    pub job_id: String,
    pub assignment_id: String,
    pub bid_id: String,
    pub agent_id: String,
    pub deliverable_url: String,
    pub artifact_hash: String,
    /// Canonical instant string; kept as text so the hashed bytes never
    /// depend on a datetime formatter.
    pub created_at: String,
    pub metadata: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSignature {
    pub algorithm: String,
    pub signer_id: String,
    pub signature_hex: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedManifest {
    pub manifest: DeliverableManifest,
    pub manifest_hash: String,
    pub signature: ManifestSignature,
}

pub fn sign(
    manifest: &DeliverableManifest,
    signing_key: &[u8],
    signer_id: &str,
) -> Result<SignedManifest, SignError> {
    let canonical = canonical_json(manifest)?;
    let manifest_hash = sha256_hex(canonical.as_bytes());

    let mut mac =
        HmacSha256::new_from_slice(signing_key).map_err(|_| SignError::InvalidKey)?;
    mac.update(canonical.as_bytes());
    let signature_hex = hex::encode(mac.finalize().into_bytes());

    Ok(SignedManifest {
        manifest: manifest.clone(),
        manifest_hash,
        signature: ManifestSignature {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            signer_id: signer_id.to_string(),
            signature_hex,
        },
    })
}

/// Recomputes the canonical bytes from `signed.manifest` and compares the
/// HMAC in constant time. A wrong algorithm tag or undecodable signature is
/// simply not a valid signature.
pub fn verify(signed: &SignedManifest, signing_key: &[u8]) -> Result<bool, SignError> {
    if signed.signature.algorithm != SIGNATURE_ALGORITHM {
        return Ok(false);
    }

    let Ok(given) = hex::decode(&signed.signature.signature_hex) else {
        return Ok(false);
    };

    let canonical = canonical_json(&signed.manifest)?;
    let mut mac =
        HmacSha256::new_from_slice(signing_key).map_err(|_| SignError::InvalidKey)?;
    mac.update(canonical.as_bytes());

    Ok(mac.verify_slice(&given).is_ok())
}

/// Hash of the unsigned canonical manifest; used when no signing key is
/// configured.
pub fn manifest_hash(manifest: &DeliverableManifest) -> Result<String, SignError> {
    Ok(sha256_hex(canonical_json(manifest)?.as_bytes()))
}
