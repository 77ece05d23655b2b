// SPDX-License-Identifier: Apache-2.0
//! HMAC-SHA-256 authentication tag framing: `HEX64 "|" PAYLOAD`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CodecError;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: u8 = b'|';

/// Signs `payload` under `secret`, returning `HEX64 "|" PAYLOAD`.
///
/// Callers must not invoke this with an empty secret — an empty secret
/// means "no authentication" and callers should emit `payload` unprefixed.
pub(crate) fn sign(secret: &str, payload: &[u8]) -> Vec<u8> {
    // HMAC-SHA-256 accepts keys of any length (RFC 2104); this never fails.
    #[allow(clippy::unwrap_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(64 + 1 + payload.len());
    out.extend_from_slice(hex::encode(tag).as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(payload);
    out
}

/// Splits `framed` into its payload after verifying the authentication tag
/// under `secret`. Returns [`CodecError::SignatureMismatch`] on any failure
/// to parse or verify.
pub(crate) fn verify<'a>(secret: &str, framed: &'a [u8]) -> Result<&'a [u8], CodecError> {
    let separator_pos = framed
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or(CodecError::SignatureMismatch)?;
    let (hex_tag, rest) = framed.split_at(separator_pos);
    let payload = &rest[1..];

    if hex_tag.len() != 64 {
        return Err(CodecError::SignatureMismatch);
    }
    let expected = hex::decode(hex_tag).map_err(|_| CodecError::SignatureMismatch)?;

    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| CodecError::SignatureMismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| CodecError::SignatureMismatch)?;

    Ok(payload)
}
