//! Per-site auth tokens

use crate::error::ControllerError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Random bytes per token (256 bits)
const TOKEN_BYTES: usize = 32;

/// Generates a URL-safe token from the operating system CSPRNG.
pub fn generate_token() -> Result<String, ControllerError> {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| ControllerError::TokenGeneration(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}
