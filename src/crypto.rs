//! Token encryption-at-rest helper (§4.1, §6)
//!
//! The encryption tool itself is an external collaborator (§1); this
//! module only implements the Relay's half of the contract — decrypting
//! `ENC:<base64>` wrapped config values at load time. Ciphertext layout
//! is `IV (16 bytes) || AES-256-CBC(plaintext, PKCS7)`, matching the "IV
//! prefix in ciphertext" note in §4.1. The key is padded with zero bytes
//! or truncated to exactly 32 bytes, as the spec requires.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use base64::Engine;

use crate::error::{RelayError, RelayResult};

const ENC_PREFIX: &str = "ENC:";
const KEY_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Decrypt `value` if it is wrapped as `ENC:<base64>`; otherwise return
/// it unchanged. Returns an error if the value is wrapped but no key
/// was configured, or decryption fails.
pub fn decrypt_if_wrapped(value: &str, key: Option<&str>) -> RelayResult<String> {
    let Some(ciphertext_b64) = value.strip_prefix(ENC_PREFIX) else {
        return Ok(value.to_string());
    };
    let key = key.ok_or_else(|| {
        RelayError::config("value is ENC:-wrapped but no decryption key was configured")
    })?;
    decrypt(ciphertext_b64, key)
}

fn normalize_key(key: &str) -> [u8; KEY_LEN] {
    let mut buf = [0u8; KEY_LEN];
    let bytes = key.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn decrypt(ciphertext_b64: &str, key: &str) -> RelayResult<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| RelayError::config(format!("invalid ENC: base64: {e}")))?;
    if raw.len() < BLOCK_LEN {
        return Err(RelayError::config("ENC: ciphertext shorter than one IV block"));
    }
    let (iv, ciphertext) = raw.split_at(BLOCK_LEN);
    let key_bytes = normalize_key(key);

    let mut buf = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new(&key_bytes.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| RelayError::config(format!("ENC: decryption failed: {e}")))?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|e| RelayError::config(format!("ENC: plaintext not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<Aes256>;

    fn encrypt(plaintext: &str, key: &str, iv: [u8; BLOCK_LEN]) -> String {
        let key_bytes = normalize_key(key);
        let mut buf = plaintext.as_bytes().to_vec();
        buf.resize(buf.len() + BLOCK_LEN, 0);
        let pt_len = plaintext.len();
        let ciphertext = Aes256CbcEnc::new(&key_bytes.into(), &iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, pt_len)
            .unwrap();
        let mut out = iv.to_vec();
        out.extend_from_slice(ciphertext);
        base64::engine::general_purpose::STANDARD.encode(out)
    }

    #[test]
    fn round_trips_through_enc_prefix() {
        let key = "a-short-key";
        let iv = [7u8; BLOCK_LEN];
        let wrapped = format!("ENC:{}", encrypt("super-secret-token", key, iv));
        let decrypted = decrypt_if_wrapped(&wrapped, Some(key)).unwrap();
        assert_eq!(decrypted, "super-secret-token");
    }

    #[test]
    fn passes_through_unwrapped_values() {
        assert_eq!(
            decrypt_if_wrapped("plain-token", None).unwrap(),
            "plain-token"
        );
    }

    #[test]
    fn errors_without_key_when_wrapped() {
        assert!(decrypt_if_wrapped("ENC:deadbeef", None).is_err());
    }

    #[test]
    fn key_is_padded_or_truncated() {
        let short_key = "short";
        let long_key = "this-key-is-definitely-longer-than-32-bytes-of-data";
        let iv = [3u8; BLOCK_LEN];
        let wrapped_short = format!("ENC:{}", encrypt("hello", short_key, iv));
        let wrapped_long = format!("ENC:{}", encrypt("hello", long_key, iv));
        assert_eq!(
            decrypt_if_wrapped(&wrapped_short, Some(short_key)).unwrap(),
            "hello"
        );
        assert_eq!(
            decrypt_if_wrapped(&wrapped_long, Some(long_key)).unwrap(),
            "hello"
        );
    }
}
