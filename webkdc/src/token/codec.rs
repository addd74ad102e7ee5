//! Token wire format: `version:1 | nonce:16 | hmac:20 | encrypted_payload`.
//!
//! Encryption is AES-128-CBC with PKCS#7 padding over `creation_time || attrlist`.
//! Authentication is HMAC-SHA-1 over the plaintext (`creation_time || attrlist`),
//! computed before encryption (encrypt-then-MAC) and checked in constant time.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore as _;
use sha1::Sha1;
use subtle::ConstantTimeEq as _;

use crate::attr::{AttrError, AttributeList};
use crate::keyring::{Key, KeyBytes};

const VERSION: u8 = 1;
const NONCE_LEN: usize = 16;
const HMAC_LEN: usize = 20;
const HEADER_LEN: usize = 1 + NONCE_LEN + HMAC_LEN;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token is shorter than the fixed header")]
    Truncated,
    #[error("token has unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("token HMAC does not verify against any available key")]
    BadHmac,
    #[error("token ciphertext did not decrypt to a valid padded plaintext")]
    BadPadding,
    #[error("token plaintext is shorter than the 8-byte creation time")]
    Truncated08,
    #[error("token has expired")]
    Expired,
    #[error("token is stale (exceeds its freshness window)")]
    Stale,
    #[error(transparent)]
    Attr(#[from] AttrError),
    #[error("no key is currently valid for encrypting new tokens")]
    NoValidKey,
}

/// Encrypts `attrs` under `key`, stamping `t=<kind>` if not already present.
///
/// `creation_time_hint` of `0` means "use the current time".
pub fn create_with_key(
    mut attrs: AttributeList,
    kind: &str,
    creation_time_hint: i64,
    now: i64,
    key: &KeyBytes,
) -> Vec<u8> {
    if !attrs.contains("t") {
        attrs.add_str("t", kind);
    }

    let creation_time = if creation_time_hint == 0 { now } else { creation_time_hint };

    let mut plaintext = Vec::with_capacity(8 + attrs.encoded_length());
    plaintext.extend_from_slice(&creation_time.to_be_bytes());
    plaintext.extend_from_slice(&attrs.encode());

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let hmac = compute_hmac(key, &plaintext);

    let mut iv = [0u8; 16];
    iv.copy_from_slice(&nonce);
    let ciphertext = Aes128CbcEnc::new(key.as_bytes().into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.push(VERSION);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&hmac);
    out.extend_from_slice(&ciphertext);
    out
}

/// Encrypts `attrs` under the ring's current encrypting key at `now`.
pub fn create(
    attrs: AttributeList,
    kind: &str,
    creation_time_hint: i64,
    now: i64,
    current_key: Option<&Key>,
) -> Result<Vec<u8>, TokenError> {
    let key = current_key.ok_or(TokenError::NoValidKey)?;
    Ok(create_with_key(attrs, kind, creation_time_hint, now, &key.bytes))
}

/// Decrypts and validates `token` under a single explicit key.
///
/// `ttl_seconds == 0` disables the freshness check.
pub fn parse_with_key(token: &[u8], ttl_seconds: i64, now: i64, key: &KeyBytes) -> Result<AttributeList, TokenError> {
    let (nonce, hmac, ciphertext) = split_header(token)?;

    let mut iv = [0u8; 16];
    iv.copy_from_slice(nonce);
    let plaintext = Aes128CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| TokenError::BadPadding)?;

    let expected_hmac = compute_hmac(key, &plaintext);
    if !bool::from(expected_hmac.ct_eq(hmac)) {
        return Err(TokenError::BadHmac);
    }

    finish_parse(&plaintext, ttl_seconds, now)
}

/// Decrypts and validates `token`, trying every key in `keyring_keys` (expected
/// newest-first) until one verifies the HMAC.
pub fn parse<'a>(
    token: &[u8],
    ttl_seconds: i64,
    now: i64,
    keyring_keys: impl IntoIterator<Item = &'a Key>,
) -> Result<AttributeList, TokenError> {
    let (nonce, hmac, ciphertext) = split_header(token)?;

    let mut iv = [0u8; 16];
    iv.copy_from_slice(nonce);

    for key in keyring_keys {
        let Ok(plaintext) = Aes128CbcDec::new(key.bytes.as_bytes().into(), &iv.into()).decrypt_padded_vec_mut::<Pkcs7>(ciphertext) else {
            continue;
        };

        let expected_hmac = compute_hmac(&key.bytes, &plaintext);
        if bool::from(expected_hmac.ct_eq(hmac)) {
            return finish_parse(&plaintext, ttl_seconds, now);
        }
    }

    Err(TokenError::BadHmac)
}

fn split_header(token: &[u8]) -> Result<(&[u8], &[u8], &[u8]), TokenError> {
    if token.len() < HEADER_LEN {
        return Err(TokenError::Truncated);
    }
    let version = token[0];
    if version != VERSION {
        return Err(TokenError::UnsupportedVersion(version));
    }
    let nonce = &token[1..1 + NONCE_LEN];
    let hmac = &token[1 + NONCE_LEN..HEADER_LEN];
    let ciphertext = &token[HEADER_LEN..];
    Ok((nonce, hmac, ciphertext))
}

fn finish_parse(plaintext: &[u8], ttl_seconds: i64, now: i64) -> Result<AttributeList, TokenError> {
    if plaintext.len() < 8 {
        return Err(TokenError::Truncated08);
    }
    let creation_time = i64::from_be_bytes(plaintext[0..8].try_into().expect("slice is 8 bytes"));
    let attrs = AttributeList::decode(&plaintext[8..])?;

    if let Ok(expiration) = attrs.get_time("et") {
        if now > expiration {
            return Err(TokenError::Expired);
        }
    }

    if ttl_seconds > 0 && now - creation_time > ttl_seconds {
        return Err(TokenError::Stale);
    }

    Ok(attrs)
}

fn compute_hmac(key: &KeyBytes, plaintext: &[u8]) -> [u8; HMAC_LEN] {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(plaintext);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; HMAC_LEN];
    out.copy_from_slice(&full[..HMAC_LEN]);
    out
}
