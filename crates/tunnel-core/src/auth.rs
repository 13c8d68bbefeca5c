use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use parking_lot::RwLock;
use pem::Pem;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, TunnelError};

/// Byte length of a session id / auth token, and not coincidentally the byte
/// length of a 340-bit RSA modulus (`ceil(340 / 8)`): OAEP ciphertexts under
/// the UIMA keypair are exactly one modulus wide, so the control frame's
/// fixed key field carries either one without padding.
pub const TOKEN_LEN: usize = 43;

/// Bound on simultaneously-parked connections per session (§ concurrency).
pub const POOL_SIZE: usize = 5;

const RSA_BITS: usize = 340;
const MAX_TOKENS: usize = 255;

/// PEM type label the source (`auth/key.go`, via `x509.MarshalPKIXPublicKey`)
/// writes over a PKIX `SubjectPublicKeyInfo` DER body. Rust's `pkcs8` crate
/// reserves that label for its own `to_public_key_pem`/`from_public_key_pem`
/// helpers (which reject anything else), so this dumps/loads the PKIX DER
/// through `pem` directly instead of trusting the label round-trip.
const PUBLIC_KEY_PEM_LABEL: &str = "RSA PUBLIC KEY";

/// Derives the 43-character lowercase URL-safe-base64 id used both as a
/// session id (from an auth token) and as a freshly minted UIMA token (from a
/// random UUID). `base64::URL_SAFE` pads a 32-byte SHA-256 digest out to 44
/// characters; truncating to 43 drops exactly the padding character.
pub fn sha256_b64url43(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let encoded = URL_SAFE.encode(digest);
    encoded.to_lowercase()[..TOKEN_LEN].to_string()
}

fn dummy_token() -> String {
    "0".repeat(TOKEN_LEN)
}

/// An RSA-OAEP-SHA1 keypair sized to fit one modulus inside a control frame's
/// key field.
struct KeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl KeyPair {
    fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
            .map_err(|e| TunnelError::Crypto(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self { private_key, public_key })
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        self.private_key
            .decrypt(Oaep::new::<Sha1>(), cipher)
            .map_err(|e| TunnelError::Crypto(e.to_string()))
    }

    /// Dumps the public half as a PEM block wrapping a PKIX
    /// `SubjectPublicKeyInfo`, matching `x509.MarshalPKIXPublicKey` on the
    /// source side bit-for-bit (modulo the conventional PEM label, see
    /// [`PUBLIC_KEY_PEM_LABEL`]).
    fn dump_public_key(&self) -> Result<String> {
        let der = self
            .public_key
            .to_public_key_der()
            .map_err(|e| TunnelError::Crypto(e.to_string()))?;
        Ok(pem::encode(&Pem::new(PUBLIC_KEY_PEM_LABEL, der.as_bytes().to_vec())))
    }
}

/// Encrypts `msg` under a PEM-encoded PKIX RSA public key (the format
/// [`KeyPair::dump_public_key`] writes). Used by clients (the CLI's
/// `generate-key`/`revoke-key` commands) that only ever hold the public half
/// of the listener's UIMA keypair.
pub fn encrypt_with_public_key_pem(pem: &str, msg: &[u8]) -> Result<Vec<u8>> {
    let parsed = pem::parse(pem).map_err(|e| TunnelError::Crypto(e.to_string()))?;
    let public_key = RsaPublicKey::from_public_key_der(parsed.contents())
        .map_err(|e| TunnelError::Crypto(e.to_string()))?;
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), msg)
        .map_err(|e| TunnelError::Crypto(e.to_string()))
}

struct TokenStore {
    tokens: HashMap<String, u32>,
    minted: u32,
}

/// The listener's token authority, in one of two mutually exclusive modes:
///
/// - Default mode accepts a single well-known dummy token for every CREATE.
/// - UIMA mode holds an RSA keypair and a table of minted tokens, and
///   requires every CREATE to present a token this authority issued.
///
/// Mirrors the static-credentials-plus-background-mutation shape of a
/// credential store that's read far more often than it's written, hence
/// `parking_lot::RwLock` over the async-aware alternative.
pub struct AuthAuthority {
    keypair: Option<KeyPair>,
    tokens: RwLock<TokenStore>,
}

impl AuthAuthority {
    pub fn new_default() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(dummy_token(), 1);
        Self {
            keypair: None,
            tokens: RwLock::new(TokenStore { tokens, minted: 1 }),
        }
    }

    pub fn new_uima() -> Result<Self> {
        Ok(Self {
            keypair: Some(KeyPair::generate()?),
            tokens: RwLock::new(TokenStore {
                tokens: HashMap::new(),
                minted: 0,
            }),
        })
    }

    pub fn is_uima(&self) -> bool {
        self.keypair.is_some()
    }

    pub fn public_key_pem(&self) -> Option<String> {
        self.keypair.as_ref().and_then(|kp| kp.dump_public_key().ok())
    }

    pub fn is_valid_auth_token(&self, token: &str) -> bool {
        self.tokens.read().tokens.contains_key(token)
    }

    /// Decrypts an OAEP ciphertext under this authority's private key.
    /// Returns [`TunnelError::NotUima`] outside UIMA mode.
    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        self.keypair.as_ref().ok_or(TunnelError::NotUima)?.decrypt(cipher)
    }

    /// Mints a fresh token and assigns it the next sequential id.
    pub fn generate_key(&self) -> Result<(String, u32)> {
        if !self.is_uima() {
            return Err(TunnelError::NotUima);
        }
        let mut guard = self.tokens.write();
        if guard.minted >= MAX_TOKENS as u32 {
            return Err(TunnelError::TooManyKeys);
        }
        let token = sha256_b64url43(Uuid::new_v4().to_string().as_bytes());
        guard.minted += 1;
        let id = guard.minted;
        guard.tokens.insert(token.clone(), id);
        Ok((token, id))
    }

    /// Removes the token assigned `id`, if any, returning it.
    pub fn revoke_key(&self, id: u16) -> Option<String> {
        let mut guard = self.tokens.write();
        let found = guard
            .tokens
            .iter()
            .find(|(_, &v)| v as u16 == id)
            .map(|(k, _)| k.clone());
        if let Some(token) = &found {
            guard.tokens.remove(token);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_b64url43_is_deterministic_and_43_chars() {
        let a = sha256_b64url43(b"hello");
        let b = sha256_b64url43(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), TOKEN_LEN);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn default_authority_accepts_only_the_dummy_token() {
        let auth = AuthAuthority::new_default();
        assert!(auth.is_valid_auth_token(&dummy_token()));
        assert!(!auth.is_valid_auth_token("not-a-real-token"));
        assert!(!auth.is_uima());
    }

    #[test]
    fn uima_authority_mints_and_revokes_tokens() {
        let auth = AuthAuthority::new_uima().unwrap();
        assert!(auth.is_uima());

        let (token, id) = auth.generate_key().unwrap();
        assert_eq!(id, 1);
        assert!(auth.is_valid_auth_token(&token));

        let revoked = auth.revoke_key(id as u16).unwrap();
        assert_eq!(revoked, token);
        assert!(!auth.is_valid_auth_token(&token));
    }

    #[test]
    fn revoking_an_unknown_id_returns_none() {
        let auth = AuthAuthority::new_uima().unwrap();
        assert!(auth.revoke_key(99).is_none());
    }

    #[test]
    fn public_key_round_trips_through_pem_and_oaep() {
        let auth = AuthAuthority::new_uima().unwrap();
        let pem = auth.public_key_pem().unwrap();

        let cipher = encrypt_with_public_key_pem(&pem, b"3").unwrap();
        let plaintext = auth.decrypt(&cipher).unwrap();
        assert_eq!(plaintext, b"3");
    }

    #[test]
    fn default_authority_refuses_uima_only_operations() {
        let auth = AuthAuthority::new_default();
        assert!(matches!(auth.generate_key(), Err(TunnelError::NotUima)));
        assert!(matches!(auth.decrypt(&[0u8; 43]), Err(TunnelError::NotUima)));
    }
}
