//! DPoP holder keys and proofs
//!
//! A holder key is a private JWK stored next to the token as
//! `<thumbprint>.jwk`. Two key types are supported:
//!
//! | `kty` | `crv` | `alg` |
//! |-------|-------|-------|
//! | `EC` | `P-256` | `ES256` |
//! | `OKP` | `Ed25519` | `EdDSA` |
//!
//! Each request gets a fresh compact JWS whose header is
//! `{"typ":"dpop+jwt","alg":..,"jwk":<public key>}` and whose claims are
//! `jti`, `htm`, `htu` and `iat`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::Method;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("read holder key {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("holder key is not a valid JWK: {0}")]
    Parse(String),

    #[error("unsupported holder key type {kty}/{crv}")]
    Unsupported { kty: String, crv: String },

    #[error("holder key field '{0}' is missing or not base64url")]
    Field(&'static str),

    #[error("holder key rejected: {0}")]
    Rejected(String),

    #[error("holder key thumbprint {actual} does not match token dpop_jkt {expected}")]
    ThumbprintMismatch { expected: String, actual: String },

    #[error("failed to sign DPoP proof")]
    Signing,
}

/// JSON Web Key, private or public
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    /// Copy without the private part.
    pub fn to_public(&self) -> Self {
        Self { d: None, ..self.clone() }
    }

    /// RFC 7638 SHA-256 thumbprint, base64url encoded.
    pub fn thumbprint(&self) -> String {
        let mut members = BTreeMap::new();
        members.insert("crv", self.crv.as_str());
        members.insert("kty", self.kty.as_str());
        members.insert("x", self.x.as_str());
        if self.kty == "EC" {
            if let Some(y) = &self.y {
                members.insert("y", y.as_str());
            }
        }
        // BTreeMap of strings always serializes
        let canonical = serde_json::to_string(&members).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }
}

enum SigningKey {
    Es256(EcdsaKeyPair),
    EdDsa(Ed25519KeyPair),
}

/// Private holder key able to sign DPoP proofs
pub struct HolderKey {
    key: SigningKey,
    public: Jwk,
    thumbprint: String,
    rng: SystemRandom,
}

impl fmt::Debug for HolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderKey")
            .field("alg", &self.algorithm())
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ProofHeader<'a> {
    typ: &'static str,
    alg: &'static str,
    jwk: &'a Jwk,
}

#[derive(Serialize)]
struct ProofClaims<'a> {
    jti: &'a str,
    htm: &'a str,
    htu: &'a str,
    iat: i64,
}

impl HolderKey {
    /// Build a signing key from a private JWK.
    ///
    /// # Errors
    /// Unsupported key types, missing fields or key material ring rejects.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let d = decode_field(jwk.d.as_deref(), "d")?;
        let x = decode_field(Some(&jwk.x), "x")?;

        let key = match (jwk.kty.as_str(), jwk.crv.as_str()) {
            ("EC", "P-256") => {
                let y = decode_field(jwk.y.as_deref(), "y")?;
                let mut public = Vec::with_capacity(1 + x.len() + y.len());
                public.push(0x04);
                public.extend_from_slice(&x);
                public.extend_from_slice(&y);
                let pair = EcdsaKeyPair::from_private_key_and_public_key(
                    &ECDSA_P256_SHA256_FIXED_SIGNING,
                    &d,
                    &public,
                    &rng,
                )
                .map_err(|e| KeyError::Rejected(e.to_string()))?;
                SigningKey::Es256(pair)
            }
            ("OKP", "Ed25519") => {
                let pair = Ed25519KeyPair::from_seed_and_public_key(&d, &x)
                    .map_err(|e| KeyError::Rejected(e.to_string()))?;
                SigningKey::EdDsa(pair)
            }
            (kty, crv) => {
                return Err(KeyError::Unsupported { kty: kty.to_string(), crv: crv.to_string() })
            }
        };

        Ok(Self { key, public: jwk.to_public(), thumbprint: jwk.thumbprint(), rng })
    }

    /// Read and parse a JWK file.
    ///
    /// # Errors
    /// I/O failures and everything [`from_jwk`](Self::from_jwk) rejects.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| KeyError::Read { path: path.to_path_buf(), source })?;
        let jwk: Jwk = serde_json::from_str(&contents).map_err(|e| KeyError::Parse(e.to_string()))?;
        Self::from_jwk(&jwk)
    }

    /// Load `path` and check it is the key a token is bound to.
    ///
    /// # Errors
    /// [`KeyError::ThumbprintMismatch`] when the thumbprints differ.
    pub fn load_bound(path: &Path, expected_jkt: &str) -> Result<Self, KeyError> {
        let key = Self::load(path)?;
        if key.thumbprint != expected_jkt {
            return Err(KeyError::ThumbprintMismatch {
                expected: expected_jkt.to_string(),
                actual: key.thumbprint,
            });
        }
        Ok(key)
    }

    pub fn algorithm(&self) -> &'static str {
        match self.key {
            SigningKey::Es256(_) => "ES256",
            SigningKey::EdDsa(_) => "EdDSA",
        }
    }

    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public
    }

    /// Sign a proof for `method` and `url` issued now.
    ///
    /// # Errors
    /// [`KeyError::Signing`] when the signer fails.
    pub fn proof(&self, method: &Method, url: &Url) -> Result<String, KeyError> {
        self.proof_at(method, url, Utc::now(), &Uuid::new_v4().to_string())
    }

    /// Sign a proof with an explicit issue time and id.
    ///
    /// # Errors
    /// [`KeyError::Signing`] when the signer fails.
    pub fn proof_at(
        &self,
        method: &Method,
        url: &Url,
        issued_at: DateTime<Utc>,
        jti: &str,
    ) -> Result<String, KeyError> {
        let header = ProofHeader { typ: "dpop+jwt", alg: self.algorithm(), jwk: &self.public };
        let htu = target_uri(url);
        let claims = ProofClaims { jti, htm: method.as_str(), htu: &htu, iat: issued_at.timestamp() };

        let header = serde_json::to_vec(&header).map_err(|_| KeyError::Signing)?;
        let claims = serde_json::to_vec(&claims).map_err(|_| KeyError::Signing)?;
        let signing_input =
            format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(claims));

        let signature = match &self.key {
            SigningKey::Es256(pair) => pair
                .sign(&self.rng, signing_input.as_bytes())
                .map_err(|_| KeyError::Signing)?
                .as_ref()
                .to_vec(),
            SigningKey::EdDsa(pair) => pair.sign(signing_input.as_bytes()).as_ref().to_vec(),
        };

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

/// The `htu` claim: the request URL without query and fragment.
fn target_uri(url: &Url) -> String {
    let mut target = url.clone();
    target.set_query(None);
    target.set_fragment(None);
    target.to_string()
}

fn decode_field(value: Option<&str>, name: &'static str) -> Result<Vec<u8>, KeyError> {
    let value = value.ok_or(KeyError::Field(name))?;
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')).map_err(|_| KeyError::Field(name))
}

#[cfg(test)]
pub(crate) mod tests {
    use ring::rand::SecureRandom;
    use ring::signature::{KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED, ED25519};

    use super::*;

    /// A freshly generated Ed25519 private JWK.
    pub(crate) fn ed25519_jwk() -> Jwk {
        let rng = SystemRandom::new();
        let mut seed = [0u8; 32];
        rng.fill(&mut seed).expect("random seed");
        let pair = Ed25519KeyPair::from_seed_unchecked(&seed).expect("seed accepted");
        Jwk {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            x: URL_SAFE_NO_PAD.encode(pair.public_key().as_ref()),
            y: None,
            d: Some(URL_SAFE_NO_PAD.encode(seed)),
            kid: None,
        }
    }

    fn p256_jwk() -> Jwk {
        Jwk {
            kty: "EC".into(),
            crv: "P-256".into(),
            x: "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU".into(),
            y: Some("x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0".into()),
            d: Some("jpsQnnGQmL-YBIffH1136cLV0Ur3eWSmnHnI8FyBCbg".into()),
            kid: None,
        }
    }

    fn split(proof: &str) -> (serde_json::Value, serde_json::Value, Vec<u8>, String) {
        let parts: Vec<&str> = proof.split('.').collect();
        assert_eq!(parts.len(), 3);
        let header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        let claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        let signature = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        (header, claims, signature, format!("{}.{}", parts[0], parts[1]))
    }

    #[test]
    fn okp_thumbprint_matches_published_vector() {
        let jwk = Jwk {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            x: "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo".into(),
            y: None,
            d: None,
            kid: None,
        };
        assert_eq!(jwk.thumbprint(), "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k");
    }

    #[test]
    fn ed25519_proof_verifies() {
        let jwk = ed25519_jwk();
        let key = HolderKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.algorithm(), "EdDSA");
        assert_eq!(key.thumbprint(), jwk.thumbprint());

        let url = Url::parse("https://api.example:8443/v1/items?page=2#top").unwrap();
        let issued = Utc::now();
        let proof = key.proof_at(&Method::POST, &url, issued, "jti-1").unwrap();
        let (header, claims, signature, input) = split(&proof);

        assert_eq!(header["typ"], "dpop+jwt");
        assert_eq!(header["alg"], "EdDSA");
        assert!(header["jwk"].get("d").is_none());
        assert_eq!(claims["htm"], "POST");
        assert_eq!(claims["htu"], "https://api.example:8443/v1/items");
        assert_eq!(claims["jti"], "jti-1");
        assert_eq!(claims["iat"], issued.timestamp());

        let public = URL_SAFE_NO_PAD.decode(&jwk.x).unwrap();
        UnparsedPublicKey::new(&ED25519, public)
            .verify(input.as_bytes(), &signature)
            .expect("valid signature");
    }

    #[test]
    fn es256_proof_verifies() {
        let jwk = p256_jwk();
        let key = HolderKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.algorithm(), "ES256");

        let url = Url::parse("https://api.example/token").unwrap();
        let proof = key.proof(&Method::GET, &url).unwrap();
        let (header, claims, signature, input) = split(&proof);

        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["jwk"]["crv"], "P-256");
        assert!(claims["jti"].as_str().is_some_and(|j| !j.is_empty()));
        assert_eq!(signature.len(), 64);

        let mut public = vec![0x04];
        public.extend(URL_SAFE_NO_PAD.decode(&jwk.x).unwrap());
        public.extend(URL_SAFE_NO_PAD.decode(jwk.y.as_ref().unwrap()).unwrap());
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public)
            .verify(input.as_bytes(), &signature)
            .expect("valid signature");
    }

    #[test]
    fn proofs_are_unique_per_call() {
        let key = HolderKey::from_jwk(&ed25519_jwk()).unwrap();
        let url = Url::parse("https://api.example/x").unwrap();
        let a = key.proof(&Method::GET, &url).unwrap();
        let b = key.proof(&Method::GET, &url).unwrap();
        assert_ne!(split(&a).1["jti"], split(&b).1["jti"]);
    }

    #[test]
    fn rejects_bad_keys() {
        let mut rsa = ed25519_jwk();
        rsa.kty = "RSA".into();
        assert!(matches!(HolderKey::from_jwk(&rsa), Err(KeyError::Unsupported { .. })));

        let mut public_only = ed25519_jwk();
        public_only.d = None;
        assert!(matches!(HolderKey::from_jwk(&public_only), Err(KeyError::Field("d"))));

        let mut mismatched = ed25519_jwk();
        mismatched.x = ed25519_jwk().x;
        assert!(matches!(HolderKey::from_jwk(&mismatched), Err(KeyError::Rejected(_))));
    }

    #[test]
    fn load_bound_checks_thumbprint() {
        let dir = tempfile::tempdir().unwrap();
        let jwk = ed25519_jwk();
        let path = dir.path().join("key.jwk");
        std::fs::write(&path, serde_json::to_string(&jwk).unwrap()).unwrap();

        HolderKey::load_bound(&path, &jwk.thumbprint()).expect("bound key");
        let err = HolderKey::load_bound(&path, "other").unwrap_err();
        assert!(matches!(err, KeyError::ThumbprintMismatch { .. }));
    }
}
