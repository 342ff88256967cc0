//! In-memory credential stores for TLS key and trust material
//!
//! A [`CredentialStore`] is an ordered collection of entries, each registered under a
//! freshly generated alias. Stores are built once from one of three inputs:
//!
//! - PEM text: a PKCS#8 RSA private key with its certificate chain, or a list of
//!   trusted certificates
//! - A PKCS#12 file protected by a password
//! - A store assembled directly by the caller
//!
//! Key entries keep their private key and the chain presented for it (leaf first).
//! The key password of a store is held in a [`secrecy::Secret`] so it never appears
//! in debug output.
//!
//! # Example
//!
//! ```no_run
//! use taxii_client::key_store::CredentialStore;
//!
//! # fn example(key_pem: &str, leaf_pem: String, issuer_pem: String) -> anyhow::Result<()> {
//! let store = CredentialStore::from_pem_key(key_pem, Some(&[leaf_pem, issuer_pem]))?;
//! assert_eq!(store.len(), 3);
//! assert!(store.key_password().is_some());
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::stack::Stack;
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

const PEM_DELIMITER: &str = "-----";

/// A single entry of a [`CredentialStore`]
#[derive(Clone)]
pub enum StoreEntry {
    /// A certificate accepted as a trust anchor
    TrustedCertificate(X509),
    /// A private key and the certificate chain presented for it, leaf first
    PrivateKey { key: PKey<Private>, chain: Vec<X509> },
}

impl fmt::Debug for StoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEntry::TrustedCertificate(cert) => f
                .debug_tuple("TrustedCertificate")
                .field(&common_name(cert))
                .finish(),
            StoreEntry::PrivateKey { chain, .. } => f
                .debug_struct("PrivateKey")
                .field("key", &"<redacted>")
                .field(
                    "chain",
                    &chain.iter().map(|cert| common_name(cert)).collect::<Vec<_>>(),
                )
                .finish(),
        }
    }
}

/// Ordered collection of certificate and key entries keyed by random aliases
pub struct CredentialStore {
    entries: Vec<(String, StoreEntry)>,
    key_password: Option<Secret<String>>,
}

impl CredentialStore {
    /// Create an empty store without a key password
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            key_password: None,
        }
    }

    /// Attach the password protecting the key entries of this store
    pub fn with_key_password(mut self, password: impl Into<String>) -> Self {
        self.key_password = Some(Secret::new(password.into()));
        self
    }

    /// Register a trusted certificate and return its alias
    pub fn add_certificate(&mut self, certificate: X509) -> String {
        let alias = Uuid::new_v4().to_string();
        self.entries
            .push((alias.clone(), StoreEntry::TrustedCertificate(certificate)));
        alias
    }

    /// Register a private key with its certificate chain and return its alias
    pub fn add_key(&mut self, key: PKey<Private>, chain: Vec<X509>) -> String {
        let alias = Uuid::new_v4().to_string();
        self.entries
            .push((alias.clone(), StoreEntry::PrivateKey { key, chain }));
        alias
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(alias, entry)` pairs in insertion order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &StoreEntry)> {
        self.entries
            .iter()
            .map(|(alias, entry)| (alias.as_str(), entry))
    }

    /// Look up an entry by alias
    pub fn get(&self, alias: &str) -> Option<&StoreEntry> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == alias)
            .map(|(_, entry)| entry)
    }

    /// All certificates registered as trusted entries, in insertion order
    pub fn trusted_certificates(&self) -> Vec<&X509> {
        self.entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                StoreEntry::TrustedCertificate(cert) => Some(cert),
                StoreEntry::PrivateKey { .. } => None,
            })
            .collect()
    }

    /// The first key entry of the store, used for TLS client authentication
    pub fn first_key(&self) -> Option<(&PKey<Private>, &[X509])> {
        self.entries.iter().find_map(|(_, entry)| match entry {
            StoreEntry::PrivateKey { key, chain } => Some((key, chain.as_slice())),
            StoreEntry::TrustedCertificate(_) => None,
        })
    }

    /// Password protecting the key entries, if one was set or generated
    pub fn key_password(&self) -> Option<&str> {
        self.key_password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
    }

    /// Build a key store from a PEM-encoded PKCS#8 RSA private key and its certificate chain
    ///
    /// Every chain certificate is registered as its own entry, and the key entry references
    /// the same chain in the given order. A random key password is generated for the store.
    ///
    /// # Errors
    /// Fails when the key is not base64 PKCS#8, is not RSA, or when any certificate of the
    /// chain cannot be parsed. The error names the offending PEM text.
    pub fn from_pem_key(private_key_pem: &str, chain_pems: Option<&[String]>) -> Result<Self> {
        let key = decode_pkcs8_rsa_key(private_key_pem)?;

        let mut store = Self::new().with_key_password(Uuid::new_v4().to_string());
        let chain = match chain_pems {
            Some(pems) => store.add_pem_certificates(pems)?,
            None => Vec::new(),
        };
        store.add_key(key, chain);

        Ok(store)
    }

    /// Build a trust store holding one entry per PEM-encoded certificate
    pub fn from_trusted_pems(pems: &[String]) -> Result<Self> {
        let mut store = Self::new();
        store.add_pem_certificates(pems)?;
        Ok(store)
    }

    /// Load a PKCS#12 file protected by `password`
    ///
    /// A private key found in the file becomes a key entry whose chain is the file's
    /// certificate followed by its CA certificates. Every certificate is also registered
    /// as a trusted entry, so the same file format serves as key store and trust store.
    pub fn from_pkcs12_file<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        let path = path.as_ref();
        let der = std::fs::read(path)
            .with_context(|| format!("Failed to read store file {}", path.display()))?;

        let parsed = Pkcs12::from_der(&der)
            .context("Failed to decode PKCS#12 structure")?
            .parse2(password)
            .context("Failed to decrypt PKCS#12 store, check the password")?;

        let mut certificates = Vec::new();
        if let Some(cert) = parsed.cert {
            certificates.push(cert);
        }
        if let Some(ca) = parsed.ca {
            certificates.extend(ca.iter().map(|cert| cert.to_owned()));
        }

        let mut store = Self::new().with_key_password(password);
        for cert in &certificates {
            store.add_certificate(cert.clone());
        }
        if let Some(key) = parsed.pkey {
            store.add_key(key, certificates);
        }

        Ok(store)
    }

    /// Export the first key entry and its chain as a PKCS#12 structure
    ///
    /// The store's key password protects the export; a store without password
    /// exports with an empty one.
    pub fn to_pkcs12_der(&self, friendly_name: &str) -> Result<Vec<u8>> {
        let (key, chain) = self
            .first_key()
            .ok_or_else(|| anyhow!("Store holds no private key entry to export"))?;

        let mut builder = Pkcs12::builder();
        builder.name(friendly_name).pkey(key);
        if let Some((leaf, issuers)) = chain.split_first() {
            builder.cert(leaf);
            if !issuers.is_empty() {
                let mut ca = Stack::new()?;
                for issuer in issuers {
                    ca.push(issuer.clone())?;
                }
                builder.ca(ca);
            }
        }

        let pkcs12 = builder
            .build2(self.key_password().unwrap_or(""))
            .context("Failed to build PKCS#12 structure")?;

        pkcs12.to_der().context("Failed to encode PKCS#12 structure")
    }

    fn add_pem_certificates(&mut self, pems: &[String]) -> Result<Vec<X509>> {
        let mut added = Vec::with_capacity(pems.len());
        for pem in pems {
            let cert = X509::from_pem(pem.as_bytes())
                .map_err(|e| anyhow!("unable to load PEM: {}, {}", pem, e))?;
            self.add_certificate(cert.clone());
            added.push(cert);
        }
        Ok(added)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("entries", &self.entries)
            .field(
                "key_password",
                &self.key_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Decode a PEM-wrapped PKCS#8 RSA private key
///
/// Delimiter lines are dropped and the remaining base64 payload is decoded, so keys whose
/// delimiters share a line with the payload are accepted too.
fn decode_pkcs8_rsa_key(private_key_pem: &str) -> Result<PKey<Private>> {
    let payload: String = private_key_pem
        .split(PEM_DELIMITER)
        .step_by(2)
        .flat_map(str::chars)
        .filter(|c| !c.is_whitespace())
        .collect();

    let der = STANDARD
        .decode(payload.as_bytes())
        .context("private key is not valid base64")?;

    let key = PKey::private_key_from_pkcs8(&der)
        .context("private key is not a PKCS#8 structure")?;

    if key.id() != Id::RSA {
        return Err(anyhow!("private key algorithm must be RSA, found {:?}", key.id()));
    }

    Ok(key)
}

fn common_name(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
        .unwrap_or_else(|| "<no common name>".to_string())
}
