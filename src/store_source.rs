//! Resolution of the effective key and trust stores
//!
//! A connection can be given its TLS material in several ways at once. The first
//! non-empty source wins, without merging:
//!
//! 1. A [`CredentialStore`] supplied directly
//! 2. A PKCS#12 file and its password
//! 3. PEM text (private key and chain, or a list of trusted certificates)
//!
//! The winning source is loaded on first access and memoized. Later accesses return
//! the same `Arc` without touching the source again.

use crate::configs::ConnectionSettings;
use crate::key_store::CredentialStore;
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Which store a source feeds, used to word configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Key,
    Trust,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreRole::Key => write!(f, "key store"),
            StoreRole::Trust => write!(f, "trust store"),
        }
    }
}

/// The input a store is built from
pub enum StoreSource {
    Supplied(Arc<CredentialStore>),
    File {
        path: PathBuf,
        password: String,
    },
    KeyPem {
        private_key_pem: String,
        chain_pems: Option<Vec<String>>,
    },
    TrustedPems(Vec<String>),
    Empty,
}

impl StoreSource {
    /// Pick the key material source from a supplied store or the connection settings
    pub fn key_material(supplied: Option<CredentialStore>, settings: &ConnectionSettings) -> Self {
        if let Some(store) = supplied {
            return StoreSource::Supplied(Arc::new(store));
        }
        if let Some(path) = &settings.key_store_file {
            return StoreSource::File {
                path: path.clone(),
                password: settings.key_store_password.clone().unwrap_or_default(),
            };
        }
        match &settings.private_key_pem {
            Some(pem) if !pem.trim().is_empty() => StoreSource::KeyPem {
                private_key_pem: pem.clone(),
                chain_pems: settings.client_certificate_pem_chain.clone(),
            },
            _ => StoreSource::Empty,
        }
    }

    /// Pick the trust material source from a supplied store or the connection settings
    pub fn trust_material(
        supplied: Option<CredentialStore>,
        settings: &ConnectionSettings,
    ) -> Self {
        if let Some(store) = supplied {
            return StoreSource::Supplied(Arc::new(store));
        }
        if let Some(path) = &settings.trust_store_file {
            return StoreSource::File {
                path: path.clone(),
                password: settings.trust_store_password.clone().unwrap_or_default(),
            };
        }
        if settings.trusted_pem_certificates.is_empty() {
            StoreSource::Empty
        } else {
            StoreSource::TrustedPems(settings.trusted_pem_certificates.clone())
        }
    }

    fn load(&self, role: StoreRole) -> Result<Option<Arc<CredentialStore>>> {
        match self {
            StoreSource::Supplied(store) => Ok(Some(Arc::clone(store))),
            StoreSource::File { path, password } => {
                let store = CredentialStore::from_pkcs12_file(path, password).with_context(|| {
                    format!("a {} file was set, but it could not be read", role)
                })?;
                Ok(Some(Arc::new(store)))
            }
            StoreSource::KeyPem {
                private_key_pem,
                chain_pems,
            } => {
                let store = CredentialStore::from_pem_key(private_key_pem, chain_pems.as_deref())
                    .with_context(|| format!("unable to create {}", role))?;
                Ok(Some(Arc::new(store)))
            }
            StoreSource::TrustedPems(pems) => {
                let store = CredentialStore::from_trusted_pems(pems)
                    .with_context(|| format!("unable to create {}", role))?;
                Ok(Some(Arc::new(store)))
            }
            StoreSource::Empty => Ok(None),
        }
    }
}

impl fmt::Debug for StoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSource::Supplied(store) => f.debug_tuple("Supplied").field(store).finish(),
            StoreSource::File { path, .. } => f
                .debug_struct("File")
                .field("path", path)
                .field("password", &"<redacted>")
                .finish(),
            StoreSource::KeyPem { chain_pems, .. } => f
                .debug_struct("KeyPem")
                .field("private_key_pem", &"<redacted>")
                .field("chain_len", &chain_pems.as_ref().map(Vec::len))
                .finish(),
            StoreSource::TrustedPems(pems) => {
                f.debug_tuple("TrustedPems").field(&pems.len()).finish()
            }
            StoreSource::Empty => write!(f, "Empty"),
        }
    }
}

/// A store that is loaded from its source once, on first access
#[derive(Debug)]
pub struct LazyStore {
    role: StoreRole,
    source: StoreSource,
    resolved: OnceCell<Option<Arc<CredentialStore>>>,
}

impl LazyStore {
    pub fn new(role: StoreRole, source: StoreSource) -> Self {
        Self {
            role,
            source,
            resolved: OnceCell::new(),
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    /// The effective store, or `None` when no source was configured
    ///
    /// A failed load is not memoized; the error is returned to every caller.
    pub fn get(&self) -> Result<Option<Arc<CredentialStore>>> {
        self.resolved
            .get_or_try_init(|| self.source.load(self.role))
            .cloned()
    }
}
