//! TAXII Client - Blocking TAXII 1.0/1.1 Client Library
//!
//! A client for the TAXII 1.0 and 1.1 threat intelligence exchange protocols. Requests are
//! built as typed messages, written as TAXII XML, posted over HTTP or HTTPS, and the XML
//! response is read back into typed messages.
//!
//! # Overview
//!
//! ```text
//! Taxii11Template / Taxii10Template
//!   └── Envelope (TAXII headers + XML body)
//!       └── TaxiiConnection → TaxiiHttpClient (proxy, TLS, basic auth)
//!           └── XmlCodec (response body → typed message)
//! ```
//!
//! # Features
//!
//! - **Discovery**: Locate the services a TAXII server offers
//! - **Collection / Feed Information**: List what a server publishes
//! - **Polling**: Fetch content blocks for a time window, optionally by subscription
//! - **Proxy Support**: Explicit or taken from `http.proxyHost`-style environment variables
//! - **Mutual TLS**: Client keys from PEM text or PKCS#12 files, with self-signed server trust
//! - **Preemptive Basic Auth**: Credentials sent on every request without a challenge
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use taxii_client::configs::ConnectionSettings;
//! use taxii_client::connection::TaxiiConnection;
//! use taxii_client::messages::ServiceType;
//! use taxii_client::taxii11_template::Taxii11Template;
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let mut settings = ConnectionSettings::new("http://hailataxii.com/taxii-discovery-service");
//!     settings.username = "guest".to_string();
//!     settings.password = "guest".to_string();
//!
//!     let taxii = Taxii11Template::new(Arc::new(TaxiiConnection::new(settings)?));
//!
//!     let Some(discovery) = taxii.discover()? else {
//!         return Ok(());
//!     };
//!     let Some(management) =
//!         taxii.find_service(&discovery.service_instances, ServiceType::CollectionManagement)
//!     else {
//!         return Ok(());
//!     };
//!     let Some(info) = taxii.collection_information(management)? else {
//!         return Ok(());
//!     };
//!     if let Some(collection) = taxii.find_collection(&info.collections, "system.Default") {
//!         if let Some(poll) = taxii.poll(collection)? {
//!             println!("{} content blocks", poll.content_blocks.len());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`configs`]: TOML configuration and connection settings
//! - [`connection`]: Connection setup and the build-once HTTP client
//! - [`key_store`]: In-memory key and trust stores from PEM text or PKCS#12 files
//! - [`store_source`]: Which configured source a store is loaded from
//! - [`tls`]: rustls client configuration and server certificate trust
//! - [`transport`]: HTTP transport and preemptive basic authentication
//! - [`envelope`]: TAXII HTTP binding headers
//! - [`messages`]: TAXII 1.0 and 1.1 messages and their XML codec
//! - [`taxii11_template`]: TAXII 1.1 operations
//! - [`taxii10_template`]: TAXII 1.0 operations
//!
//! # Error Handling
//!
//! All public APIs return `anyhow::Result<T>`. A request that could not be built or sent,
//! a key store that could not be loaded, or a response that could not be read is an error.
//! A server that answers with a non-200 status, or with a status message in place of the
//! expected response, yields `Ok(None)` and an `error!` event:
//!
//! ```no_run
//! use taxii_client::taxii11_template::Taxii11Template;
//! use anyhow::{Context, Result};
//!
//! fn example(taxii: &Taxii11Template) -> Result<()> {
//!     match taxii.discover().context("Discovery failed")? {
//!         Some(discovery) => println!("{} services", discovery.service_instances.len()),
//!         None => println!("Server refused the discovery request"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod configs;
pub mod connection;
pub mod envelope;
pub mod key_store;
pub mod messages;
pub mod store_source;
pub mod taxii10_template;
pub mod taxii11_template;
pub mod template;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod test_pki;
