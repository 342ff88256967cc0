//! TAXII 1.1 client operations
//!
//! ```no_run
//! use std::sync::Arc;
//! use taxii_client::configs::ConnectionSettings;
//! use taxii_client::connection::TaxiiConnection;
//! use taxii_client::messages::ServiceType;
//! use taxii_client::taxii11_template::Taxii11Template;
//!
//! # fn example() -> anyhow::Result<()> {
//! let connection = TaxiiConnection::new(ConnectionSettings::new(
//!     "http://hailataxii.com/taxii-discovery-service",
//! ))?;
//! let taxii = Taxii11Template::new(Arc::new(connection));
//!
//! if let Some(discovery) = taxii.discover()? {
//!     let management =
//!         taxii.find_service(&discovery.service_instances, ServiceType::CollectionManagement);
//!     if let Some(service) = management {
//!         let collections = taxii.collection_information(service)?;
//!         println!("{:?}", collections);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::connection::TaxiiConnection;
use crate::messages::taxii11::{
    CollectionInformationRequest, CollectionInformationResponse, CollectionRecord,
    DiscoveryRequest, DiscoveryResponse, PollOutcome, PollRequest, PollResponse,
};
use crate::messages::{ServiceInstance, ServiceType, StatusMessage};
use crate::template::{
    self, default_poll_window, generate_message_id, log_status, parse_service_url,
    resolve_poll_window,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// Discovery, collection information and polling against a TAXII 1.1 server
///
/// Every operation returns `Ok(None)` when the server answered with anything other
/// than HTTP 200, or with a status message in place of the expected response.
/// Errors are reserved for requests that could not be built or sent, and for
/// responses that could not be read.
#[derive(Debug, Clone)]
pub struct Taxii11Template {
    connection: Arc<TaxiiConnection>,
}

impl Taxii11Template {
    pub fn new(connection: Arc<TaxiiConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &TaxiiConnection {
        &self.connection
    }

    /// Run a discovery request against the connection's discovery URL
    pub fn discover(&self) -> Result<Option<DiscoveryResponse>> {
        let request = DiscoveryRequest {
            message_id: generate_message_id(),
        };
        template::exchange(&self.connection, self.connection.discovery_url(), &request)
    }

    /// First service of the given type
    pub fn find_service<'a>(
        &self,
        services: &'a [ServiceInstance],
        service_type: ServiceType,
    ) -> Option<&'a ServiceInstance> {
        template::find_service(services, service_type)
    }

    /// First collection called `name`
    pub fn find_collection<'a>(
        &self,
        collections: &'a [CollectionRecord],
        name: &str,
    ) -> Option<&'a CollectionRecord> {
        collections
            .iter()
            .find(|collection| collection.collection_name == name)
    }

    /// Ask a collection management service for its collections
    pub fn collection_information(
        &self,
        service: &ServiceInstance,
    ) -> Result<Option<CollectionInformationResponse>> {
        self.collection_information_at(&service.address)
    }

    pub fn collection_information_at(
        &self,
        url: &str,
    ) -> Result<Option<CollectionInformationResponse>> {
        let url = parse_service_url(url)?;
        let request = CollectionInformationRequest {
            message_id: generate_message_id(),
        };
        template::exchange(&self.connection, &url, &request)
    }

    /// Poll the last 24 hours of a collection, without a subscription
    pub fn poll(&self, collection: &CollectionRecord) -> Result<Option<PollResponse>> {
        let (begin, end) = default_poll_window();
        self.poll_with(collection, None, Some(begin), Some(end))
    }

    /// Poll a collection through its first polling service
    pub fn poll_with(
        &self,
        collection: &CollectionRecord,
        subscription_id: Option<&str>,
        exclusive_begin: Option<DateTime<Utc>>,
        inclusive_end: Option<DateTime<Utc>>,
    ) -> Result<Option<PollResponse>> {
        let service = collection.polling_services.first().ok_or_else(|| {
            anyhow!(
                "collection {} has no polling service",
                collection.collection_name
            )
        })?;

        self.poll_at(
            &service.address,
            &collection.collection_name,
            subscription_id,
            exclusive_begin,
            inclusive_end,
        )
    }

    /// Poll `collection_name` at the poll service `url`
    ///
    /// A missing bound of the window defaults to the last 24 hours.
    ///
    /// When the server answers with a status message, the same request is sent
    /// once more and the status message it returns is logged; the poll then
    /// yields `None`, even when the second response is not a readable status
    /// message. Only a failure to send the second request is an error.
    pub fn poll_at(
        &self,
        url: &str,
        collection_name: &str,
        subscription_id: Option<&str>,
        exclusive_begin: Option<DateTime<Utc>>,
        inclusive_end: Option<DateTime<Utc>>,
    ) -> Result<Option<PollResponse>> {
        let url = parse_service_url(url)?;
        let (exclusive_begin, inclusive_end) = resolve_poll_window(exclusive_begin, inclusive_end);
        let request = PollRequest {
            message_id: generate_message_id(),
            collection_name: collection_name.to_string(),
            exclusive_begin: Some(exclusive_begin),
            inclusive_end: Some(inclusive_end),
            subscription_id: subscription_id.map(str::to_string),
        };

        let response = template::send(&self.connection, &url, &request)?;
        match template::respond::<PollOutcome>(&self.connection, &response)? {
            None => Ok(None),
            Some(PollOutcome::Poll(poll)) => {
                info!(
                    "Polled {} content blocks from {}",
                    poll.content_blocks.len(),
                    collection_name
                );
                Ok(Some(poll))
            }
            Some(PollOutcome::Status(_)) => {
                error!(
                    "Poll request failed, response contained a status message instead of a poll response, requesting again to retrieve the status message"
                );

                let retry = template::send(&self.connection, &url, &request)?;
                if !retry.is_ok() {
                    error!(
                        "Error polling, status: {}, status message could not be fetched again, server answered {}",
                        response.status, retry.status
                    );
                    return Ok(None);
                }

                let decoded: Result<StatusMessage> = self
                    .connection
                    .http_client()?
                    .codec()
                    .decode(retry.content_type.as_deref(), &retry.body);
                match decoded {
                    Ok(status) => log_status(retry.status, &status),
                    Err(e) => error!(
                        "Error polling, status: {}, second response was not a status message: {:#}",
                        response.status, e
                    ),
                }

                Ok(None)
            }
        }
    }
}
