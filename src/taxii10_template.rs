//! TAXII 1.0 client operations
//!
//! 1.0 servers publish feeds rather than collections and are reached through a
//! feed management service.

use crate::connection::TaxiiConnection;
use crate::messages::taxii10::{
    DiscoveryRequest, DiscoveryResponse, FeedInformationRequest, FeedInformationResponse,
    FeedRecord, PollOutcome, PollRequest, PollResponse,
};
use crate::messages::{ServiceInstance, ServiceType};
use crate::template::{
    self, default_poll_window, generate_message_id, log_status, parse_service_url,
    resolve_poll_window,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Discovery, feed information and polling against a TAXII 1.0 server
#[derive(Debug, Clone)]
pub struct Taxii10Template {
    connection: Arc<TaxiiConnection>,
}

impl Taxii10Template {
    pub fn new(connection: Arc<TaxiiConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &TaxiiConnection {
        &self.connection
    }

    pub fn discover(&self) -> Result<Option<DiscoveryResponse>> {
        let request = DiscoveryRequest {
            message_id: generate_message_id(),
        };
        template::exchange(&self.connection, self.connection.discovery_url(), &request)
    }

    pub fn find_service<'a>(
        &self,
        services: &'a [ServiceInstance],
        service_type: ServiceType,
    ) -> Option<&'a ServiceInstance> {
        template::find_service(services, service_type)
    }

    pub fn find_feed<'a>(&self, feeds: &'a [FeedRecord], name: &str) -> Option<&'a FeedRecord> {
        feeds.iter().find(|feed| feed.feed_name == name)
    }

    /// Ask a feed management service for its feeds
    pub fn feed_information(
        &self,
        service: &ServiceInstance,
    ) -> Result<Option<FeedInformationResponse>> {
        self.feed_information_at(&service.address)
    }

    pub fn feed_information_at(&self, url: &str) -> Result<Option<FeedInformationResponse>> {
        let url = parse_service_url(url)?;
        let request = FeedInformationRequest {
            message_id: generate_message_id(),
        };
        template::exchange(&self.connection, &url, &request)
    }

    /// Poll the last 24 hours of a feed, without a subscription
    pub fn poll(&self, feed: &FeedRecord) -> Result<Option<PollResponse>> {
        let (begin, end) = default_poll_window();
        self.poll_with(feed, None, Some(begin), Some(end))
    }

    pub fn poll_with(
        &self,
        feed: &FeedRecord,
        subscription_id: Option<&str>,
        exclusive_begin: Option<DateTime<Utc>>,
        inclusive_end: Option<DateTime<Utc>>,
    ) -> Result<Option<PollResponse>> {
        let service = feed
            .polling_services
            .first()
            .ok_or_else(|| anyhow!("feed {} has no polling service", feed.feed_name))?;

        self.poll_at(
            &service.address,
            &feed.feed_name,
            subscription_id,
            exclusive_begin,
            inclusive_end,
        )
    }

    /// Poll `feed_name` at the poll service `url`
    ///
    /// A missing bound of the window defaults to the last 24 hours. A status
    /// message in place of the poll response is logged and yields `None`.
    pub fn poll_at(
        &self,
        url: &str,
        feed_name: &str,
        subscription_id: Option<&str>,
        exclusive_begin: Option<DateTime<Utc>>,
        inclusive_end: Option<DateTime<Utc>>,
    ) -> Result<Option<PollResponse>> {
        let url = parse_service_url(url)?;
        let (exclusive_begin, inclusive_end) = resolve_poll_window(exclusive_begin, inclusive_end);
        let request = PollRequest {
            message_id: generate_message_id(),
            feed_name: feed_name.to_string(),
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
                    feed_name
                );
                Ok(Some(poll))
            }
            Some(PollOutcome::Status(status)) => {
                log_status(response.status, &status);
                Ok(None)
            }
        }
    }
}
