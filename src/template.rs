//! Request plumbing shared by the TAXII 1.0 and 1.1 templates

use crate::connection::TaxiiConnection;
use crate::envelope::Envelope;
use crate::messages::{FromTaxiiXml, ServiceInstance, ServiceType, StatusMessage, ToTaxiiXml};
use crate::transport::TransportResponse;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use tracing::{debug, error};
use url::Url;

/// Length of the poll window used when none is given
pub const DEFAULT_POLL_WINDOW_HOURS: i64 = 24;

/// Message ID for a new request
///
/// The current time in units of 100 seconds, so requests sent close together
/// share an ID.
pub fn generate_message_id() -> String {
    (Utc::now().timestamp_millis() / 100_000).to_string()
}

/// The last 24 hours, as (exclusive begin, inclusive end)
pub fn default_poll_window() -> (DateTime<Utc>, DateTime<Utc>) {
    poll_window(DEFAULT_POLL_WINDOW_HOURS)
}

/// The last `hours` hours, as (exclusive begin, inclusive end)
pub fn poll_window(hours: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = Utc::now();
    (end - Duration::hours(hours), end)
}

/// Fill a missing bound from the default window
///
/// An omitted begin is 24 hours before now and an omitted end is now.
pub fn resolve_poll_window(
    exclusive_begin: Option<DateTime<Utc>>,
    inclusive_end: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let (default_begin, default_end) = default_poll_window();
    (
        exclusive_begin.unwrap_or(default_begin),
        inclusive_end.unwrap_or(default_end),
    )
}

pub fn parse_service_url(address: &str) -> Result<Url> {
    Url::parse(address.trim()).with_context(|| format!("invalid service URL {}", address))
}

/// First service of the given type
pub fn find_service(services: &[ServiceInstance], service_type: ServiceType) -> Option<&ServiceInstance> {
    services
        .iter()
        .find(|service| service.service_type == service_type)
}

/// Encode `message`, wrap it in an envelope and post it to `url`
pub(crate) fn send<M: ToTaxiiXml>(
    connection: &TaxiiConnection,
    url: &Url,
    message: &M,
) -> Result<TransportResponse> {
    let client = connection.http_client()?;
    let body = client.codec().encode(message)?;
    let envelope = Envelope::new(body, M::VERSION, connection.discovery_url());

    debug!("Posting TAXII {} request to {}", M::VERSION, url);
    client.post(url, &envelope)
}

/// Decode a 200 response; anything else is logged and yields `None`
pub(crate) fn respond<R: FromTaxiiXml>(
    connection: &TaxiiConnection,
    response: &TransportResponse,
) -> Result<Option<R>> {
    if !response.is_ok() {
        error!("Error in TAXII request: {}", response.status);
        return Ok(None);
    }

    let client = connection.http_client()?;
    client
        .codec()
        .decode(response.content_type.as_deref(), &response.body)
        .map(Some)
}

pub(crate) fn exchange<M: ToTaxiiXml, R: FromTaxiiXml>(
    connection: &TaxiiConnection,
    url: &Url,
    message: &M,
) -> Result<Option<R>> {
    let response = send(connection, url, message)?;
    respond(connection, &response)
}

pub(crate) fn log_status(status: StatusCode, message: &StatusMessage) {
    error!(
        "Error polling, status: {}, message id: {}, in response to: {}, status type: {}, message: {}, details: {}",
        status,
        message.message_id,
        message.in_response_to,
        message.status_type,
        message.message.as_deref().unwrap_or_default(),
        message.details_summary()
    );
}
