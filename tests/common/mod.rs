//! Shared fixtures for the exchange tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taxii_client::configs::ConnectionSettings;
use taxii_client::connection::TaxiiConnection;
use taxii_client::envelope::Envelope;
use taxii_client::transport::{Transport, TransportResponse};
use url::Url;

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: Url,
    pub envelope: Envelope,
}

impl Recorded {
    pub fn body(&self) -> String {
        String::from_utf8(self.envelope.body().to_vec()).unwrap()
    }
}

/// Replays canned responses in order and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResponse>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: StatusCode, body: &str) {
        self.responses.lock().unwrap().push_back(TransportResponse {
            status,
            content_type: Some("application/xml".to_string()),
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn respond_ok(&self, body: &str) {
        self.respond(StatusCode::OK, body);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(Recorded {
            url: url.clone(),
            envelope: envelope.clone(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted response left for {}", url))
    }
}

pub fn connection_with(discovery_url: &str, transport: Arc<ScriptedTransport>) -> Arc<TaxiiConnection> {
    let connection = TaxiiConnection::new(ConnectionSettings::new(discovery_url))
        .unwrap()
        .with_transport(transport);
    Arc::new(connection)
}
