//! TAXII 1.1 messages

use super::xml::{Element, MessageWriter};
use super::{
    expect_root, format_timestamp, optional_timestamp, parse_flag, ContentBlock, FromTaxiiXml,
    ServiceContact, ServiceInstance, StatusMessage, ToTaxiiXml,
};
use crate::envelope::TaxiiVersion;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub message_id: String,
}

impl ToTaxiiXml for DiscoveryRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V11;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        writer.start_root("Discovery_Request", &[("message_id", self.message_id.as_str())])?;
        writer.end("Discovery_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub service_instances: Vec<ServiceInstance>,
}

impl FromTaxiiXml for DiscoveryResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Discovery_Response")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            service_instances: element
                .children_named("Service_Instance")
                .map(|service| ServiceInstance::from_element(service, "service_version"))
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInformationRequest {
    pub message_id: String,
}

impl ToTaxiiXml for CollectionInformationRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V11;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        writer.start_root(
            "Collection_Information_Request",
            &[("message_id", self.message_id.as_str())],
        )?;
        writer.end("Collection_Information_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInformationResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub collections: Vec<CollectionRecord>,
}

impl FromTaxiiXml for CollectionInformationResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Collection_Information_Response")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            collections: element
                .children_named("Collection")
                .map(CollectionRecord::from_element)
                .collect::<Result<_>>()?,
        })
    }
}

/// A collection described by a collection information response
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub collection_name: String,
    pub collection_type: Option<String>,
    pub available: Option<bool>,
    pub description: Option<String>,
    pub content_bindings: Vec<String>,
    pub polling_services: Vec<ServiceContact>,
    pub subscription_services: Vec<ServiceContact>,
    pub receiving_inbox_services: Vec<ServiceContact>,
}

impl CollectionRecord {
    fn from_element(element: &Element) -> Result<Self> {
        let contacts = |name: &str| {
            element
                .children_named(name)
                .map(ServiceContact::from_element)
                .collect::<Result<Vec<_>>>()
        };

        Ok(Self {
            collection_name: element.required_attr("collection_name")?.to_string(),
            collection_type: element.attr("collection_type").map(str::to_string),
            available: parse_flag(element.attr("available"))?,
            description: element.child_text("Description").map(str::to_string),
            content_bindings: element
                .children_named("Content_Binding")
                .filter_map(|binding| binding.attr("binding_id"))
                .map(str::to_string)
                .collect(),
            polling_services: contacts("Polling_Service")?,
            subscription_services: contacts("Subscription_Service")?,
            receiving_inbox_services: contacts("Receiving_Inbox_Service")?,
        })
    }
}

/// Poll request for one collection
///
/// With a non-empty subscription ID the request names the subscription. Without
/// one, no empty `Subscription_ID` element is written; the request asks for a
/// full, synchronous response through `Poll_Parameters` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub message_id: String,
    pub collection_name: String,
    pub exclusive_begin: Option<DateTime<Utc>>,
    pub inclusive_end: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
}

impl ToTaxiiXml for PollRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V11;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        writer.start_root(
            "Poll_Request",
            &[
                ("message_id", self.message_id.as_str()),
                ("collection_name", self.collection_name.as_str()),
            ],
        )?;

        if let Some(begin) = &self.exclusive_begin {
            writer.text_element("Exclusive_Begin_Timestamp", &[], &format_timestamp(begin))?;
        }
        if let Some(end) = &self.inclusive_end {
            writer.text_element("Inclusive_End_Timestamp", &[], &format_timestamp(end))?;
        }

        match self.subscription_id.as_deref() {
            Some(subscription_id) if !subscription_id.is_empty() => {
                writer.text_element("Subscription_ID", &[], subscription_id)?;
            }
            _ => {
                writer.start("Poll_Parameters", &[("allow_asynch", "false")])?;
                writer.text_element("Response_Type", &[], "FULL")?;
                writer.end("Poll_Parameters")?;
            }
        }

        writer.end("Poll_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub collection_name: String,
    pub more: bool,
    pub result_id: Option<String>,
    pub result_part_number: Option<u32>,
    pub subscription_id: Option<String>,
    pub exclusive_begin: Option<DateTime<Utc>>,
    pub inclusive_end: Option<DateTime<Utc>>,
    pub record_count: Option<u64>,
    pub message: Option<String>,
    pub content_blocks: Vec<ContentBlock>,
}

impl FromTaxiiXml for PollResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Poll_Response")?;

        let result_part_number = element
            .attr("result_part_number")
            .map(|value| value.trim().parse::<u32>())
            .transpose()
            .context("invalid result_part_number")?;
        let record_count = element
            .child_text("Record_Count")
            .map(str::parse::<u64>)
            .transpose()
            .context("invalid Record_Count")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            collection_name: element.attr("collection_name").unwrap_or_default().to_string(),
            more: parse_flag(element.attr("more"))?.unwrap_or(false),
            result_id: element.attr("result_id").map(str::to_string),
            result_part_number,
            subscription_id: element.child_text("Subscription_ID").map(str::to_string),
            exclusive_begin: optional_timestamp(element, "Exclusive_Begin_Timestamp")?,
            inclusive_end: optional_timestamp(element, "Inclusive_End_Timestamp")?,
            record_count,
            message: element.child_text("Message").map(str::to_string),
            content_blocks: element
                .children_named("Content_Block")
                .map(content_block)
                .collect::<Result<_>>()?,
        })
    }
}

fn content_block(element: &Element) -> Result<ContentBlock> {
    let binding = element
        .child("Content_Binding")
        .and_then(|binding| binding.attr("binding_id"))
        .ok_or_else(|| anyhow!("Content_Block is missing its Content_Binding"))?;

    Ok(ContentBlock {
        binding: binding.to_string(),
        content: element
            .child("Content")
            .map(|content| content.text.clone())
            .unwrap_or_default(),
        timestamp_label: optional_timestamp(element, "Timestamp_Label")?,
        message: element.child_text("Message").map(str::to_string),
    })
}

/// What a poll service may answer with
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Poll(PollResponse),
    Status(StatusMessage),
}

impl FromTaxiiXml for PollOutcome {
    fn from_element(element: &Element) -> Result<Self> {
        match element.name.as_str() {
            "Status_Message" => StatusMessage::from_element(element).map(PollOutcome::Status),
            _ => PollResponse::from_element(element).map(PollOutcome::Poll),
        }
    }
}
