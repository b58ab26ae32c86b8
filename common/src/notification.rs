//! Inbound notifications.
//!
//! Two message families reach the controller: changes (`create`, `update`,
//! `delete` of an object) and domain events (`ip-address.assigned`...). Both
//! share the accessors of the [`Message`] trait so routing never needs to know
//! which family it is looking at.

use crate::PrefixedId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Propagated trace headers (`traceparent`, `tracestate`...).
pub type TraceContext = BTreeMap<String, String>;

/// Lifecycle verb or domain event carried by a notification.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    IpAddressAssigned,
    IpAddressUnassigned,
    Other(String),
}

impl EventKind {
    #[must_use]
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            "ip-address.assigned" => Self::IpAddressAssigned,
            "ip-address.unassigned" => Self::IpAddressUnassigned,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::IpAddressAssigned => "ip-address.assigned",
            Self::IpAddressUnassigned => "ip-address.unassigned",
            Self::Other(other) => other.as_str(),
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        *self == Self::Delete
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to an object (create/update/delete).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChangeMessage {
    #[serde(rename = "subjectID")]
    pub subject_id: PrefixedId,
    #[serde(rename = "additionalSubjectIDs", default)]
    pub additional_subject_ids: Vec<PrefixedId>,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "traceContext", default)]
    pub trace_context: TraceContext,
    #[serde(rename = "actorID", default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<PrefixedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A domain event about an object.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventMessage {
    #[serde(rename = "subjectID")]
    pub subject_id: PrefixedId,
    #[serde(rename = "additionalSubjectIDs", default)]
    pub additional_subject_ids: Vec<PrefixedId>,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "traceContext", default)]
    pub trace_context: TraceContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Shared accessors over every notification family.
pub trait Message {
    fn subject_id(&self) -> &PrefixedId;
    fn additional_subject_ids(&self) -> &[PrefixedId];
    fn event_type(&self) -> &str;
    fn trace_context(&self) -> &TraceContext;

    fn event_kind(&self) -> EventKind {
        EventKind::parse(self.event_type())
    }
}

impl Message for ChangeMessage {
    fn subject_id(&self) -> &PrefixedId {
        &self.subject_id
    }

    fn additional_subject_ids(&self) -> &[PrefixedId] {
        &self.additional_subject_ids
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }
}

impl Message for EventMessage {
    fn subject_id(&self) -> &PrefixedId {
        &self.subject_id
    }

    fn additional_subject_ids(&self) -> &[PrefixedId] {
        &self.additional_subject_ids
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn trace_context(&self) -> &TraceContext {
        &self.trace_context
    }
}

#[derive(Clone, Debug)]
pub enum Notification {
    Change(ChangeMessage),
    Event(EventMessage),
}

impl Notification {
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            Self::Change(_) => "change",
            Self::Event(_) => "event",
        }
    }

    fn inner(&self) -> &dyn Message {
        match self {
            Self::Change(m) => m,
            Self::Event(m) => m,
        }
    }
}

impl Message for Notification {
    fn subject_id(&self) -> &PrefixedId {
        self.inner().subject_id()
    }

    fn additional_subject_ids(&self) -> &[PrefixedId] {
        self.inner().additional_subject_ids()
    }

    fn event_type(&self) -> &str {
        self.inner().event_type()
    }

    fn trace_context(&self) -> &TraceContext {
        self.inner().trace_context()
    }
}

impl From<ChangeMessage> for Notification {
    fn from(m: ChangeMessage) -> Self {
        Self::Change(m)
    }
}

impl From<EventMessage> for Notification {
    fn from(m: EventMessage) -> Self {
        Self::Event(m)
    }
}
