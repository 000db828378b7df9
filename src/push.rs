//! Push boundary: message envelopes and per-user delivery channels.
//!
//! The pipeline never talks to sockets directly. It hands envelopes to a
//! [`Transport`], which knows which users are connected and how to reach
//! them. [`ChannelRegistry`] is the in-process transport used by the
//! server: one unbounded channel per connected user, so a send never
//! blocks on a slow client.

use crate::ai_state::SegmentMap;
use crate::core::PerSide;
use crate::sensor::PressureSample;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Optional analysis fields forwarded from an inference callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squat_count: Option<i64>,
    /// Raw check values as reported by the vision service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<i64>,
}

/// Body of a telemetry envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub value: f64,
    /// Epoch milliseconds
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai: Option<SegmentMap>,
    #[serde(flatten)]
    pub analysis: AnalysisFields,
}

/// A message pushed to one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// High-frequency telemetry; may repeat freely
    #[serde(rename = "DATA")]
    Data { payload: TelemetryPayload },
    /// Spoken feedback, gated by anti-repeat and cooldown
    #[serde(rename = "voice")]
    Voice {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Latest insole readings, sent when a connection opens and on every ingest
    #[serde(rename = "FSR")]
    Insoles {
        payload: PerSide<Option<PressureSample>>,
    },
}

impl Envelope {
    pub fn voice(text: impl Into<String>, timestamp: Option<i64>) -> Self {
        Envelope::Voice {
            text: text.into(),
            timestamp,
        }
    }

    /// Text of a voice envelope.
    pub fn voice_text(&self) -> Option<&str> {
        match self {
            Envelope::Voice { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Why a push did not reach its recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// No channel is registered for the user
    NoChannel(String),
    /// The user's channel was closed by the receiving side
    Closed(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::NoChannel(user) => write!(f, "No push channel for user {user}"),
            DeliveryError::Closed(user) => write!(f, "Push channel closed for user {user}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Delivery side of the publish/subscribe layer.
pub trait Transport: Send + Sync {
    /// Users currently connected. May be stale by the time it is used.
    fn active_users(&self) -> Vec<String>;

    /// Whether the user currently has a push connection.
    fn is_active(&self, user_id: &str) -> bool {
        self.active_users().iter().any(|u| u == user_id)
    }

    /// Push one envelope to one user without blocking.
    fn deliver(&self, user_id: &str, envelope: Envelope) -> Result<(), DeliveryError>;
}

/// In-process transport with one unbounded channel per user.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, UnboundedSender<Envelope>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel for the user, replacing any previous one.
    pub fn register(&self, user_id: &str) -> (UnboundedSender<Envelope>, UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .channels
            .insert(user_id.to_string(), tx.clone())
            .is_some()
        {
            tracing::info!("Replaced push channel for user {}", user_id);
        } else {
            tracing::info!("Registered push channel for user {}", user_id);
        }
        (tx, rx)
    }

    /// Remove the user's channel if it is still `sender`.
    ///
    /// A newer connection for the same user is left in place. Returns
    /// whether a channel was removed.
    pub fn unregister(&self, user_id: &str, sender: &UnboundedSender<Envelope>) -> bool {
        let removed = self
            .channels
            .remove_if(user_id, |_, tx| tx.same_channel(sender))
            .is_some();
        if removed {
            tracing::info!("Unregistered push channel for user {}", user_id);
        }
        removed
    }

    pub fn is_registered(&self, user_id: &str) -> bool {
        self.channels.contains_key(user_id)
    }
}

impl Transport for ChannelRegistry {
    fn active_users(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    fn is_active(&self, user_id: &str) -> bool {
        self.is_registered(user_id)
    }

    fn deliver(&self, user_id: &str, envelope: Envelope) -> Result<(), DeliveryError> {
        let tx = self
            .channels
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::NoChannel(user_id.to_string()))?;
        tx.send(envelope)
            .map_err(|_| DeliveryError::Closed(user_id.to_string()))
    }
}
