//! # Inbound event payloads.
//!
//! The event-stream consumer that decodes provider wire formats lives
//! outside this crate; it hands the engine these already-canonical structs.
//! [`EmergencyCreated`] drives the primary fan-out, [`EmergencyEscalation`]
//! is the operator/business-rule escalation path, distinct from the
//! automatic timeout escalation.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::emergency::{Contact, Emergency, EmergencyType, Location};

/// An emergency was created/activated upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyCreated {
    pub emergency_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub emergency_type: EmergencyType,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    /// Ordered by fan-out priority (primary contacts first).
    pub contacts: Vec<Contact>,
    pub timestamp: SystemTime,
}

impl EmergencyCreated {
    /// Converts the event payload into the engine's immutable input.
    pub fn into_emergency(self) -> Emergency {
        Emergency {
            id: self.emergency_id,
            user_id: self.user_id,
            user_name: self.user_name,
            emergency_type: self.emergency_type,
            location: self.location,
            initial_message: self.initial_message,
            created_at: self.timestamp,
            contacts: self.contacts,
        }
    }
}

/// An operator- or business-rule-triggered escalation for an existing
/// emergency, carrying the secondary contacts to notify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyEscalation {
    pub emergency_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub emergency_type: EmergencyType,
    pub location: Location,
    pub secondary_contacts: Vec<Contact>,
    pub timestamp: SystemTime,
}

impl EmergencyEscalation {
    /// Rebuilds an [`Emergency`] view over the secondary contacts only, so
    /// the same fan-out path serves both inbound events.
    pub fn into_emergency(self) -> Emergency {
        Emergency {
            id: self.emergency_id,
            user_id: self.user_id,
            user_name: self.user_name,
            emergency_type: self.emergency_type,
            location: self.location,
            initial_message: None,
            created_at: self.timestamp,
            contacts: self.secondary_contacts,
        }
    }
}
