//! # Emergency and contact types.
//!
//! An [`Emergency`] is immutable once handed to the dispatcher: the engine
//! never mutates it, only reads it to build jobs. Contact priority tiers are
//! owned by the user-profile service; this engine only consumes them.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmergencyType {
    Medical,
    Fire,
    Police,
    General,
    FallDetected,
    DeviceAlert,
}

impl EmergencyType {
    /// Returns a short human-readable label for rendered alert text.
    pub fn as_label(&self) -> &'static str {
        match self {
            EmergencyType::Medical => "medical emergency",
            EmergencyType::Fire => "fire emergency",
            EmergencyType::Police => "police emergency",
            EmergencyType::General => "emergency",
            EmergencyType::FallDetected => "fall detected",
            EmergencyType::DeviceAlert => "device alert",
        }
    }
}

/// Geographic location of an emergency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Reverse-geocoded address, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    /// Renders the location for alert text: the address when known,
    /// otherwise raw coordinates.
    pub fn display(&self) -> String {
        match &self.address {
            Some(addr) => addr.clone(),
            None => format!("{:.5}, {:.5}", self.latitude, self.longitude),
        }
    }
}

/// Priority tier of an emergency contact.
///
/// Determines initial fan-out order and the notification priority of the
/// jobs built for this contact. Mutable only by the owning user profile,
/// never by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactPriority {
    Primary,
    Secondary,
    Tertiary,
}

/// An emergency contact with its reachable endpoints.
///
/// A contact may have any subset of endpoints; a contact with none yields
/// zero jobs (not an error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    pub priority: ContactPriority,
}

impl Contact {
    /// True when the contact has no reachable endpoint at all.
    pub fn is_unreachable(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.push_token.is_none()
    }
}

/// An emergency event with its ordered contact list.
///
/// Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emergency {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub emergency_type: EmergencyType,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    pub created_at: SystemTime,
    /// Ordered by fan-out priority (primary contacts first).
    pub contacts: Vec<Contact>,
}

impl Emergency {
    /// Returns the contacts of the given priority tier, preserving order.
    pub fn contacts_with_priority(&self, priority: ContactPriority) -> Vec<&Contact> {
        self.contacts
            .iter()
            .filter(|c| c.priority == priority)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display_prefers_address() {
        let loc = Location {
            latitude: 52.52,
            longitude: 13.405,
            address: Some("Alexanderplatz 1, Berlin".into()),
        };
        assert_eq!(loc.display(), "Alexanderplatz 1, Berlin");

        let bare = Location {
            latitude: 52.52,
            longitude: 13.405,
            address: None,
        };
        assert_eq!(bare.display(), "52.52000, 13.40500");
    }

    #[test]
    fn test_unreachable_contact() {
        let contact = Contact {
            id: Uuid::new_v4(),
            name: "Nora".into(),
            phone: None,
            email: None,
            push_token: None,
            priority: ContactPriority::Primary,
        };
        assert!(contact.is_unreachable());
    }
}
