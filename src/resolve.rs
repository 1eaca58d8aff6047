//! # Template/priority resolver.
//!
//! Pure functions mapping a contact and an emergency to notification
//! priority, preferred channel, and rendered alert text. No dependencies on
//! the rest of the engine; both the dispatcher and the escalation timer
//! manager build their jobs through this module so job construction has a
//! single definition.
//!
//! ## Channel selection
//! One job per contact, on the contact's best available channel:
//! Push > Sms > Email. The remaining endpoints stay in the job's contact
//! snapshot for the fallback chain. A contact with no endpoint yields no
//! job — that is a valid outcome, not an error.

use std::time::SystemTime;

use uuid::Uuid;

use crate::model::{
    Contact, ContactPriority, Destination, Emergency, NotificationJob, NotificationPriority,
};

/// Maps a contact's priority tier to the notification priority of its jobs.
///
/// Primary → Emergency, Secondary → High, Tertiary → Normal.
#[inline]
pub fn notification_priority(priority: ContactPriority) -> NotificationPriority {
    match priority {
        ContactPriority::Primary => NotificationPriority::Emergency,
        ContactPriority::Secondary => NotificationPriority::High,
        ContactPriority::Tertiary => NotificationPriority::Normal,
    }
}

/// Picks the contact's preferred destination: Push > Sms > Email.
///
/// Returns `None` when the contact has no reachable endpoint.
pub fn preferred_destination(contact: &Contact) -> Option<Destination> {
    if let Some(token) = &contact.push_token {
        return Some(Destination::PushToken(token.clone()));
    }
    if let Some(phone) = &contact.phone {
        return Some(Destination::Phone(phone.clone()));
    }
    contact.email.as_ref().map(|e| Destination::Email(e.clone()))
}

/// Returns the contact's endpoint for a specific channel, if present.
///
/// Used by the worker to resolve the fallback channel's destination.
pub fn destination_for(
    contact: &Contact,
    channel: crate::model::Channel,
) -> Option<Destination> {
    use crate::model::Channel;
    match channel {
        Channel::Push => contact
            .push_token
            .as_ref()
            .map(|t| Destination::PushToken(t.clone())),
        Channel::Sms => contact.phone.as_ref().map(|p| Destination::Phone(p.clone())),
        Channel::Email => contact.email.as_ref().map(|e| Destination::Email(e.clone())),
    }
}

/// Renders the alert text for an emergency.
pub fn render_alert(emergency: &Emergency) -> String {
    let mut text = format!(
        "EMERGENCY: {} — {} at {}.",
        emergency.user_name,
        emergency.emergency_type.as_label(),
        emergency.location.display(),
    );
    if let Some(msg) = &emergency.initial_message {
        text.push(' ');
        text.push_str(msg);
    }
    text
}

/// Builds one job for a single contact at an explicit priority.
///
/// Returns `None` when the contact has no reachable endpoint.
pub fn job_for_contact(
    emergency: &Emergency,
    batch_id: Uuid,
    contact: &Contact,
    priority: NotificationPriority,
) -> Option<NotificationJob> {
    let destination = preferred_destination(contact)?;
    Some(NotificationJob {
        emergency_id: emergency.id,
        batch_id,
        contact: contact.clone(),
        channel: destination.channel(),
        priority,
        content: render_alert(emergency),
        destination,
        attempt: 1,
        created_at: SystemTime::now(),
    })
}

/// Builds the initial fan-out: one job per reachable contact, at the
/// priority mapped from the contact's tier, preserving contact order.
pub fn jobs_for_emergency(emergency: &Emergency, batch_id: Uuid) -> Vec<NotificationJob> {
    emergency
        .contacts
        .iter()
        .filter_map(|contact| {
            job_for_contact(
                emergency,
                batch_id,
                contact,
                notification_priority(contact.priority),
            )
        })
        .collect()
}
