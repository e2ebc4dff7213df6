use super::channels::{format_message, truncate_text, MessageSender, MAX_TITLE_LEN};
use crate::error::AlertError;
use crate::model::{Alert, DeliveryStatus, Recipient, StaffTarget, Timestamp};
use crate::store::{CustomerRegistry, StaffDirectory, Store};
use log::{error, info, warn};
use std::sync::Arc;

/// Dispatches alerts to staff or customers and records every attempt
///
/// The router never retries. A failed delivery is written to the alert log
/// with `failed` status and returned to the caller.
pub struct AlertRouter {
    store: Arc<Store>,
    staff: Arc<dyn StaffDirectory>,
    customers: Arc<dyn CustomerRegistry>,
    staff_channel: Arc<dyn MessageSender>,
    customer_channel: Arc<dyn MessageSender>,
}

impl AlertRouter {
    pub fn new(
        store: Arc<Store>,
        staff: Arc<dyn StaffDirectory>,
        customers: Arc<dyn CustomerRegistry>,
        staff_channel: Arc<dyn MessageSender>,
        customer_channel: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            store,
            staff,
            customers,
            staff_channel,
            customer_channel,
        }
    }

    /// Route one alert
    ///
    /// Internal alerts go to a single channel id or fan out to every active
    /// staff member holding the role. Returns the number of successful
    /// deliveries; fails only when none succeeded.
    ///
    /// # Errors
    ///
    /// `AlertError::NoRecipient` when nobody matched, otherwise the last
    /// delivery error.
    pub fn route_alert(&self, alert: &Alert, now: Timestamp) -> Result<usize, AlertError> {
        let (channel, recipients) = match self.resolve(alert) {
            Ok(resolved) => resolved,
            Err((channel, identifier, e)) => {
                warn!("Alert '{}' has no recipient: {}", alert.title, e);
                self.record(alert, &channel, &identifier, Err(&e), now);
                return Err(e);
            }
        };

        let text = format_message(&alert.title, &alert.body);
        let mut delivered = 0;
        let mut last_error = None;
        for recipient in &recipients {
            let result = channel.send(recipient, &text);
            self.record(alert, &channel.channel_name(), recipient, result.as_ref().map(|_| ()), now);
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(
                        "Failed to deliver '{}' to {} via {}: {}",
                        alert.title,
                        recipient,
                        channel.channel_name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        info!(
            "Routed {} alert '{}': {}/{} delivered",
            alert.alert_type,
            alert.title,
            delivered,
            recipients.len()
        );
        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(delivered),
        }
    }

    /// The channel and recipient identifiers for an alert
    ///
    /// On failure returns what the single failed log row should carry.
    #[allow(clippy::type_complexity)]
    fn resolve(
        &self,
        alert: &Alert,
    ) -> Result<(&Arc<dyn MessageSender>, Vec<String>), (String, String, AlertError)> {
        match &alert.recipient {
            Recipient::Staff(StaffTarget::Direct(channel_id)) => {
                Ok((&self.staff_channel, vec![channel_id.clone()]))
            }
            Recipient::Staff(StaffTarget::Role { role, area }) => {
                let identifier = match area {
                    Some(area) => format!("role:{}@{}", role, area),
                    None => format!("role:{}", role),
                };
                let fail = |e: AlertError| (self.staff_channel.channel_name(), identifier.clone(), e);
                let staff = self
                    .staff
                    .staff_for_role(role, area.as_deref())
                    .map_err(|e| fail(AlertError::NoRecipient(format!("staff lookup failed: {}", e))))?;
                if staff.is_empty() {
                    return Err(fail(AlertError::NoRecipient(format!(
                        "no active staff for {}",
                        identifier
                    ))));
                }
                Ok((
                    &self.staff_channel,
                    staff.into_iter().map(|member| member.channel_id).collect(),
                ))
            }
            Recipient::Customer(customer_id) => {
                let fail =
                    |e: AlertError| (self.customer_channel.channel_name(), customer_id.clone(), e);
                let customer = self.customers.customer(customer_id).map_err(|e| {
                    fail(AlertError::NoRecipient(format!("customer lookup failed: {}", e)))
                })?;
                match customer.and_then(|c| c.channel_id) {
                    Some(channel_id) if !channel_id.trim().is_empty() => {
                        Ok((&self.customer_channel, vec![channel_id]))
                    }
                    _ => Err(fail(AlertError::NoRecipient(format!(
                        "customer {} has no notification channel",
                        customer_id
                    )))),
                }
            }
        }
    }

    fn record(
        &self,
        alert: &Alert,
        channel: &str,
        recipient: &str,
        outcome: Result<(), &AlertError>,
        now: Timestamp,
    ) {
        let (status, detail) = match outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self.store.append_alert_log(
            alert.alert_type,
            alert.recipient_type(),
            channel,
            recipient,
            &truncate_text(&alert.title, MAX_TITLE_LEN),
            status,
            detail.as_deref(),
            now,
        ) {
            error!(
                "Failed to record {} delivery of '{}' to {}: {}",
                status, alert.title, recipient, e
            );
        }
    }
}
