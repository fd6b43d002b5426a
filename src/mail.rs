use async_trait::async_trait;

use crate::model::{Reservation, Space};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid recipient {0:?}")]
    InvalidRecipient(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

/// Best-effort delivery. Callers log failures and move on.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// Writes messages to the log instead of delivering them. Used when no
/// transport is configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        if !mail.to.contains('@') {
            return Err(MailError::InvalidRecipient(mail.to));
        }
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail");
        Ok(())
    }
}

pub fn reminder_mail(brand: &str, reservation: &Reservation, space: &Space) -> Mail {
    let start = reservation.time.start.format("%H:%M");
    let subject = format!("[{brand}] Reservation reminder: {} ({start})", space.name);
    let location = if space.location.is_empty() {
        String::new()
    } else {
        format!(" ({})", space.location)
    };
    let body = format!(
        "Hello {name},\n\
         \n\
         Your reservation starts soon.\n\
         \n\
         Space: {space}{location}\n\
         Date: {date}\n\
         Time: {time}\n\
         Event: {event}\n\
         \n\
         Please check in on site when you arrive.\n\
         \n\
         {brand}\n",
        name = reservation.requester.organization_name,
        space = space.name,
        date = reservation.date.format("%Y-%m-%d"),
        time = reservation.time,
        event = reservation.requester.event_name,
    );
    Mail {
        to: reservation.requester.email.clone(),
        subject,
        body,
    }
}
