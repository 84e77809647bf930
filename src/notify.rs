use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{DATE_FORMAT, DateRange};
use crate::observability;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    pub template: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &MailData) -> Result<(), MailError>;
}

/// Writes each message to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &MailData) -> Result<(), MailError> {
        tracing::info!(
            to = %mail.to,
            from = %mail.from,
            subject = %mail.subject,
            bytes = mail.content.len(),
            "mail sent"
        );
        Ok(())
    }
}

/// Fire-and-forget handle for queueing mail. Never blocks the caller:
/// when the queue is full the message is dropped and counted.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<MailData>,
    from: String,
}

impl MailQueue {
    pub fn channel(capacity: usize, from: impl Into<String>) -> (Self, mpsc::Receiver<MailData>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                from: from.into(),
            },
            rx,
        )
    }

    pub fn enqueue(&self, to: &str, subject: &str, content: String) {
        let mail = MailData {
            to: to.to_string(),
            from: self.from.clone(),
            subject: subject.to_string(),
            content,
            template: Some("basic.html".into()),
        };
        if let Err(e) = self.tx.try_send(mail) {
            tracing::warn!(to, "mail not queued: {e}");
            metrics::counter!(observability::MAIL_TOTAL, "status" => "dropped").increment(1);
        }
    }
}

/// Background task that delivers queued mail until every sender is gone.
pub async fn run_mail_listener(mut rx: mpsc::Receiver<MailData>, mailer: Arc<dyn Mailer>) {
    while let Some(mail) = rx.recv().await {
        match mailer.send(&mail).await {
            Ok(()) => {
                metrics::counter!(observability::MAIL_TOTAL, "status" => "sent").increment(1);
            }
            Err(e) => {
                tracing::error!(error.message = %e, "mail delivery failed");
                metrics::counter!(observability::MAIL_TOTAL, "status" => "failed").increment(1);
            }
        }
    }
    tracing::debug!("mail listener stopped");
}

pub fn confirmation_body(first_name: &str, room_name: &str, range: &DateRange) -> String {
    format!(
        "<strong>Reservation Confirmation</strong><br>\
         Dear {first_name},<br>\
         This is a confirmation of your reservation of {room_name} from {} to {}.",
        range.start().format(DATE_FORMAT),
        range.end().format(DATE_FORMAT),
    )
}
