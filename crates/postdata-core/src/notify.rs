use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::SmtpSettings;
use crate::error::ErrorKind;

pub const SUBJECT: &str = "Zonos Postal Data Processing Report";

/// What a finished input file produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub input_name: String,
    pub output_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub processed_count: usize,
    pub skipped_count: usize,
}

/// Reports a finished input file to an operator. Never fails the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &RunSummary) -> bool;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid content type: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl NotifyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalService
    }
}

pub fn compose_body(summary: &RunSummary) -> String {
    let input_name = if summary.input_name.is_empty() {
        "N/A"
    } else {
        summary.input_name.as_str()
    };

    let mut body = format!(
        "Processing completed successfully: {input_name}\n\n\
         Summary:\n\
         - Total rows processed: {}\n\
         - Total rows skipped: {}\n\n\
         Files:\n",
        summary.processed_count, summary.skipped_count
    );

    if let Some(path) = &summary.output_path {
        body.push_str(&format!("- Output file: {}\n", display_name(path)));
    }
    if let Some(path) = &summary.log_path {
        body.push_str(&format!("- Skipped rows log: {}\n", display_name(path)));
    }

    body.push_str(
        "\nPlease find the attached files for details.\n\n\
         Best regards,\n\
         Zonos Automation File Processing System",
    );
    body
}

/// Output and skip-log paths that still exist on disk, in that order.
pub fn existing_attachments(summary: &RunSummary) -> Vec<PathBuf> {
    [&summary.output_path, &summary.log_path]
        .into_iter()
        .flatten()
        .filter(|path| {
            let exists = path.is_file();
            if !exists {
                warn!(path = %path.display(), "attachment not found");
            }
            exists
        })
        .cloned()
        .collect()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Sends the report over authenticated STARTTLS SMTP.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&settings.from)?;
        let recipients = settings
            .recipients
            .iter()
            .map(|address| parse_mailbox(address))
            .collect::<Result<Vec<_>, _>>()?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.user.clone(),
                settings.password.expose().to_string(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
        })
    }

    async fn send(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(SUBJECT);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let octet_stream = ContentType::parse("application/octet-stream")?;
        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(compose_body(summary)));
        for path in existing_attachments(summary) {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| NotifyError::Attachment {
                    path: path.clone(),
                    source,
                })?;
            parts = parts
                .singlepart(Attachment::new(display_name(&path)).body(bytes, octet_stream.clone()));
        }

        let message = builder.multipart(parts)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, summary: &RunSummary) -> bool {
        match self.send(summary).await {
            Ok(()) => {
                info!(
                    input = %summary.input_name,
                    recipients = self.recipients.len(),
                    "notification sent"
                );
                true
            }
            Err(err) => {
                error!(
                    input = %summary.input_name,
                    kind = %err.kind(),
                    error = %err,
                    "notification failed"
                );
                false
            }
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse::<Mailbox>().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}
