//! Email service for lead notifications.

use chrono::{DateTime, Datelike, Utc};
use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use minijinja::{Environment, context};
use serde::Serialize;
use std::{collections::VecDeque, path::Path, sync::Arc};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::{
    api::models::leads::LeadResponse,
    config::{Config, EmailTransportConfig},
    errors::Error,
};

const PROSPECT_TEMPLATE: &str = "prospect_notification.html";
const ATTORNEY_TEMPLATE: &str = "attorney_notification.html";

/// An email recorded by the log transport instead of being delivered
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CapturedEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    /// File names of attachments
    pub attachments: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

/// A file attached to an outgoing email
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

pub struct EmailService {
    transport: EmailTransport,
    templates: Environment<'static>,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
    app_name: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
    Log(Outbox),
}

/// Bounded in-memory record of the most recent emails
#[derive(Clone)]
struct Outbox {
    emails: Arc<RwLock<VecDeque<CapturedEmail>>>,
    capacity: usize,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            emails: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    async fn push(&self, email: CapturedEmail) {
        if self.capacity == 0 {
            return;
        }
        let mut emails = self.emails.write().await;
        while emails.len() >= self.capacity {
            emails.pop_front();
        }
        emails.push_back(email);
    }
}

fn load_templates() -> Result<Environment<'static>, Error> {
    let to_error = |e: minijinja::Error| Error::Internal {
        operation: format!("load email templates: {e}"),
    };

    // `.html` names switch on auto-escaping of lead fields
    let mut env = Environment::new();
    env.add_template(PROSPECT_TEMPLATE, include_str!("../templates/email/prospect_notification.html"))
        .map_err(to_error)?;
    env.add_template(ATTORNEY_TEMPLATE, include_str!("../templates/email/attorney_notification.html"))
        .map_err(to_error)?;
    Ok(env)
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let mut smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port);

                if let (Some(username), Some(password)) = (username, password) {
                    smtp_builder = smtp_builder.credentials(Credentials::new(username.clone(), password.clone()));
                }

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
            EmailTransportConfig::Log { capacity } => EmailTransport::Log(Outbox::new(*capacity)),
        };

        Ok(Self {
            transport,
            templates: load_templates()?,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
            app_name: config.notifications.app_name.clone(),
        })
    }

    /// Confirmation sent to the person who submitted the lead
    pub async fn send_prospect_notification(&self, lead: &LeadResponse) -> Result<(), Error> {
        let subject = format!("Thank you for your application - {}", self.app_name);
        let body = self.render(
            PROSPECT_TEMPLATE,
            context! {
                lead => lead,
                app_name => &self.app_name,
                current_year => Utc::now().year(),
            },
        )?;

        self.send_email(std::slice::from_ref(&lead.email), &subject, body, None).await
    }

    /// Alert sent to attorneys, with the resume attached when it could be read
    pub async fn send_attorney_notification(
        &self,
        lead: &LeadResponse,
        recipients: &[String],
        resume: Option<EmailAttachment>,
    ) -> Result<(), Error> {
        let subject = format!("New lead submitted - {} {}", lead.first_name, lead.last_name);
        let body = self.render(
            ATTORNEY_TEMPLATE,
            context! {
                lead => lead,
                app_name => &self.app_name,
                has_resume => resume.is_some(),
                current_year => Utc::now().year(),
            },
        )?;

        self.send_email(recipients, &subject, body, resume).await
    }

    /// Emails recorded by the log transport, oldest first. Empty for delivering transports.
    pub async fn captured(&self) -> Vec<CapturedEmail> {
        match &self.transport {
            EmailTransport::Log(outbox) => outbox.emails.read().await.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn render(&self, template: &str, ctx: minijinja::Value) -> Result<String, Error> {
        self.templates
            .get_template(template)
            .and_then(|t| t.render(ctx))
            .map_err(|e| Error::Internal {
                operation: format!("render email template {template}: {e}"),
            })
    }

    async fn send_email(&self, recipients: &[String], subject: &str, body: String, attachment: Option<EmailAttachment>) -> Result<(), Error> {
        if recipients.is_empty() {
            return Err(Error::Internal {
                operation: format!("send email '{subject}': no recipients"),
            });
        }

        if let EmailTransport::Log(outbox) = &self.transport {
            tracing::info!(to = ?recipients, subject, "Email captured by log transport");
            outbox
                .push(CapturedEmail {
                    to: recipients.to_vec(),
                    subject: subject.to_string(),
                    html_body: body,
                    attachments: attachment.into_iter().map(|a| a.filename).collect(),
                    sent_at: Utc::now(),
                })
                .await;
            return Ok(());
        }

        let message = self.build_message(recipients, subject, body, attachment)?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
            EmailTransport::Log(_) => {}
        }

        tracing::info!(to = ?recipients, subject, "Email sent");
        Ok(())
    }

    fn build_message(&self, recipients: &[String], subject: &str, body: String, attachment: Option<EmailAttachment>) -> Result<Message, Error> {
        let parse_mailbox = |raw: &str| {
            raw.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse email address '{raw}': {e}"),
            })
        };

        let mut builder = Message::builder()
            .from(parse_mailbox(&format!("{} <{}>", self.from_name, self.from_email))?)
            .subject(subject);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }
        for recipient in recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        let message = match attachment {
            Some(EmailAttachment { filename, content }) => {
                let mime = mime_guess::from_path(&filename).first_or_octet_stream();
                let content_type = ContentType::parse(mime.essence_str()).map_err(|e| Error::Internal {
                    operation: format!("parse attachment content type: {e}"),
                })?;
                builder.multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::html(body))
                        .singlepart(Attachment::new(filename).body(content, content_type)),
                )
            }
            None => builder.header(ContentType::TEXT_HTML).body(body),
        };

        message.map_err(|e| Error::Internal {
            operation: format!("build email message: {e}"),
        })
    }
}
