//! Background delivery of new-lead emails.
//!
//! ```text
//! submit handler
//!   └─ dispatcher.dispatch(lead) ── try_send ──┐
//!                                               ▼
//!                                   run_worker (spawned task):
//!                                     ├─ send prospect confirmation
//!                                     ├─ read resume from storage
//!                                     └─ send attorney alert (+ attachment)
//! ```
//!
//! Dispatch never blocks and never fails the request. A full queue or a failed send is logged and
//! counted, then dropped. Nothing is retried and queued jobs are lost on shutdown.

use metrics::counter;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    api::models::leads::LeadResponse,
    config::Config,
    email::{EmailAttachment, EmailService},
    storage::ResumeStorage,
};

#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: Option<mpsc::Sender<LeadResponse>>,
}

impl NotificationDispatcher {
    /// Create the dispatcher and spawn its worker. When notifications are disabled no worker is
    /// started and every dispatch is a no-op.
    pub fn spawn(
        email: Arc<EmailService>,
        storage: Arc<dyn ResumeStorage>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> (Self, Option<JoinHandle<()>>) {
        if !config.notifications.enabled {
            tracing::info!("Lead notifications are disabled");
            return (Self::disabled(), None);
        }

        let (tx, rx) = mpsc::channel(config.notifications.queue_capacity);
        let worker = Worker {
            email,
            storage,
            attorney_recipients: config.attorney_recipients(),
        };
        let handle = tokio::spawn(run_worker(rx, worker, shutdown));

        (Self { tx: Some(tx) }, Some(handle))
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue notifications for a newly created lead. Returns whether the job was queued.
    pub fn dispatch(&self, lead: LeadResponse) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        let lead_id = lead.id;
        match tx.try_send(lead) {
            Ok(()) => {
                counter!("leadctl_notifications_queued_total").increment(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(lead_id, "Notification queue full, dropping lead notifications");
                counter!("leadctl_notifications_dropped_total", "reason" => "queue_full").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(lead_id, "Notification worker stopped, dropping lead notifications");
                counter!("leadctl_notifications_dropped_total", "reason" => "closed").increment(1);
                false
            }
        }
    }
}

struct Worker {
    email: Arc<EmailService>,
    storage: Arc<dyn ResumeStorage>,
    attorney_recipients: Vec<String>,
}

impl Worker {
    async fn notify(&self, lead: &LeadResponse) {
        let outcome = match self.email.send_prospect_notification(lead).await {
            Ok(()) => "sent",
            Err(e) => {
                tracing::error!(lead_id = lead.id, error = %e, "Failed to send prospect notification");
                "failed"
            }
        };
        counter!("leadctl_notifications_total", "kind" => "prospect", "outcome" => outcome).increment(1);

        let resume = match self.storage.read(&lead.resume_path).await {
            Ok(content) => Some(EmailAttachment {
                filename: lead.resume_path.clone(),
                content,
            }),
            Err(e) => {
                tracing::warn!(lead_id = lead.id, error = %e, "Resume unavailable, notifying attorneys without attachment");
                None
            }
        };

        let outcome = match self.email.send_attorney_notification(lead, &self.attorney_recipients, resume).await {
            Ok(()) => "sent",
            Err(e) => {
                tracing::error!(lead_id = lead.id, error = %e, "Failed to send attorney notification");
                "failed"
            }
        };
        counter!("leadctl_notifications_total", "kind" => "attorney", "outcome" => outcome).increment(1);
    }
}

async fn run_worker(mut rx: mpsc::Receiver<LeadResponse>, worker: Worker, shutdown: CancellationToken) {
    loop {
        let lead = tokio::select! {
            lead = rx.recv() => {
                match lead {
                    Some(l) => l,
                    None => {
                        tracing::debug!("Notification channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Notification worker received shutdown signal");
                break;
            }
        };

        tracing::debug!(lead_id = lead.id, "Sending lead notifications");
        worker.notify(&lead).await;
    }
}
