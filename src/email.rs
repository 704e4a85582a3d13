use anyhow::{Result, anyhow};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Mailbox, Message, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;

/// Sends simulation-complete notifications over SMTP.
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    portal_base: String,
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self> {
        let credentials =
            Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        // Port 465 is implicit TLS; everything else starts plain and
        // upgrades with STARTTLS.
        let mailer = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
                .port(config.smtp_port)
                .credentials(credentials)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port)
                .credentials(credentials)
                .build()
        };

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
            portal_base: config.portal_base.clone(),
        })
    }

    /// Notify a submitter that their simulation finished and where to view
    /// the results.
    pub async fn send_simulation_complete(&self, to: &str, simulation_id: Uuid) -> Result<()> {
        let from: Mailbox = self
            .from_email
            .parse()
            .map_err(|e| anyhow!("invalid sender address {}: {e}", self.from_email))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| anyhow!("invalid recipient address {to}: {e}"))?;

        let link = format!("{}/simulation/{}", self.portal_base, simulation_id);
        let body = format!(
            "Your simulation has completed. Click the link below to view the results:\n\n{link}\n"
        );

        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject("Simulation complete")
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        self.mailer.send(message).await?;
        info!("sent completion notification for {simulation_id} to {to}");
        Ok(())
    }
}
