use async_trait::async_trait;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use postie_common::{EmailTask, outgoing};

use crate::{
    config::{MailerConfig, TlsMode},
    error::MailError,
    sender::MailSender,
    template::{RenderedEmail, TemplateRenderer},
};

/// Sends task emails through an SMTP relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    renderer: TemplateRenderer,
}

impl SmtpMailer {
    /// Build the transport. No connection is made until the first send.
    pub fn new(config: &MailerConfig) -> Result<Self, MailError> {
        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Smtp(e.to_string()))?,
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Smtp(e.to_string()))?,
        };

        builder = builder.port(config.port).timeout(Some(config.timeout()));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: sender(config)?,
            renderer: TemplateRenderer::new(config.templates_dir.clone()),
        })
    }

    pub const fn sender(&self) -> &Mailbox {
        &self.from
    }

    pub fn build_message(&self, to: &str, email: RenderedEmail) -> Result<Message, MailError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| MailError::InvalidAddress(to.to_string()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

/// `"<from> <<username>>"` when authenticating, otherwise `from` must be a
/// complete mailbox on its own.
fn sender(config: &MailerConfig) -> Result<Mailbox, MailError> {
    if config.username.is_empty() {
        return config
            .from
            .parse()
            .map_err(|_| MailError::InvalidAddress(config.from.clone()));
    }

    let address: Address = config
        .username
        .parse()
        .map_err(|_| MailError::InvalidAddress(config.username.clone()))?;
    let name = Some(config.from.clone()).filter(|name| !name.is_empty());
    Ok(Mailbox::new(name, address))
}

#[async_trait]
impl MailSender for SmtpMailer {
    #[tracing::instrument(skip_all, fields(to = %task.to, template = %task.template))]
    async fn send(&self, task: &EmailTask) -> Result<(), MailError> {
        let rendered = self.renderer.render(task).await?;
        let message = self.build_message(&task.to, rendered)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        outgoing!(
            level = DEBUG,
            code = %response.code(),
            "Mail accepted by relay"
        );
        Ok(())
    }
}
