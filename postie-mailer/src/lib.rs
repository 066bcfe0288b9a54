//! Rendering and sending of task emails
//!
//! The subject of a task is itself a template, rendered against the task's
//! data. The body is rendered from `<templates_dir>/<template>.html` and sent
//! as HTML over SMTP.

mod config;
mod error;
mod sender;
mod smtp;
mod template;

pub use config::{MailerConfig, TlsMode};
pub use error::MailError;
pub use sender::MailSender;
pub use smtp::SmtpMailer;
pub use template::{RenderedEmail, TemplateRenderer};
