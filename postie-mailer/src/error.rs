use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template names are plain file stems; anything that could leave the
    /// templates directory is refused.
    #[error("Invalid template name: {0:?}")]
    InvalidTemplateName(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Failed to render {name}: {reason}")]
    Render { name: String, reason: String },

    #[error("Failed to read template {name}: {reason}")]
    Io { name: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}
