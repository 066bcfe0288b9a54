use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use postie_common::EmailTask;
use tera::{Context, Tera};

use crate::error::MailError;

/// Subject and HTML body of a task, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Renders task subjects and bodies from a directory of templates.
///
/// Templates are read on every render so that edits take effect without a
/// restart.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn render(&self, task: &EmailTask) -> Result<RenderedEmail, MailError> {
        let context = context(&task.data)?;

        let subject = Tera::one_off(&task.subject, &context, false).map_err(|e| {
            MailError::Render {
                name: String::from("subject"),
                reason: describe(&e),
            }
        })?;

        let source = self.read(&task.template).await?;
        let html = Tera::one_off(&source, &context, true).map_err(|e| MailError::Render {
            name: task.template.clone(),
            reason: describe(&e),
        })?;

        Ok(RenderedEmail { subject, html })
    }

    /// Path of the body template for `name`.
    pub fn path(&self, name: &str) -> Result<PathBuf, MailError> {
        let invalid = name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || name.starts_with('.');
        if invalid {
            return Err(MailError::InvalidTemplateName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.html")))
    }

    async fn read(&self, name: &str) -> Result<String, MailError> {
        let path = self.path(name)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                MailError::TemplateNotFound(name.to_string())
            } else {
                MailError::Io {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }
}

fn context(data: &HashMap<String, serde_json::Value>) -> Result<Context, MailError> {
    Context::from_serialize(data).map_err(|e| MailError::Render {
        name: String::from("data"),
        reason: describe(&e),
    })
}

/// Tera keeps the useful part of an error in its source chain.
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn task(subject: &str, template: &str) -> EmailTask {
        EmailTask {
            to: "a@example.com".to_string(),
            subject: subject.to_string(),
            template: template.to_string(),
            data: HashMap::from([
                ("name".to_string(), serde_json::json!("A")),
                ("items".to_string(), serde_json::json!(["x", "y"])),
            ]),
            kind: "welcome".to_string(),
        }
    }

    #[tokio::test]
    async fn test_renders_subject_and_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("welcome.html"),
            "<p>Hi {{ name }}</p>{% for item in items %}<i>{{ item }}</i>{% endfor %}",
        )
        .unwrap();

        let rendered = TemplateRenderer::new(dir.path())
            .render(&task("Welcome, {{ name }}!", "welcome"))
            .await
            .unwrap();

        assert_eq!(rendered.subject, "Welcome, A!");
        assert_eq!(rendered.html, "<p>Hi A</p><i>x</i><i>y</i>");
    }

    #[tokio::test]
    async fn test_body_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echo.html"), "{{ name }}").unwrap();

        let mut task = task("{{ name }}", "echo");
        task.data
            .insert("name".to_string(), serde_json::json!("<b>A</b>"));

        let rendered = TemplateRenderer::new(dir.path()).render(&task).await.unwrap();
        assert_eq!(rendered.subject, "<b>A</b>");
        assert_eq!(rendered.html, "&lt;b&gt;A&lt;&#x2F;b&gt;");
    }

    #[tokio::test]
    async fn test_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateRenderer::new(dir.path())
            .render(&task("Hi", "absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::TemplateNotFound(name) if name == "absent"));
    }

    #[tokio::test]
    async fn test_broken_subject_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateRenderer::new(dir.path())
            .render(&task("Hi {{ name", "welcome"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Render { ref name, .. } if name == "subject"));
    }

    #[test]
    fn test_rejects_names_leaving_directory() {
        let renderer = TemplateRenderer::new("templates");
        for name in ["", "../secret", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(renderer.path(name), Err(MailError::InvalidTemplateName(_))),
                "accepted {name:?}"
            );
        }
        assert_eq!(
            renderer.path("welcome").unwrap(),
            PathBuf::from("templates/welcome.html")
        );
    }
}
