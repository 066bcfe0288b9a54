#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{collections::HashMap, path::Path};

use postie::config::from_file;
use postie_common::EmailTask;
use postie_mailer::{TemplateRenderer, TlsMode};
use pretty_assertions::assert_eq;

#[test]
fn test_sample_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../postie.config.ron");
    let postie = from_file(&path).expect("sample config is valid");

    assert_eq!(postie.broker.vhost, "/");
    assert_eq!(postie.retry.max_retries(), 3);
    assert_eq!(postie.consumer.workers, 4);
    assert_eq!(postie.mailer.tls, TlsMode::None);
    assert_eq!(postie.topology.exchange, "mailer");
    assert!(postie.health.enabled);
    assert_eq!(postie.store.max_records, 10_000);
}

#[tokio::test]
async fn test_sample_template_renders() {
    let templates = Path::new(env!("CARGO_MANIFEST_DIR")).join("../templates");
    let task = EmailTask {
        to: "a@example.com".to_string(),
        subject: "Welcome, {{ name }}".to_string(),
        template: "welcome".to_string(),
        data: HashMap::from([("name".to_string(), serde_json::json!("A"))]),
        kind: "welcome".to_string(),
    };

    let rendered = TemplateRenderer::new(templates).render(&task).await.unwrap();
    assert_eq!(rendered.subject, "Welcome, A");
    assert!(rendered.html.contains("<h1>Welcome, A!</h1>"));
    assert!(!rendered.html.contains("Get started"));
}
