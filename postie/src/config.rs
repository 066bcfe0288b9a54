use std::path::{Path, PathBuf};

use crate::controller::Postie;

/// Names a configuration file explicitly. When set, the file must exist.
pub const CONFIG_ENV: &str = "POSTIE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{CONFIG_ENV} points to non-existent file: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read config from {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Invalid config in {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Locations searched when [`CONFIG_ENV`] is unset, in order.
pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./postie.config.ron"),
        PathBuf::from("/etc/postie/postie.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the value of [`CONFIG_ENV`]), which must exist
/// 2. the first of `candidates` that exists
///
/// `None` means no file was found and built-in defaults apply.
pub fn find_config_file(
    explicit: Option<PathBuf>,
    candidates: &[PathBuf],
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::Missing(path));
    }

    Ok(candidates.iter().find(|path| path.exists()).cloned())
}

/// Parse a configuration file.
pub fn from_file(path: &Path) -> Result<Postie, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    ron::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load the process configuration: the file found by [`find_config_file`]
/// (or defaults), then overrides from the environment.
pub fn load() -> Result<Postie, ConfigError> {
    let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

    let mut postie = match find_config_file(explicit, &default_paths())? {
        Some(path) => {
            let postie = from_file(&path)?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            postie
        }
        None => Postie::default(),
    };

    postie.apply_env(|key| std::env::var(key).ok());
    Ok(postie)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let fallback = dir.path().join("fallback.ron");
        std::fs::write(&explicit, "()").unwrap();
        std::fs::write(&fallback, "()").unwrap();

        let found = find_config_file(Some(explicit.clone()), &[fallback]).unwrap();
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.ron");
        std::fs::write(&fallback, "()").unwrap();

        let result = find_config_file(Some(dir.path().join("absent.ron")), &[fallback]);
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second.ron");
        std::fs::write(&second, "()").unwrap();

        let found =
            find_config_file(None, &[dir.path().join("first.ron"), second.clone()]).unwrap();
        assert_eq!(found, Some(second));
    }

    #[test]
    fn test_no_candidates_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let found = find_config_file(None, &[dir.path().join("absent.ron")]).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_from_file_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postie.config.ron");
        std::fs::write(
            &path,
            r#"(
                broker: (host: "rabbit", reconnect_interval_secs: 2),
                retry: (max_retries: 5),
                consumer: (workers: 8),
                mailer: (tls: None, templates_dir: "/srv/templates"),
                health: (enabled: false),
            )"#,
        )
        .unwrap();

        let postie = from_file(&path).unwrap();
        assert_eq!(postie.broker.host, "rabbit");
        assert_eq!(postie.broker.port, 5672);
        assert_eq!(postie.broker.reconnect_interval_secs, 2);
        assert_eq!(postie.retry.max_retries(), 5);
        assert_eq!(postie.retry.base_delay_secs(), 1);
        assert_eq!(postie.consumer.workers, 8);
        assert_eq!(postie.consumer.prefetch, 1);
        assert_eq!(postie.topology.queue, "email_queue");
        assert_eq!(
            postie.mailer.templates_dir,
            PathBuf::from("/srv/templates")
        );
        assert!(!postie.health.enabled);
    }

    #[test]
    fn test_from_file_rejects_bad_ron() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        std::fs::write(&path, "(broker: (port: \"not a port\"))").unwrap();

        assert!(matches!(from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_environment_overrides_file() {
        let env = HashMap::from([
            ("RABBITMQ_HOST", "broker.internal"),
            ("QUEUE_MAX_RETRIES", "7"),
            ("SMTP_HOST", "smtp.example.com"),
        ]);

        let mut postie: Postie = ron::from_str("(broker: (host: \"rabbit\"))").unwrap();
        postie.apply_env(|key| env.get(key).map(ToString::to_string));

        assert_eq!(postie.broker.host, "broker.internal");
        assert_eq!(postie.retry.max_retries(), 7);
        assert_eq!(postie.mailer.host, "smtp.example.com");
    }
}
