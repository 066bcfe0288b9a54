use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    /// The probe listener could not be opened.
    #[error("Cannot listen for health probes on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Health probe server failed: {0}")]
    Serve(String),
}
