#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[cfg(feature = "prometheus")]
    #[error("failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),

    /// A configured global label would be rejected by scrapers.
    #[error("invalid metric label name {name:?}: {reason}")]
    InvalidLabel { name: String, reason: &'static str },
}

impl Error {
    #[must_use]
    pub fn invalid_label(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidLabel {
            name: name.into(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
