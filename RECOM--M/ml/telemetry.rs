use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for recommendation-engine telemetry sinks.
pub struct RecomTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
}

impl RecomTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Discards records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<RecomTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(RecomTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared by the training stages.
#[derive(Clone)]
pub struct RecomTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for RecomTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecomTelemetry")
            .field("module", &self.inner.module)
            .field(
                "log_path",
                &self.inner.logger.as_ref().map(JsonLogger::path),
            )
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
}

impl RecomTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> RecomTelemetryBuilder {
        RecomTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }
}
