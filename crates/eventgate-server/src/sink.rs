//! Resource sink wiring.
//!
//! Creating resources against a live orchestrator is the deployment's
//! concern: the in-cluster build binds the generic client configured by
//! `--kubeconfig`/`--master` here. [`LoggingSink`] is the standalone
//! fallback; it records each manifest it is handed instead of creating
//! it.

use async_trait::async_trait;

use eventgate_engine::{ResourceSink, SinkError};

/// Sink that logs each manifest instead of creating it.
pub struct LoggingSink;

#[async_trait]
impl ResourceSink for LoggingSink {
    async fn create(&self, manifest: &[u8]) -> Result<(), SinkError> {
        tracing::info!(
            manifest = %String::from_utf8_lossy(manifest),
            "resource create (logging sink)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_sink_accepts_manifest() {
        LoggingSink.create(b"{\"kind\":\"Service\"}").await.unwrap();
    }
}
