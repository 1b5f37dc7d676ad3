//! Terminal geometry of a codetainer
//!
//! Resizing goes straight to the runtime; reading the geometry back runs
//! `tput` inside the container through the exec gateway.

use std::sync::Arc;

use tracing::debug;

use crate::container::ExecGateway;
use crate::error::{CodetainerError, Result};
use crate::models::Tty;
use crate::runtime::ContainerRuntime;

pub struct TtyService {
    runtime: Arc<dyn ContainerRuntime>,
    gateway: Arc<ExecGateway>,
}

/// Parse a positive terminal dimension
pub fn parse_dimension(field: &str, value: Option<&str>) -> Result<u16> {
    let raw = match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(CodetainerError::validation(format!("{} is required", field))),
    };

    match raw.parse::<i64>() {
        Ok(n) if n > 0 && n <= u16::MAX as i64 => Ok(n as u16),
        Ok(n) => Err(CodetainerError::validation(format!(
            "{} must be between 1 and {}, got {}",
            field,
            u16::MAX,
            n
        ))),
        Err(_) => Err(CodetainerError::validation(format!(
            "{} must be a positive integer, got {:?}",
            field, raw
        ))),
    }
}

impl TtyService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, gateway: Arc<ExecGateway>) -> Self {
        Self { runtime, gateway }
    }

    /// Validate both dimensions, then resize the container terminal
    pub async fn resize(&self, container_id: &str, height: Option<&str>, width: Option<&str>) -> Result<Tty> {
        let tty = Tty {
            height: parse_dimension("height", height)?,
            width: parse_dimension("width", width)?,
        };

        self.runtime.resize_container_tty(container_id, tty).await?;
        debug!(container_id = %container_id, height = tty.height, width = tty.width, "Terminal resized");

        Ok(tty)
    }

    /// Current geometry as reported by `tput` inside the container
    pub async fn geometry(&self, container_id: &str) -> Result<Tty> {
        let width = self.query(container_id, "cols").await?;
        let height = self.query(container_id, "lines").await?;
        Ok(Tty { height, width })
    }

    async fn query(&self, container_id: &str, capability: &str) -> Result<u16> {
        let argv = vec!["tput".to_string(), capability.to_string()];
        let capture = self.gateway.execute(container_id, &argv).await?;
        let text = capture.stdout_lossy();
        let value = text.trim();

        value.parse::<u16>().map_err(|_| {
            CodetainerError::Parse(format!("tput {} returned {:?}", capability, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use pretty_assertions::assert_eq;

    fn service(runtime: Arc<FakeRuntime>) -> TtyService {
        let gateway = Arc::new(ExecGateway::new(runtime.clone(), Duration::from_secs(2)));
        TtyService::new(runtime, gateway)
    }

    #[tokio::test]
    async fn test_resize_then_geometry() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let tty = service(runtime.clone());

        let resized = tty.resize("c1", Some("24"), Some("80")).await.unwrap();
        assert_eq!(resized, Tty { height: 24, width: 80 });

        let geometry = tty.geometry("c1").await.unwrap();
        assert_eq!(geometry, Tty { height: 24, width: 80 });

        tty.resize("c1", Some("50"), Some("132")).await.unwrap();
        assert_eq!(tty.geometry("c1").await.unwrap(), Tty { height: 50, width: 132 });
    }

    #[tokio::test]
    async fn test_invalid_dimensions_make_no_runtime_call() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        let tty = service(runtime.clone());

        for (height, width) in [
            (Some("0"), Some("80")),
            (Some("24"), Some("-1")),
            (None, Some("80")),
            (Some("24"), Some("wide")),
            (Some("70000"), Some("80")),
        ] {
            let err = tty.resize("c1", height, width).await.unwrap_err();
            assert_eq!(err.kind(), "VALIDATION_ERROR");
        }

        assert_eq!(runtime.runtime_calls(), 0);
    }

    #[tokio::test]
    async fn test_geometry_failure_is_whole() {
        let runtime = Arc::new(FakeRuntime::new().with_container("c1", "alpha"));
        runtime.script(&["tput", "lines"], "", "tput: No value for $TERM\n");
        let tty = service(runtime.clone());

        let err = tty.geometry("c1").await.unwrap_err();
        assert_eq!(err.kind(), "EXEC_FAILURE");

        runtime.script(&["tput", "lines"], "many\n", "");
        let err = tty.geometry("c1").await.unwrap_err();
        assert_eq!(err.kind(), "PARSE_ERROR");
    }
}
