use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use stagehand_plan::{HealthCheck, UnitSpec};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::{HealthProber, HealthState};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Prober dispatching on the unit's health check descriptor.
///
/// Exec checks run the configured command and map its exit status; tcp
/// checks attempt a bounded connect; http checks issue a GET and map the
/// response status. Transport-level failures are reported as
/// [`HealthState::Indeterminate`] so boot-time refusals are retried.
#[derive(Clone, Debug)]
pub struct StandardProber {
    call_timeout: Duration,
    http: reqwest::Client,
}

impl StandardProber {
    /// Creates a prober with the default 10s per-call timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// Overrides the default per-call timeout. Individual checks can
    /// still override this on their descriptor.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn probe_exec(&self, unit: &UnitSpec, command: &[String]) -> Result<HealthState> {
        let Some((program, args)) = command.split_first() else {
            return Err(Error::InvalidCheck {
                unit: unit.name().to_string(),
                reason: "exec check has an empty command".to_string(),
            });
        };

        let call_timeout = unit.health_check().timeout().unwrap_or(self.call_timeout);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match timeout(call_timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Ok(HealthState::Healthy),
            Ok(Ok(output)) => {
                debug!(
                    "exec check for {} exited with {}",
                    unit.name(),
                    output.status
                );
                Ok(HealthState::Unhealthy)
            }
            Ok(Err(e)) => {
                debug!("exec check for {} could not run: {}", unit.name(), e);
                Ok(HealthState::Indeterminate)
            }
            Err(_) => {
                debug!("exec check for {} timed out", unit.name());
                Ok(HealthState::Indeterminate)
            }
        }
    }

    async fn probe_tcp(&self, unit: &UnitSpec, addr: SocketAddr) -> Result<HealthState> {
        let call_timeout = unit.health_check().timeout().unwrap_or(self.call_timeout);

        match timeout(call_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(HealthState::Healthy),
            Ok(Err(e)) => {
                debug!("tcp check for {} failed to connect: {}", unit.name(), e);
                Ok(HealthState::Indeterminate)
            }
            Err(_) => {
                debug!("tcp check for {} timed out", unit.name());
                Ok(HealthState::Indeterminate)
            }
        }
    }

    async fn probe_http(&self, unit: &UnitSpec, url: &Url) -> Result<HealthState> {
        let call_timeout = unit.health_check().timeout().unwrap_or(self.call_timeout);

        match self
            .http
            .get(url.clone())
            .timeout(call_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(HealthState::Healthy),
            Ok(response) => {
                debug!(
                    "http check for {} answered with status {}",
                    unit.name(),
                    response.status()
                );
                Ok(HealthState::Unhealthy)
            }
            Err(e) => {
                debug!("http check for {} failed: {}", unit.name(), e);
                Ok(HealthState::Indeterminate)
            }
        }
    }
}

impl Default for StandardProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProber for StandardProber {
    async fn probe(&self, unit: &UnitSpec) -> Result<HealthState> {
        match unit.health_check() {
            HealthCheck::Exec { command, .. } => self.probe_exec(unit, command).await,
            HealthCheck::Tcp { addr, .. } => self.probe_tcp(unit, *addr).await,
            HealthCheck::Http { url, .. } => self.probe_http(unit, url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn unit_with(check: HealthCheck) -> UnitSpec {
        UnitSpec::new("subject", check)
    }

    #[tokio::test]
    async fn exec_check_maps_exit_status() {
        let prober = StandardProber::new();

        let healthy = unit_with(HealthCheck::Exec {
            command: vec!["sh".into(), "-c".into(), "exit 0".into()],
            interval: None,
            timeout: None,
        });
        assert_eq!(prober.probe(&healthy).await.unwrap(), HealthState::Healthy);

        let unhealthy = unit_with(HealthCheck::Exec {
            command: vec!["sh".into(), "-c".into(), "exit 3".into()],
            interval: None,
            timeout: None,
        });
        assert_eq!(
            prober.probe(&unhealthy).await.unwrap(),
            HealthState::Unhealthy
        );
    }

    #[tokio::test]
    async fn exec_check_with_missing_program_is_indeterminate() {
        let prober = StandardProber::new();
        let unit = unit_with(HealthCheck::Exec {
            command: vec!["definitely-not-a-real-binary-4242".into()],
            interval: None,
            timeout: None,
        });

        assert_eq!(
            prober.probe(&unit).await.unwrap(),
            HealthState::Indeterminate
        );
    }

    #[tokio::test]
    async fn exec_check_with_empty_command_is_rejected() {
        let prober = StandardProber::new();
        let unit = unit_with(HealthCheck::Exec {
            command: vec![],
            interval: None,
            timeout: None,
        });

        assert!(prober.probe(&unit).await.is_err());
    }

    #[tokio::test]
    async fn tcp_check_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let prober = StandardProber::new();
        let unit = unit_with(HealthCheck::Tcp {
            addr,
            interval: None,
            timeout: None,
        });

        assert_eq!(prober.probe(&unit).await.unwrap(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn tcp_check_refused_is_indeterminate() {
        // Bind then drop so the port is very likely closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = StandardProber::new();
        let unit = unit_with(HealthCheck::Tcp {
            addr,
            interval: None,
            timeout: None,
        });

        assert_eq!(
            prober.probe(&unit).await.unwrap(),
            HealthState::Indeterminate
        );
    }

    async fn one_shot_http_server(status_line: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn http_check_maps_response_status() {
        let prober = StandardProber::new();

        let ok_addr = one_shot_http_server("200 OK").await;
        let healthy = unit_with(HealthCheck::Http {
            url: format!("http://{ok_addr}/health").parse().unwrap(),
            interval: None,
            timeout: None,
        });
        assert_eq!(prober.probe(&healthy).await.unwrap(), HealthState::Healthy);

        let err_addr = one_shot_http_server("503 Service Unavailable").await;
        let unhealthy = unit_with(HealthCheck::Http {
            url: format!("http://{err_addr}/health").parse().unwrap(),
            interval: None,
            timeout: None,
        });
        assert_eq!(
            prober.probe(&unhealthy).await.unwrap(),
            HealthState::Unhealthy
        );
    }

    #[tokio::test]
    async fn http_check_with_no_server_is_indeterminate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = StandardProber::new();
        let unit = unit_with(HealthCheck::Http {
            url: format!("http://{addr}/health").parse().unwrap(),
            interval: None,
            timeout: None,
        });

        assert_eq!(
            prober.probe(&unit).await.unwrap(),
            HealthState::Indeterminate
        );
    }
}
