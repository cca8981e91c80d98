//! Built-in TCP connect engine.
//!
//! Confirms reachability with a plain connect attempt per (address, port).
//! Address groups run concurrently up to `max_concurrent_hosts`; the ports
//! of one address are probed one after another.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exposure_core::HostContext;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::config::NativeProbeConfig;
use crate::error::{Result, ScanError};
use crate::probe::{should_skip, EngineKind, PortProber};
use crate::targets::ScanTargets;

/// Opens (and immediately closes) a TCP connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, dest: &str, connect_timeout: Duration) -> io::Result<()>;
}

/// Dialer backed by `tokio::net::TcpStream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, dest: &str, connect_timeout: Duration) -> io::Result<()> {
        match timeout(connect_timeout, TcpStream::connect(dest)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {dest} timed out"),
            )),
        }
    }
}

/// How a single connect attempt ended.
#[derive(Debug)]
enum Verdict {
    Open,
    Closed,
    Exhausted,
    Failed(io::Error),
}

fn classify(result: io::Result<()>) -> Verdict {
    match result {
        Ok(()) => Verdict::Open,
        Err(e) if is_unreachable(&e) => Verdict::Closed,
        Err(e) if is_fd_exhaustion(&e) => Verdict::Exhausted,
        Err(e) => Verdict::Failed(e),
    }
}

fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::ConnectionRefused
    )
}

fn is_fd_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

/// The native probe engine.
pub struct NativeProber {
    dialer: Arc<dyn Dialer>,
    config: NativeProbeConfig,
}

impl NativeProber {
    pub fn new(config: NativeProbeConfig) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    pub fn with_dialer(config: NativeProbeConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer, config }
    }
}

#[async_trait]
impl PortProber for NativeProber {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
    }

    async fn probe(&self, targets: &ScanTargets, host: &HostContext) -> Result<Vec<String>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_hosts.max(1)));
        let mut groups = JoinSet::new();
        let mut group_count = 0;

        for (addr, ports) in targets.iter() {
            if should_skip(addr, host) {
                tracing::debug!(addr = %addr, "Skipping loopback address on remote host");
                continue;
            }

            let index = group_count;
            group_count += 1;

            let dialer = self.dialer.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            let addr = addr.clone();
            let ports = ports.clone();

            groups.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::EngineExecution {
                        reason: e.to_string(),
                    })?;
                let open = probe_group(dialer.as_ref(), &config, &addr, &ports).await?;
                Ok::<_, ScanError>((index, open))
            });
        }

        let mut by_group: Vec<Vec<String>> = vec![Vec::new(); group_count];
        while let Some(joined) = groups.join_next().await {
            // Returning early drops the JoinSet, which aborts the groups still running.
            let (index, open) = joined.map_err(|e| ScanError::EngineExecution {
                reason: format!("native probe task failed: {e}"),
            })??;
            by_group[index] = open;
        }

        Ok(by_group.into_iter().flatten().collect())
    }
}

async fn probe_group(
    dialer: &dyn Dialer,
    config: &NativeProbeConfig,
    addr: &str,
    ports: &[String],
) -> Result<Vec<String>> {
    let mut open = Vec::new();
    for port in ports {
        let dest = format!("{addr}:{port}");
        if probe_port(dialer, config, &dest).await? {
            open.push(dest);
        }
    }
    Ok(open)
}

/// Probe one destination, waiting out descriptor exhaustion.
async fn probe_port(dialer: &dyn Dialer, config: &NativeProbeConfig, dest: &str) -> Result<bool> {
    let mut retries: u32 = 0;
    loop {
        match classify(dialer.dial(dest, config.connect_timeout()).await) {
            Verdict::Open => return Ok(true),
            Verdict::Closed => return Ok(false),
            Verdict::Exhausted => {
                if config.max_exhaustion_retries.is_some_and(|max| retries >= max) {
                    return Err(ScanError::ResourceExhausted {
                        target: dest.to_string(),
                        attempts: retries + 1,
                    });
                }
                retries += 1;
                tracing::debug!(dest = %dest, retries, "File descriptors exhausted, backing off");
                sleep(config.exhaustion_backoff()).await;
            }
            Verdict::Failed(source) => {
                return Err(ScanError::Probe {
                    target: dest.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Replays scripted outcomes per destination; unscripted ones are refused.
    #[derive(Default)]
    struct ScriptedDialer {
        script: Mutex<HashMap<String, Vec<io::Result<()>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedDialer {
        fn with(mut self, dest: &str, outcomes: Vec<io::Result<()>>) -> Self {
            self.script
                .get_mut()
                .unwrap()
                .insert(dest.to_string(), outcomes.into_iter().rev().collect());
            self
        }

        fn calls(&self, dest: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|d| *d == dest).count()
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, dest: &str, _connect_timeout: Duration) -> io::Result<()> {
            self.calls.lock().unwrap().push(dest.to_string());
            self.script
                .lock()
                .unwrap()
                .get_mut(dest)
                .and_then(Vec::pop)
                .unwrap_or_else(|| Err(io::ErrorKind::ConnectionRefused.into()))
        }
    }

    fn emfile() -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::EMFILE))
    }

    fn fast_config() -> NativeProbeConfig {
        NativeProbeConfig {
            exhaustion_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn prober(dialer: &Arc<ScriptedDialer>, config: NativeProbeConfig) -> NativeProber {
        NativeProber::with_dialer(config, dialer.clone())
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(Ok(())), Verdict::Open));
        assert!(matches!(
            classify(Err(io::ErrorKind::TimedOut.into())),
            Verdict::Closed
        ));
        assert!(matches!(
            classify(Err(io::ErrorKind::ConnectionRefused.into())),
            Verdict::Closed
        ));
        assert!(matches!(classify(emfile()), Verdict::Exhausted));
        assert!(matches!(
            classify(Err(io::Error::from_raw_os_error(libc::ENFILE))),
            Verdict::Exhausted
        ));
        assert!(matches!(
            classify(Err(io::ErrorKind::PermissionDenied.into())),
            Verdict::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_open_and_closed() {
        let dialer = Arc::new(ScriptedDialer::default().with("10.0.0.5:22", vec![Ok(())]));
        let targets: ScanTargets = [("10.0.0.5", "22"), ("10.0.0.5", "80")].into_iter().collect();

        let open = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap();

        assert_eq!(open, vec!["10.0.0.5:22"]);
    }

    #[tokio::test]
    async fn test_exhaustion_is_retried_until_success() {
        let dialer = Arc::new(ScriptedDialer::default().with(
            "10.0.0.5:443",
            vec![emfile(), emfile(), emfile(), emfile(), Ok(())],
        ));
        let targets: ScanTargets = [("10.0.0.5", "443")].into_iter().collect();

        let open = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap();

        assert_eq!(open, vec!["10.0.0.5:443"]);
        assert_eq!(dialer.calls("10.0.0.5:443"), 5);
    }

    #[tokio::test]
    async fn test_exhaustion_then_refused_is_closed() {
        let dialer = Arc::new(ScriptedDialer::default().with(
            "10.0.0.5:443",
            vec![emfile(), Err(io::ErrorKind::ConnectionRefused.into())],
        ));
        let targets: ScanTargets = [("10.0.0.5", "443")].into_iter().collect();

        let open = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap();

        assert!(open.is_empty());
        assert_eq!(dialer.calls("10.0.0.5:443"), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_retry_cap() {
        let dialer = Arc::new(
            ScriptedDialer::default().with("10.0.0.5:443", vec![emfile(), emfile(), emfile()]),
        );
        let targets: ScanTargets = [("10.0.0.5", "443")].into_iter().collect();
        let config = NativeProbeConfig {
            max_exhaustion_retries: Some(2),
            ..fast_config()
        };

        let err = prober(&dialer, config)
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::ResourceExhausted { ref target, attempts: 3 } if target == "10.0.0.5:443"
        ));
    }

    #[tokio::test]
    async fn test_other_errors_abort() {
        let dialer = Arc::new(
            ScriptedDialer::default()
                .with("10.0.0.5:22", vec![Ok(())])
                .with("10.0.0.6:22", vec![Err(io::ErrorKind::PermissionDenied.into())]),
        );
        let targets: ScanTargets = [("10.0.0.5", "22"), ("10.0.0.6", "22")].into_iter().collect();

        let err = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Probe { ref target, .. } if target == "10.0.0.6:22"));
    }

    #[tokio::test]
    async fn test_loopback_skipped_on_remote_host() {
        let dialer = Arc::new(
            ScriptedDialer::default()
                .with("127.0.0.1:5432", vec![Ok(())])
                .with("10.0.0.5:5432", vec![Ok(())]),
        );
        let targets: ScanTargets = [("127.0.0.1", "5432"), ("10.0.0.5", "5432")]
            .into_iter()
            .collect();

        let open = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::remote("10.0.0.5", vec![]))
            .await
            .unwrap();

        assert_eq!(open, vec!["10.0.0.5:5432"]);
        assert_eq!(dialer.calls("127.0.0.1:5432"), 0);
    }

    #[tokio::test]
    async fn test_loopback_probed_when_local() {
        let dialer = Arc::new(ScriptedDialer::default().with("127.0.0.1:5432", vec![Ok(())]));
        let targets: ScanTargets = [("127.0.0.1", "5432")].into_iter().collect();

        let open = prober(&dialer, fast_config())
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap();

        assert_eq!(open, vec!["127.0.0.1:5432"]);
    }

    #[tokio::test]
    async fn test_results_follow_target_order() {
        let dialer = Arc::new(
            ScriptedDialer::default()
                .with("10.0.0.1:80", vec![Ok(())])
                .with("10.0.0.2:80", vec![Ok(())])
                .with("10.0.0.3:80", vec![Ok(())]),
        );
        let targets: ScanTargets = [("10.0.0.3", "80"), ("10.0.0.1", "80"), ("10.0.0.2", "80")]
            .into_iter()
            .collect();
        let config = NativeProbeConfig {
            max_concurrent_hosts: 2,
            ..fast_config()
        };

        let open = prober(&dialer, config)
            .probe(&targets, &HostContext::local(vec![]))
            .await
            .unwrap();

        assert_eq!(open, vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
    }
}
