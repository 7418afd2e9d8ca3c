use super::probe::{Probe, TcpProbe};
use crate::balancer::LoadBalancer;
use crate::config::HealthCheckConfig;
use crate::metrics::Metrics;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome of one completed probe round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub probed: usize,
    pub alive: usize,
    pub transitions: usize,
}

/// Periodically probes every backend in the pool and records liveness.
///
/// At most one round runs at a time. A tick that fires while a round is still
/// in flight is dropped, not queued.
pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    interval: Duration,
    timeout: Duration,
    probe: Arc<dyn Probe>,
    probing: AtomicBool,
}

/// Clears the in-progress flag when the round ends, however it ends.
struct RoundGuard<'a>(&'a AtomicBool);

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HealthChecker {
    pub fn new(balancer: Arc<LoadBalancer>, config: &HealthCheckConfig) -> Self {
        Self::with_probe(
            balancer,
            config.interval.as_std(),
            config.timeout.as_std(),
            Arc::new(TcpProbe),
        )
    }

    pub fn with_probe(
        balancer: Arc<LoadBalancer>,
        interval: Duration,
        timeout: Duration,
        probe: Arc<dyn Probe>,
    ) -> Self {
        Self {
            balancer,
            interval: if interval.is_zero() { DEFAULT_INTERVAL } else { interval },
            timeout: if timeout.is_zero() { DEFAULT_PROBE_TIMEOUT } else { timeout },
            probe,
            probing: AtomicBool::new(false),
        }
    }

    pub fn is_probing(&self) -> bool {
        self.probing.load(Ordering::Acquire)
    }

    /// Tick until shutdown. Each tick spawns its round so the ticker keeps
    /// its cadence while a slow round is still running.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Health checking started with interval {:?} (probe timeout {:?})",
            self.interval, self.timeout
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checker = Arc::clone(&self);
                    tokio::spawn(async move {
                        checker.check_all().await;
                    });
                }
                _ = shutdown.recv() => {
                    info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every backend concurrently and wait for all of them.
    ///
    /// Returns `None` without probing anything if another round holds the flag.
    pub async fn check_all(&self) -> Option<RoundSummary> {
        if self
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Health round still in progress, skipping tick");
            Metrics::record_health_round(true);
            return None;
        }
        let _round = RoundGuard(&self.probing);

        let tasks: Vec<_> = self
            .balancer
            .backends()
            .into_iter()
            .map(|backend| {
                let probe = Arc::clone(&self.probe);
                let balancer = Arc::clone(&self.balancer);
                let timeout = self.timeout;

                tokio::spawn(async move {
                    let alive = probe.probe(backend.url(), timeout).await;
                    let changed = backend.is_alive() != alive;

                    if changed {
                        if alive {
                            info!("[Health] Backend {} is UP", backend);
                        } else {
                            warn!("[Health] Backend {} is DOWN", backend);
                        }
                    }

                    balancer.set_backend_status(backend.url(), alive);
                    Metrics::set_backend_health(&backend.origin(), alive);
                    (alive, changed)
                })
            })
            .collect();

        let mut summary = RoundSummary::default();
        for result in join_all(tasks).await {
            match result {
                Ok((alive, changed)) => {
                    summary.probed += 1;
                    summary.alive += usize::from(alive);
                    summary.transitions += usize::from(changed);
                }
                Err(e) => error!("Health probe task failed: {}", e),
            }
        }

        Metrics::record_health_round(false);
        debug!(
            probed = summary.probed,
            alive = summary.alive,
            transitions = summary.transitions,
            "Health round complete"
        );

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadBalancerStrategy;
    use crate::pool::{Backend, ServerPool};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;
    use url::Url;

    fn balancer(urls: &[String]) -> Arc<LoadBalancer> {
        let pool = ServerPool::with_backends(urls.iter().map(|u| Backend::parse(u).unwrap()));
        Arc::new(LoadBalancer::new(Arc::new(pool), LoadBalancerStrategy::RoundRobin))
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    /// Holds every probe until released, counting how many started.
    struct GatedProbe {
        gate: Semaphore,
        calls: AtomicUsize,
        result: bool,
    }

    impl GatedProbe {
        fn new(result: bool) -> Self {
            Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
                result,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self) {
            self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    #[async_trait]
    impl Probe for GatedProbe {
        async fn probe(&self, _url: &Url, _timeout: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            self.result
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl Probe for PanickingProbe {
        async fn probe(&self, _url: &Url, _timeout: Duration) -> bool {
            panic!("probe exploded");
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_round_updates_liveness() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = format!("http://{}", listener.local_addr().unwrap());
        let down = closed_port_url();

        let lb = balancer(&[up.clone(), down.clone()]);
        let backends = lb.backends();
        backends[0].set_alive(false);

        let checker = HealthChecker::with_probe(
            Arc::clone(&lb),
            Duration::from_secs(60),
            Duration::from_secs(2),
            Arc::new(TcpProbe),
        );

        let summary = checker.check_all().await.unwrap();
        assert_eq!(
            summary,
            RoundSummary {
                probed: 2,
                alive: 1,
                transitions: 2
            }
        );
        assert!(backends[0].is_alive());
        assert!(!backends[1].is_alive());

        // Nothing changes on the next round.
        let summary = checker.check_all().await.unwrap();
        assert_eq!(summary.transitions, 0);
        assert!(!checker.is_probing());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let lb = balancer(&["http://10.0.0.1:80".to_string(), "http://10.0.0.2:80".to_string()]);
        let probe = Arc::new(GatedProbe::new(false));
        let checker = Arc::new(HealthChecker::with_probe(
            Arc::clone(&lb),
            Duration::from_secs(60),
            Duration::from_secs(2),
            probe.clone(),
        ));

        let first = tokio::spawn({
            let checker = Arc::clone(&checker);
            async move { checker.check_all().await }
        });
        wait_until(|| probe.calls() == 2).await;
        assert!(checker.is_probing());

        // Second tick while the first round is blocked: no new probes at all.
        assert_eq!(checker.check_all().await, None);
        assert_eq!(probe.calls(), 2);
        assert!(lb.backends().iter().all(|b| b.is_alive()));

        probe.release();
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.transitions, 2);
        assert!(lb.backends().iter().all(|b| !b.is_alive()));
        assert!(!checker.is_probing());

        // The flag is free again, so the next tick runs.
        assert!(checker.check_all().await.is_some());
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test]
    async fn test_backend_removed_during_round_stays_removed() {
        let lb = balancer(&["http://10.0.0.1:80".to_string(), "http://10.0.0.2:80".to_string()]);
        let probe = Arc::new(GatedProbe::new(true));
        let checker = Arc::new(HealthChecker::with_probe(
            Arc::clone(&lb),
            Duration::from_secs(60),
            Duration::from_secs(2),
            probe.clone(),
        ));

        let round = tokio::spawn({
            let checker = Arc::clone(&checker);
            async move { checker.check_all().await }
        });
        wait_until(|| probe.calls() == 2).await;

        lb.remove_backend("http://10.0.0.1:80").unwrap();
        probe.release();
        round.await.unwrap().unwrap();

        let remaining: Vec<_> = lb.backends().iter().map(|b| b.origin()).collect();
        assert_eq!(remaining, vec!["http://10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_flag_released_when_probe_panics() {
        let lb = balancer(&["http://10.0.0.1:80".to_string()]);
        let checker = HealthChecker::with_probe(
            Arc::clone(&lb),
            Duration::from_secs(60),
            Duration::from_secs(2),
            Arc::new(PanickingProbe),
        );

        let summary = checker.check_all().await.unwrap();
        assert_eq!(summary.probed, 0);
        assert!(!checker.is_probing());
        assert!(checker.check_all().await.is_some());
    }

    #[tokio::test]
    async fn test_empty_pool_round() {
        let lb = balancer(&[]);
        let checker = HealthChecker::new(lb, &HealthCheckConfig::default());
        assert_eq!(checker.check_all().await, Some(RoundSummary::default()));
    }

    #[tokio::test]
    async fn test_run_loop_probes_and_stops_on_shutdown() {
        let lb = balancer(&[closed_port_url()]);
        let checker = Arc::new(HealthChecker::with_probe(
            Arc::clone(&lb),
            Duration::from_millis(20),
            Duration::from_millis(500),
            Arc::new(TcpProbe),
        ));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(&checker).run(rx));

        let backend = lb.backends().remove(0);
        wait_until(|| !backend.is_alive()).await;

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("health loop did not stop")
            .unwrap();
    }
}
