//! Health monitor — background task that periodically checks providers.
//!
//! Every `interval` the monitor takes a snapshot of the providers that are
//! due, probes them one after another and writes each provider's new
//! status, failure count and next check time back to the directory.

use std::sync::Arc;

use spm_state::{
    HealthStatus, ProviderDirectory, ProviderRecord, StateResult, Timestamp, epoch_millis,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::backoff::next_check_time;
use crate::checker::{HttpProber, Probe};
use crate::config::{HealthCheckConfig, format_duration};
use crate::error::HealthResult;

/// New health fields for one provider after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthUpdate {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub next_health_check: Timestamp,
}

/// Apply one probe outcome to a provider's health state.
///
/// A success always restores `Ready` with zero failures. A failure bumps
/// the counter and only flips to `NotReady` once the threshold is reached.
pub fn evaluate(
    provider: &ProviderRecord,
    healthy: bool,
    now: Timestamp,
    config: &HealthCheckConfig,
) -> HealthUpdate {
    let (status, consecutive_failures) = if healthy {
        (HealthStatus::Ready, 0)
    } else {
        let failures = provider.consecutive_failures.saturating_add(1);
        let status = if failures >= config.max_consecutive_failures {
            HealthStatus::NotReady
        } else {
            provider.health_status
        };
        (status, failures)
    };

    HealthUpdate {
        status,
        consecutive_failures,
        next_health_check: next_check_time(now, status, consecutive_failures, config),
    }
}

/// Outcome counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Providers in the due-set snapshot.
    pub due: usize,
    /// Probes that succeeded.
    pub healthy: usize,
    /// Probes that failed.
    pub unhealthy: usize,
    /// Health updates written to the directory.
    pub updated: usize,
    /// Health updates the directory rejected.
    pub update_errors: usize,
    /// Providers whose status changed.
    pub transitions: usize,
    /// Whether shutdown cut the scan short.
    pub interrupted: bool,
}

/// Periodic liveness checker for registered providers.
pub struct HealthMonitor<D, P = HttpProber> {
    directory: Arc<D>,
    prober: P,
    config: HealthCheckConfig,
    clock: fn() -> Timestamp,
}

impl<D: ProviderDirectory + 'static> HealthMonitor<D, HttpProber> {
    /// Create a monitor that probes over HTTP(S) with the configured timeout.
    pub fn new(directory: Arc<D>, config: HealthCheckConfig) -> HealthResult<Self> {
        config.validate()?;
        let prober = HttpProber::new(config.timeout)?;
        Ok(Self::with_prober(directory, prober, config))
    }
}

impl<D, P> HealthMonitor<D, P>
where
    D: ProviderDirectory + 'static,
    P: Probe + 'static,
{
    /// Create a monitor with a custom prober.
    pub fn with_prober(directory: Arc<D>, prober: P, config: HealthCheckConfig) -> Self {
        Self {
            directory,
            prober,
            config,
            clock: epoch_millis,
        }
    }

    /// Replace the wall clock (Unix milliseconds).
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the monitor loop on the current runtime.
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        MonitorHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Scan immediately, then once per `interval`, until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = %format_duration(self.config.interval),
            timeout = %format_duration(self.config.timeout),
            max_consecutive_failures = self.config.max_consecutive_failures,
            "health monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.scan(Some(&shutdown)).await {
                        Ok(report) => debug!(?report, "health scan finished"),
                        Err(e) => error!(error = %e, "failed to list providers for health check"),
                    }
                }
            }
        }
    }

    /// Run a single scan over all due providers.
    pub async fn check_providers(&self) -> StateResult<ScanReport> {
        self.scan(None).await
    }

    async fn scan(&self, shutdown: Option<&watch::Receiver<bool>>) -> StateResult<ScanReport> {
        let now = (self.clock)();
        let providers = self.directory.list_due_for_health_check(now)?;
        let mut report = ScanReport {
            due: providers.len(),
            ..ScanReport::default()
        };

        for provider in &providers {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                let remaining = providers.len() - report.healthy - report.unhealthy;
                debug!(remaining, "health scan interrupted");
                report.interrupted = true;
                break;
            }
            self.check_provider(provider, &mut report).await;
        }

        Ok(report)
    }

    async fn check_provider(&self, provider: &ProviderRecord, report: &mut ScanReport) {
        let healthy = self.prober.probe(&provider.endpoint).await;
        if healthy {
            report.healthy += 1;
        } else {
            report.unhealthy += 1;
        }

        let update = evaluate(provider, healthy, (self.clock)(), &self.config);
        if let Err(e) = self.directory.update_health_status(
            &provider.id,
            update.status,
            update.consecutive_failures,
            update.next_health_check,
        ) {
            report.update_errors += 1;
            if e.is_not_found() {
                warn!(
                    provider = %provider.name,
                    id = %provider.id,
                    "provider removed before health update"
                );
            } else {
                error!(
                    provider = %provider.name,
                    id = %provider.id,
                    error = %e,
                    "failed to update health status"
                );
            }
            return;
        }
        report.updated += 1;

        if update.status != provider.health_status {
            report.transitions += 1;
            match update.status {
                HealthStatus::Ready => info!(
                    provider = %provider.name,
                    from = %provider.health_status,
                    to = %update.status,
                    "provider health status changed"
                ),
                HealthStatus::NotReady => warn!(
                    provider = %provider.name,
                    from = %provider.health_status,
                    to = %update.status,
                    failures = update.consecutive_failures,
                    "provider health status changed"
                ),
            }
        }
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the in-flight scan to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "health monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, OnceLock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use spm_state::{NewProvider, StateError, StateStore};

    use super::*;

    const NOW: Timestamp = 1_700_000_000_000;

    fn fixed_now() -> Timestamp {
        NOW
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
            base_backoff_interval: Duration::from_secs(10),
            max_backoff_interval: Duration::from_secs(300),
        }
    }

    fn provider(id: &str, status: HealthStatus, failures: u32) -> ProviderRecord {
        ProviderRecord {
            id: id.to_string(),
            name: format!("{id}-name"),
            service_type: "vm".to_string(),
            schema_version: "v1alpha1".to_string(),
            endpoint: format!("http://{id}.local"),
            health_status: status,
            consecutive_failures: failures,
            next_health_check: None,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct UpdateCall {
        id: String,
        status: HealthStatus,
        consecutive_failures: u32,
        next_health_check: Timestamp,
    }

    /// In-memory directory that records every update call.
    #[derive(Default)]
    struct FakeDirectory {
        providers: Vec<ProviderRecord>,
        missing: HashSet<String>,
        list_fails: bool,
        listed_at: Mutex<Vec<Timestamp>>,
        updates: Mutex<Vec<UpdateCall>>,
    }

    impl FakeDirectory {
        fn with(providers: Vec<ProviderRecord>) -> Self {
            Self {
                providers,
                ..Self::default()
            }
        }

        fn updates(&self) -> Vec<UpdateCall> {
            self.updates.lock().unwrap().clone()
        }
    }

    impl ProviderDirectory for FakeDirectory {
        fn list_due_for_health_check(&self, now: Timestamp) -> StateResult<Vec<ProviderRecord>> {
            self.listed_at.lock().unwrap().push(now);
            if self.list_fails {
                return Err(StateError::Read("database unavailable".to_string()));
            }
            Ok(self
                .providers
                .iter()
                .filter(|p| p.is_due(now))
                .cloned()
                .collect())
        }

        fn update_health_status(
            &self,
            id: &str,
            status: HealthStatus,
            consecutive_failures: u32,
            next_health_check: Timestamp,
        ) -> StateResult<()> {
            if self.missing.contains(id) {
                return Err(StateError::NotFound(id.to_string()));
            }
            self.updates.lock().unwrap().push(UpdateCall {
                id: id.to_string(),
                status,
                consecutive_failures,
                next_health_check,
            });
            Ok(())
        }
    }

    /// Prober with scripted answers per endpoint; unknown endpoints are down.
    #[derive(Default)]
    struct FakeProber {
        answers: HashMap<String, bool>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn answering(pairs: &[(&str, bool)]) -> Self {
            Self {
                answers: pairs
                    .iter()
                    .map(|(id, up)| (format!("http://{id}.local"), *up))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Probe for FakeProber {
        async fn probe(&self, endpoint: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.get(endpoint).copied().unwrap_or(false)
        }
    }

    fn monitor(
        directory: FakeDirectory,
        prober: FakeProber,
    ) -> (Arc<FakeDirectory>, HealthMonitor<FakeDirectory, FakeProber>) {
        let directory = Arc::new(directory);
        let monitor = HealthMonitor::with_prober(Arc::clone(&directory), prober, config())
            .with_clock(fixed_now);
        (directory, monitor)
    }

    // ── evaluate ───────────────────────────────────────────────────

    #[test]
    fn success_resets_failures_and_keeps_steady_interval() {
        let update = evaluate(&provider("p", HealthStatus::Ready, 0), true, NOW, &config());
        assert_eq!(
            update,
            HealthUpdate {
                status: HealthStatus::Ready,
                consecutive_failures: 0,
                next_health_check: NOW + 10_000,
            }
        );
    }

    #[test]
    fn repeated_success_is_idempotent() {
        let config = config();
        let mut record = provider("p", HealthStatus::Ready, 0);
        for _ in 0..5 {
            let update = evaluate(&record, true, NOW, &config);
            assert_eq!(update.status, HealthStatus::Ready);
            assert_eq!(update.consecutive_failures, 0);
            record.health_status = update.status;
            record.consecutive_failures = update.consecutive_failures;
        }
    }

    #[test]
    fn failure_below_threshold_stays_ready() {
        let update = evaluate(&provider("p", HealthStatus::Ready, 1), false, NOW, &config());
        assert_eq!(update.status, HealthStatus::Ready);
        assert_eq!(update.consecutive_failures, 2);
        assert_eq!(update.next_health_check, NOW + 10_000);
    }

    #[test]
    fn failure_at_threshold_flips_to_not_ready() {
        let update = evaluate(&provider("p", HealthStatus::Ready, 2), false, NOW, &config());
        assert_eq!(update.status, HealthStatus::NotReady);
        assert_eq!(update.consecutive_failures, 3);
        assert_eq!(update.next_health_check, NOW + 10_000);
    }

    #[test]
    fn failures_past_threshold_back_off() {
        let update = evaluate(&provider("p", HealthStatus::NotReady, 4), false, NOW, &config());
        assert_eq!(update.status, HealthStatus::NotReady);
        assert_eq!(update.consecutive_failures, 5);
        assert_eq!(update.next_health_check, NOW + 40_000);
    }

    #[test]
    fn single_success_recovers_immediately() {
        let update = evaluate(&provider("p", HealthStatus::NotReady, 12), true, NOW, &config());
        assert_eq!(update.status, HealthStatus::Ready);
        assert_eq!(update.consecutive_failures, 0);
        assert_eq!(update.next_health_check, NOW + 10_000);
    }

    // ── scans ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn scan_of_reachable_provider_writes_one_update() {
        let (directory, monitor) = monitor(
            FakeDirectory::with(vec![provider("p1", HealthStatus::Ready, 0)]),
            FakeProber::answering(&[("p1", true)]),
        );

        let report = monitor.check_providers().await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.transitions, 0);
        assert_eq!(
            directory.updates(),
            vec![UpdateCall {
                id: "p1".to_string(),
                status: HealthStatus::Ready,
                consecutive_failures: 0,
                next_health_check: NOW + 10_000,
            }]
        );
    }

    #[tokio::test]
    async fn scan_only_probes_due_providers() {
        let mut future = provider("later", HealthStatus::Ready, 0);
        future.next_health_check = Some(NOW + 1);
        let mut boundary = provider("now", HealthStatus::Ready, 0);
        boundary.next_health_check = Some(NOW);

        let (directory, monitor) = monitor(
            FakeDirectory::with(vec![future, boundary, provider("never", HealthStatus::Ready, 0)]),
            FakeProber::answering(&[("now", true), ("never", true), ("later", true)]),
        );

        let report = monitor.check_providers().await.unwrap();

        assert_eq!(report.due, 2);
        assert_eq!(monitor.prober.calls.load(Ordering::SeqCst), 2);
        let ids: Vec<String> = directory.updates().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["now".to_string(), "never".to_string()]);
        assert_eq!(*directory.listed_at.lock().unwrap(), vec![NOW]);
    }

    #[tokio::test]
    async fn threshold_crossing_is_counted_as_transition() {
        let (directory, monitor) = monitor(
            FakeDirectory::with(vec![
                provider("flapping", HealthStatus::Ready, 2),
                provider("wobbly", HealthStatus::Ready, 1),
            ]),
            FakeProber::default(),
        );

        let report = monitor.check_providers().await.unwrap();

        assert_eq!(report.unhealthy, 2);
        assert_eq!(report.transitions, 1);
        let updates = directory.updates();
        assert_eq!(updates[0].status, HealthStatus::NotReady);
        assert_eq!(updates[0].consecutive_failures, 3);
        assert_eq!(updates[1].status, HealthStatus::Ready);
        assert_eq!(updates[1].consecutive_failures, 2);
    }

    #[tokio::test]
    async fn list_failure_abandons_scan() {
        let mut directory = FakeDirectory::with(vec![provider("p1", HealthStatus::Ready, 0)]);
        directory.list_fails = true;
        let (directory, monitor) = monitor(directory, FakeProber::answering(&[("p1", true)]));

        assert!(monitor.check_providers().await.is_err());
        assert_eq!(monitor.prober.calls.load(Ordering::SeqCst), 0);
        assert!(directory.updates().is_empty());
    }

    #[tokio::test]
    async fn update_failure_does_not_stop_scan() {
        let mut directory = FakeDirectory::with(vec![
            provider("gone", HealthStatus::Ready, 0),
            provider("alive", HealthStatus::Ready, 0),
        ]);
        directory.missing.insert("gone".to_string());
        let (directory, monitor) = monitor(
            directory,
            FakeProber::answering(&[("gone", true), ("alive", true)]),
        );

        let report = monitor.check_providers().await.unwrap();

        assert_eq!(report.update_errors, 1);
        assert_eq!(report.updated, 1);
        let updates = directory.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, "alive");
    }

    #[tokio::test]
    async fn scan_stops_probing_after_shutdown() {
        let (directory, monitor) = monitor(
            FakeDirectory::with(vec![
                provider("a", HealthStatus::Ready, 0),
                provider("b", HealthStatus::Ready, 0),
            ]),
            FakeProber::answering(&[("a", true), ("b", true)]),
        );
        let (_tx, rx) = watch::channel(true);

        let report = monitor.scan(Some(&rx)).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(monitor.prober.calls.load(Ordering::SeqCst), 0);
        assert!(directory.updates().is_empty());
    }

    // ── loop lifecycle ─────────────────────────────────────────────

    #[tokio::test]
    async fn run_exits_without_probing_when_already_shut_down() {
        let (directory, monitor) = monitor(
            FakeDirectory::with(vec![provider("a", HealthStatus::Ready, 0)]),
            FakeProber::answering(&[("a", true)]),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), monitor.run(rx))
            .await
            .expect("monitor loop did not exit");

        assert!(directory.updates().is_empty());
    }

    #[tokio::test]
    async fn started_monitor_scans_immediately_and_stops() {
        let store = StateStore::open_in_memory().unwrap();
        let created = store
            .create_provider(&NewProvider::new("kubevirt", "vm", "v1", "http://kubevirt.local"))
            .unwrap();
        let store = Arc::new(store);
        let prober = FakeProber {
            answers: HashMap::from([("http://kubevirt.local".to_string(), false)]),
            calls: AtomicUsize::new(0),
        };
        let handle = HealthMonitor::with_prober(Arc::clone(&store), prober, config())
            .with_clock(fixed_now)
            .start();

        let mut record = store.get_provider(&created.id).unwrap().unwrap();
        for _ in 0..100 {
            if record.next_health_check.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            record = store.get_provider(&created.id).unwrap().unwrap();
        }
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.health_status, HealthStatus::Ready);
        assert_eq!(record.next_health_check, Some(NOW + 10_000));

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("monitor did not shut down");
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_rescans_every_interval() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let created = store
            .create_provider(&NewProvider::new("kubevirt", "vm", "v1", "http://kubevirt.local"))
            .unwrap();
        // Milliseconds of paused tokio time, so schedules follow the ticker.
        fn tokio_clock() -> Timestamp {
            static START: OnceLock<tokio::time::Instant> = OnceLock::new();
            let start = *START.get_or_init(tokio::time::Instant::now);
            start.elapsed().as_millis() as Timestamp + 1
        }
        let handle = HealthMonitor::with_prober(Arc::clone(&store), FakeProber::default(), config())
            .with_clock(tokio_clock)
            .start();

        // Immediate scan plus three ticks.
        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.shutdown().await;

        let record = store.get_provider(&created.id).unwrap().unwrap();
        assert_eq!(record.consecutive_failures, 4);
        assert_eq!(record.health_status, HealthStatus::NotReady);
    }
}
