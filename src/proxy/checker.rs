//! Proxy checker: per-endpoint verification and whole-run orchestration

use crate::proxy::geo::{GeoConfig, GeoResolver};
use crate::proxy::models::{Candidate, CheckEntry};
use crate::proxy::outbound::{OutboundDescriptor, OutboundSynthesizer, XraySynthesizer};
use crate::proxy::parser::LinkParser;
use crate::proxy::probe::{Prober, ProviderEndpoint, ReqwestProber};
use crate::proxy::protocol::{ProtocolConfig, Verdict, VerificationProtocol};
use crate::proxy::registry::ProxyRegistry;
use crate::proxy::report::{RunOutcome, RunReport};
use crate::proxy::runner::{BatchConfig, BatchRunner};
use crate::proxy::scheduler::RescanPolicy;
use crate::proxy::supervisor::{ProcessSupervisor, Supervisor, SupervisorConfig};
use crate::proxy::throughput::{ReqwestThroughputMeter, ThroughputConfig, ThroughputMeter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default throughput measurement timeout in seconds
const DEFAULT_THROUGHPUT_TIMEOUT_SECS: u64 = 30;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub supervisor: SupervisorConfig,
    pub protocol: ProtocolConfig,
    pub batch: BatchConfig,
    pub rescan: RescanPolicy,
    pub geo: GeoConfig,
    /// Providers queried by each probe
    pub providers: Vec<ProviderEndpoint>,
    /// `None` disables throughput measurement
    pub throughput: Option<ThroughputConfig>,
    pub throughput_timeout: Duration,
    /// Check every candidate regardless of its rescan schedule
    pub force: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            protocol: ProtocolConfig::default(),
            batch: BatchConfig::default(),
            rescan: RescanPolicy::default(),
            geo: GeoConfig::default(),
            providers: ProviderEndpoint::defaults(),
            throughput: Some(ThroughputConfig::default()),
            throughput_timeout: Duration::from_secs(DEFAULT_THROUGHPUT_TIMEOUT_SECS),
            force: false,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_rescan(mut self, rescan: RescanPolicy) -> Self {
        self.rescan = rescan;
        self
    }

    pub fn with_geo(mut self, geo: GeoConfig) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_providers(mut self, providers: Vec<ProviderEndpoint>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_throughput(mut self, throughput: Option<ThroughputConfig>) -> Self {
        self.throughput = throughput;
        self
    }

    pub fn with_throughput_timeout(mut self, timeout: Duration) -> Self {
        self.throughput_timeout = timeout;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Verifies endpoints through supervised local proxies
#[derive(Clone)]
pub struct ProxyChecker {
    synthesizer: Arc<dyn OutboundSynthesizer>,
    supervisor: Arc<dyn Supervisor>,
    protocol: VerificationProtocol,
    throughput: Option<Arc<dyn ThroughputMeter>>,
    throughput_timeout: Duration,
    geo: Arc<GeoResolver>,
    runner: BatchRunner,
    rescan: RescanPolicy,
    force: bool,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a checker backed by the xray synthesizer, a process
    /// supervisor and HTTP probe/throughput capabilities
    pub fn with_config(config: CheckerConfig) -> Self {
        let prober: Arc<dyn Prober> = Arc::new(ReqwestProber::new(config.providers.clone()));
        let throughput = config
            .throughput
            .clone()
            .map(|t| Arc::new(ReqwestThroughputMeter::new(t)) as Arc<dyn ThroughputMeter>);

        Self {
            synthesizer: Arc::new(XraySynthesizer::new()),
            supervisor: Arc::new(ProcessSupervisor::new(config.supervisor.clone())),
            protocol: VerificationProtocol::new(prober, config.protocol.clone()),
            throughput,
            throughput_timeout: config.throughput_timeout,
            geo: Arc::new(GeoResolver::with_config(&config.geo)),
            runner: BatchRunner::new(config.batch.clone()),
            rescan: config.rescan,
            force: config.force,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn OutboundSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.protocol = VerificationProtocol::new(prober, self.protocol.config().clone());
        self
    }

    pub fn with_throughput_meter(mut self, meter: Option<Arc<dyn ThroughputMeter>>) -> Self {
        self.throughput = meter;
        self
    }

    pub fn with_geo_resolver(mut self, geo: GeoResolver) -> Self {
        self.geo = Arc::new(geo);
        self
    }

    pub fn rescan_policy(&self) -> &RescanPolicy {
        &self.rescan
    }

    /// Verify one endpoint on `port` and produce its history record.
    ///
    /// A TLS endpoint that fails with certificate validation enforced gets
    /// a second full pass with validation relaxed. Never fails: every
    /// failure becomes a `CheckEntry` with `success == false`.
    #[instrument(skip(self, candidate), fields(identity = %candidate.identity))]
    pub async fn check_endpoint(&self, candidate: &Candidate, port: u16) -> CheckEntry {
        let strict = match self.synthesizer.synthesize(&candidate.identity) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Cannot convert link: {}", e);
                return CheckEntry::failure(Utc::now(), e.to_string());
            }
        };

        let relaxed = strict.insecure_variant();
        let passes = std::iter::once((&strict, false)).chain(relaxed.as_ref().map(|d| (d, true)));
        let mut reasons = Vec::new();

        for (descriptor, fallback) in passes {
            match self.verification_pass(descriptor, port).await {
                Ok(entry) => {
                    info!(
                        "Working (latency {:?} ms, {}{})",
                        entry.latency_ms,
                        entry.geo.short_display(),
                        if entry.insecure_mode_used { ", insecure" } else { "" }
                    );
                    return entry;
                }
                Err(reason) if fallback => reasons.push(format!("insecure pass: {}", reason)),
                Err(reason) => reasons.push(reason),
            }
        }

        let error = reasons.join("; ");
        info!("Not working: {}", error);
        CheckEntry::failure(Utc::now(), error)
    }

    /// One full pass: start, verify, optionally measure, always stop
    async fn verification_pass(
        &self,
        descriptor: &OutboundDescriptor,
        port: u16,
    ) -> Result<CheckEntry, String> {
        let mut handle = self
            .supervisor
            .start(descriptor, port)
            .await
            .map_err(|e| e.to_string())?;
        let proxy = handle.local_addr();

        let verdict = self.protocol.verify(proxy).await;
        debug!(
            "Verdict: working={} after {} probes",
            verdict.working, verdict.attempts_used
        );

        let outcome = if verdict.working {
            let mut entry = self.working_entry(&verdict, descriptor.is_insecure());
            if let Some(meter) = &self.throughput {
                match meter.measure(proxy, self.throughput_timeout).await {
                    Ok(throughput) => entry.throughput = Some(throughput),
                    Err(e) => {
                        warn!("Throughput measurement failed: {}", e);
                        entry.push_error(format!("throughput: {}", e));
                    }
                }
            }
            Ok(entry)
        } else {
            Err(verdict.reason().unwrap_or_else(|| "not working".to_string()))
        };

        self.supervisor.stop(&mut handle).await;
        outcome
    }

    fn working_entry(&self, verdict: &Verdict, insecure: bool) -> CheckEntry {
        let payload = verdict.chosen_probe.payload.clone();
        let resolution = payload
            .as_ref()
            .map(|p| self.geo.resolve_payload(p))
            .unwrap_or_default();

        CheckEntry {
            timestamp: Utc::now(),
            success: true,
            latency_ms: verdict.chosen_probe.latency_ms,
            geo: resolution.geo,
            ip_address: resolution.ip_address,
            throughput: None,
            insecure_mode_used: insecure,
            error: None,
            raw_provider_payload: payload,
        }
    }

    /// Run one full pass over the candidates.
    ///
    /// Every candidate is registered, due ones (or all, when forced) are
    /// verified through the batch runner, and exactly one check is appended
    /// per verified identity. Persisting the registry is left to the caller.
    pub async fn run(
        &self,
        candidates: &[Candidate],
        registry: &mut ProxyRegistry,
        now: DateTime<Utc>,
    ) -> RunReport {
        let candidates = LinkParser::dedup(candidates.iter().cloned());
        for candidate in &candidates {
            registry.upsert(candidate, now);
        }

        let due: Vec<Candidate> = candidates
            .iter()
            .filter(|candidate| {
                self.force
                    || registry
                        .get(&candidate.identity)
                        .map_or(true, |entry| self.rescan.is_due(entry, now))
            })
            .cloned()
            .collect();

        info!(
            "{} of {} candidates due for verification",
            due.len(),
            candidates.len()
        );

        let checker = Arc::new(self.clone());
        let results = self
            .runner
            .run(due.clone(), move |candidate, assignment| {
                let checker = Arc::clone(&checker);
                async move { checker.check_endpoint(&candidate, assignment.port).await }
            })
            .await;

        let mut outcomes = Vec::with_capacity(due.len());
        for (index, (candidate, result)) in due.iter().zip(results).enumerate() {
            let (port, entry) = match result {
                Ok(entry) => (self.runner.port_for(index), entry),
                Err(failure) => (failure.port, CheckEntry::failure(Utc::now(), failure.to_string())),
            };

            registry.append(&candidate.identity, entry.clone());
            let entry = registry
                .get(&candidate.identity)
                .and_then(|stored| stored.last_check())
                .cloned()
                .unwrap_or(entry);

            outcomes.push(RunOutcome {
                identity: candidate.identity.clone(),
                display_name: candidate.display_name.clone(),
                port,
                entry,
            });
        }

        let report = RunReport::new(now, Utc::now(), candidates.len(), outcomes);
        info!(
            "Run {} finished: {} tested, {} working, {} failed, {} skipped",
            report.run_id,
            report.total,
            report.working,
            report.failed,
            report.skipped()
        );
        report
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SupervisorError, ThroughputError};
    use crate::proxy::models::{ProbeResult, ProxyStatus, ThroughputResult};
    use crate::proxy::protocol::tests::ScriptedProber;
    use crate::proxy::supervisor::ProcessHandle;
    use async_trait::async_trait;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Supervisor that never spawns; strict descriptors can be made to fail
    #[derive(Default)]
    struct FakeSupervisor {
        fail_strict: bool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Supervisor for FakeSupervisor {
        async fn start(
            &self,
            descriptor: &OutboundDescriptor,
            port: u16,
        ) -> Result<ProcessHandle, SupervisorError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_strict && !descriptor.is_insecure() {
                return Err(SupervisorError::FatalProcess("x509: certificate".to_string()));
            }
            Ok(ProcessHandle::detached(port))
        }

        async fn stop(&self, _handle: &mut ProcessHandle) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedMeter(Result<ThroughputResult, ThroughputError>);

    /// Prober that panics for one local port and succeeds elsewhere
    struct PanicOnPort(u16);

    #[async_trait]
    impl Prober for PanicOnPort {
        async fn probe(&self, proxy: SocketAddr, _timeout: Duration) -> ProbeResult {
            if proxy.port() == self.0 {
                panic!("prober blew up on port {}", proxy.port());
            }
            ProbeResult::succeeded(json!({"ipinfo": {"ip": "203.0.113.9", "country": "DE"}}), 15)
        }
    }

    #[async_trait]
    impl ThroughputMeter for FixedMeter {
        async fn measure(
            &self,
            _proxy: SocketAddr,
            _timeout: Duration,
        ) -> Result<ThroughputResult, ThroughputError> {
            self.0.clone()
        }
    }

    const TLS_LINK: &str = "vless://id@edge.example.com:443?security=tls&sni=edge.example.com#Edge";
    const PLAIN_LINK: &str = "socks5://10.0.0.1:1080#Plain";

    fn checker(
        script: &[bool],
        supervisor: Arc<FakeSupervisor>,
        meter: Option<Arc<dyn ThroughputMeter>>,
    ) -> ProxyChecker {
        ProxyChecker::with_config(CheckerConfig::new().with_throughput(None))
            .with_supervisor(supervisor)
            .with_prober(Arc::new(ScriptedProber::new(script)))
            .with_throughput_meter(meter)
            .with_geo_resolver(GeoResolver::default())
    }

    #[tokio::test]
    async fn test_working_endpoint() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(PLAIN_LINK), 20000)
            .await;

        assert!(entry.success);
        assert!(!entry.insecure_mode_used);
        assert_eq!(entry.latency_ms, Some(30));
        assert_eq!(entry.geo.country, "US");
        assert_eq!(entry.ip_address, "203.0.113.7");
        assert!(entry.raw_provider_payload.is_some());
        assert!(entry.error.is_none());
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tls_endpoint_working_on_strict_pass() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(TLS_LINK), 20000)
            .await;

        assert!(entry.success);
        assert!(!entry.insecure_mode_used);
        assert!(entry.error.is_none());
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insecure_fallback_after_failed_strict_pass() {
        let supervisor = Arc::new(FakeSupervisor::default());
        // strict pass: warm-up + two failures, relaxed pass: all succeed
        let checker = checker(&[false, false, false, true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(TLS_LINK), 20000)
            .await;

        assert!(entry.success);
        assert!(entry.insecure_mode_used);
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_insecure_fallback_after_startup_failure() {
        let supervisor = Arc::new(FakeSupervisor {
            fail_strict: true,
            ..Default::default()
        });
        let checker = checker(&[true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(TLS_LINK), 20000)
            .await;

        assert!(entry.success);
        assert!(entry.insecure_mode_used);
        assert_eq!(supervisor.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plain_endpoint_has_single_pass() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[false, false, false, true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(PLAIN_LINK), 20000)
            .await;

        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("non-success status: 503"));
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_passes_fail() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link(TLS_LINK), 20000)
            .await;

        assert!(!entry.success);
        let error = entry.error.unwrap();
        assert!(error.contains("non-success status: 503"));
        assert!(error.contains("insecure pass: non-success status: 506"));
        assert_eq!(supervisor.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_link_already_insecure_has_single_unlabelled_pass() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(
                &Candidate::from_link("trojan://secret@t.example.com:443?allowInsecure=1"),
                20000,
            )
            .await;

        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("non-success status: 503"));
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conversion_error_short_circuits() {
        let supervisor = Arc::new(FakeSupervisor::default());
        let checker = checker(&[true, true, true], supervisor.clone(), None);

        let entry = checker
            .check_endpoint(&Candidate::from_link("wireguard://key@10.0.0.1:51820"), 20000)
            .await;

        assert!(!entry.success);
        assert_eq!(
            entry.error.as_deref(),
            Some("unsupported link scheme: wireguard")
        );
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_throughput_recorded() {
        let meter = Arc::new(FixedMeter(Ok(ThroughputResult {
            download_mbps: 42.5,
            upload_mbps: 10.0,
            ping_ms: Some(80),
        })));
        let checker = checker(
            &[true, true, true],
            Arc::new(FakeSupervisor::default()),
            Some(meter),
        );

        let entry = checker
            .check_endpoint(&Candidate::from_link(PLAIN_LINK), 20000)
            .await;

        assert!(entry.success);
        assert_eq!(entry.throughput.unwrap().download_mbps, 42.5);
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn test_throughput_failure_keeps_working_verdict() {
        let meter = Arc::new(FixedMeter(Err(ThroughputError::Timeout)));
        let checker = checker(
            &[true, true, true],
            Arc::new(FakeSupervisor::default()),
            Some(meter),
        );

        let entry = checker
            .check_endpoint(&Candidate::from_link(PLAIN_LINK), 20000)
            .await;

        assert!(entry.success);
        assert!(entry.throughput.is_none());
        assert_eq!(
            entry.error.as_deref(),
            Some("throughput: throughput measurement timed out")
        );
    }

    #[tokio::test]
    async fn test_run_appends_once_per_identity() {
        let now = Utc::now();
        let mut registry = ProxyRegistry::in_memory();
        let checker = checker(&[], Arc::new(FakeSupervisor::default()), None);

        let candidates = vec![
            Candidate::from_link("socks5://10.0.0.1:1080#a"),
            Candidate::from_link("socks5://10.0.0.2:1080#b"),
            Candidate::from_link("socks5://10.0.0.1:1080#a2"),
        ];
        let report = checker.run(&candidates, &mut registry, now).await;

        assert_eq!(report.candidates, 2);
        assert_eq!(report.total, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(report.outcomes[0].display_name, "a2");
        assert_eq!(report.outcomes[0].port, Some(20000));
        assert_eq!(report.outcomes[1].port, Some(20001));

        for entry in registry.all() {
            assert_eq!(entry.checks().len(), 1);
            assert_eq!(entry.status(), ProxyStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_run_skips_entries_not_due() {
        let now = Utc::now();
        let mut registry = ProxyRegistry::in_memory();
        let checker = checker(&[], Arc::new(FakeSupervisor::default()), None);
        let candidates = vec![Candidate::from_link(PLAIN_LINK)];

        checker.run(&candidates, &mut registry, now).await;
        let report = checker
            .run(&candidates, &mut registry, now + chrono::Duration::hours(1))
            .await;
        assert_eq!(report.total, 0);
        assert_eq!(report.skipped(), 1);

        let forced = ProxyChecker { force: true, ..checker };
        let report = forced
            .run(&candidates, &mut registry, now + chrono::Duration::hours(2))
            .await;
        assert_eq!(report.total, 1);
        assert_eq!(
            registry.get("socks5://10.0.0.1:1080").unwrap().checks().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_run_records_runner_failures() {
        let now = Utc::now();
        let mut registry = ProxyRegistry::in_memory();
        let config = CheckerConfig::new()
            .with_throughput(None)
            .with_batch(BatchConfig::new().with_base_port(65534).with_concurrency(2));
        let checker = ProxyChecker::with_config(config)
            .with_supervisor(Arc::new(FakeSupervisor::default()))
            .with_prober(Arc::new(PanicOnPort(65535)))
            .with_geo_resolver(GeoResolver::default());

        let candidates: Vec<Candidate> = (1..=4)
            .map(|i| Candidate::from_link(&format!("socks5://10.0.0.{}:1080", i)))
            .collect();
        let report = checker.run(&candidates, &mut registry, now).await;

        assert_eq!(report.total, 4);
        assert_eq!(report.working, 1);
        assert_eq!(report.failed, 3);

        let outcomes = &report.outcomes;
        assert!(outcomes[0].entry.success);
        assert_eq!(outcomes[0].port, Some(65534));
        assert_eq!(outcomes[0].entry.geo.country, "DE");

        assert!(!outcomes[1].entry.success);
        assert_eq!(outcomes[1].port, Some(65535));
        let error = outcomes[1].entry.error.as_deref().unwrap();
        assert!(error.starts_with("task panicked"), "{}", error);
        assert!(error.contains("port 65535"), "{}", error);

        for outcome in &outcomes[2..] {
            assert!(!outcome.entry.success);
            assert_eq!(outcome.port, None);
            assert!(outcome
                .entry
                .error
                .as_deref()
                .unwrap()
                .starts_with("no local port available"));
        }

        for candidate in &candidates {
            let entry = registry.get(&candidate.identity).unwrap();
            assert_eq!(entry.checks().len(), 1, "{}", candidate.identity);
        }
        assert_eq!(
            registry.get("socks5://10.0.0.1:1080").unwrap().status(),
            ProxyStatus::Working
        );
        assert_eq!(
            registry.get("socks5://10.0.0.2:1080").unwrap().status(),
            ProxyStatus::Error
        );
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_batch(BatchConfig::new().with_concurrency(20))
            .with_throughput(None)
            .with_throughput_timeout(Duration::from_secs(5))
            .with_force(true);

        assert_eq!(config.batch.concurrency, 20);
        assert!(config.throughput.is_none());
        assert_eq!(config.throughput_timeout, Duration::from_secs(5));
        assert!(config.force);
        assert_eq!(config.providers.len(), 4);
    }
}
