//! Verification protocol: warm-up, two probes, optional tie-break

use crate::error::ProbeFailure;
use crate::proxy::models::ProbeResult;
use crate::proxy::probe::Prober;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default per-probe request timeout in seconds
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Slack added on top of the probe timeout before the attempt is abandoned
const PROBE_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// Working/not-working decision over a bounded probe sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub working: bool,
    pub chosen_probe: ProbeResult,
    /// 2 or 3
    pub attempts_used: u8,
    pub successes: u8,
}

impl Verdict {
    /// Failure reason, surfaced only for a not-working verdict
    pub fn reason(&self) -> Option<String> {
        if self.working {
            None
        } else {
            // a split verdict keeps a successful probe, which has no reason
            Some(self.chosen_probe.reason().unwrap_or_else(|| {
                format!(
                    "only {} of {} probes succeeded",
                    self.successes, self.attempts_used
                )
            }))
        }
    }
}

/// Result of tallying the attempts made so far
#[derive(Debug, Clone, PartialEq)]
pub enum Tally {
    Decided(Verdict),
    NeedsAnotherProbe,
}

/// Tally the counted attempts (the warm-up is never included).
///
/// Two agreeing attempts decide directly, two disagreeing ones need a
/// third, and with three the verdict is working iff at least two succeeded.
pub fn tally(attempts: &[ProbeResult]) -> Tally {
    let successes = attempts.iter().filter(|a| a.success).count();

    let working = match attempts.len() {
        0 | 1 => return Tally::NeedsAnotherProbe,
        2 if successes == 1 => return Tally::NeedsAnotherProbe,
        2 => successes == 2,
        _ => successes >= 2,
    };

    match choose_probe(attempts) {
        Some(chosen_probe) => Tally::Decided(Verdict {
            working,
            chosen_probe: chosen_probe.clone(),
            attempts_used: attempts.len().min(u8::MAX as usize) as u8,
            successes: successes.min(u8::MAX as usize) as u8,
        }),
        None => Tally::NeedsAnotherProbe,
    }
}

/// Latest successful attempt, else the latest failed one
pub fn choose_probe(attempts: &[ProbeResult]) -> Option<&ProbeResult> {
    attempts
        .iter()
        .rev()
        .find(|a| a.success)
        .or_else(|| attempts.last())
}

/// Protocol configuration
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Timeout handed to each probe
    pub probe_timeout: Duration,
    /// Issue the discarded warm-up probe
    pub warm_up: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            warm_up: true,
        }
    }
}

impl ProtocolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }
}

/// Drives probes through a ready local proxy and renders a verdict
#[derive(Clone)]
pub struct VerificationProtocol {
    prober: Arc<dyn Prober>,
    config: ProtocolConfig,
}

impl VerificationProtocol {
    pub fn new(prober: Arc<dyn Prober>, config: ProtocolConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Run the probe sequence against `proxy`. Probes are strictly ordered.
    pub async fn verify(&self, proxy: SocketAddr) -> Verdict {
        if self.config.warm_up {
            let warm_up = self.attempt(proxy).await;
            trace!("Warm-up through {}: success={}", proxy, warm_up.success);
        }

        let mut attempts = Vec::with_capacity(3);
        loop {
            let result = self.attempt(proxy).await;
            debug!(
                "Probe {} through {}: success={} latency={:?} error={:?}",
                attempts.len() + 1,
                proxy,
                result.success,
                result.latency_ms,
                result.reason()
            );
            attempts.push(result);

            if let Tally::Decided(verdict) = tally(&attempts) {
                return verdict;
            }
        }
    }

    async fn attempt(&self, proxy: SocketAddr) -> ProbeResult {
        let budget = self.config.probe_timeout + PROBE_TIMEOUT_SLACK;
        match tokio::time::timeout(budget, self.prober.probe(proxy, self.config.probe_timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => ProbeResult::failed(ProbeFailure::Timeout),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Prober returning a fixed script of outcomes, then failures
    pub(crate) struct ScriptedProber {
        script: Mutex<VecDeque<bool>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProber {
        pub(crate) fn new(script: &[bool]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _proxy: SocketAddr, _timeout: Duration) -> ProbeResult {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            match self.script.lock().unwrap().pop_front() {
                Some(true) => ProbeResult::succeeded(
                    json!({"ipinfo": {"ip": "203.0.113.7", "country": "US", "attempt": call}}),
                    call as u64 * 10,
                ),
                _ => ProbeResult::failed(ProbeFailure::Status(500 + call as u16)),
            }
        }
    }

    fn ok(n: u64) -> ProbeResult {
        ProbeResult::succeeded(json!({ "n": n }), n)
    }

    fn fail(code: u16) -> ProbeResult {
        ProbeResult::failed(ProbeFailure::Status(code))
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:20000".parse().unwrap()
    }

    #[test]
    fn test_agreeing_pair_decides() {
        match tally(&[ok(1), ok(2)]) {
            Tally::Decided(v) => {
                assert!(v.working);
                assert_eq!(v.attempts_used, 2);
                assert_eq!(v.chosen_probe, ok(2));
            }
            Tally::NeedsAnotherProbe => panic!("expected a verdict"),
        }

        match tally(&[fail(501), fail(502)]) {
            Tally::Decided(v) => {
                assert!(!v.working);
                assert_eq!(v.chosen_probe, fail(502));
                assert_eq!(v.reason().unwrap(), "non-success status: 502");
            }
            Tally::NeedsAnotherProbe => panic!("expected a verdict"),
        }
    }

    #[test]
    fn test_disagreeing_pair_needs_tie_break() {
        assert_eq!(tally(&[ok(1), fail(500)]), Tally::NeedsAnotherProbe);
        assert_eq!(tally(&[fail(500), ok(1)]), Tally::NeedsAnotherProbe);
        assert_eq!(tally(&[ok(1)]), Tally::NeedsAnotherProbe);
        assert_eq!(tally(&[]), Tally::NeedsAnotherProbe);
    }

    #[test]
    fn test_voting_closure() {
        let sequences: [&[bool]; 8] = [
            &[true, true],
            &[false, false],
            &[true, false, true],
            &[true, false, false],
            &[false, true, true],
            &[false, true, false],
            &[true, true, false],
            &[false, false, true],
        ];
        for seq in sequences {
            let attempts: Vec<ProbeResult> = seq
                .iter()
                .enumerate()
                .map(|(i, &s)| if s { ok(i as u64) } else { fail(500) })
                .collect();
            let expected = seq.iter().filter(|&&s| s).count() >= 2;
            match tally(&attempts) {
                Tally::Decided(v) => assert_eq!(v.working, expected, "{:?}", seq),
                Tally::NeedsAnotherProbe => panic!("no verdict for {:?}", seq),
            }
        }
    }

    #[test]
    fn test_chosen_probe_is_latest_success() {
        let attempts = [ok(1), fail(500), ok(3)];
        assert_eq!(choose_probe(&attempts), Some(&ok(3)));

        // 1-1-1 split keeps the latest success
        let attempts = [ok(1), fail(500), fail(501)];
        assert_eq!(choose_probe(&attempts), Some(&ok(1)));
        match tally(&attempts) {
            Tally::Decided(v) => {
                assert!(!v.working);
                assert_eq!(v.attempts_used, 3);
                assert_eq!(v.successes, 1);
                assert_eq!(v.chosen_probe, ok(1));
                assert_eq!(v.reason().unwrap(), "only 1 of 3 probes succeeded");
            }
            Tally::NeedsAnotherProbe => panic!("expected a verdict"),
        }

        let attempts = [fail(500), fail(501)];
        assert_eq!(choose_probe(&attempts), Some(&fail(501)));
        assert_eq!(choose_probe(&[]), None);
    }

    #[tokio::test]
    async fn test_verify_two_successes() {
        let prober = Arc::new(ScriptedProber::new(&[true, true, true]));
        let protocol = VerificationProtocol::new(prober.clone(), ProtocolConfig::default());
        let verdict = protocol.verify(addr()).await;
        assert!(verdict.working);
        assert_eq!(verdict.attempts_used, 2);
        // warm-up plus two counted probes
        assert_eq!(prober.calls(), 3);
        assert_eq!(verdict.chosen_probe.latency_ms, Some(30));
    }

    #[tokio::test]
    async fn test_verify_warm_up_is_discarded() {
        // warm-up fails, both counted probes succeed
        let prober = Arc::new(ScriptedProber::new(&[false, true, true]));
        let protocol = VerificationProtocol::new(prober.clone(), ProtocolConfig::default());
        let verdict = protocol.verify(addr()).await;
        assert!(verdict.working);
        assert_eq!(verdict.attempts_used, 2);
    }

    #[tokio::test]
    async fn test_verify_tie_break() {
        let prober = Arc::new(ScriptedProber::new(&[true, true, false, true]));
        let protocol = VerificationProtocol::new(prober.clone(), ProtocolConfig::default());
        let verdict = protocol.verify(addr()).await;
        assert!(verdict.working);
        assert_eq!(verdict.attempts_used, 3);
        assert_eq!(prober.calls(), 4);
        assert_eq!(verdict.chosen_probe.latency_ms, Some(40));
    }

    #[tokio::test]
    async fn test_verify_tie_break_fails() {
        let prober = Arc::new(ScriptedProber::new(&[true, false, true, false]));
        let protocol = VerificationProtocol::new(prober, ProtocolConfig::default());
        let verdict = protocol.verify(addr()).await;
        assert!(!verdict.working);
        assert_eq!(verdict.attempts_used, 3);
        // latest success is the second counted probe (call 3)
        assert_eq!(verdict.chosen_probe.latency_ms, Some(30));
    }

    #[tokio::test]
    async fn test_verify_without_warm_up() {
        let prober = Arc::new(ScriptedProber::new(&[false, false]));
        let protocol = VerificationProtocol::new(
            prober.clone(),
            ProtocolConfig::new().with_warm_up(false),
        );
        let verdict = protocol.verify(addr()).await;
        assert!(!verdict.working);
        assert_eq!(prober.calls(), 2);
        assert_eq!(verdict.reason().unwrap(), "non-success status: 502");
    }

    struct HangingProber;

    #[async_trait]
    impl Prober for HangingProber {
        async fn probe(&self, _proxy: SocketAddr, _timeout: Duration) -> ProbeResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ProbeResult::failed(ProbeFailure::Timeout)
        }
    }

    #[tokio::test]
    async fn test_hanging_probe_times_out() {
        let protocol = VerificationProtocol::new(
            Arc::new(HangingProber),
            ProtocolConfig::new()
                .with_probe_timeout(Duration::from_millis(100))
                .with_warm_up(false),
        );
        let verdict = protocol.verify(addr()).await;
        assert!(!verdict.working);
        assert_eq!(verdict.chosen_probe.error, Some(ProbeFailure::Timeout));
    }
}
