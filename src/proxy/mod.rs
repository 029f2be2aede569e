//! Proxy verification engine
//!
//! This module provides functionality for:
//! - Parsing proxy links and subscription feeds into candidates
//! - Synthesizing outbounds and supervising a local proxy core per endpoint
//! - Deciding working/not working from a short probe sequence
//! - Resolving exit geolocation by per-field consensus
//! - Scheduling rescans from failure history and persisting the results

pub mod checker;
pub mod geo;
pub mod models;
pub mod outbound;
pub mod parser;
pub mod probe;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod subscription;
pub mod supervisor;
pub mod throughput;

pub use checker::{CheckerConfig, ProxyChecker};
pub use geo::{GeoConfig, GeoLocator, GeoResolver};
pub use models::{Candidate, CheckEntry, GeoRecord, ProbeResult, ProxyEntry, ProxyStatus, ThroughputResult};
pub use outbound::{OutboundDescriptor, OutboundSynthesizer, XraySynthesizer};
pub use parser::LinkParser;
pub use probe::{Prober, ProviderEndpoint, ReqwestProber};
pub use protocol::{ProtocolConfig, Verdict, VerificationProtocol};
pub use registry::ProxyRegistry;
pub use report::{RunOutcome, RunReport};
pub use runner::{Assignment, BatchConfig, BatchRunner, TaskFailure};
pub use scheduler::{RescanPolicy, RescanTier};
pub use subscription::{FetchResult, SubscriptionConfig, SubscriptionFetcher};
pub use supervisor::{ProcessHandle, ProcessSupervisor, Supervisor, SupervisorConfig};
pub use throughput::{ReqwestThroughputMeter, ThroughputConfig, ThroughputMeter};
