use lazy_static::lazy_static;
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TURNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "onboarding_turns_total",
            "Workflow turns processed, by workflow and result."
        ),
        &["workflow", "result"]
    )
    .unwrap();
    pub static ref SYSTEM_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "onboarding_system_commands_total",
            "Back, cancel and restart commands handled."
        ),
        &["command"]
    )
    .unwrap();
    pub static ref VERSION_CONFLICTS_TOTAL: IntCounter = IntCounter::new(
        "onboarding_version_conflicts_total",
        "Session saves rejected because another writer got there first."
    )
    .unwrap();
}

/// Register every collector with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(TURNS_TOTAL.clone()),
        Box::new(SYSTEM_COMMANDS_TOTAL.clone()),
        Box::new(VERSION_CONFLICTS_TOTAL.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(Error::Internal(format!("failed to register metrics: {}", e))),
        }
    }
    Ok(())
}

pub fn record_turn(workflow_id: &str, result: &str) {
    TURNS_TOTAL.with_label_values(&[workflow_id, result]).inc();
}

pub fn record_system_command(command: &str) {
    SYSTEM_COMMANDS_TOTAL.with_label_values(&[command]).inc();
}

pub fn record_version_conflict() {
    VERSION_CONFLICTS_TOTAL.inc();
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
}
