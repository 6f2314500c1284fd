//! Fault injection for the simulated instrument.
//!
//! Enables configurable failures for exercising completion polling and error
//! propagation.

use crate::rng::MockRng;
use pv_core::{CommunicationError, CommunicationErrorKind};

/// Deterministic failure scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultScenario {
    /// The first `count` status queries after every `:INIT` time out.
    StatusTimeouts {
        /// Failed polls per acquisition.
        count: u32,
    },
    /// Every exchange after `after` successful ones fails with a closed link.
    ConnectionLoss {
        /// Exchanges that succeed first.
        after: u32,
    },
    /// `:TRAC:DATA?` returns only the first `samples` values.
    TruncatedTrace {
        /// Samples returned.
        samples: usize,
    },
    /// The idle bit is never set again after `:INIT`.
    NeverCompletes,
}

/// Failure configuration of one simulated instrument.
#[derive(Debug, Default)]
pub struct FaultConfig {
    scenarios: Vec<FaultScenario>,
    status_failure_rate: f64,
    rng: MockRng,
    exchanges: u32,
    status_failures_this_run: u32,
}

impl FaultConfig {
    /// No failures.
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// A single scenario.
    pub fn scenario(scenario: FaultScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios.
    pub fn scenarios(scenarios: Vec<FaultScenario>) -> Self {
        Self {
            scenarios,
            status_failure_rate: 0.0,
            rng: MockRng::new(Some(0)),
            exchanges: 0,
            status_failures_this_run: 0,
        }
    }

    /// Random status-query timeouts with the given probability.
    pub fn random_status_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self {
            status_failure_rate: rate,
            rng: MockRng::new(seed),
            ..Self::none()
        }
    }

    /// Count an exchange and fail it if the link is lost.
    pub(crate) fn check_link(&mut self, command: &str) -> Result<(), CommunicationError> {
        self.exchanges += 1;
        for scenario in &self.scenarios {
            if let FaultScenario::ConnectionLoss { after } = scenario {
                if self.exchanges > *after {
                    return Err(CommunicationError::new(
                        CommunicationErrorKind::Closed,
                        command,
                        "injected connection loss",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Called on `:INIT`.
    pub(crate) fn arm(&mut self) {
        self.status_failures_this_run = 0;
    }

    /// Decide whether this status query fails.
    pub(crate) fn check_status(&mut self, command: &str) -> Result<(), CommunicationError> {
        let scripted = self.scenarios.iter().find_map(|s| match s {
            FaultScenario::StatusTimeouts { count } => Some(*count),
            _ => None,
        });
        let scripted_failure = match scripted {
            Some(count) if self.status_failures_this_run < count => {
                self.status_failures_this_run += 1;
                true
            }
            _ => false,
        };
        if scripted_failure || self.rng.should_fail(self.status_failure_rate) {
            return Err(CommunicationError::new(
                CommunicationErrorKind::Timeout,
                command,
                "injected status timeout",
            ));
        }
        Ok(())
    }

    pub(crate) fn never_completes(&self) -> bool {
        self.scenarios.contains(&FaultScenario::NeverCompletes)
    }

    pub(crate) fn truncate_trace(&self) -> Option<usize> {
        self.scenarios.iter().find_map(|s| match s {
            FaultScenario::TruncatedTrace { samples } => Some(*samples),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_faults_by_default() {
        let mut faults = FaultConfig::none();
        for _ in 0..100 {
            assert!(faults.check_link("*RST").is_ok());
            assert!(faults.check_status(":STAT:OPER:COND?").is_ok());
        }
        assert!(!faults.never_completes());
        assert_eq!(faults.truncate_trace(), None);
    }

    #[test]
    fn status_timeouts_rearm_on_init() {
        let mut faults = FaultConfig::scenario(FaultScenario::StatusTimeouts { count: 2 });
        faults.arm();
        assert!(faults.check_status("q").is_err());
        assert!(faults.check_status("q").is_err());
        assert!(faults.check_status("q").is_ok());
        faults.arm();
        let err = faults.check_status("q").unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Timeout);
    }

    #[test]
    fn connection_loss_is_permanent() {
        let mut faults = FaultConfig::scenario(FaultScenario::ConnectionLoss { after: 2 });
        assert!(faults.check_link("a").is_ok());
        assert!(faults.check_link("b").is_ok());
        let err = faults.check_link("c").unwrap_err();
        assert_eq!(err.kind, CommunicationErrorKind::Closed);
        assert!(faults.check_link("d").is_err());
    }

    #[test]
    fn random_status_failures_are_reproducible() {
        let mut a = FaultConfig::random_status_failures_seeded(0.5, Some(3));
        let mut b = FaultConfig::random_status_failures_seeded(0.5, Some(3));
        for _ in 0..50 {
            assert_eq!(a.check_status("q").is_err(), b.check_status("q").is_err());
        }
    }
}
