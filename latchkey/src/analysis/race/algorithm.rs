use crate::analysis::cpa::reached::{ReachedEntry, ReachedSet};
use crate::analysis::cpa::shutdown::ShutdownNotifier;
use crate::analysis::cpa::{ConfigurableProgramAnalysis, RunStatistics, RunStatus, seed};
use crate::analysis::race::{
    IdentifierIterator, RaceAnalysis, RacePrecision, RaceState, UsageRefiner, UsageReport,
};
use crate::analysis::waitlist::{ConfiguredWaitlist, Waitlist};
use crate::config::LatchkeyConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::Cfa;
use std::sync::Arc;
use tracing::{info, info_span};

/// The refinement loop around the race exploration.
///
/// Each iteration explores the program to a fixpoint under the current precision, detects
/// unsafe identifiers, and hands them to the refiner. When refinement finds new facts the
/// reached set is discarded, the usages recorded from it are dropped, and exploration restarts
/// under the extended precision. Confirmed and refuted identifiers keep their status across
/// restarts.
#[derive(Debug)]
pub struct UsageAlgorithm<R> {
    config: Arc<LatchkeyConfig>,
    refiner: R,
    shutdown: ShutdownNotifier,
}

impl<R: UsageRefiner> UsageAlgorithm<R> {
    pub fn new(config: LatchkeyConfig, refiner: R, shutdown: ShutdownNotifier) -> Self {
        Self {
            config: Arc::new(config),
            refiner,
            shutdown,
        }
    }

    pub fn refiner(&self) -> &R {
        &self.refiner
    }

    pub fn run(&mut self, cfa: &Cfa) -> Result<UsageReport, LatchkeyError> {
        self.config.validate()?;
        let mut analysis = RaceAnalysis::new(self.config.clone());
        let mut reached: ReachedSet<RaceState> = ReachedSet::new();
        let mut waitlist: ConfiguredWaitlist<ReachedEntry<RaceState>> =
            ConfiguredWaitlist::from_config(&self.config.waitlist)?;
        let mut iterator = IdentifierIterator::new(self.config.refinement.precision_reset);
        let mut statistics = RunStatistics::default();
        let mut status = RunStatus::Completed;
        let mut iterations = 0;

        loop {
            iterations += 1;
            let span = info_span!("refinement", iteration = iterations);
            let _enter = span.enter();

            if reached.is_empty() {
                seed(&mut reached, &mut waitlist, analysis.initial_state(cfa)?);
            }
            let outcome = analysis.run_cpa(cfa, &mut reached, &mut waitlist, &self.shutdown)?;
            statistics += outcome.statistics;
            if outcome.status == RunStatus::Interrupted {
                info!(reached = reached.len(), "interrupted, keeping partial results");
                status = RunStatus::Interrupted;
                break;
            }

            let unsafes = analysis.container_mut().total_unsafe_size();
            info!(
                reached = reached.len(),
                unsafes,
                precision = analysis.precision().len(),
                "exploration finished"
            );
            if !self.config.refinement.enabled || unsafes == 0 {
                break;
            }

            let precision = analysis.precision().clone();
            let outcome = iterator.iterate(
                &mut self.refiner,
                analysis.container_mut(),
                &reached,
                &precision,
            )?;
            info!(
                refined = analysis.container().processed_unsafe_size(),
                new_precision = outcome.new_precision_found,
                "refinement finished"
            );
            if !outcome.new_precision_found {
                break;
            }
            if iterations >= self.config.refinement.max_iterations {
                info!(iterations, "iteration limit reached");
                analysis.set_precision(Arc::new(outcome.precision));
                break;
            }
            if self.shutdown.should_shutdown() {
                status = RunStatus::Interrupted;
                analysis.set_precision(Arc::new(outcome.precision));
                break;
            }

            analysis.set_precision(Arc::new(outcome.precision));
            let removed = reached.clear();
            waitlist.clear();
            let container = analysis.container_mut();
            container.remove_states(removed);
            container.reset_unrefined_unsafes();
        }

        let precision = RacePrecision::clone(analysis.precision());
        Ok(UsageReport::new(
            analysis.container_mut(),
            status,
            iterations,
            precision,
            statistics,
        ))
    }
}
