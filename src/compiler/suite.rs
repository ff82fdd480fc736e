//! Ordered phase lists and their grouping into tiers.

use std::{fmt, time::Instant};

use log::debug;
use strum::{Display, EnumIter};

use crate::{
    compiler::{
        context::CompilationContext,
        events::EventKind,
        phase::Phase,
        phases::{
            AddressLoweringPhase, CanonicalizePhase, DeadCodeEliminationPhase,
            EscapeAnalysisPhase, FloatingReadsPhase, GuardEliminationPhase, GuardLoweringPhase,
            InliningPhase, LoweringPhase, StrengthReductionPhase,
        },
    },
    ir::Graph,
    Error, Result,
};

/// Pipeline stage a suite belongs to. Tiers always run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    /// Close to the source: inlining, escape analysis.
    High,
    /// Memory and guard optimizations on lowered accesses.
    Mid,
    /// Close to the machine: guard and address lowering.
    Low,
}

/// An ordered, editable list of phases.
#[derive(Default)]
pub struct PhaseSuite {
    phases: Vec<Box<dyn Phase>>,
}

impl PhaseSuite {
    /// Creates an empty suite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `phase` at the end.
    pub fn append(&mut self, phase: impl Phase + 'static) -> &mut Self {
        self.phases.push(Box::new(phase));
        self
    }

    /// Inserts `phase` at the front.
    pub fn prepend(&mut self, phase: impl Phase + 'static) -> &mut Self {
        self.phases.insert(0, Box::new(phase));
        self
    }

    /// Inserts `phase` before the first phase named `anchor`.
    ///
    /// Returns `false` (and drops `phase`) if no such phase exists.
    pub fn insert_before(&mut self, anchor: &str, phase: impl Phase + 'static) -> bool {
        match self.position(anchor) {
            Some(index) => {
                self.phases.insert(index, Box::new(phase));
                true
            }
            None => false,
        }
    }

    /// Inserts `phase` after the first phase named `anchor`.
    ///
    /// Returns `false` (and drops `phase`) if no such phase exists.
    pub fn insert_after(&mut self, anchor: &str, phase: impl Phase + 'static) -> bool {
        match self.position(anchor) {
            Some(index) => {
                self.phases.insert(index + 1, Box::new(phase));
                true
            }
            None => false,
        }
    }

    /// Removes the first phase named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Phase>> {
        let index = self.position(name)?;
        Some(self.phases.remove(index))
    }

    /// Finds the first phase named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&dyn Phase> {
        self.phases
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name() == name)
    }

    /// Phase names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.phases.iter().map(|p| p.name())
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns `true` if the suite has no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Runs every phase in order.
    ///
    /// After each phase the node budget is checked; with
    /// [`CompilerConfig::verify_phases`](crate::compiler::CompilerConfig) the
    /// graph is verified as well. Errors carry the failing phase's name.
    ///
    /// # Errors
    ///
    /// Returns the first phase error, or a bailout if the graph outgrows the budget.
    pub fn apply(&self, graph: &mut Graph, ctx: &CompilationContext, tier: Tier) -> Result<bool> {
        let mut changed = false;
        for phase in &self.phases {
            let name = phase.name();
            if !phase.should_run(graph, ctx) {
                debug!("[{}] {tier}/{name}: skipped", ctx.id());
                continue;
            }

            ctx.events
                .record(EventKind::PhaseStarted)
                .method(graph.method())
                .phase(name);
            let started = Instant::now();
            let before = graph.node_count();

            let phase_changed = phase.run(graph, ctx).map_err(|e| e.in_phase(name))?;
            changed |= phase_changed;

            debug!(
                "[{}] {tier}/{name}: {} -> {} nodes{} in {:?}",
                ctx.id(),
                before,
                graph.node_count(),
                if phase_changed { "" } else { " (unchanged)" },
                started.elapsed()
            );
            ctx.events
                .record(EventKind::PhaseCompleted)
                .method(graph.method())
                .phase(name)
                .message(format!("{} nodes", graph.node_count()));

            if graph.node_count() > ctx.config.node_budget {
                return Err(Error::bailout(format!(
                    "graph has {} nodes after {name}, budget is {}",
                    graph.node_count(),
                    ctx.config.node_budget
                )));
            }
            if ctx.config.verify_phases {
                graph.verify().map_err(|e| e.in_phase(name))?;
            }
        }
        Ok(changed)
    }
}

impl fmt::Debug for PhaseSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// The three tier suites of a pipeline.
#[derive(Debug, Default)]
pub struct Suites {
    /// High tier.
    pub high: PhaseSuite,
    /// Mid tier.
    pub mid: PhaseSuite,
    /// Low tier.
    pub low: PhaseSuite,
}

impl Suites {
    /// Suites without any phase.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in pipeline.
    ///
    /// ```text
    /// high  canonicalize, inlining, escape-analysis, dead-code-elimination
    /// mid   lowering, guard-elimination, floating-reads, canonicalize
    /// low   guard-lowering, strength-reduction, address-lowering, dead-code-elimination
    /// ```
    ///
    /// Options that disable a phase are checked when the phase runs, so one set
    /// of suites serves every configuration.
    #[must_use]
    pub fn standard() -> Self {
        let mut suites = Self::empty();
        suites
            .high
            .append(CanonicalizePhase)
            .append(InliningPhase)
            .append(EscapeAnalysisPhase)
            .append(DeadCodeEliminationPhase);
        suites
            .mid
            .append(LoweringPhase)
            .append(GuardEliminationPhase)
            .append(FloatingReadsPhase)
            .append(CanonicalizePhase);
        suites
            .low
            .append(GuardLoweringPhase)
            .append(StrengthReductionPhase)
            .append(AddressLoweringPhase)
            .append(DeadCodeEliminationPhase);
        suites
    }

    /// The suite of `tier`.
    #[must_use]
    pub fn suite(&self, tier: Tier) -> &PhaseSuite {
        match tier {
            Tier::High => &self.high,
            Tier::Mid => &self.mid,
            Tier::Low => &self.low,
        }
    }

    /// Mutable access to the suite of `tier`.
    pub fn suite_mut(&mut self, tier: Tier) -> &mut PhaseSuite {
        match tier {
            Tier::High => &mut self.high,
            Tier::Mid => &mut self.mid,
            Tier::Low => &mut self.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Phase for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn run(&self, _graph: &mut Graph, _ctx: &CompilationContext) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_suite_editing() {
        let mut suite = PhaseSuite::new();
        suite.append(Named("b")).append(Named("d"));
        suite.prepend(Named("a"));
        assert!(suite.insert_before("d", Named("c")));
        assert!(suite.insert_after("d", Named("e")));
        assert!(!suite.insert_after("missing", Named("x")));
        assert_eq!(suite.names().collect::<Vec<_>>(), ["a", "b", "c", "d", "e"]);

        assert!(suite.remove("c").is_some());
        assert!(suite.find("c").is_none());
        assert_eq!(suite.find("d").map(Phase::name), Some("d"));
        assert_eq!(suite.len(), 4);
    }

    #[test]
    fn test_standard_suites() {
        let suites = Suites::standard();
        assert_eq!(suites.suite(Tier::High).names().next(), Some("canonicalize"));
        assert!(suites.suite(Tier::Mid).find("guard-elimination").is_some());
        assert!(suites.suite(Tier::Low).find("guard-lowering").is_some());
    }

    struct Grow;

    impl Phase for Grow {
        fn name(&self) -> &'static str {
            "grow"
        }

        fn run(&self, graph: &mut Graph, _ctx: &CompilationContext) -> Result<bool> {
            for value in 0..10 {
                graph.constant(crate::ir::Constant::Int(value))?;
            }
            Ok(true)
        }
    }

    #[test]
    fn test_budget_bailout() {
        let mut suite = PhaseSuite::new();
        suite.append(Grow);
        let ctx = CompilationContext::new(
            crate::compiler::CompilerConfig::default().with_node_budget(5),
            crate::compiler::TargetDescription::amd64(),
        );
        let mut graph = Graph::new();
        let err = suite.apply(&mut graph, &ctx, Tier::High).unwrap_err();
        assert!(err.is_bailout());
        assert_eq!(ctx.events.count_kind(EventKind::PhaseCompleted), 1);
    }
}
