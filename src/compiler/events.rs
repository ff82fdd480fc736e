//! Queryable record of what a compilation did.
//!
//! `log` output is for people reading a trace. The [`EventLog`] is for code:
//! each canonicalization rewrite, inlined invoke, inserted or lowered guard and
//! finished tier appends one [`Event`], and tests or the
//! [`CompilerSession`](crate::session::CompilerSession) count them afterwards.
//!
//! Kinds fall into three [`EventCategory`]s. Rewrites change the graph.
//! Pipeline events mark phase and tier progress or a bailout. Diagnostics carry
//! free text.
//!
//! ```rust
//! use tiergraph::compiler::{CompilationStats, EventKind, EventLog};
//! use tiergraph::ir::{MethodId, NodeId};
//!
//! let log = EventLog::new();
//! log.record(EventKind::GuardLowered)
//!     .at(MethodId(4), NodeId::new(17))
//!     .phase("guard-lowering")
//!     .message("NullCheckException");
//! log.record(EventKind::TierCompleted).phase("low");
//!
//! assert_eq!(log.in_phase("guard-lowering").count(), 1);
//! let stats = CompilationStats::from_log(&log);
//! assert_eq!((stats.guards_lowered, stats.tiers_completed), (1, 1));
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};

use strum::{Display, EnumIter, IntoStaticStr};

use crate::ir::{MethodId, NodeId};

/// Coarse grouping of [`EventKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventCategory {
    /// The graph changed.
    Rewrite,
    /// Phase or tier progress, or an abandoned compilation.
    Pipeline,
    /// Free-form messages.
    Diagnostic,
}

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, EnumIter)]
pub enum EventKind {
    /// A node was replaced by a constant.
    #[strum(to_string = "node folded")]
    NodeFolded,
    /// A node was replaced by a simpler existing node.
    #[strum(to_string = "node simplified")]
    NodeSimplified,
    /// Dead data was removed.
    #[strum(to_string = "node removed")]
    NodeRemoved,
    /// An `If` on a constant lost its dead branch.
    #[strum(to_string = "branch folded")]
    BranchFolded,
    /// A merge left with one end was collapsed.
    #[strum(to_string = "merge collapsed")]
    MergeCollapsed,
    /// A call through a constant method became a direct call.
    #[strum(to_string = "call devirtualized")]
    CallDevirtualized,
    /// An invoke was replaced by a copy of the callee.
    #[strum(to_string = "invoke inlined")]
    InvokeInlined,
    /// An allocation was replaced by the values stored into it.
    #[strum(to_string = "allocation virtualized")]
    AllocationVirtualized,
    /// Lowering added an implicit null check in front of a memory access.
    #[strum(to_string = "guard inserted")]
    GuardInserted,
    /// A guard repeated a check that already holds.
    #[strum(to_string = "guard eliminated")]
    GuardEliminated,
    /// A guard became a branch into `Deoptimize`.
    #[strum(to_string = "guard lowered")]
    GuardLowered,
    /// A field access became a `Read` or `Write` at a target offset.
    #[strum(to_string = "node lowered")]
    NodeLowered,
    /// A `Read` became a `FloatingRead`.
    #[strum(to_string = "read floated")]
    ReadFloated,
    /// A multiplication became a shift.
    #[strum(to_string = "strength reduced")]
    StrengthReduced,
    /// A displacement too large for the target got its own `Address` node.
    #[strum(to_string = "address lowered")]
    AddressLowered,

    /// A phase began running.
    #[strum(to_string = "phase started")]
    PhaseStarted,
    /// A phase returned.
    #[strum(to_string = "phase completed")]
    PhaseCompleted,
    /// A tier finished and its graph passed verification.
    #[strum(to_string = "tier completed")]
    TierCompleted,
    /// A compilation or specialization gave up.
    #[strum(to_string = "bailout")]
    Bailout,

    /// Informational message.
    #[strum(to_string = "info")]
    Info,
    /// Something unexpected that the compilation survived.
    #[strum(to_string = "warning")]
    Warning,
    /// A failure that is not a bailout.
    #[strum(to_string = "error")]
    Error,
}

impl EventKind {
    /// The text used for events recorded without a message.
    #[must_use]
    pub fn description(self) -> &'static str {
        self.into()
    }

    /// The category this kind belongs to.
    #[must_use]
    pub fn category(self) -> EventCategory {
        match self {
            Self::PhaseStarted | Self::PhaseCompleted | Self::TierCompleted | Self::Bailout => {
                EventCategory::Pipeline
            }
            Self::Info | Self::Warning | Self::Error => EventCategory::Diagnostic,
            _ => EventCategory::Rewrite,
        }
    }
}

/// One recorded fact about a compilation.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Method whose graph was being compiled.
    pub method: Option<MethodId>,
    /// Node the event is about.
    pub node: Option<NodeId>,
    /// Detail, or the kind's description.
    pub message: String,
    /// Phase or tier that recorded the event.
    pub phase: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.phase, self.node) {
            (Some(phase), Some(node)) => write!(f, "{phase}: {node}: {}", self.message),
            (Some(phase), None) => write!(f, "{phase}: {}", self.message),
            (None, Some(node)) => write!(f, "{node}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Pending event returned by [`EventLog::record`].
///
/// The event is appended when the builder goes out of scope, so a bare
/// `log.record(kind);` statement records it with default fields.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    event: Event,
}

impl EventBuilder<'_> {
    /// Sets method and node together.
    pub fn at(mut self, method: MethodId, node: NodeId) -> Self {
        self.event.method = Some(method);
        self.event.node = Some(node);
        self
    }

    /// Sets the method. Graphs built by hand have none.
    pub fn method(mut self, method: Option<MethodId>) -> Self {
        self.event.method = method;
        self
    }

    /// Sets the node.
    pub fn node(mut self, node: NodeId) -> Self {
        self.event.node = Some(node);
        self
    }

    /// Replaces the default message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Names the phase or tier recording the event.
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.event.phase = Some(phase.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let event = Event {
            kind: self.event.kind,
            method: self.event.method.take(),
            node: self.event.node.take(),
            message: std::mem::take(&mut self.event.message),
            phase: self.event.phase.take(),
        };
        self.log.events.push(event);
    }
}

/// Append-only event storage shared by the phases of a compilation.
///
/// Appends go through `&self`. Parallel compilations each fill their own log
/// and the session merges them.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let copy = Self::new();
        copy.merge(self);
        copy
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts an event of `kind`; see [`EventBuilder`].
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder {
            log: self,
            event: Event {
                kind,
                method: None,
                node: None,
                message: kind.description().to_string(),
                phase: None,
            },
        }
    }

    /// Records an [`EventKind::Info`] message.
    pub fn info(&self, message: impl Into<String>) {
        self.record(EventKind::Info).message(message);
    }

    /// Records an [`EventKind::Warning`] message.
    pub fn warn(&self, message: impl Into<String>) {
        self.record(EventKind::Warning).message(message);
    }

    /// Appends a copy of every event of `other`, in order.
    pub fn merge(&self, other: &EventLog) {
        for event in other.iter() {
            self.events.push(event.clone());
        }
    }

    /// All events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Events recorded by the phase or tier `phase`.
    pub fn in_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter().filter(move |e| e.phase.as_deref() == Some(phase))
    }

    /// Events that changed the graph.
    pub fn rewrites(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter()
            .filter(|e| e.kind.category() == EventCategory::Rewrite)
    }

    /// One line per rewrite kind, e.g. `"2 guard lowered, 1 invoke inlined"`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut counts: BTreeMap<EventKind, usize> = BTreeMap::new();
        for event in self.rewrites() {
            *counts.entry(event.kind).or_default() += 1;
        }
        if counts.is_empty() {
            return "no rewrites".to_string();
        }
        counts
            .into_iter()
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Counters over an [`EventLog`], as reported by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompilationStats {
    /// Distinct methods that recorded anything.
    pub methods: usize,
    /// Nodes folded to constants.
    pub folded: usize,
    /// Nodes simplified, removed, or dropped with a dead branch.
    pub simplified: usize,
    /// Invokes inlined.
    pub inlined: usize,
    /// Allocations virtualized.
    pub virtualized: usize,
    /// Implicit null checks inserted by lowering.
    pub guards_inserted: usize,
    /// Redundant guards removed.
    pub guards_eliminated: usize,
    /// Guards turned into deoptimizing branches.
    pub guards_lowered: usize,
    /// Tiers that finished with a verified graph.
    pub tiers_completed: usize,
    /// Abandoned compilations.
    pub bailouts: usize,
    /// Failures other than bailouts.
    pub failures: usize,
}

impl CompilationStats {
    /// Counts the events of `log`.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let mut stats = Self::default();
        let mut methods = HashSet::new();
        for event in log.iter() {
            if let Some(method) = event.method {
                methods.insert(method);
            }
            let counter = match event.kind {
                EventKind::NodeFolded => &mut stats.folded,
                EventKind::NodeSimplified
                | EventKind::NodeRemoved
                | EventKind::BranchFolded
                | EventKind::MergeCollapsed => &mut stats.simplified,
                EventKind::InvokeInlined => &mut stats.inlined,
                EventKind::AllocationVirtualized => &mut stats.virtualized,
                EventKind::GuardInserted => &mut stats.guards_inserted,
                EventKind::GuardEliminated => &mut stats.guards_eliminated,
                EventKind::GuardLowered => &mut stats.guards_lowered,
                EventKind::TierCompleted => &mut stats.tiers_completed,
                EventKind::Bailout => &mut stats.bailouts,
                EventKind::Error => &mut stats.failures,
                _ => continue,
            };
            *counter += 1;
        }
        stats.methods = methods.len();
        stats
    }
}

impl fmt::Display for CompilationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = [
            (self.methods, "methods"),
            (self.folded, "folded"),
            (self.simplified, "simplified"),
            (self.inlined, "inlined"),
            (self.virtualized, "virtualized"),
            (self.guards_inserted, "guards inserted"),
            (self.guards_eliminated, "guards eliminated"),
            (self.guards_lowered, "guards lowered"),
            (self.tiers_completed, "tiers"),
            (self.bailouts, "bailouts"),
            (self.failures, "failures"),
        ];
        let parts: Vec<String> = counters
            .iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count} {label}"))
            .collect();
        if parts.is_empty() {
            f.write_str("nothing compiled")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_default_message_is_description() {
        let log = EventLog::new();
        log.record(EventKind::GuardLowered);
        let event = log.iter().next().expect("one event");
        assert_eq!(event.message, "guard lowered");
        assert_eq!(event.to_string(), "guard lowered");
    }

    #[test]
    fn test_every_kind_has_a_description() {
        for kind in EventKind::iter() {
            assert_eq!(kind.description(), kind.to_string());
            assert!(!kind.description().is_empty());
        }
    }

    #[test]
    fn test_builder_fields() {
        let log = EventLog::new();
        log.record(EventKind::InvokeInlined)
            .at(MethodId(3), NodeId::new(9))
            .phase("inlining")
            .message("m7");

        let event = log.iter().next().expect("one event");
        assert_eq!(event.method, Some(MethodId(3)));
        assert_eq!(event.node, Some(NodeId::new(9)));
        assert_eq!(event.to_string(), format!("inlining: {}: m7", NodeId::new(9)));
        assert_eq!(log.in_phase("inlining").count(), 1);
        assert_eq!(log.in_phase("lowering").count(), 0);
    }

    #[test]
    fn test_categories() {
        assert_eq!(EventKind::GuardInserted.category(), EventCategory::Rewrite);
        assert_eq!(EventKind::TierCompleted.category(), EventCategory::Pipeline);
        assert_eq!(EventKind::Bailout.category(), EventCategory::Pipeline);
        assert_eq!(EventKind::Warning.category(), EventCategory::Diagnostic);

        let log = EventLog::new();
        log.info("tier high");
        log.warn("step limit");
        log.record(EventKind::PhaseStarted);
        assert_eq!(log.rewrites().count(), 0);
        assert_eq!(log.summary(), "no rewrites");
    }

    #[test]
    fn test_summary_is_sorted_by_kind() {
        let log = EventLog::new();
        log.record(EventKind::GuardLowered);
        log.record(EventKind::NodeFolded);
        log.record(EventKind::GuardLowered);
        assert_eq!(log.summary(), "1 node folded, 2 guard lowered");
    }

    #[test]
    fn test_merge_keeps_order() {
        let high = EventLog::new();
        let low = EventLog::new();
        high.record(EventKind::InvokeInlined);
        low.record(EventKind::GuardLowered);
        high.merge(&low);
        let copy = high.clone();
        let kinds: Vec<_> = copy.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [EventKind::InvokeInlined, EventKind::GuardLowered]);
    }

    #[test]
    fn test_parallel_compilations_append() {
        let log = EventLog::new();
        std::thread::scope(|s| {
            for unit in 0..4 {
                let log = &log;
                s.spawn(move || {
                    for _ in 0..3 {
                        log.record(EventKind::TierCompleted).method(Some(MethodId(unit)));
                    }
                });
            }
        });
        assert_eq!(log.count_kind(EventKind::TierCompleted), 12);
        assert_eq!(CompilationStats::from_log(&log).methods, 4);
    }

    #[test]
    fn test_stats() {
        let log = EventLog::new();
        log.record(EventKind::GuardInserted).method(Some(MethodId(1)));
        log.record(EventKind::GuardLowered).method(Some(MethodId(1)));
        log.record(EventKind::NodeRemoved).method(Some(MethodId(2)));
        log.record(EventKind::Bailout);
        log.info("ignored");

        let stats = CompilationStats::from_log(&log);
        assert_eq!(stats.methods, 2);
        assert_eq!(stats.simplified, 1);
        assert_eq!(
            stats.to_string(),
            "2 methods, 1 simplified, 1 guards inserted, 1 guards lowered, 1 bailouts"
        );
        assert_eq!(CompilationStats::default().to_string(), "nothing compiled");
    }
}
