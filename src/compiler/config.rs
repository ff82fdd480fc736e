//! Compiler options and target descriptions.
//!
//! [`CompilerConfig`] is resolved once per compilation and shared by reference
//! with every phase. Options can be set programmatically through the `with_*`
//! setters or by name through [`CompilerConfig::apply_option`], which accepts
//! the same spelling as command-line style `name=value` pairs:
//!
//! | Option | Values |
//! |---|---|
//! | `max-graph-nodes` | node budget of a compilation |
//! | `max-specialization-nodes` | node budget of partial evaluation |
//! | `inline-threshold` | largest callee (in nodes) that is inlined |
//! | `max-inline-depth` | nesting limit for inlining |
//! | `canonicalizer-step-limit` | worklist steps per canonicalizer run |
//! | `escape-analysis` | `true` / `false` |
//! | `eliminate-redundant-guards` | `off` / `on` / `aggressive` |
//! | `schedule` | `earliest` / `latest` |
//! | `verify-phases` | `true` / `false` |

use std::str::FromStr;

use strum::{Display, EnumIter, EnumString};

use crate::{canonical::DEFAULT_STEP_LIMIT, Error, Result};

/// How aggressively redundant guards are removed in the mid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum GuardElimination {
    /// Keep every guard.
    Off,
    /// Remove guards repeated within the same straight-line segment.
    #[default]
    On,
    /// Also remove guards repeated in any dominated block.
    Aggressive,
}

/// Placement policy for floating nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SchedulePolicy {
    /// Place every floating node in its earliest legal block.
    #[default]
    Earliest,
    /// Place floating nodes as late as possible, but out of loops.
    Latest,
}

/// Properties of the machine the code is compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    /// Short architecture name.
    pub name: String,
    /// Size of a machine word and of an object field slot, in bytes.
    pub word_size: u32,
    /// Largest memory displacement an addressing mode can encode.
    pub max_displacement: i64,
    /// Name of the calling convention used for calls.
    pub calling_convention: String,
    /// Size of the object header preceding the first field, in bytes.
    pub object_header_size: i64,
}

impl TargetDescription {
    /// 64-bit x86.
    #[must_use]
    pub fn amd64() -> Self {
        Self {
            name: "amd64".to_string(),
            word_size: 8,
            max_displacement: i64::from(i32::MAX),
            calling_convention: "sysv64".to_string(),
            object_header_size: 16,
        }
    }

    /// 32-bit x86.
    #[must_use]
    pub fn x86() -> Self {
        Self {
            name: "x86".to_string(),
            word_size: 4,
            max_displacement: i64::from(i32::MAX),
            calling_convention: "cdecl".to_string(),
            object_header_size: 8,
        }
    }

    /// Overrides the displacement limit.
    #[must_use]
    pub fn with_max_displacement(mut self, max_displacement: i64) -> Self {
        self.max_displacement = max_displacement;
        self
    }

    /// Byte offset of field slot `index`.
    #[must_use]
    pub fn field_offset(&self, index: u16) -> i64 {
        self.object_header_size + i64::from(index) * i64::from(self.word_size)
    }
}

impl Default for TargetDescription {
    fn default() -> Self {
        Self::amd64()
    }
}

/// Options of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Largest graph (live nodes) a compilation may produce before bailing out.
    pub node_budget: usize,
    /// Largest graph partial evaluation may produce before bailing out.
    pub specialization_budget: usize,
    /// Callees with more live nodes than this are not inlined.
    pub inline_threshold: usize,
    /// Maximum nesting of inlined calls.
    pub max_inline_depth: usize,
    /// Worklist steps per canonicalizer run.
    pub canonicalizer_step_limit: usize,
    /// Run scalar replacement of non-escaping allocations.
    pub escape_analysis: bool,
    /// Redundant guard removal mode.
    pub guard_elimination: GuardElimination,
    /// Floating node placement policy.
    pub schedule_policy: SchedulePolicy,
    /// Verify the graph after every phase, not only at tier boundaries.
    pub verify_phases: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            node_budget: 100_000,
            specialization_budget: 10_000,
            inline_threshold: 50,
            max_inline_depth: 8,
            canonicalizer_step_limit: DEFAULT_STEP_LIMIT,
            escape_analysis: true,
            guard_elimination: GuardElimination::On,
            schedule_policy: SchedulePolicy::Earliest,
            verify_phases: false,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl CompilerConfig {
    /// Sets the compilation node budget.
    #[must_use]
    pub fn with_node_budget(mut self, budget: usize) -> Self {
        self.node_budget = budget;
        self
    }

    /// Sets the partial evaluation node budget.
    #[must_use]
    pub fn with_specialization_budget(mut self, budget: usize) -> Self {
        self.specialization_budget = budget;
        self
    }

    /// Sets the inline size threshold.
    #[must_use]
    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Sets the maximum inline depth.
    #[must_use]
    pub fn with_max_inline_depth(mut self, depth: usize) -> Self {
        self.max_inline_depth = depth;
        self
    }

    /// Sets the canonicalizer step limit.
    #[must_use]
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.canonicalizer_step_limit = limit;
        self
    }

    /// Enables or disables escape analysis.
    #[must_use]
    pub fn with_escape_analysis(mut self, enabled: bool) -> Self {
        self.escape_analysis = enabled;
        self
    }

    /// Sets the guard elimination mode.
    #[must_use]
    pub fn with_guard_elimination(mut self, mode: GuardElimination) -> Self {
        self.guard_elimination = mode;
        self
    }

    /// Sets the scheduling policy.
    #[must_use]
    pub fn with_schedule_policy(mut self, policy: SchedulePolicy) -> Self {
        self.schedule_policy = policy;
        self
    }

    /// Enables verification after every phase.
    #[must_use]
    pub fn with_phase_verification(mut self, enabled: bool) -> Self {
        self.verify_phases = enabled;
        self
    }

    /// Sets an option by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for unknown names or unparsable values.
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "max-graph-nodes" => self.node_budget = parse(name, value)?,
            "max-specialization-nodes" => self.specialization_budget = parse(name, value)?,
            "inline-threshold" => self.inline_threshold = parse(name, value)?,
            "max-inline-depth" => self.max_inline_depth = parse(name, value)?,
            "canonicalizer-step-limit" => self.canonicalizer_step_limit = parse(name, value)?,
            "escape-analysis" => self.escape_analysis = parse(name, value)?,
            "eliminate-redundant-guards" => self.guard_elimination = parse(name, value)?,
            "schedule" => self.schedule_policy = parse(name, value)?,
            "verify-phases" => self.verify_phases = parse(name, value)?,
            _ => {
                return Err(Error::InvalidOption {
                    name: name.to_string(),
                    value: value.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Applies a `name=value` option string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the string has no `=` or the option is invalid.
    pub fn apply(&mut self, option: &str) -> Result<()> {
        let Some((name, value)) = option.split_once('=') else {
            return Err(Error::InvalidOption {
                name: option.to_string(),
                value: String::new(),
            });
        };
        self.apply_option(name.trim(), value)
    }
}
