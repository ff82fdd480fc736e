use thiserror::Error;

use crate::ir::NodeId;

/// Builds an [`Error::InternalFault`] capturing the source location.
///
/// ```rust,ignore
/// return Err(internal_fault!("phi {} has {} values", phi, count));
/// return Err(internal_fault!(node = phi, "phi arity mismatch"));
/// ```
macro_rules! internal_fault {
    (node = $node:expr, $msg:expr) => {
        crate::Error::InternalFault {
            message: $msg.to_string(),
            phase: None,
            node: Some($node),
            file: file!(),
            line: line!(),
        }
    };

    (node = $node:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::InternalFault {
            message: format!($fmt, $($arg)*),
            phase: None,
            node: Some($node),
            file: file!(),
            line: line!(),
        }
    };

    // Single string version
    ($msg:expr) => {
        crate::Error::InternalFault {
            message: $msg.to_string(),
            phase: None,
            node: None,
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InternalFault {
            message: format!($fmt, $($arg)*),
            phase: None,
            node: None,
            file: file!(),
            line: line!(),
        }
    };
}

/// The error type for every fallible operation of the compiler core.
///
/// Errors fall into a small taxonomy that callers act on differently:
///
/// ## Bailouts (recoverable)
/// - [`Error::Bailout`] - a size or time budget was exceeded
/// - [`Error::Unsupported`] - a phase met a construct it cannot handle
///
/// The caller is expected to retry at a lower optimization tier or fall back to
/// unoptimized execution. See [`Error::is_bailout`].
///
/// ## Internal faults (fatal to this compilation only)
/// - [`Error::InternalFault`] - a graph invariant was violated
/// - [`Error::NodeInUse`], [`Error::DeletedNode`], [`Error::InvalidEdge`] - graph API misuse
///
/// ## Specialization failures
/// - [`Error::NeverPartOfCompilation`] - a node that must never be compiled survived
///   partial evaluation; this is a hard failure, not a bailout
///
/// ## Input errors
/// - [`Error::InvalidBytecode`] - the decoded instruction list is malformed
/// - [`Error::InvalidOption`] - a named configuration option could not be applied
///
/// Deoptimization is not represented here: guard and deoptimize nodes carry a
/// [`DeoptimizationAction`](crate::ir::DeoptimizationAction) and
/// [`DeoptimizationReason`](crate::ir::DeoptimizationReason) consumed by the runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The compilation exceeded a budget and was abandoned.
    ///
    /// Raised when the graph grows beyond the configured node budget during a tier
    /// or during specialization.
    #[error("Bailout: {message}")]
    Bailout {
        /// Why the compilation was abandoned
        message: String,
    },

    /// A phase encountered a node or pattern it does not know how to handle.
    ///
    /// Treated as a bailout. Constructs that must never reach a phase are reported
    /// as [`Error::InternalFault`] instead.
    #[error("Unsupported construct '{construct}' in phase '{phase}'")]
    Unsupported {
        /// Short name of the construct
        construct: String,
        /// The phase that rejected it
        phase: String,
    },

    /// A graph invariant was violated.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `phase` - The phase after which the violation was detected, if known
    /// * `node` - The offending node, if known
    /// * `file` - Source file where the fault was detected
    /// * `line` - Source line where the fault was detected
    #[error("Internal fault - {file}:{line}: {message}{}{}",
        phase.as_ref().map(|p| format!(" (phase '{p}')")).unwrap_or_default(),
        node.map(|n| format!(" at {n}")).unwrap_or_default())]
    InternalFault {
        /// The message to be printed for the fault
        message: String,
        /// The phase during or after which the fault occurred
        phase: Option<String>,
        /// The offending node
        node: Option<NodeId>,
        /// The source file in which this fault was raised
        file: &'static str,
        /// The source line in which this fault was raised
        line: u32,
    },

    /// A node marked as never part of compilation survived partial evaluation.
    #[error("Never part of compilation: {message} ({node})")]
    NeverPartOfCompilation {
        /// The message attached to the marker node
        message: String,
        /// The marker node
        node: NodeId,
    },

    /// A node cannot be deleted because other nodes still use it.
    #[error("Node {node} still has {usages} usage(s)")]
    NodeInUse {
        /// The node that was to be deleted
        node: NodeId,
        /// Number of remaining usages
        usages: usize,
    },

    /// A deleted (or never allocated) node id was used.
    #[error("Node {0} does not exist")]
    DeletedNode(NodeId),

    /// An edge index was out of range or an edge had the wrong shape.
    #[error("Invalid edge on {node}: {message}")]
    InvalidEdge {
        /// Node whose edge list was accessed
        node: NodeId,
        /// What was wrong with the edge
        message: String,
    },

    /// The decoded instruction stream is malformed.
    #[error("Invalid bytecode at bci {bci}: {message}")]
    InvalidBytecode {
        /// Bytecode index of the offending instruction
        bci: usize,
        /// What was wrong
        message: String,
    },

    /// A named option was unknown or had an unparsable value.
    #[error("Invalid option {name}={value}")]
    InvalidOption {
        /// Option name
        name: String,
        /// Rejected value
        value: String,
    },
}

impl Error {
    /// Creates a bailout error.
    pub fn bailout(message: impl Into<String>) -> Self {
        Error::Bailout {
            message: message.into(),
        }
    }

    /// Returns `true` if this failure is recoverable by falling back to a lower tier.
    #[must_use]
    pub fn is_bailout(&self) -> bool {
        matches!(self, Error::Bailout { .. } | Error::Unsupported { .. })
    }

    /// Returns `true` if this failure indicates a compiler bug.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::InternalFault { .. }
                | Error::NodeInUse { .. }
                | Error::DeletedNode(_)
                | Error::InvalidEdge { .. }
        )
    }

    /// Attaches the phase name to an internal fault that does not carry one yet.
    ///
    /// Graph API misuse errors are converted into internal faults so that every
    /// fault leaving a phase names the phase it came from.
    #[must_use]
    pub fn in_phase(self, phase: &str) -> Self {
        match self {
            Error::InternalFault {
                message,
                phase: None,
                node,
                file,
                line,
            } => Error::InternalFault {
                message,
                phase: Some(phase.to_string()),
                node,
                file,
                line,
            },
            Error::NodeInUse { node, .. }
            | Error::DeletedNode(node)
            | Error::InvalidEdge { node, .. } => Error::InternalFault {
                message: self.to_string(),
                phase: Some(phase.to_string()),
                node: Some(node),
                file: file!(),
                line: line!(),
            },
            other => other,
        }
    }
}
