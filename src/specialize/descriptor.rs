//! What to specialize and what the result depends on.

use std::fmt;

use crate::ir::{Constant, MethodId};

/// The root of a specialization: an interpreter entry method, optionally with
/// a known receiver (the guest-language tree being executed).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallTargetDescriptor {
    /// Entry method whose graph is specialized.
    pub method: MethodId,
    /// Constant replacing parameter 0, if known.
    pub receiver: Option<Constant>,
    /// Name for diagnostics.
    pub name: Option<String>,
}

impl CallTargetDescriptor {
    /// Describes a call of `method` with an unknown receiver.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            receiver: None,
            name: None,
        }
    }

    /// Sets the receiver constant injected for parameter 0.
    #[must_use]
    pub fn with_receiver(mut self, receiver: Constant) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Sets the diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for CallTargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.method)?,
            None => write!(f, "{}", self.method)?,
        }
        if let Some(receiver) = &self.receiver {
            write!(f, " on {receiver}")?;
        }
        Ok(())
    }
}

/// A fact the specialized graph relies on.
///
/// If any of these stops holding (a method is redefined, the receiver tree is
/// rewritten) the graph must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Assumption {
    /// Parameter 0 of `method` was folded to `receiver`.
    ConstantReceiver {
        /// Root method.
        method: MethodId,
        /// Injected receiver.
        receiver: Constant,
    },
    /// The body of `method` was copied into the graph.
    MethodInlined {
        /// Inlined method.
        method: MethodId,
    },
    /// A copy of `method` specialized for constant arguments was inlined.
    ConstantArguments {
        /// Inlined method.
        method: MethodId,
        /// Per-parameter constant, `None` where the argument was not constant.
        arguments: Vec<Option<Constant>>,
    },
}

impl Assumption {
    /// The method whose code this assumption depends on.
    #[must_use]
    pub fn method(&self) -> MethodId {
        match self {
            Self::ConstantReceiver { method, .. }
            | Self::MethodInlined { method }
            | Self::ConstantArguments { method, .. } => *method,
        }
    }
}

/// Assumptions recorded while specializing, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assumptions {
    entries: Vec<Assumption>,
}

impl Assumptions {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `assumption`. Returns `false` if it was already recorded.
    pub fn record(&mut self, assumption: Assumption) -> bool {
        if self.entries.contains(&assumption) {
            return false;
        }
        self.entries.push(assumption);
        true
    }

    /// Returns `true` if `assumption` was recorded.
    #[must_use]
    pub fn contains(&self, assumption: &Assumption) -> bool {
        self.entries.contains(assumption)
    }

    /// Returns `true` if any assumption depends on the code of `method`.
    #[must_use]
    pub fn depends_on(&self, method: MethodId) -> bool {
        self.entries.iter().any(|a| a.method() == method)
    }

    /// All recorded assumptions in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Assumption> {
        self.entries.iter()
    }

    /// Number of assumptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was assumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
