//! Per-compilation state shared by every phase.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::compiler::{
    config::{CompilerConfig, TargetDescription},
    events::EventLog,
    provider::MethodProvider,
};

static NEXT_COMPILATION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a phase may consult besides the graph itself.
///
/// The context is handed to phases by shared reference. Events are appended
/// through `&self`, so one context can also be shared across threads.
pub struct CompilationContext {
    /// Resolved options.
    pub config: CompilerConfig,
    /// Target machine.
    pub target: TargetDescription,
    /// Source of callee graphs for inlining.
    pub methods: Option<Arc<dyn MethodProvider>>,
    /// Transformations and diagnostics recorded during the compilation.
    pub events: EventLog,
    id: u64,
}

impl Default for CompilationContext {
    fn default() -> Self {
        Self::new(CompilerConfig::default(), TargetDescription::default())
    }
}

impl CompilationContext {
    /// Creates a context without a method provider.
    #[must_use]
    pub fn new(config: CompilerConfig, target: TargetDescription) -> Self {
        Self {
            config,
            target,
            methods: None,
            events: EventLog::new(),
            id: NEXT_COMPILATION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Attaches the provider used to look up callees.
    #[must_use]
    pub fn with_methods(mut self, methods: Arc<dyn MethodProvider>) -> Self {
        self.methods = Some(methods);
        self
    }

    /// Process-unique id of this compilation, used in log output.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("target", &self.target.name)
            .field("has_methods", &self.methods.is_some())
            .field("events", &self.events.len())
            .finish()
    }
}
