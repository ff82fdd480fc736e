//! Compiling many methods: parallel driver and installed-code cache.
//!
//! Compilations share nothing but read-only inputs (options, suites, the
//! method provider), so a [`CompilerSession`] runs them on the `rayon` pool
//! with one graph and one [`CompilationContext`] per worker. Events of every
//! compilation are merged into the session's log afterwards.

use std::{sync::Arc, time::Instant};

use dashmap::DashMap;
use log::{debug, info};
use rayon::prelude::*;

use crate::{
    compiler::{
        compile, CompilationContext, CompilationStats, CompilerConfig, EventLog, MethodProvider,
        ScheduledGraph, Suites, TargetDescription,
    },
    frontend::{build_initial_graph, MethodDescriptor},
    ir::MethodId,
    Result,
};

/// Where finished compilations are installed and looked up.
///
/// This is the seam to the runtime's code cache; implementations must be
/// thread-safe.
pub trait InstalledCodeCache: Send + Sync {
    /// The installed code of `method`, if any.
    fn get(&self, method: MethodId) -> Option<Arc<ScheduledGraph>>;

    /// Installs `code` for `method`, replacing earlier code.
    fn put(&self, method: MethodId, code: Arc<ScheduledGraph>);

    /// Removes the code of `method`. Returns `true` if there was any.
    fn invalidate(&self, method: MethodId) -> bool;
}

/// A [`DashMap`] backed [`InstalledCodeCache`].
#[derive(Debug, Default)]
pub struct ConcurrentCodeCache {
    code: DashMap<MethodId, Arc<ScheduledGraph>>,
}

impl ConcurrentCodeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of installed methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns `true` if nothing is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

impl InstalledCodeCache for ConcurrentCodeCache {
    fn get(&self, method: MethodId) -> Option<Arc<ScheduledGraph>> {
        self.code.get(&method).map(|code| Arc::clone(&code))
    }

    fn put(&self, method: MethodId, code: Arc<ScheduledGraph>) {
        self.code.insert(method, code);
    }

    fn invalidate(&self, method: MethodId) -> bool {
        self.code.remove(&method).is_some()
    }
}

/// Shared inputs of a batch of compilations.
///
/// # Example
///
/// ```rust
/// use tiergraph::compiler::{CompilerConfig, TargetDescription};
/// use tiergraph::frontend::{Instruction, MethodDescriptor};
/// use tiergraph::ir::{MethodId, ValueKind};
/// use tiergraph::session::CompilerSession;
///
/// let methods: Vec<MethodDescriptor> = (0..4)
///     .map(|i| {
///         MethodDescriptor::new(MethodId(i), format!("const{i}"))
///             .returning(ValueKind::Int)
///             .with_code(vec![Instruction::IConst(i as i32), Instruction::ReturnValue])
///     })
///     .collect();
///
/// let session = CompilerSession::new(CompilerConfig::default(), TargetDescription::amd64());
/// let results = session.compile_all(&methods);
/// assert_eq!(results.len(), 4);
/// assert!(results.iter().all(Result::is_ok));
/// ```
pub struct CompilerSession {
    config: CompilerConfig,
    target: TargetDescription,
    suites: Suites,
    methods: Option<Arc<dyn MethodProvider>>,
    code_cache: Option<Arc<dyn InstalledCodeCache>>,
    events: EventLog,
}

impl CompilerSession {
    /// Creates a session running the standard suites.
    #[must_use]
    pub fn new(config: CompilerConfig, target: TargetDescription) -> Self {
        Self {
            config,
            target,
            suites: Suites::standard(),
            methods: None,
            code_cache: None,
            events: EventLog::new(),
        }
    }

    /// Replaces the phase suites.
    #[must_use]
    pub fn with_suites(mut self, suites: Suites) -> Self {
        self.suites = suites;
        self
    }

    /// Supplies callee graphs for inlining.
    #[must_use]
    pub fn with_methods(mut self, methods: Arc<dyn MethodProvider>) -> Self {
        self.methods = Some(methods);
        self
    }

    /// Installs finished compilations into `cache` and reuses what it holds.
    #[must_use]
    pub fn with_code_cache(mut self, cache: Arc<dyn InstalledCodeCache>) -> Self {
        self.code_cache = Some(cache);
        self
    }

    /// Options of every compilation.
    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Events of all finished compilations.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Statistics over all finished compilations.
    #[must_use]
    pub fn stats(&self) -> CompilationStats {
        CompilationStats::from_log(&self.events)
    }

    fn context(&self) -> CompilationContext {
        let ctx = CompilationContext::new(self.config.clone(), self.target.clone());
        match &self.methods {
            Some(methods) => ctx.with_methods(Arc::clone(methods)),
            None => ctx,
        }
    }

    /// Builds and compiles one method, or returns its installed code.
    ///
    /// # Errors
    ///
    /// Returns front end errors and every error of [`compile`].
    pub fn compile_method(&self, method: &MethodDescriptor) -> Result<Arc<ScheduledGraph>> {
        if let Some(code) = self.code_cache.as_ref().and_then(|c| c.get(method.id)) {
            debug!("{} ({}) already installed", method.name, method.id);
            return Ok(code);
        }

        let ctx = self.context();
        let result = build_initial_graph(method)
            .and_then(|graph| compile(graph, &self.suites, &ctx))
            .map(Arc::new);
        self.events.merge(&ctx.events);

        let code = result?;
        if let Some(cache) = &self.code_cache {
            cache.put(method.id, Arc::clone(&code));
        }
        Ok(code)
    }

    /// Compiles `methods` in parallel. Results are in input order.
    pub fn compile_all(&self, methods: &[MethodDescriptor]) -> Vec<Result<Arc<ScheduledGraph>>> {
        let started = Instant::now();
        let results: Vec<_> = methods
            .par_iter()
            .map(|method| self.compile_method(method))
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "compiled {} methods ({failed} failed) in {:?}",
            methods.len(),
            started.elapsed()
        );
        results
    }
}

impl std::fmt::Debug for CompilerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerSession")
            .field("config", &self.config)
            .field("target", &self.target.name)
            .field("suites", &self.suites)
            .field("has_methods", &self.methods.is_some())
            .field("has_code_cache", &self.code_cache.is_some())
            .finish()
    }
}
