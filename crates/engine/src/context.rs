use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use stepflow_registry::{Delay, ExecutionContext, RunLogger, ValueResolver, VariableScope};
use tokio_util::sync::CancellationToken;

use crate::{delay::TokioDelay, logging::TracingRunLogger, resolve::TemplateResolver, scope::MemoryScope};

/// Assembles an [`ExecutionContext`], filling unset collaborators with the
/// engine defaults: an empty [`MemoryScope`], [`TemplateResolver`],
/// [`TracingRunLogger`], [`TokioDelay`] and a fresh cancellation token.
#[derive(Default)]
pub struct ContextBuilder {
    scope: Option<Box<dyn VariableScope>>,
    resolver: Option<Arc<dyn ValueResolver>>,
    logger: Option<Arc<dyn RunLogger>>,
    delay: Option<Arc<dyn Delay>>,
    cancellation: Option<CancellationToken>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: Box<dyn VariableScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Seeds a [`MemoryScope`] with initial variables.
    pub fn with_variables(self, variables: IndexMap<String, Value>) -> Self {
        self.with_scope(Box::new(MemoryScope::from(variables)))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ValueResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext::new(
            self.scope.unwrap_or_else(|| Box::new(MemoryScope::new())),
            self.resolver.unwrap_or_else(|| Arc::new(TemplateResolver::new())),
            self.logger.unwrap_or_else(|| Arc::new(TracingRunLogger)),
            self.delay.unwrap_or_else(|| Arc::new(TokioDelay)),
            self.cancellation.unwrap_or_default(),
        )
    }
}
