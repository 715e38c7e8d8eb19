use crate::error::ConfigError;
use crate::reasoner::{ExternalReasoner, Reasoner, RuleReasoner, RuleReasonerConfig};
use oxigraph::io::RdfFormat;
use oxiri::Iri;
use std::sync::Arc;
use std::time::Duration;

/// Settings of an [`App`](crate::app::App).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Namespace class display names are resolved against when they are not in the catalog.
    ///
    /// Defaults to the namespace of the loaded ontology.
    pub namespace: Option<String>,
    /// Command template of an external reasoner, see [`ExternalReasoner`].
    ///
    /// The built-in [`RuleReasoner`] is used if unset.
    pub reasoner_command: Option<String>,
    pub reasoner_timeout: Option<Duration>,
    /// Round budget of the built-in reasoner.
    pub max_iterations: usize,
    /// Syntax of the formatted output.
    pub format: RdfFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            reasoner_command: None,
            reasoner_timeout: None,
            max_iterations: RuleReasonerConfig::default().max_iterations,
            format: RdfFormat::Turtle,
        }
    }
}

impl AppConfig {
    /// Checks the namespace and the reasoner command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(namespace) = &self.namespace {
            Iri::parse(namespace.as_str()).map_err(|source| ConfigError::InvalidNamespace {
                iri: namespace.clone(),
                source,
            })?;
        }
        self.reasoner()?;
        Ok(())
    }

    /// The reasoner backend these settings describe.
    pub fn reasoner(&self) -> Result<Arc<dyn Reasoner>, ConfigError> {
        Ok(match &self.reasoner_command {
            Some(template) => Arc::new(
                ExternalReasoner::from_template(template)?.with_timeout(self.reasoner_timeout),
            ),
            None => Arc::new(RuleReasoner::new(RuleReasonerConfig {
                max_iterations: self.max_iterations,
                timeout: self.reasoner_timeout,
            })),
        })
    }
}
