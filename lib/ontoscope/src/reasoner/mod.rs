//! Description logic reasoning over an ontology file.
//!
//! A [`Reasoner`] turns an ontology file into a [`ReasonedOntology`]: the asserted triples plus
//! everything the reasoner entailed. [`reason`] wraps a call with a [`LogCapture`] so that the
//! diagnostic log survives whatever the call returns, even a panic.

mod external;
mod rules;

pub use crate::reasoner::external::ExternalReasoner;
pub use crate::reasoner::rules::{RuleReasoner, RuleReasonerConfig};
use crate::capture::{DiagnosticLog, LogCapture};
use crate::error::{ReasoningError, ReasoningErrorKind};
use crate::task::CancellationToken;
use oxigraph::model::{GraphName, NamedNode, Quad, Triple};
use oxigraph::store::{StorageError, Store};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, error, info};

/// A reasoning backend.
pub trait Reasoner: Send + Sync {
    /// Short human readable name used in logs.
    fn name(&self) -> &str;

    /// Loads the ontology at `path` into a fresh session and computes its entailments.
    ///
    /// Diagnostics not emitted through `tracing` (e.g. a child process output) go to `log`.
    fn reason(
        &self,
        path: &Path,
        log: &DiagnosticLog,
        cancellation: &CancellationToken,
    ) -> Result<ReasonedOntology, ReasoningError>;
}

/// The result of a reasoning call together with everything it logged.
#[derive(Debug)]
pub struct ReasoningOutcome {
    pub result: Result<ReasonedOntology, ReasoningError>,
    pub log: String,
}

/// Runs `reasoner` on `path` while capturing its diagnostic output.
pub fn reason(
    reasoner: &dyn Reasoner,
    path: &Path,
    cancellation: &CancellationToken,
) -> ReasoningOutcome {
    let capture = LogCapture::start(Level::INFO);
    let start = Instant::now();
    info!("Running the {} reasoner on {}", reasoner.name(), path.display());
    let result = catch_unwind(AssertUnwindSafe(|| {
        reasoner.reason(path, capture.log(), cancellation)
    }))
    .unwrap_or_else(|payload| {
        Err(ReasoningError::new(
            ReasoningErrorKind::Internal,
            format!(
                "The {} reasoner crashed: {}",
                reasoner.name(),
                panic_message(payload.as_ref())
            ),
        ))
    });
    match &result {
        Ok(ontology) => info!(
            "{ontology} (done in {:.2}s)",
            start.elapsed().as_secs_f64()
        ),
        Err(e) => error!("{e}"),
    }
    ReasoningOutcome {
        result,
        log: capture.finish(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown error"
    }
}

/// An ontology enriched with the reasoner entailments.
///
/// It is kept apart from the [`GraphStore`](crate::store::GraphStore) the user browses.
pub struct ReasonedOntology {
    source: PathBuf,
    ontology_iri: Option<NamedNode>,
    store: Store,
    asserted: usize,
    inferred: Vec<Triple>,
}

impl ReasonedOntology {
    pub fn new(
        source: impl Into<PathBuf>,
        ontology_iri: Option<NamedNode>,
        asserted: Vec<Triple>,
        inferred: Vec<Triple>,
    ) -> Result<Self, StorageError> {
        let store = Store::new()?;
        let asserted_len = asserted.len();
        store.extend(
            asserted
                .into_iter()
                .chain(inferred.iter().cloned())
                .map(|t| Quad::new(t.subject, t.predicate, t.object, GraphName::DefaultGraph)),
        )?;
        Ok(Self {
            source: source.into(),
            ontology_iri,
            store,
            asserted: asserted_len,
            inferred,
        })
    }

    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[inline]
    pub fn ontology_iri(&self) -> Option<&NamedNode> {
        self.ontology_iri.as_ref()
    }

    /// Asserted and inferred triples together.
    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[inline]
    pub fn asserted_len(&self) -> usize {
        self.asserted
    }

    /// The entailed triples that were not asserted, in inference order.
    #[inline]
    pub fn inferred(&self) -> &[Triple] {
        &self.inferred
    }
}

impl fmt::Display for ReasonedOntology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(iri) = &self.ontology_iri {
            write!(f, "{iri}")?;
        } else {
            write!(f, "{}", self.source.display())?;
        }
        write!(
            f,
            ": {} asserted triples, {} inferred triples",
            self.asserted,
            self.inferred.len()
        )
    }
}

impl fmt::Debug for ReasonedOntology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasonedOntology")
            .field("source", &self.source)
            .field("ontology_iri", &self.ontology_iri)
            .field("asserted", &self.asserted)
            .field("inferred", &self.inferred.len())
            .finish_non_exhaustive()
    }
}
