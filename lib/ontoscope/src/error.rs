use crate::task::TaskKind;
use oxigraph::sparql::{QueryEvaluationError, SparqlSyntaxError};
use oxigraph::store::{SerializerError, StorageError};
use oxiri::IriParseError;
use oxrdfxml::RdfXmlSyntaxError;
use std::io;
use std::path::PathBuf;

/// An error raised while loading an ontology file into the [`GraphStore`](crate::store::GraphStore).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The file could not be read.
    #[error("Unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file is not valid RDF/XML.
    #[error("{} is not valid RDF/XML: {source}", path.display())]
    Syntax {
        path: PathBuf,
        #[source]
        source: RdfXmlSyntaxError,
    },
    /// The file path can not be turned into a base IRI.
    #[error("{} can not be used as a base IRI", path.display())]
    InvalidPath { path: PathBuf },
    /// The in-memory storage refused the triples.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An error raised by a SPARQL query.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QueryError {
    /// The query text is not valid SPARQL.
    #[error(transparent)]
    Syntax(#[from] SparqlSyntaxError),
    /// The query failed during its evaluation.
    #[error(transparent)]
    Execution(#[from] QueryEvaluationError),
    /// The evaluation was interrupted by a cancellation request.
    #[error("The query has been cancelled")]
    Cancelled,
}

/// What went wrong while reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningErrorKind {
    /// The ontology is logically inconsistent.
    Inconsistent,
    /// The external reasoner program could not be started.
    BackendMissing,
    /// The external reasoner exited with a failure status.
    BackendFailed,
    /// The ontology file could not be parsed.
    Parse,
    /// The fixpoint computation exceeded its iteration budget.
    MaxIterationsExceeded,
    /// The reasoning exceeded its time budget.
    Timeout,
    /// The reasoning was interrupted by a cancellation request.
    Cancelled,
    /// Any other failure.
    Internal,
}

/// An error raised by a [`Reasoner`](crate::reasoner::Reasoner).
///
/// The diagnostic log captured up to the failure is carried by
/// [`ReasoningOutcome`](crate::reasoner::ReasoningOutcome), not by the error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ReasoningError {
    kind: ReasoningErrorKind,
    message: String,
}

impl ReasoningError {
    pub fn new(kind: ReasoningErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn inconsistent(message: impl Into<String>) -> Self {
        Self::new(ReasoningErrorKind::Inconsistent, message)
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(ReasoningErrorKind::Cancelled, "The reasoning has been cancelled")
    }

    #[inline]
    pub fn kind(&self) -> ReasoningErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ParseError> for ReasoningError {
    fn from(error: ParseError) -> Self {
        Self::new(ReasoningErrorKind::Parse, error.to_string())
    }
}

impl From<StorageError> for ReasoningError {
    fn from(error: StorageError) -> Self {
        Self::new(ReasoningErrorKind::Internal, error.to_string())
    }
}

/// An action has been requested while the application is not ready for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PreconditionError {
    #[error("Load an ontology first")]
    NoGraphLoaded,
    /// No ontology is loaded or the query text is blank.
    #[error("Load an ontology and enter a query first")]
    QueryNotReady,
    #[error("No class selected.")]
    NoClassSelected,
    #[error("Apply the reasoner first")]
    NothingReasoned,
    #[error("Unable to find the namespace of the class {0}, set one explicitly")]
    UnknownNamespace(String),
    #[error("{0} is not a valid class name")]
    InvalidClassName(String),
    #[error("The file format '{0}' is unknown")]
    UnknownFormat(String),
    #[error("Wait for the running {0} to finish")]
    Busy(TaskKind),
}

/// Invalid [`AppConfig`](crate::config::AppConfig).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("The reasoner command is empty")]
    EmptyReasonerCommand,
    #[error("The reasoner command must contain the {{input}} placeholder")]
    MissingInputPlaceholder,
    #[error("The namespace {iri} is not a valid IRI: {source}")]
    InvalidNamespace {
        iri: String,
        #[source]
        source: IriParseError,
    },
}

/// Any error reported by [`App`](crate::app::App).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialization(#[from] SerializerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("The {0} stopped unexpectedly")]
    TaskCrashed(TaskKind),
}

impl From<QueryEvaluationError> for Error {
    #[inline]
    fn from(error: QueryEvaluationError) -> Self {
        Self::Query(error.into())
    }
}

impl From<SparqlSyntaxError> for Error {
    #[inline]
    fn from(error: SparqlSyntaxError) -> Self {
        Self::Query(error.into())
    }
}
