//! SPARQL evaluation against a [`GraphStore`].

use crate::error::QueryError;
use crate::store::GraphStore;
use crate::task::CancellationToken;
use oxigraph::model::Term;
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use std::time::Instant;
use tracing::{debug, warn};

/// One result row. Cells are `None` when the variable is unbound.
pub type Row = Vec<Option<String>>;

/// The rows returned by a query, in evaluation order.
///
/// `SELECT` queries produce one cell per projected variable,
/// `ASK` queries a single `true`/`false` cell,
/// `CONSTRUCT` and `DESCRIBE` queries a subject/predicate/object row per triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The text of the first cell of each row, skipping unbound ones.
    pub fn first_column(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|row| row.first()?.as_deref())
    }
}

/// Evaluates `query` against `graph`.
///
/// The `rdf`, `rdfs`, `owl` and `xsd` prefixes and all the prefixes declared in the loaded file
/// are available without a `PREFIX` clause.
/// The graph is never modified: SPARQL updates are rejected as syntax errors.
pub fn execute(graph: &GraphStore, query: &str) -> Result<QueryResult, QueryError> {
    execute_cancellable(graph, query, &CancellationToken::new())
}

/// Same as [`execute`] but stops between two rows once `cancellation` is triggered.
pub fn execute_cancellable(
    graph: &GraphStore,
    query: &str,
    cancellation: &CancellationToken,
) -> Result<QueryResult, QueryError> {
    let start = Instant::now();
    let mut evaluator = SparqlEvaluator::new();
    for (name, iri) in graph.query_prefixes() {
        evaluator = match evaluator.clone().with_prefix(name, iri) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                warn!("Ignoring the prefix {name}: {e}");
                evaluator
            }
        };
    }
    let prepared = evaluator.parse_query(query)?;
    let result = match prepared.on_store(graph.store()).execute()? {
        QueryResults::Solutions(solutions) => {
            let columns = solutions
                .variables()
                .iter()
                .map(|v| v.as_str().to_owned())
                .collect();
            let mut rows = Vec::new();
            for solution in solutions {
                if cancellation.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }
                rows.push(
                    solution?
                        .values()
                        .iter()
                        .map(|value| value.as_ref().map(term_text))
                        .collect(),
                );
            }
            QueryResult::new(columns, rows)
        }
        QueryResults::Boolean(value) => {
            QueryResult::new(vec!["result".into()], vec![vec![Some(value.to_string())]])
        }
        QueryResults::Graph(triples) => {
            let mut rows = Vec::new();
            for triple in triples {
                if cancellation.is_cancelled() {
                    return Err(QueryError::Cancelled);
                }
                let triple = triple?;
                rows.push(vec![
                    Some(term_text(&triple.subject.into())),
                    Some(triple.predicate.into_string()),
                    Some(term_text(&triple.object)),
                ]);
            }
            QueryResult::new(
                vec!["subject".into(), "predicate".into(), "object".into()],
                rows,
            )
        }
    };
    debug!(
        rows = result.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "query evaluated"
    );
    Ok(result)
}

/// The plain text of a term: IRIs without brackets, blank node identifiers and literal values.
pub fn term_text(term: &Term) -> String {
    match term {
        Term::NamedNode(node) => node.as_str().to_owned(),
        Term::BlankNode(node) => node.as_str().to_owned(),
        Term::Literal(literal) => literal.value().to_owned(),
        #[allow(unreachable_patterns)]
        _ => term.to_string(),
    }
}
