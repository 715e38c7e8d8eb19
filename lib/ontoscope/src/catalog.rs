//! The classes of the loaded graph that have at least one instance.

use crate::error::{Error, PreconditionError, QueryError};
use crate::query::{self, QueryResult};
use crate::store::GraphStore;
use crate::task::CancellationToken;
use oxigraph::model::NamedNode;
use std::collections::BTreeMap;
use tracing::debug;

/// Selects every OWL class with at least one instance.
///
/// `owl:Class` is written in full since the loaded file may bind `owl` to another namespace.
pub const CLASSES_WITH_INSTANCES_QUERY: &str = "SELECT DISTINCT ?class WHERE { ?instance a ?class . ?class a <http://www.w3.org/2002/07/owl#Class> . }";

/// A display name and the class IRIs sharing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    name: String,
    iris: Vec<NamedNode>,
}

impl CatalogEntry {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted, never empty.
    #[inline]
    pub fn iris(&self) -> &[NamedNode] {
        &self.iris
    }
}

/// The classes of a graph with instances, indexed by display name.
///
/// Display names are unique and sorted. Classes from different namespaces sharing a local name
/// are merged into one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCatalog {
    entries: Vec<CatalogEntry>,
}

impl ClassCatalog {
    /// Runs [`CLASSES_WITH_INSTANCES_QUERY`] against `graph`.
    pub fn build(graph: &GraphStore) -> Result<Self, QueryError> {
        let result = query::execute(graph, CLASSES_WITH_INSTANCES_QUERY)?;
        let catalog = Self::from_iris(
            result
                .first_column()
                .filter_map(|iri| NamedNode::new(iri).ok()),
        );
        debug!(classes = catalog.len(), "class catalog built");
        Ok(catalog)
    }

    /// Groups `iris` by display name. IRIs without a local name are skipped.
    pub fn from_iris(iris: impl IntoIterator<Item = NamedNode>) -> Self {
        let mut entries = BTreeMap::<String, Vec<NamedNode>>::new();
        for iri in iris {
            let name = display_name(iri.as_str());
            if name.is_empty() {
                continue;
            }
            let name = name.to_owned();
            entries.entry(name).or_default().push(iri);
        }
        Self {
            entries: entries
                .into_iter()
                .map(|(name, mut iris)| {
                    iris.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
                    iris.dedup();
                    CatalogEntry { name, iris }
                })
                .collect(),
        }
    }

    /// The display names, in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(CatalogEntry::name)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries
            .binary_search_by(|entry| entry.name.as_str().cmp(name))
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    pub fn first(&self) -> Option<&CatalogEntry> {
        self.entries.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The local name of `iri`: what follows its last `#` or, without one, its last `/`.
///
/// ```
/// use ontoscope::catalog::display_name;
///
/// assert_eq!(display_name("http://example.org/football#Player"), "Player");
/// assert_eq!(display_name("http://example.org/football/Coach"), "Coach");
/// ```
pub fn display_name(iri: &str) -> &str {
    if let Some((_, fragment)) = iri.rsplit_once('#') {
        fragment
    } else if let Some((_, segment)) = iri.rsplit_once('/') {
        segment
    } else {
        iri
    }
}

/// The display names of the classes of `graph` that have instances, sorted and deduplicated.
pub fn classes_with_instances(graph: &GraphStore) -> Result<Vec<String>, QueryError> {
    Ok(ClassCatalog::build(graph)?
        .names()
        .map(str::to_owned)
        .collect())
}

/// Finds the class IRIs a display name stands for.
///
/// Names from the catalog map to the IRIs it recorded. Other names are resolved against
/// `namespace` or, if `None`, against the namespace of the graph ontology.
pub fn resolve_class(
    graph: &GraphStore,
    catalog: &ClassCatalog,
    name: &str,
    namespace: Option<&str>,
) -> Result<Vec<NamedNode>, PreconditionError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PreconditionError::NoClassSelected);
    }
    if let Some(entry) = catalog.get(name) {
        return Ok(entry.iris.clone());
    }
    let namespace = namespace
        .map(str::to_owned)
        .or_else(|| graph.namespace())
        .ok_or_else(|| PreconditionError::UnknownNamespace(name.to_owned()))?;
    NamedNode::new(format!("{namespace}{name}"))
        .map(|iri| vec![iri])
        .map_err(|_| PreconditionError::InvalidClassName(name.to_owned()))
}

/// Lists the distinct instances of any of `classes`.
pub fn members_of(
    graph: &GraphStore,
    classes: &[NamedNode],
    cancellation: &CancellationToken,
) -> Result<QueryResult, QueryError> {
    query::execute_cancellable(graph, &members_query(classes), cancellation)
}

/// Lists the instances of the class displayed as `name`.
///
/// A class without instances yields an empty result.
pub fn members(
    graph: &GraphStore,
    catalog: &ClassCatalog,
    name: &str,
    namespace: Option<&str>,
) -> Result<QueryResult, Error> {
    let classes = resolve_class(graph, catalog, name, namespace)?;
    Ok(members_of(graph, &classes, &CancellationToken::new())?)
}

fn members_query(classes: &[NamedNode]) -> String {
    let values = classes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!("SELECT DISTINCT ?instance WHERE {{ VALUES ?class {{ {values} }} ?instance a ?class . }}")
}
