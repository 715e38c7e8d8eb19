//! The in-memory graph holding the currently loaded ontology.

use crate::error::{ParseError, PreconditionError};
use crate::vocab::{WELL_KNOWN_PREFIXES, owl};
use oxigraph::io::{RdfFormat, RdfSerializer};
use oxigraph::model::vocab::rdf;
use oxigraph::model::{
    GraphName, GraphNameRef, NamedNode, NamedOrBlankNode, Quad, TermRef, Triple,
};
use oxigraph::store::{SerializerError, Store};
use oxrdfxml::{RdfXmlParseError, RdfXmlParser};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// A parsed RDF/XML ontology.
///
/// The triples live in the default graph of an in-memory [`Store`].
/// A `GraphStore` is never mutated after [`GraphStore::load`]: loading another file builds a new one.
///
/// ```
/// use ontoscope::store::GraphStore;
///
/// let file = r#"<?xml version="1.0"?>
/// <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
///   <rdf:Description rdf:about="http://example.com/Alice">
///     <rdf:type rdf:resource="http://example.com/Player"/>
///   </rdf:Description>
/// </rdf:RDF>"#;
/// let graph = GraphStore::from_reader(file.as_bytes(), "football.owl")?;
/// assert_eq!(graph.len(), 1);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone)]
pub struct GraphStore {
    store: Store,
    source: PathBuf,
    prefixes: Vec<(String, String)>,
    xml_base: Option<String>,
    ontology_iri: Option<NamedNode>,
    len: usize,
}

impl GraphStore {
    /// Parses the RDF/XML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ParseError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), path)
    }

    /// Parses RDF/XML from `reader`, `path` being used to resolve relative IRIs.
    pub fn from_reader(reader: impl Read, path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let start = Instant::now();
        let base = base_iri_for_path(path)?;
        let mut parser = RdfXmlParser::new()
            .with_base_iri(base.as_str())
            .map_err(|_| ParseError::InvalidPath {
                path: path.to_owned(),
            })?
            .for_reader(reader);

        let mut triples = Vec::new();
        let mut prefixes = Vec::<(String, String)>::new();
        let mut xml_base = None;
        while let Some(triple) = parser.next() {
            let triple = triple.map_err(|e| match e {
                RdfXmlParseError::Io(source) => ParseError::Io {
                    path: path.to_owned(),
                    source,
                },
                RdfXmlParseError::Syntax(source) => ParseError::Syntax {
                    path: path.to_owned(),
                    source,
                },
            })?;
            if triples.is_empty() {
                // Namespace declarations and xml:base are only visible while the root element is open
                for (name, iri) in parser.prefixes() {
                    if !prefixes.iter().any(|(n, _)| n == name) {
                        prefixes.push((name.to_owned(), iri.to_owned()));
                    }
                }
                xml_base = parser
                    .base_iri()
                    .filter(|iri| *iri != base.as_str())
                    .map(str::to_owned);
            }
            triples.push(triple);
        }

        let ontology_iri = triples.iter().find_map(|t| match &t.subject {
            NamedOrBlankNode::NamedNode(iri)
                if t.predicate == rdf::TYPE && t.object.as_ref() == TermRef::from(owl::ONTOLOGY) =>
            {
                Some(iri.clone())
            }
            _ => None,
        });

        let store = Store::new()?;
        store.extend(
            triples
                .into_iter()
                .map(|t| Quad::new(t.subject, t.predicate, t.object, GraphName::DefaultGraph)),
        )?;
        let len = store.len()?;
        info!(
            path = %path.display(),
            triples = len,
            elapsed_ms = start.elapsed().as_millis(),
            "ontology loaded"
        );
        if let Some(iri) = &ontology_iri {
            debug!(ontology = %iri, "ontology IRI declared");
        }
        Ok(Self {
            store,
            source: path.to_owned(),
            prefixes,
            xml_base,
            ontology_iri,
            len,
        })
    }

    /// Renders the graph in the given syntax.
    pub fn serialize(&self, format: RdfFormat) -> Result<String, SerializerError> {
        let mut serializer = RdfSerializer::from_format(format);
        // RDF/XML namespaces are declared by the serializer itself
        let prefixes = if format == RdfFormat::RdfXml {
            Vec::new()
        } else {
            self.query_prefixes()
        };
        for (name, iri) in prefixes {
            serializer = match serializer.clone().with_prefix(name, iri) {
                Ok(serializer) => serializer,
                Err(e) => {
                    warn!("Skipping the invalid prefix {name}: {e}");
                    serializer
                }
            };
        }
        let buffer = self
            .store
            .dump_graph_to_writer(GraphNameRef::DefaultGraph, serializer, Vec::new())?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// All the triples of the graph, in storage order.
    pub fn triples(&self) -> Result<Vec<Triple>, oxigraph::store::StorageError> {
        self.store
            .quads_for_pattern(None, None, None, Some(GraphNameRef::DefaultGraph))
            .map(|quad| quad.map(Triple::from))
            .collect()
    }

    #[inline]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[inline]
    pub fn source(&self) -> &Path {
        &self.source
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The IRI of the `owl:Ontology` declared in the file, if any.
    #[inline]
    pub fn ontology_iri(&self) -> Option<&NamedNode> {
        self.ontology_iri.as_ref()
    }

    /// The prefixes declared in the file, in declaration order.
    pub fn prefixes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes
            .iter()
            .map(|(name, iri)| (name.as_str(), iri.as_str()))
    }

    /// The namespace in which the classes of this ontology are most likely declared.
    ///
    /// It is derived from the ontology IRI or, failing that, from the document `xml:base`.
    pub fn namespace(&self) -> Option<String> {
        self.ontology_iri
            .as_ref()
            .map(NamedNode::as_str)
            .or(self.xml_base.as_deref())
            .map(namespace_from_iri)
    }

    /// The well-known vocabularies followed by the file prefixes, the latter taking precedence.
    pub(crate) fn query_prefixes(&self) -> Vec<(&str, &str)> {
        let mut prefixes: Vec<(&str, &str)> = WELL_KNOWN_PREFIXES.to_vec();
        for (name, iri) in self.prefixes() {
            if let Some(existing) = prefixes.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = iri;
            } else {
                prefixes.push((name, iri));
            }
        }
        prefixes
    }
}

/// Parses a format name the way file extensions and media types are written.
///
/// `owl` and `xml` are accepted as RDF/XML.
pub fn rdf_format_from_name(name: &str) -> Result<RdfFormat, PreconditionError> {
    let lower = name.trim().trim_start_matches('.').to_ascii_lowercase();
    if matches!(lower.as_str(), "owl" | "xml" | "rdfxml" | "rdf/xml") {
        return Ok(RdfFormat::RdfXml);
    }
    if lower == "turtle" {
        return Ok(RdfFormat::Turtle);
    }
    if lower == "ntriples" || lower == "n-triples" {
        return Ok(RdfFormat::NTriples);
    }
    RdfFormat::from_extension(&lower)
        .or_else(|| RdfFormat::from_media_type(&lower))
        .ok_or_else(|| PreconditionError::UnknownFormat(name.to_owned()))
}

/// Turns an ontology IRI into the namespace its terms are minted in.
pub fn namespace_from_iri(iri: &str) -> String {
    if iri.ends_with('#') || iri.ends_with('/') {
        iri.to_owned()
    } else {
        format!("{iri}#")
    }
}

fn base_iri_for_path(path: &Path) -> Result<Url, ParseError> {
    let absolute = if path.is_absolute() {
        path.to_owned()
    } else {
        std::env::current_dir()
            .map_err(|source| ParseError::Io {
                path: path.to_owned(),
                source,
            })?
            .join(path)
    };
    Url::from_file_path(&absolute).map_err(|()| ParseError::InvalidPath {
        path: path.to_owned(),
    })
}
