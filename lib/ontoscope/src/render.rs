//! Plain text layouts of the output area.

use crate::catalog::ClassCatalog;
use crate::query::{QueryResult, term_text};
use crate::reasoner::ReasonedOntology;
use oxigraph::model::Triple;
use std::fmt::{self, Write};

const URI_HEADER: &str = "URI";
const LITERAL_HEADER: &str = "Literal";

/// Lays out query results as a two column table.
///
/// The first cell of each row is padded to the widest one, the second one follows a tab.
/// Cells after the second are appended tab separated, under their variable name.
///
/// ```
/// use ontoscope::query::QueryResult;
/// use ontoscope::render::format_results;
///
/// let result = QueryResult::new(
///     vec!["s".into(), "label".into()],
///     vec![vec![Some("http://ex.org/Alice".into()), Some("Alice".into())]],
/// );
/// assert_eq!(
///     format_results(&result),
///     "URI                \tLiteral\n-------------------\t-------\nhttp://ex.org/Alice\tAlice\n"
/// );
/// ```
pub fn format_results(result: &QueryResult) -> String {
    if result.is_empty() {
        return "No results found.\n".into();
    }
    let width = result
        .rows()
        .iter()
        .map(|row| cell(row, 0).chars().count())
        .max()
        .unwrap_or_default();
    let extra_columns = result.columns().get(2..).unwrap_or_default();

    let mut output = String::new();
    push_padded(&mut output, URI_HEADER, width);
    output.push('\t');
    output.push_str(LITERAL_HEADER);
    for column in extra_columns {
        output.push('\t');
        output.push_str(column);
    }
    output.push('\n');
    output.push_str(&"-".repeat(width));
    output.push('\t');
    output.push_str(&"-".repeat(LITERAL_HEADER.len()));
    for column in extra_columns {
        output.push('\t');
        output.push_str(&"-".repeat(column.chars().count()));
    }
    output.push('\n');

    for row in result.rows() {
        push_padded(&mut output, cell(row, 0), width);
        output.push('\t');
        output.push_str(cell(row, 1));
        for value in row.iter().skip(2) {
            output.push('\t');
            output.push_str(value.as_deref().unwrap_or_default());
        }
        output.push('\n');
    }
    output
}

/// One `Subject : s --> Predicate : p --> Object : o` paragraph per triple.
pub fn format_triples<'a>(triples: impl IntoIterator<Item = &'a Triple>) -> String {
    let mut output = String::new();
    for triple in triples {
        let _: fmt::Result = write!(
            output,
            "Subject : {} --> Predicate : {} --> Object : {}\n\n",
            term_text(&triple.subject.clone().into()),
            triple.predicate.as_str(),
            term_text(&triple.object)
        );
    }
    output
}

/// The display names of the catalog, one per line, the selected one marked with `*`.
pub fn format_catalog(catalog: &ClassCatalog, selected: Option<&str>) -> String {
    if catalog.is_empty() {
        return "No class with instances.\n".into();
    }
    let mut output = String::new();
    for entry in catalog.entries() {
        output.push_str(if Some(entry.name()) == selected {
            "* "
        } else {
            "  "
        });
        output.push_str(entry.name());
        if entry.iris().len() > 1 {
            let _: fmt::Result = write!(output, " ({} classes)", entry.iris().len());
        }
        output.push('\n');
    }
    output
}

/// A summary line followed by the inferred triples.
pub fn format_inferences(ontology: &ReasonedOntology) -> String {
    let mut output = format!("{ontology}\n\n");
    if ontology.inferred().is_empty() {
        output.push_str("Nothing has been inferred.\n");
    } else {
        output.push_str(&format_triples(ontology.inferred()));
    }
    output
}

fn cell(row: &[Option<String>], i: usize) -> &str {
    row.get(i).and_then(Option::as_deref).unwrap_or_default()
}

fn push_padded(output: &mut String, value: &str, width: usize) {
    output.push_str(value);
    for _ in value.chars().count()..width {
        output.push(' ');
    }
}
