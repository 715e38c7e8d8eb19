use clap::{Parser, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "ontoscope")]
/// Interactive shell to load OWL ontologies, run a reasoner over them and query them with SPARQL
pub struct Args {
    /// RDF/XML ontology file to load at startup
    #[arg(value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
    /// Namespace used to resolve class names that are not listed in the class catalog
    ///
    /// By default the namespace of the loaded ontology is used.
    #[arg(long, value_hint = ValueHint::Url)]
    pub namespace: Option<String>,
    /// Command line of an external reasoner
    ///
    /// `{input}` is replaced by the ontology file and `{output}` by a file the reasoner
    /// should write the inferred ontology to in RDF/XML,
    /// e.g. `robot reason --input {input} --output {output}`.
    /// The built-in OWL 2 RL reasoner is used if this option is not set.
    #[arg(long, value_name = "TEMPLATE")]
    pub reasoner_command: Option<String>,
    /// Maximal duration of a reasoning, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub reasoner_timeout: Option<f64>,
    /// Maximal number of rounds of the built-in reasoner
    #[arg(long, default_value_t = 1000)]
    pub max_iterations: usize,
    /// Format of the `show` command output
    ///
    /// Can be a name like "turtle", an extension like "nt" or a MIME type like "application/n-triples".
    #[arg(long, default_value = "turtle")]
    pub format: String,
    /// Format of the diagnostic messages written on stderr
    ///
    /// Their verbosity is set with the `RUST_LOG` environment variable.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
