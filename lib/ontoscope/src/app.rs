//! The application state machine behind the interactive interface.
//!
//! [`App`] owns the loaded graph, the reasoned ontology, the class catalog and the text of the
//! output area. Every action reports its outcome as a [`Notification`] on top of its return
//! value, the way the desktop tool showed a dialog. Reasoning and SPARQL queries run in the
//! background: their completions are applied by [`App::poll`] or [`App::wait`].

use crate::catalog::{self, ClassCatalog};
use crate::config::AppConfig;
use crate::error::{ConfigError, Error, PreconditionError, QueryError};
use crate::query::{self, QueryResult};
use crate::reasoner::{self, ReasonedOntology, Reasoner, ReasoningOutcome};
use crate::render;
use crate::store::GraphStore;
use crate::task::{CancellationToken, Completion, TaskKind, TaskRunner};
use oxigraph::io::RdfFormat;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const LOAD_FAILED: &str = "Failed to load ontology: ";
const REASONING_FAILED: &str = "Failed to apply reasoner: ";
const QUERY_FAILED: &str = "Failed to execute query: ";
const SERIALIZATION_FAILED: &str = "Failed to serialize ontology: ";
const TRIPLES_FAILED: &str = "Failed to list triples: ";

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A message for the user about the outcome of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub title: String,
    pub message: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Where the application stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    NoGraphLoaded,
    GraphLoaded,
    /// A background job is in flight, whether a graph is loaded or not.
    Running(TaskKind),
}

/// What the output area currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Empty,
    Formatted(RdfFormat),
    Triples,
    ClassMembers(String),
    QueryResults,
    ReasonerLog,
    Inferences,
}

enum TaskOutput {
    Reasoning(ReasoningOutcome),
    Query {
        generation: u64,
        result: Result<QueryResult, QueryError>,
    },
}

/// The state of one interactive session.
pub struct App {
    config: AppConfig,
    reasoner: Arc<dyn Reasoner>,
    graph: Option<Arc<GraphStore>>,
    /// Bumped on each load so that the results of queries on a replaced graph are dropped.
    generation: u64,
    reasoned: Option<ReasonedOntology>,
    catalog: ClassCatalog,
    selected_class: Option<String>,
    query_text: String,
    output: String,
    output_revision: u64,
    view: View,
    notifications: VecDeque<Notification>,
    tasks: TaskRunner<TaskOutput>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            reasoner: config.reasoner()?,
            config,
            graph: None,
            generation: 0,
            reasoned: None,
            catalog: ClassCatalog::default(),
            selected_class: None,
            query_text: String::new(),
            output: String::new(),
            output_revision: 0,
            view: View::Empty,
            notifications: VecDeque::new(),
            tasks: TaskRunner::new(),
        })
    }

    /// Replaces the current graph with the content of the RDF/XML file at `path`.
    ///
    /// The class catalog is rebuilt and its first class is selected.
    /// On failure the previous graph stays loaded.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let (graph, catalog) = match Self::parse(path) {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.report(LOAD_FAILED, e)),
        };
        self.generation += 1;
        self.graph = Some(Arc::new(graph));
        self.catalog = catalog;
        self.selected_class = None;
        self.set_output(View::Empty, String::new());
        if let Some(first) = self.catalog.first().map(|e| e.name().to_owned()) {
            if let Err(e) = self.select_class(&first) {
                debug!("Unable to list the members of {first}: {e}");
            }
        }
        self.notify(Level::Info, "Success", "Ontology loaded successfully");
        Ok(())
    }

    fn parse(path: &Path) -> Result<(GraphStore, ClassCatalog), Error> {
        let graph = GraphStore::load(path)?;
        let catalog = ClassCatalog::build(&graph)?;
        Ok((graph, catalog))
    }

    /// Starts reasoning over the ontology file at `path`, independently of the loaded graph.
    pub fn apply_reasoner(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref().to_owned();
        let reasoner = Arc::clone(&self.reasoner);
        info!("Reasoning over {}", path.display());
        self.spawn(REASONING_FAILED, TaskKind::Reasoning, move |cancellation| {
            TaskOutput::Reasoning(reasoner::reason(reasoner.as_ref(), &path, cancellation))
        })
    }

    /// Shows the loaded graph serialized in `format`, or in the configured one if `None`.
    pub fn show_formatted_output(&mut self, format: Option<RdfFormat>) -> Result<(), Error> {
        let format = format.unwrap_or(self.config.format);
        let result = self
            .loaded_graph()
            .and_then(|graph| Ok(graph.serialize(format)?));
        match result {
            Ok(text) => {
                self.set_output(View::Formatted(format), text);
                Ok(())
            }
            Err(e) => Err(self.report(SERIALIZATION_FAILED, e)),
        }
    }

    /// Shows every triple of the loaded graph.
    pub fn show_triples(&mut self) -> Result<(), Error> {
        let result = self.loaded_graph().and_then(|graph| Ok(graph.triples()?));
        match result {
            Ok(triples) => {
                self.set_output(View::Triples, render::format_triples(&triples));
                Ok(())
            }
            Err(e) => Err(self.report(TRIPLES_FAILED, e)),
        }
    }

    /// Shows the triples entailed by the last successful reasoning.
    pub fn show_inferences(&mut self) -> Result<(), Error> {
        let Some(ontology) = &self.reasoned else {
            return Err(self.report("", PreconditionError::NothingReasoned.into()));
        };
        let text = render::format_inferences(ontology);
        self.set_output(View::Inferences, text);
        Ok(())
    }

    /// Selects a class by display name and shows its instances.
    pub fn select_class(&mut self, name: &str) -> Result<(), Error> {
        match self.class_members(name) {
            Ok(result) => {
                let name = name.trim().to_owned();
                self.selected_class = Some(name.clone());
                self.set_output(View::ClassMembers(name), render::format_results(&result));
                Ok(())
            }
            Err(e) => Err(self.report(QUERY_FAILED, e)),
        }
    }

    fn class_members(&self, name: &str) -> Result<QueryResult, Error> {
        if name.trim().is_empty() {
            return Err(PreconditionError::NoClassSelected.into());
        }
        let graph = self.loaded_graph()?;
        let classes = catalog::resolve_class(
            graph,
            &self.catalog,
            name,
            self.config.namespace.as_deref(),
        )?;
        Ok(catalog::members_of(
            graph,
            &classes,
            &CancellationToken::new(),
        )?)
    }

    pub fn set_query_text(&mut self, text: impl Into<String>) {
        self.query_text = text.into();
    }

    /// Starts evaluating the trimmed query text against the loaded graph.
    pub fn run_query(&mut self) -> Result<(), Error> {
        let query = self.query_text.trim().to_owned();
        let Some(graph) = self.graph.clone().filter(|_| !query.is_empty()) else {
            return Err(self.report(QUERY_FAILED, PreconditionError::QueryNotReady.into()));
        };
        let generation = self.generation;
        self.spawn(QUERY_FAILED, TaskKind::Query, move |cancellation| {
            TaskOutput::Query {
                generation,
                result: query::execute_cancellable(&graph, &query, cancellation),
            }
        })
    }

    /// Clears the query text and the output area. The graph stays loaded.
    pub fn reset(&mut self) {
        self.query_text.clear();
        self.set_output(View::Empty, String::new());
    }

    /// Asks the running background job to stop. Returns `false` if nothing is running.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.tasks.cancel();
        if cancelled {
            info!("Cancellation requested");
        }
        cancelled
    }

    /// Applies the outcome of the background job if it has ended.
    ///
    /// Returns `None` if no job ended, else the kind of the ended job and whether it succeeded.
    /// Failures have already been notified.
    pub fn poll(&mut self) -> Option<Result<TaskKind, Error>> {
        let (kind, completion) = self.tasks.try_complete()?;
        Some(self.complete(kind, completion))
    }

    /// Same as [`App::poll`] but blocks until the running job ends.
    pub fn wait(&mut self) -> Option<Result<TaskKind, Error>> {
        let (kind, completion) = self.tasks.wait()?;
        Some(self.complete(kind, completion))
    }

    fn complete(
        &mut self,
        kind: TaskKind,
        completion: Completion<TaskOutput>,
    ) -> Result<TaskKind, Error> {
        match completion {
            Completion::Finished(TaskOutput::Reasoning(ReasoningOutcome { result, log })) => {
                self.set_output(View::ReasonerLog, log);
                match result {
                    Ok(ontology) => {
                        self.reasoned = Some(ontology);
                        self.notify(Level::Info, "Success", "Reasoning applied successfully");
                    }
                    Err(e) => return Err(self.report(REASONING_FAILED, e.into())),
                }
            }
            Completion::Finished(TaskOutput::Query { generation, result }) => {
                if generation != self.generation {
                    debug!("Dropping the results of a query on a replaced graph");
                    return Ok(kind);
                }
                match result {
                    Ok(result) => {
                        self.set_output(View::QueryResults, render::format_results(&result));
                    }
                    Err(e) => return Err(self.report(QUERY_FAILED, e.into())),
                }
            }
            Completion::Crashed => {
                let context = match kind {
                    TaskKind::Reasoning => REASONING_FAILED,
                    TaskKind::Query => QUERY_FAILED,
                };
                return Err(self.report(context, Error::TaskCrashed(kind)));
            }
        }
        Ok(kind)
    }

    pub fn state(&self) -> AppState {
        if let Some(kind) = self.tasks.busy() {
            AppState::Running(kind)
        } else if self.graph.is_some() {
            AppState::GraphLoaded
        } else {
            AppState::NoGraphLoaded
        }
    }

    #[inline]
    pub fn view(&self) -> &View {
        &self.view
    }

    /// The text of the output area.
    #[inline]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Incremented each time the output area is rewritten.
    #[inline]
    pub fn output_revision(&self) -> u64 {
        self.output_revision
    }

    /// Removes and returns the pending notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    #[inline]
    pub fn graph(&self) -> Option<&GraphStore> {
        self.graph.as_deref()
    }

    #[inline]
    pub fn reasoned(&self) -> Option<&ReasonedOntology> {
        self.reasoned.as_ref()
    }

    #[inline]
    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    #[inline]
    pub fn selected_class(&self) -> Option<&str> {
        self.selected_class.as_deref()
    }

    #[inline]
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn loaded_graph(&self) -> Result<&GraphStore, Error> {
        Ok(self
            .graph
            .as_deref()
            .ok_or(PreconditionError::NoGraphLoaded)?)
    }

    fn spawn(
        &mut self,
        context: &str,
        kind: TaskKind,
        job: impl FnOnce(&CancellationToken) -> TaskOutput + Send + 'static,
    ) -> Result<(), Error> {
        self.tasks
            .spawn(kind, job)
            .map_err(|running| self.report(context, PreconditionError::Busy(running).into()))
    }

    fn set_output(&mut self, view: View, text: String) {
        self.view = view;
        self.output = text;
        self.output_revision += 1;
    }

    /// Notifies `error`, as a warning if it is a precondition failure.
    fn report(&mut self, context: &str, error: Error) -> Error {
        if let Error::Precondition(e) = &error {
            warn!("{e}");
            self.notify(Level::Warning, "Warning", e.to_string());
        } else {
            error!("{context}{error}");
            self.notify(Level::Error, "Error", format!("{context}{error}"));
        }
        error
    }

    fn notify(&mut self, level: Level, title: &str, message: impl Into<String>) {
        self.notifications.push_back(Notification {
            level,
            title: title.into(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use tempfile::TempDir;

    const TEAM: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns="http://example.org/team#"
     xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
     xmlns:rdfs="http://www.w3.org/2000/01/rdf-schema#"
     xmlns:owl="http://www.w3.org/2002/07/owl#">
    <owl:Ontology rdf:about="http://example.org/team"/>
    <owl:Class rdf:about="http://example.org/team#Player">
        <rdfs:subClassOf rdf:resource="http://example.org/team#Person"/>
    </owl:Class>
    <owl:Class rdf:about="http://example.org/team#Person"/>
    <Player rdf:about="http://example.org/team#Alice"/>
    <Player rdf:about="http://example.org/team#Bob"/>
</rdf:RDF>"#;

    fn fixture() -> Result<(TempDir, App), Box<dyn Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("team.owl"), TEAM)?;
        fs::write(dir.path().join("broken.owl"), "<rdf:RDF")?;
        Ok((dir, App::new(AppConfig::default())?))
    }

    fn levels(app: &mut App) -> Vec<Level> {
        app.take_notifications()
            .into_iter()
            .map(|n| n.level)
            .collect()
    }

    #[test]
    fn load_selects_the_first_class() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        assert_eq!(app.state(), AppState::NoGraphLoaded);
        app.load(dir.path().join("team.owl"))?;
        assert_eq!(app.state(), AppState::GraphLoaded);
        assert_eq!(app.catalog().names().collect::<Vec<_>>(), ["Player"]);
        assert_eq!(app.selected_class(), Some("Player"));
        assert_eq!(app.view(), &View::ClassMembers("Player".into()));
        assert!(app.output().contains("http://example.org/team#Alice"));
        assert!(app.output().contains("http://example.org/team#Bob"));
        let notifications = app.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].message, "Ontology loaded successfully");
        Ok(())
    }

    #[test]
    fn failed_load_keeps_the_previous_graph() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.take_notifications();
        assert!(app.load(dir.path().join("broken.owl")).is_err());
        let notifications = app.take_notifications();
        assert_eq!(notifications[0].level, Level::Error);
        assert!(
            notifications[0]
                .message
                .starts_with("Failed to load ontology: ")
        );
        assert_eq!(app.graph().map(GraphStore::len), Some(6));
        Ok(())
    }

    #[test]
    fn actions_without_a_graph_warn() -> Result<(), Box<dyn Error>> {
        let (_dir, mut app) = fixture()?;
        assert!(app.show_formatted_output(None).is_err());
        assert!(app.show_triples().is_err());
        assert!(app.select_class("Player").is_err());
        assert!(app.select_class("").is_err());
        app.set_query_text("SELECT * WHERE { ?s ?p ?o }");
        assert!(matches!(
            app.run_query(),
            Err(crate::error::Error::Precondition(PreconditionError::QueryNotReady))
        ));
        assert!(app.show_inferences().is_err());
        let messages = app
            .take_notifications()
            .into_iter()
            .map(|n| (n.level, n.message))
            .collect::<Vec<_>>();
        assert_eq!(
            messages,
            [
                (Level::Warning, "Load an ontology first".to_owned()),
                (Level::Warning, "Load an ontology first".to_owned()),
                (Level::Warning, "Load an ontology first".to_owned()),
                (Level::Warning, "No class selected.".to_owned()),
                (
                    Level::Warning,
                    "Load an ontology and enter a query first".to_owned()
                ),
                (Level::Warning, "Apply the reasoner first".to_owned()),
            ]
        );
        assert_eq!(app.state(), AppState::NoGraphLoaded);
        Ok(())
    }

    #[test]
    fn blank_query_is_refused() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.take_notifications();
        app.set_query_text(" \n\t ");
        assert!(matches!(
            app.run_query(),
            Err(crate::error::Error::Precondition(PreconditionError::QueryNotReady))
        ));
        assert_eq!(app.state(), AppState::GraphLoaded);
        assert_eq!(levels(&mut app), [Level::Warning]);
        Ok(())
    }

    #[test]
    fn query_runs_in_the_background() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.set_query_text("SELECT ?p WHERE { ?p a :Player } ORDER BY ?p");
        app.run_query()?;
        assert_eq!(app.wait().transpose()?, Some(TaskKind::Query));
        assert_eq!(app.view(), &View::QueryResults);
        assert!(app.output().ends_with(
            "http://example.org/team#Alice\t\nhttp://example.org/team#Bob  \t\n"
        ));
        app.set_query_text("SELECT WHERE");
        app.run_query()?;
        assert!(app.wait().is_some_and(|r| r.is_err()));
        let last = app.take_notifications().pop();
        assert!(last.is_some_and(|n| n.message.starts_with("Failed to execute query: ")));
        Ok(())
    }

    #[test]
    fn reload_drops_pending_query_results() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.set_query_text("SELECT * WHERE { ?s ?p ?o }");
        app.run_query()?;
        app.load(dir.path().join("team.owl"))?;
        let revision = app.output_revision();
        assert_eq!(app.wait().transpose()?, Some(TaskKind::Query));
        assert_eq!(app.output_revision(), revision);
        assert_eq!(app.view(), &View::ClassMembers("Player".into()));
        Ok(())
    }

    #[test]
    fn reasoning_keeps_its_own_ontology() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.take_notifications();
        app.apply_reasoner(dir.path().join("team.owl"))?;
        assert_eq!(app.state(), AppState::Running(TaskKind::Reasoning));
        app.set_query_text("ASK { ?s ?p ?o }");
        assert!(matches!(
            app.run_query(),
            Err(crate::error::Error::Precondition(PreconditionError::Busy(
                TaskKind::Reasoning
            )))
        ));
        assert_eq!(app.wait().transpose()?, Some(TaskKind::Reasoning));
        assert_eq!(app.view(), &View::ReasonerLog);
        assert!(app.output().contains("Round 1"), "{}", app.output());
        assert_eq!(levels(&mut app), [Level::Warning, Level::Info]);
        assert_eq!(app.reasoned().map(|o| o.inferred().len()), Some(2));
        assert_eq!(app.graph().map(GraphStore::len), Some(6));
        app.show_inferences()?;
        assert!(app.output().contains("Object : http://example.org/team#Person"));
        Ok(())
    }

    #[test]
    fn failed_reasoning_shows_its_log() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.apply_reasoner(dir.path().join("broken.owl"))?;
        assert!(app.wait().is_some_and(|r| r.is_err()));
        assert_eq!(app.view(), &View::ReasonerLog);
        assert!(app.output().contains("Running the built-in OWL 2 RL reasoner"));
        let notifications = app.take_notifications();
        assert!(
            notifications[0]
                .message
                .starts_with("Failed to apply reasoner: ")
        );
        assert!(app.reasoned().is_none());
        Ok(())
    }

    #[test]
    fn reset_keeps_the_graph() -> Result<(), Box<dyn Error>> {
        let (dir, mut app) = fixture()?;
        app.load(dir.path().join("team.owl"))?;
        app.set_query_text("ASK {}");
        app.show_formatted_output(None)?;
        assert_eq!(app.view(), &View::Formatted(RdfFormat::Turtle));
        assert!(app.output().contains(":Alice a :Player"), "{}", app.output());
        app.reset();
        assert_eq!(app.output(), "");
        assert_eq!(app.query_text(), "");
        assert_eq!(app.state(), AppState::GraphLoaded);
        Ok(())
    }
}
