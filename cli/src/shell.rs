//! Line oriented front end of [`App`].
//!
//! Each command stands for a button of the desktop tool. The output area is printed every time
//! it changes and notifications are printed as `[level] title: message` lines.
//!
//! Background jobs are polled whenever a line is entered, so the outcome of a job shows up with
//! the next command or with `wait`. `quit` cancels the running job while the end of the input
//! waits for it.

use ontoscope::render::format_catalog;
use ontoscope::store::rdf_format_from_name;
use ontoscope::task::TaskKind;
use ontoscope::{App, AppState, Notification};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const COMMANDS: &[&str] = &[
    "load", "reason", "show", "triples", "classes", "select", "query", "inferred", "reset",
    "status", "wait", "cancel", "help", "quit",
];

const HELP: &str = "\
load <file>       Load an RDF/XML ontology
reason [file]     Run the reasoner on an ontology file, the loaded one by default
show [format]     Show the loaded graph serialized (turtle, nt, nq, trig, n3, xml)
triples           List every triple of the loaded graph
classes           List the classes that have instances
select <class>    Show the instances of a class
query [sparql]    Run a SPARQL query, read until an empty line if not given inline
inferred          Show the triples inferred by the last reasoning
reset             Clear the query and the output
status            Show what is loaded and what is running
wait              Wait for the running reasoning or query
cancel            Cancel the running reasoning or query
help              Show this message
quit              Cancel the running job and leave
";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(PathBuf),
    Reason(Option<PathBuf>),
    Show(Option<String>),
    Triples,
    Classes,
    Select(String),
    Query(Option<String>),
    Inferred,
    Reset,
    Status,
    Wait,
    Cancel,
    Help,
    Quit,
}

impl Command {
    /// Parses a line. Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (name, argument) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, argument)| (name, argument.trim()));
        let argument = (!argument.is_empty()).then(|| argument.to_owned());
        let command = match (name.to_ascii_lowercase().as_str(), argument) {
            ("load", Some(path)) => Self::Load(path.into()),
            ("load", None) => return Err("Usage: load <file>".into()),
            ("reason", path) => Self::Reason(path.map(PathBuf::from)),
            ("show", format) => Self::Show(format),
            ("select", Some(class)) => Self::Select(class),
            ("select", None) => Self::Select(String::new()),
            ("query", query) => Self::Query(query),
            ("triples", None) => Self::Triples,
            ("classes", None) => Self::Classes,
            ("inferred", None) => Self::Inferred,
            ("reset", None) => Self::Reset,
            ("status", None) => Self::Status,
            ("wait", None) => Self::Wait,
            ("cancel", None) => Self::Cancel,
            ("help" | "?", None) => Self::Help,
            ("quit" | "exit", None) => Self::Quit,
            (name, Some(_)) if COMMANDS.contains(&name) => {
                return Err(format!("The {name} command takes no argument"));
            }
            (name, _) => {
                return Err(format!(
                    "Unknown command '{name}', type 'help' for the list of commands"
                ));
            }
        };
        Ok(Some(command))
    }
}

/// Whether the shell should keep reading lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    app: App,
    pending_query: Option<String>,
    shown_revision: u64,
}

impl Shell {
    pub fn new(app: App) -> Self {
        Self {
            shown_revision: app.output_revision(),
            app,
            pending_query: None,
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn prompt(&self) -> &'static str {
        if self.pending_query.is_some() {
            "...> "
        } else {
            "ontoscope> "
        }
    }

    /// Handles one input line and prints what changed.
    pub fn handle_line(&mut self, line: &str, out: &mut impl Write) -> io::Result<Flow> {
        if let Some(query) = &mut self.pending_query {
            if !line.trim().is_empty() {
                query.push_str(line);
                query.push('\n');
                return Ok(Flow::Continue);
            }
            let query = self.pending_query.take().unwrap_or_default();
            self.start_query(query);
            self.refresh(out)?;
            return Ok(Flow::Continue);
        }
        let flow = match Command::parse(line) {
            Ok(Some(command)) => self.execute(command, out)?,
            Ok(None) => Flow::Continue,
            Err(message) => {
                print_warning(out, &message)?;
                Flow::Continue
            }
        };
        self.refresh(out)?;
        Ok(flow)
    }

    /// Loads a file outside of any command line, e.g. at startup.
    pub fn load(&mut self, path: &Path, out: &mut impl Write) -> io::Result<()> {
        notified(self.app.load(path));
        self.refresh(out)
    }

    fn execute(&mut self, command: Command, out: &mut impl Write) -> io::Result<Flow> {
        match command {
            Command::Load(path) => {
                notified(self.app.load(&path));
            }
            Command::Reason(path) => {
                let path = path.or_else(|| self.app.graph().map(|g| g.source().to_owned()));
                match path {
                    Some(path) => {
                        notified(self.app.apply_reasoner(path));
                    }
                    None => print_warning(out, "Usage: reason <file>, or load an ontology first")?,
                }
            }
            Command::Show(format) => match format.as_deref().map(rdf_format_from_name) {
                Some(Err(e)) => print_warning(out, &e.to_string())?,
                Some(Ok(format)) => {
                    notified(self.app.show_formatted_output(Some(format)));
                }
                None => {
                    notified(self.app.show_formatted_output(None));
                }
            },
            Command::Triples => {
                notified(self.app.show_triples());
            }
            Command::Classes => {
                if self.app.graph().is_some() {
                    out.write_all(
                        format_catalog(self.app.catalog(), self.app.selected_class()).as_bytes(),
                    )?;
                } else {
                    print_warning(out, "Load an ontology first")?;
                }
            }
            Command::Select(class) => {
                notified(self.app.select_class(&class));
            }
            Command::Query(Some(query)) => self.start_query(query),
            Command::Query(None) => self.pending_query = Some(String::new()),
            Command::Inferred => {
                notified(self.app.show_inferences());
            }
            Command::Reset => self.app.reset(),
            Command::Status => self.print_status(out)?,
            Command::Wait => {
                if self.app.wait().is_none() {
                    writeln!(out, "Nothing is running")?;
                }
            }
            Command::Cancel => {
                if !self.app.cancel() {
                    writeln!(out, "Nothing is running")?;
                }
            }
            Command::Help => out.write_all(HELP.as_bytes())?,
            Command::Quit => {
                if self.app.cancel() {
                    writeln!(out, "Cancelling...")?;
                }
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    fn start_query(&mut self, query: String) {
        self.app.set_query_text(query);
        notified(self.app.run_query());
    }

    /// Applies finished background jobs, then prints the new notifications and output.
    pub fn refresh(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.app.poll();
        for notification in self.app.take_notifications() {
            print_notification(out, &notification)?;
        }
        if self.app.output_revision() != self.shown_revision {
            self.shown_revision = self.app.output_revision();
            out.write_all(self.app.output().as_bytes())?;
            if !self.app.output().is_empty() && !self.app.output().ends_with('\n') {
                writeln!(out)?;
            }
        }
        out.flush()
    }

    /// Waits for the running job, if any, and prints its outcome.
    pub fn finish(&mut self, out: &mut impl Write) -> io::Result<()> {
        self.app.wait();
        self.refresh(out)
    }

    /// Requests the cancellation of the running job. Returns `false` if nothing is running.
    pub fn interrupt(&mut self) -> bool {
        self.pending_query = None;
        self.app.cancel()
    }

    fn print_status(&self, out: &mut impl Write) -> io::Result<()> {
        match self.app.graph() {
            Some(graph) => writeln!(
                out,
                "Loaded: {} ({} triples, {} classes with instances)",
                graph.source().display(),
                graph.len(),
                self.app.catalog().len()
            )?,
            None => writeln!(out, "Loaded: nothing")?,
        }
        if let Some(class) = self.app.selected_class() {
            writeln!(out, "Selected class: {class}")?;
        }
        if let Some(reasoned) = self.app.reasoned() {
            writeln!(out, "Reasoned: {reasoned}")?;
        }
        match self.app.state() {
            AppState::Running(TaskKind::Reasoning) => writeln!(out, "Running: reasoning"),
            AppState::Running(TaskKind::Query) => writeln!(out, "Running: query"),
            AppState::GraphLoaded | AppState::NoGraphLoaded => writeln!(out, "Running: nothing"),
        }
    }
}

fn print_notification(out: &mut impl Write, notification: &Notification) -> io::Result<()> {
    writeln!(out, "[{}] {notification}", notification.level)
}

fn print_warning(out: &mut impl Write, message: &str) -> io::Result<()> {
    writeln!(out, "[warning] Warning: {message}")
}

/// The application has already turned the failure into a notification.
fn notified(result: Result<(), ontoscope::Error>) {
    if let Err(e) = result {
        tracing::debug!("{e}");
    }
}
