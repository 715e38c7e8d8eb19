//! Delegation to a reasoner program like HermiT, Pellet or ROBOT.

use crate::capture::DiagnosticLog;
use crate::error::{ConfigError, ReasoningError, ReasoningErrorKind};
use crate::reasoner::{ReasonedOntology, Reasoner};
use crate::store::GraphStore;
use crate::task::CancellationToken;
use oxigraph::model::Triple;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use rustc_hash::FxHashSet;
use std::io::{self, BufRead, BufReader, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, warn};

const INPUT: &str = "{input}";
const OUTPUT: &str = "{output}";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs a reasoner program on the ontology file.
///
/// The command is a whitespace separated template in which `{input}` is replaced by the
/// ontology path and `{output}`, if present, by the path of a file the program must write the
/// inferred ontology to, in RDF/XML. Without `{output}` only consistency is checked.
///
/// Everything the program prints is added to the diagnostic log.
/// A failure exit status is reported as an inconsistency if the program output mentions one.
/// On Unix the program gets its own process group, killed as a whole on timeout or cancellation.
///
/// ```
/// use ontoscope::reasoner::ExternalReasoner;
///
/// let reasoner = ExternalReasoner::from_template(
///     "robot reason --reasoner hermit --input {input} --output {output}",
/// )?;
/// assert_eq!(reasoner.program(), "robot");
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Debug, Clone)]
pub struct ExternalReasoner {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ExternalReasoner {
    pub fn from_template(template: &str) -> Result<Self, ConfigError> {
        let mut parts = template.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or(ConfigError::EmptyReasonerCommand)?;
        let args = parts.collect::<Vec<_>>();
        if !args.iter().any(|arg| arg.contains(INPUT)) {
            return Err(ConfigError::MissingInputPlaceholder);
        }
        Ok(Self {
            program,
            args,
            timeout: None,
        })
    }

    /// Kills the program if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn writes_output(&self) -> bool {
        self.args.iter().any(|arg| arg.contains(OUTPUT))
    }

    fn wait(
        &self,
        child: &mut Child,
        cancellation: &CancellationToken,
    ) -> Result<ExitStatus, ReasoningError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => (),
                Err(e) => {
                    kill(child);
                    return Err(ReasoningError::new(
                        ReasoningErrorKind::Internal,
                        format!("Unable to wait for {}: {e}", self.program),
                    ));
                }
            }
            if cancellation.is_cancelled() {
                kill(child);
                return Err(ReasoningError::cancelled());
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    kill(child);
                    return Err(ReasoningError::new(
                        ReasoningErrorKind::Timeout,
                        format!(
                            "{} did not finish within {:.1}s",
                            self.program,
                            timeout.as_secs_f64()
                        ),
                    ));
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Reasoner for ExternalReasoner {
    fn name(&self) -> &str {
        &self.program
    }

    fn reason(
        &self,
        path: &Path,
        log: &DiagnosticLog,
        cancellation: &CancellationToken,
    ) -> Result<ReasonedOntology, ReasoningError> {
        let graph = GraphStore::load(path)?;
        let asserted = graph.triples()?;

        let output = if self.writes_output() {
            Some(
                tempfile::Builder::new()
                    .prefix("ontoscope-")
                    .suffix(".owl")
                    .tempfile()
                    .map_err(|e| {
                        ReasoningError::new(
                            ReasoningErrorKind::Internal,
                            format!("Unable to create the reasoner output file: {e}"),
                        )
                    })?,
            )
        } else {
            None
        };
        let input_path = path.to_string_lossy();
        let output_path = output.as_ref().map(|file| file.path().to_string_lossy());
        let args = self
            .args
            .iter()
            .map(|arg| {
                let arg = arg.replace(INPUT, &input_path);
                match &output_path {
                    Some(output_path) => arg.replace(OUTPUT, output_path),
                    None => arg,
                }
            })
            .collect::<Vec<_>>();

        info!("Starting {} {}", self.program, args.join(" "));
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    ReasoningError::new(
                        ReasoningErrorKind::BackendMissing,
                        format!("The reasoner program {} was not found", self.program),
                    )
                } else {
                    ReasoningError::new(
                        ReasoningErrorKind::BackendFailed,
                        format!("Unable to start {}: {e}", self.program),
                    )
                }
            })?;
        // Only what the program printed, the log also holds our own events
        let printed = DiagnosticLog::new();
        let readers = [
            child
                .stdout
                .take()
                .map(|s| forward(s, log.clone(), printed.clone())),
            child
                .stderr
                .take()
                .map(|s| forward(s, log.clone(), printed.clone())),
        ];
        let status = self.wait(&mut child, cancellation);
        for reader in readers.into_iter().flatten() {
            if reader.join().is_err() {
                warn!("The {} output reader panicked", self.program);
            }
        }
        let status = status?;
        if !status.success() {
            return Err(
                if printed.contents().to_ascii_lowercase().contains("inconsistent") {
                    ReasoningError::inconsistent(format!(
                        "{} reported an inconsistent ontology",
                        self.program
                    ))
                } else {
                    ReasoningError::new(
                        ReasoningErrorKind::BackendFailed,
                        format!("{} failed ({status})", self.program),
                    )
                },
            );
        }

        let inferred = match &output {
            Some(file) => entailed_triples(file, &asserted)?,
            None => Vec::new(),
        };
        Ok(ReasonedOntology::new(
            path,
            graph.ontology_iri().cloned(),
            asserted,
            inferred,
        )?)
    }
}

/// The triples of the reasoner output that are not asserted.
fn entailed_triples(
    output: &NamedTempFile,
    asserted: &[Triple],
) -> Result<Vec<Triple>, ReasoningError> {
    let entailed = GraphStore::load(output.path())
        .map_err(|e| {
            ReasoningError::new(
                ReasoningErrorKind::Parse,
                format!("Unable to read the reasoner output: {e}"),
            )
        })?
        .triples()?;
    let asserted = asserted.iter().collect::<FxHashSet<_>>();
    Ok(entailed
        .into_iter()
        .filter(|triple| !asserted.contains(triple))
        .collect())
}

fn forward(
    stream: impl Read + Send + 'static,
    log: DiagnosticLog,
    printed: DiagnosticLog,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            log.append_line(&line);
            printed.append_line(&line);
        }
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = terminate(child) {
        warn!("Unable to kill the reasoner process: {e}");
    }
    if let Err(e) = child.wait() {
        warn!("Unable to reap the reasoner process: {e}");
    }
}

/// Kills the program together with the processes it started.
#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    let group = i32::try_from(child.id()).map_err(io::Error::other)?;
    killpg(Pid::from_raw(group), Signal::SIGKILL)?;
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

#[cfg(test)]
#[cfg(unix)]
#[allow(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TEAM: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="http://example.org/team#Alice">
        <rdf:type rdf:resource="http://example.org/team#Player"/>
    </rdf:Description>
</rdf:RDF>"#;

    const TEAM_REASONED: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="http://example.org/team#Alice">
        <rdf:type rdf:resource="http://example.org/team#Player"/>
        <rdf:type rdf:resource="http://example.org/team#Person"/>
    </rdf:Description>
</rdf:RDF>"#;

    struct Fixture {
        dir: TempDir,
        input: PathBuf,
    }

    impl Fixture {
        fn new() -> Result<Self, Box<dyn Error>> {
            Self::named("team.owl")
        }

        fn named(file_name: &str) -> Result<Self, Box<dyn Error>> {
            let dir = TempDir::new()?;
            let input = dir.path().join(file_name);
            fs::write(&input, TEAM)?;
            Ok(Self { dir, input })
        }

        /// A template running `script` with `sh`, followed by `args`.
        fn template(&self, script: &str, args: &str) -> Result<String, Box<dyn Error>> {
            let path = self.dir.path().join("reasoner.sh");
            fs::write(&path, script)?;
            Ok(format!("sh {} {args}", path.display()))
        }

        fn run(
            &self,
            reasoner: &ExternalReasoner,
            cancellation: &CancellationToken,
        ) -> (Result<ReasonedOntology, ReasoningError>, String) {
            let log = DiagnosticLog::new();
            let result = reasoner.reason(&self.input, &log, cancellation);
            (result, log.contents())
        }
    }

    #[test]
    fn template_validation() {
        assert!(matches!(
            ExternalReasoner::from_template("  "),
            Err(ConfigError::EmptyReasonerCommand)
        ));
        assert!(matches!(
            ExternalReasoner::from_template("hermit --output {output}"),
            Err(ConfigError::MissingInputPlaceholder)
        ));
    }

    #[test]
    fn output_file_is_merged() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        let script = format!("echo \"classifying $1\"\ncat > \"$2\" <<'EOF'\n{TEAM_REASONED}\nEOF\n");
        let reasoner =
            ExternalReasoner::from_template(&fixture.template(&script, "{input} {output}")?)?;
        let (result, log) = fixture.run(&reasoner, &CancellationToken::new());
        let ontology = result?;
        assert_eq!(ontology.asserted_len(), 1);
        assert_eq!(ontology.inferred().len(), 1);
        assert_eq!(
            ontology.inferred()[0].object.to_string(),
            "<http://example.org/team#Person>"
        );
        assert!(log.contains("classifying"), "{log}");
        Ok(())
    }

    #[test]
    fn inconsistency_is_detected_from_the_output() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        let script = "echo 'Loading ontology'\necho 'Ontology is inconsistent' >&2\nexit 1\n";
        let reasoner = ExternalReasoner::from_template(&fixture.template(script, "{input}")?)?;
        let (result, log) = fixture.run(&reasoner, &CancellationToken::new());
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Inconsistent));
        assert!(log.contains("Loading ontology"), "{log}");
        assert!(log.contains("Ontology is inconsistent"), "{log}");
        Ok(())
    }

    #[test]
    fn failure_status_is_reported() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        let reasoner =
            ExternalReasoner::from_template(&fixture.template("echo boom >&2\nexit 3\n", "{input}")?)?;
        let (result, log) = fixture.run(&reasoner, &CancellationToken::new());
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::BackendFailed));
        assert!(log.contains("boom"), "{log}");
        Ok(())
    }

    #[test]
    fn missing_program() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        let reasoner = ExternalReasoner::from_template("ontoscope-no-such-reasoner {input}")?;
        let (result, _) = fixture.run(&reasoner, &CancellationToken::new());
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::BackendMissing));
        Ok(())
    }

    #[test]
    fn slow_program_is_killed() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        let reasoner =
            ExternalReasoner::from_template(&fixture.template("exec sleep 30\n", "{input}")?)?
                .with_timeout(Some(Duration::from_millis(100)));
        let start = Instant::now();
        let (result, _) = fixture.run(&reasoner, &CancellationToken::new());
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Timeout));
        assert!(start.elapsed() < Duration::from_secs(20));

        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let (result, _) = fixture.run(&reasoner, &cancellation);
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Cancelled));
        Ok(())
    }

    #[test]
    fn started_processes_are_killed_with_the_program() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::new()?;
        // The shell forks sleep and keeps the output pipes open until it exits
        let reasoner = ExternalReasoner::from_template(
            &fixture.template("sleep 30
echo done
", "{input}")?,
        )?
        .with_timeout(Some(Duration::from_millis(100)));
        let start = Instant::now();
        let (result, log) = fixture.run(&reasoner, &CancellationToken::new());
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Timeout));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!log.contains("done"), "{log}");

        let reasoner = reasoner.with_timeout(None);
        let cancellation = CancellationToken::new();
        let canceller = {
            let cancellation = cancellation.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancellation.cancel();
            })
        };
        let start = Instant::now();
        let (result, _) = fixture.run(&reasoner, &cancellation);
        canceller.join().map_err(|_| "the canceller panicked")?;
        assert!(matches!(result, Err(e) if e.kind() == ReasoningErrorKind::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn file_name_does_not_make_a_failure_an_inconsistency() -> Result<(), Box<dyn Error>> {
        let fixture = Fixture::named("inconsistent-draft.owl")?;
        let reasoner = ExternalReasoner::from_template(
            &fixture.template("echo 'out of memory' >&2\nexit 2\n", "{input}")?,
        )?;
        let outcome = crate::reasoner::reason(&reasoner, &fixture.input, &CancellationToken::new());
        let Err(error) = outcome.result else {
            unreachable!("the program always fails")
        };
        assert_eq!(error.kind(), ReasoningErrorKind::BackendFailed);
        assert!(outcome.log.contains("inconsistent-draft.owl"), "{}", outcome.log);
        assert!(outcome.log.contains("out of memory"), "{}", outcome.log);
        Ok(())
    }
}
