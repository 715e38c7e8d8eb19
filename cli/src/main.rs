use crate::cli::{Args, LogFormat};
use crate::shell::{COMMANDS, Flow, Shell};
use anyhow::{Context as _, anyhow};
use clap::Parser;
use ontoscope::store::rdf_format_from_name;
use ontoscope::{App, AppConfig};
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::io::{self, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;
mod shell;

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;
    let mut shell = Shell::new(App::new(config(&args)?)?);
    let mut out = io::stdout();

    if let Some(file) = &args.file {
        shell.load(file, &mut out)?;
    }

    let mut editor = Editor::<ShellHelper, DefaultHistory>::new()
        .map_err(|e| anyhow!("Failed to initialize the line editor: {e}"))?;
    editor.set_helper(Some(ShellHelper::default()));
    writeln!(out, "Type 'help' for the list of commands")?;
    loop {
        if let Some(helper) = editor.helper_mut() {
            helper.classes = shell.app().catalog().names().map(str::to_owned).collect();
        }
        let line = match editor.readline(shell.prompt()) {
            Ok(line) => line,
            Err(ReadlineError::Eof) => break,
            Err(ReadlineError::Interrupted) => {
                if shell.interrupt() {
                    writeln!(out, "Cancelling...")?;
                }
                continue;
            }
            Err(e) => return Err(anyhow!("Failed to read the command line: {e}")),
        };
        if !line.trim().is_empty() {
            editor
                .add_history_entry(line.as_str())
                .map_err(|e| anyhow!("Failed to record history: {e}"))?;
        }
        if shell.handle_line(&line, &mut out)? == Flow::Quit {
            break;
        }
    }
    shell.finish(&mut out)?;
    Ok(())
}

fn config(args: &Args) -> anyhow::Result<AppConfig> {
    let reasoner_timeout = args
        .reasoner_timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("Invalid reasoner timeout")?;
    Ok(AppConfig {
        namespace: args.namespace.clone(),
        reasoner_command: args.reasoner_command.clone(),
        reasoner_timeout,
        max_iterations: args.max_iterations,
        format: rdf_format_from_name(&args.format)?,
    })
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}

/// Completes command names, file paths and class names.
#[derive(Default)]
struct ShellHelper {
    files: FilenameCompleter,
    classes: Vec<String>,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let before = line.get(..pos).unwrap_or(line);
        let Some((command, argument)) = before.split_once(char::is_whitespace) else {
            return Ok((0, candidates(COMMANDS.iter().copied(), before)));
        };
        match command {
            "load" | "reason" => self.files.complete(line, pos, ctx),
            "select" => {
                let argument = argument.trim_start();
                Ok((
                    pos - argument.len(),
                    candidates(self.classes.iter().map(String::as_str), argument),
                ))
            }
            _ => Ok((pos, Vec::new())),
        }
    }
}

fn candidates<'a>(values: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<Pair> {
    values
        .filter(|value| value.starts_with(prefix))
        .map(|value| Pair {
            display: value.to_owned(),
            replacement: value.to_owned(),
        })
        .collect()
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}
