//! Command-line front end for querying store snapshots.
#![forbid(unsafe_code)]

mod repl;
mod ui;

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use qdb::cli::{render_keys, render_text, CliConfig, ConfigError, OutputFormat, Theme};
use qdb::query::{QueryEngine, QueryError, QueryOutput};
use qdb::store::{MemStore, SnapshotError, Store, StoreSnapshot};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::ui::Ui;

#[derive(Parser, Debug)]
#[command(
    name = "qdb",
    version,
    about = "Query an indexed record store snapshot",
    after_help = "Commands:\n  query <root> [expr...]   print the result tree (default)\n  \
                  keys <root> [expr...]    print the resolved root keys\n  \
                  indexes                  list indexes with record counts"
)]
struct Cli {
    #[arg(value_name = "DATABASE", help = "Snapshot file (JSON)")]
    database: Option<PathBuf>,

    #[arg(long, help = "Print the database snapshot as JSON and exit")]
    dump: bool,

    #[arg(long, help = "Read one command per line from stdin, stopping at the first failure")]
    pipe: bool,

    #[arg(short, long, help = "Suppress spinners and decorations")]
    quiet: bool,

    #[arg(long, env = "QDB_CONFIG", value_name = "FILE", help = "CLI config file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Output format for results")]
    format: Option<OutputFormat>,

    #[arg(long, value_enum, help = "Color theme")]
    theme: Option<Theme>,

    #[arg(long, value_name = "SEED", help = "Seed for random root ordering")]
    seed: Option<u64>,

    #[arg(short, long, help = "Log query planning at debug level")]
    verbose: bool,

    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("[{}] {0}", .0.code())]
    Query(#[from] QueryError),
    #[error("failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("line editor failed: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
    #[error("{0}")]
    Usage(String),
    #[error("stopped at line {line}")]
    Failed { line: usize },
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Query { root: String, exprs: Vec<String> },
    Keys { root: String, exprs: Vec<String> },
    Indexes,
}

const COMMAND_WORDS: [&str; 6] = ["query", "q", "keys", "k", "indexes", "i"];

impl Command {
    fn parse(words: &[String]) -> Result<Self, CliError> {
        let Some((head, rest)) = words.split_first() else {
            return Err(CliError::Usage("empty command".into()));
        };
        let with_root = |rest: &[String]| -> Result<(String, Vec<String>), CliError> {
            let (root, exprs) = rest
                .split_first()
                .ok_or_else(|| CliError::Usage(format!("`{head}` needs a root index or key")))?;
            Ok((root.clone(), exprs.to_vec()))
        };
        match head.as_str() {
            "query" | "q" => with_root(rest).map(|(root, exprs)| Command::Query { root, exprs }),
            "keys" | "k" => with_root(rest).map(|(root, exprs)| Command::Keys { root, exprs }),
            "indexes" | "i" => Ok(Command::Indexes),
            _ => Ok(Command::Query {
                root: head.clone(),
                exprs: rest.to_vec(),
            }),
        }
    }
}

#[derive(Serialize)]
struct IndexSummary<'a> {
    name: &'a str,
    records: usize,
    fields: Vec<String>,
}

struct Session<'s> {
    name: String,
    store: &'s MemStore,
    engine: QueryEngine<'s, MemStore>,
    format: OutputFormat,
    ui: &'s Ui,
}

impl Session<'_> {
    /// Runs one command and returns what should be printed.
    fn render(&mut self, command: &Command) -> Result<String, CliError> {
        match command {
            Command::Query { root, exprs } | Command::Keys { root, exprs } => {
                let only_root = matches!(command, Command::Keys { .. });
                let exprs: Vec<&str> = exprs.iter().map(String::as_str).collect();
                let output = match self.engine.query(root, &exprs, only_root) {
                    Ok(output) => output,
                    Err(err) if err.is_no_data() => return Ok(format!("{err}\n")),
                    Err(err) => return Err(err.into()),
                };
                self.render_output(&output)
            }
            Command::Indexes => self.render_indexes(),
        }
    }

    fn render_output(&self, output: &QueryOutput) -> Result<String, CliError> {
        match (self.format, output) {
            (OutputFormat::Json, QueryOutput::Keys(keys)) => Ok(json_line(keys)?),
            (OutputFormat::Json, QueryOutput::Tree(tree)) => Ok(json_line(&tree.tree)?),
            (OutputFormat::Text, QueryOutput::Keys(keys)) => Ok(render_keys(keys)),
            (OutputFormat::Text, QueryOutput::Tree(tree)) => Ok(render_text(self.store, tree)),
        }
    }

    fn render_indexes(&self) -> Result<String, CliError> {
        let summaries: Vec<IndexSummary<'_>> = self
            .store
            .index_names()
            .map(|name| IndexSummary {
                name,
                records: self.store.index_len(name),
                fields: self.store.index_fields(name).into_iter().collect(),
            })
            .collect();
        match self.format {
            OutputFormat::Json => Ok(json_line(&summaries)?),
            OutputFormat::Text => {
                let rows: Vec<[String; 3]> = summaries
                    .iter()
                    .map(|s| [s.name.to_owned(), s.records.to_string(), s.fields.join(", ")])
                    .collect();
                Ok(self.ui.table(["INDEX", "RECORDS", "FIELDS"], &rows))
            }
        }
    }

    fn run_words(&mut self, words: &[String]) -> Result<(), CliError> {
        let command = Command::parse(words)?;
        let text = self.render(&command)?;
        self.ui.output(&text);
        Ok(())
    }

    /// Runs one command per line; the first failing line ends the run.
    fn pipe<R: BufRead>(&mut self, input: R) -> Result<(), CliError> {
        let mut progress = self.ui.pipe_progress();
        for (n, line) in input.lines().enumerate() {
            let line = line?;
            progress.advance(n + 1);
            let started = Instant::now();
            let result = split_words(&line).and_then(|words| {
                if words.first().map_or(true, |word| word.starts_with('#')) {
                    return Ok(String::new());
                }
                Command::parse(&words).and_then(|command| self.render(&command))
            });
            debug!(
                line = n + 1,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "cli.pipe.line"
            );
            match result {
                Ok(text) => self.ui.output(&text),
                Err(err) => {
                    self.ui.warn(&format!("Line {}: command failed: `{line}`: {err}", n + 1));
                    return Err(CliError::Failed { line: n + 1 });
                }
            }
        }
        progress.finish();
        Ok(())
    }
}

fn json_line<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Shell-style words, so quoted values may hold spaces. `#` starts a comment.
fn split_words(line: &str) -> Result<Vec<String>, CliError> {
    shlex::split(line).ok_or_else(|| CliError::Usage("unbalanced quotes".into()))
}

fn database_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A leading command word is not a database path.
fn split_database(database: Option<PathBuf>, mut words: Vec<String>) -> (Option<PathBuf>, Vec<String>) {
    match database {
        Some(path) if path.to_str().is_some_and(|p| COMMAND_WORDS.contains(&p)) => {
            words.insert(0, path.to_string_lossy().into_owned());
            (None, words)
        }
        other => (other, words),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("qdb=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = CliConfig::load(cli.config.clone())?;
    let format = cli.format.unwrap_or_else(|| config.format());
    let ui = Ui::new(cli.theme.unwrap_or_else(|| config.theme()), cli.quiet);

    let (database, words) = split_database(cli.database, cli.command);
    let path = database
        .or_else(|| config.default_db_path().cloned())
        .ok_or_else(|| {
            CliError::Usage("no database given; pass DATABASE or set [database] default".into())
        })?;
    let store = StoreSnapshot::load(&path)?.into_store()?;
    debug!(path = %path.display(), keys = store.key_count(), "cli.database.opened");

    if cli.dump {
        ui.output(&json_line(&StoreSnapshot::capture(&store))?);
        return Ok(());
    }

    let mut engine_config = config.engine();
    if cli.seed.is_some() {
        engine_config.random_seed = cli.seed;
    }
    let mut session = Session {
        name: database_name(&path),
        store: &store,
        engine: QueryEngine::with_config(&store, engine_config),
        format,
        ui: &ui,
    };

    if cli.pipe {
        if !words.is_empty() {
            return Err(CliError::Usage("`--pipe` does not take a command".into()));
        }
        return session.pipe(io::stdin().lock());
    }
    if !words.is_empty() {
        return session.run_words(&words);
    }
    if !io::stdin().is_terminal() {
        return Err(CliError::Usage(
            "stdin is not a terminal; pass `--pipe` to read commands from it".into(),
        ));
    }
    repl::run(&mut session, config.history_path())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
