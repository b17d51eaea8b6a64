//! Interactive prompt with history and Tab completion.

use std::path::PathBuf;

use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing::debug;

use crate::{split_words, CliError, Session};

const REPL_WORDS: [&str; 5] = ["query", "keys", "indexes", "exit", "quit"];

/// Completes command words at the start of a line and index names anywhere.
struct QdbHelper {
    indexes: Vec<String>,
}

impl QdbHelper {
    fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<Pair>) {
        let head = &line[..pos];
        let start = head.rfind([' ', '\t']).map_or(0, |i| i + 1);
        let word = &head[start..];
        let commands: &[&str] = if head[..start].trim().is_empty() {
            &REPL_WORDS
        } else {
            &[]
        };
        let pairs = commands
            .iter()
            .copied()
            .chain(self.indexes.iter().map(String::as_str))
            .filter(|candidate| candidate.starts_with(word))
            .map(|candidate| Pair {
                display: candidate.to_owned(),
                replacement: candidate.to_owned(),
            })
            .collect();
        (start, pairs)
    }
}

impl Completer for QdbHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        Ok(self.candidates(line, pos))
    }
}

impl Hinter for QdbHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for QdbHelper {}

impl Validator for QdbHelper {}

impl Helper for QdbHelper {}

/// Reads commands until `exit`, `quit` or end of input.
pub fn run(session: &mut Session<'_>, history: Option<PathBuf>) -> Result<(), CliError> {
    let mut editor: Editor<QdbHelper, DefaultHistory> = Editor::new()?;
    editor.set_helper(Some(QdbHelper {
        indexes: session.store.index_names().map(str::to_owned).collect(),
    }));
    if let Some(path) = &history {
        if let Err(err) = editor.load_history(path) {
            debug!(path = %path.display(), %err, "cli.repl.history_unavailable");
        }
    }

    let store = session.store;
    session
        .ui
        .banner(&session.name, store.key_count(), store.reference_pairs().len());
    let prompt = session.ui.prompt(&session.name, store.key_count() == 0);

    loop {
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let words = match split_words(&line) {
            Ok(words) => words,
            Err(err) => {
                session.ui.warn(&format!("error: {err}"));
                continue;
            }
        };
        if words.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.as_str());
        if matches!(words[0].as_str(), "exit" | "quit") {
            break;
        }
        if let Err(err) = session.run_words(&words) {
            session.ui.warn(&format!("error: {err}"));
        }
    }

    if let Some(path) = &history {
        if let Err(err) = editor.save_history(path) {
            session
                .ui
                .warn(&format!("could not save history to {}: {err}", path.display()));
        }
    }
    Ok(())
}
