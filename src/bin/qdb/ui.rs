//! Terminal decorations for the `qdb` binary.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};
use qdb::cli::Theme;

pub struct Ui {
    palette: Palette,
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(theme: Theme, quiet: bool) -> Self {
        let paint = match theme {
            Theme::Plain => false,
            Theme::Auto | Theme::Light | Theme::Dark => std::io::stdout().is_terminal(),
        } && !quiet;

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        let palette = match theme {
            Theme::Plain => Palette::plain(),
            Theme::Light => Palette::light(),
            Theme::Dark | Theme::Auto => Palette::dark(),
        };
        Self {
            palette,
            paint,
            quiet,
        }
    }

    /// Prints a command result verbatim.
    pub fn output(&self, text: &str) {
        print!("{text}");
    }

    pub fn warn(&self, message: &str) {
        if self.paint {
            eprintln!("{} {message}", self.palette.warn.paint(WARNING_ICON));
        } else {
            eprintln!("{message}");
        }
    }

    /// Greeting shown when the interactive prompt opens.
    pub fn banner(&self, database: &str, keys: usize, references: usize) {
        if self.quiet {
            return;
        }
        let title = format!("qdb {} - {database}", env!("CARGO_PKG_VERSION"));
        println!("{}", self.paint(self.palette.heading, &title));
        if keys == 0 {
            println!("{} Empty database.", self.paint(self.palette.muted, BULLET));
        } else {
            println!("{} {keys} keys.", self.paint(self.palette.muted, BULLET));
            println!("{} {references} references.", self.paint(self.palette.muted, BULLET));
        }
        println!(
            "{}",
            self.paint(
                self.palette.muted,
                "Type `query`, `keys` or `indexes` (Tab completes), `exit` to leave."
            )
        );
    }

    /// `[name](+) > ` for a populated database, `(-)` for an empty one.
    ///
    /// Left unpainted so the line editor measures its width correctly.
    pub fn prompt(&self, database: &str, empty: bool) -> String {
        let marker = if empty { '-' } else { '+' };
        format!("[{database}]({marker}) > ")
    }

    /// Columns padded to their widest cell, header row first.
    pub fn table<const N: usize>(&self, header: [&str; N], rows: &[[String; N]]) -> String {
        let mut widths = header.map(str::len);
        for row in rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }
        let line = |cells: [&str; N]| {
            let mut text = String::new();
            for (i, cell) in cells.iter().enumerate() {
                if i > 0 {
                    text.push_str("  ");
                }
                text.push_str(&format!("{cell:<width$}", width = widths[i]));
            }
            text.trim_end().to_owned()
        };
        let mut out = self.paint(self.palette.heading, &line(header));
        out.push('\n');
        for row in rows {
            out.push_str(&line(row.each_ref().map(String::as_str)));
            out.push('\n');
        }
        out
    }

    /// Spinner on stderr counting processed lines of a pipe.
    pub fn pipe_progress(&self) -> PipeProgress {
        let bar = (!self.quiet).then(|| {
            eprintln!("Processing commands...");
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner} line {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        PipeProgress {
            bar,
            line: 0,
            done: false,
        }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.paint {
            style.paint(text).to_string()
        } else {
            text.to_owned()
        }
    }
}

pub struct PipeProgress {
    bar: Option<ProgressBar>,
    line: usize,
    done: bool,
}

impl PipeProgress {
    pub fn advance(&mut self, line: usize) {
        self.line = line;
        if let Some(bar) = &self.bar {
            bar.set_message(line.to_string());
        }
    }

    pub fn finish(mut self) {
        self.done = true;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
            eprintln!("Done.");
        }
    }
}

impl Drop for PipeProgress {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message(format!("{} (stopped)", self.line));
        }
    }
}

struct Palette {
    heading: Style,
    muted: Style,
    warn: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            muted: Style::new().fg(Color::DarkGray),
            warn: Style::new().fg(Color::Yellow).bold(),
        }
    }

    fn light() -> Self {
        Self {
            heading: Style::new().fg(Color::Blue).bold(),
            muted: Style::new().fg(Color::DarkGray),
            warn: Style::new().fg(Color::Red).bold(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            muted: Style::new(),
            warn: Style::new(),
        }
    }
}

const WARNING_ICON: &str = "⚠";
const BULLET: &str = "**";
