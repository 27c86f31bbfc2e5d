//! Terminal output for `ember` reports.
//!
//! Report text goes to stdout, errors to stderr. Color is turned off by
//! `NO_COLOR` or `--color never`.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Map the `--color` flag to a `ColorChoice`; `NO_COLOR` wins over the flag
pub fn resolve_color_choice(flag: Option<&str>) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        Some("always") => ColorChoice::Always,
        Some("never") => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// How a piece of report text is highlighted
#[derive(Debug, Clone, Copy)]
enum Tone {
    /// Nothing left behind
    Clean,
    /// Stale instances, skipped sweeps
    Stale,
    /// Referrer and root lines
    Detail,
    /// Section titles
    Heading,
}

impl Tone {
    fn spec(self) -> ColorSpec {
        let mut spec = ColorSpec::new();
        match self {
            Tone::Clean => spec.set_fg(Some(Color::Green)).set_bold(true),
            Tone::Stale => spec.set_fg(Some(Color::Yellow)).set_bold(true),
            Tone::Detail => spec.set_fg(Some(Color::Cyan)),
            Tone::Heading => spec.set_bold(true),
        };
        spec
    }
}

/// Colored writer for scenario reports
pub struct StyledOutput {
    stdout: StandardStream,
    stderr: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
            stderr: StandardStream::stderr(choice),
        }
    }

    fn toned(&mut self, tone: Tone, text: &str) {
        let _ = self.stdout.set_color(&tone.spec());
        let _ = write!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Nothing stale was found
    pub fn success(&mut self, text: &str) {
        self.toned(Tone::Clean, text);
    }

    /// Something was left behind
    pub fn warning(&mut self, text: &str) {
        self.toned(Tone::Stale, text);
    }

    /// Referrers, roots and other detail lines
    pub fn info(&mut self, text: &str) {
        self.toned(Tone::Detail, text);
    }

    pub fn bold(&mut self, text: &str) {
        self.toned(Tone::Heading, text);
    }

    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    pub fn newline(&mut self) {
        let _ = writeln!(self.stdout);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    /// Error line on stderr, in red
    pub fn stderr_error(&mut self, text: &str) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Red)).set_bold(true);
        let _ = self.stderr.set_color(&spec);
        let _ = writeln!(self.stderr, "{}", text);
        let _ = self.stderr.reset();
    }
}
