//! Text rendering for [`Event`](crate::event_bus::Event)s and
//! [`StageDiagnostic`](crate::diagnostics::StageDiagnostic)s.

use std::io::IsTerminal;

use crate::diagnostics::StageDiagnostic;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Controls whether rendered output carries ANSI color codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Detect TTY-ness of stderr at render time.
    #[default]
    Auto,
    /// Always emit ANSI color codes.
    Colored,
    /// Never emit ANSI color codes.
    Plain,
}

impl FormatterMode {
    fn colors_enabled(self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_diagnostics(&self, diagnostics: &[StageDiagnostic]) -> Vec<EventRender>;
}

pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.mode.colors_enabled() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text.to_string()
        }
    }
}

fn format_error_chain(
    fmt: &PlainFormatter,
    error: &crate::diagnostics::LadderError,
    indent: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &error.cause {
        let indent_str = "  ".repeat(indent);
        lines.push(format!(
            "{}\n",
            fmt.paint(LINE_COLOR, &format!("{indent_str}cause: {}", cause.message))
        ));
        lines.extend(format_error_chain(fmt, cause, indent + 1));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{}\n", self.paint(LINE_COLOR, &event.to_string()));
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }

    fn render_diagnostics(&self, diagnostics: &[StageDiagnostic]) -> Vec<EventRender> {
        diagnostics
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut lines = Vec::new();
                let scope_str = self.paint(CONTEXT_COLOR, &format!("{:?}", d.scope));
                lines.push(format!("[{}] {} | {}\n", i, d.when, scope_str));
                lines.push(format!(
                    "{}\n",
                    self.paint(LINE_COLOR, &format!("  error: {}", d.error.message))
                ));
                lines.extend(format_error_chain(self, &d.error, 1));
                if !d.tags.is_empty() {
                    lines.push(format!(
                        "{}\n",
                        self.paint(LINE_COLOR, &format!("  tags: {:?}", d.tags))
                    ));
                }
                if !d.context.is_null() {
                    lines.push(format!(
                        "{}\n",
                        self.paint(LINE_COLOR, &format!("  context: {}", d.context))
                    ));
                }
                EventRender {
                    context: Some(format!("{:?}", d.scope)),
                    lines,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LadderError;

    #[test]
    fn plain_mode_never_emits_ansi_codes() {
        let fmt = PlainFormatter::with_mode(FormatterMode::Plain);
        let diag = StageDiagnostic::stage("ports", None, LadderError::msg("boom"));
        let renders = fmt.render_diagnostics(&[diag]);
        let joined = renders[0].join_lines();
        assert!(!joined.contains("\x1b["));
    }

    #[test]
    fn colored_mode_always_emits_ansi_codes() {
        let fmt = PlainFormatter::with_mode(FormatterMode::Colored);
        let diag = StageDiagnostic::stage("ports", None, LadderError::msg("boom"));
        let renders = fmt.render_diagnostics(&[diag]);
        assert!(renders[0].join_lines().contains("\x1b["));
    }

    #[test]
    fn auto_is_the_default_mode() {
        assert_eq!(FormatterMode::default(), FormatterMode::Auto);
    }
}
