//! Plain-text rendering of log lines for the terminal and file writers.

use crate::level::Level;
use crate::line::Line;
use std::fmt::Write as _;

/// Layout of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    /// `[time][LEVEL] [span-id=..] {attrs} text`
    Term,
    /// `[time][LEVEL] {attrs} - text`
    File,
}

#[derive(Debug, Clone)]
pub struct TextFormatter {
    time_format: String,
    style: TextStyle,
    color: bool,
}

impl TextFormatter {
    pub fn new(style: TextStyle, time_format: impl Into<String>) -> Self {
        Self {
            time_format: time_format.into(),
            style,
            color: false,
        }
    }

    /// Wraps each line in an ANSI color chosen by level.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn format(&self, line: &Line) -> String {
        let mut out = String::with_capacity(64 + line.text.len());
        self.format_into(line, &mut out);
        out
    }

    /// Appends the rendered line (without newline) to `out`.
    pub fn format_into(&self, line: &Line, out: &mut String) {
        let color = if self.color { ansi(line.level) } else { None };
        if let Some(code) = color {
            out.push_str(code);
        }

        let _ = write!(
            out,
            "[{}][{}]",
            line.time.format(&self.time_format),
            line.level
        );

        match self.style {
            TextStyle::Term => {
                if let Some(trace) = &line.trace {
                    let _ = write!(out, " [span-id={}]", trace.span_id);
                }
                if !line.attrs.is_empty() {
                    out.push(' ');
                    out.push_str(&line.attrs.to_json());
                }
                out.push(' ');
            }
            TextStyle::File => {
                if line.attrs.is_empty() {
                    out.push(' ');
                } else {
                    out.push(' ');
                    out.push_str(&line.attrs.to_json());
                    out.push_str(" - ");
                }
            }
        }
        out.push_str(&line.text);

        if color.is_some() {
            out.push_str("\x1b[0m");
        }
    }
}

fn ansi(level: Level) -> Option<&'static str> {
    match level {
        Level::Fatal => Some("\x1b[0;43;31m"),
        Level::Error => Some("\x1b[31m"),
        Level::Warn => Some("\x1b[33m"),
        Level::Info => Some("\x1b[34m"),
        Level::Debug => Some("\x1b[37m"),
        Level::Off => None,
    }
}
