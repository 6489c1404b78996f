use crate::error::WriteError;
use crate::format::{TextFormatter, TextStyle};
use crate::line::LogEntry;
use crate::writer::Writer;
use tokio::io::AsyncWriteExt;

/// Terminal writer: one formatted line per entry on stdout.
///
/// Each batch is rendered into a single buffer and written with one call, so
/// lines of one batch are never interleaved with other output.
#[derive(Debug, Clone)]
pub struct TermWriter {
    formatter: TextFormatter,
}

impl TermWriter {
    pub fn new(time_format: impl Into<String>, color: bool) -> Self {
        Self {
            formatter: TextFormatter::new(TextStyle::Term, time_format).with_color(color),
        }
    }

    /// Renders a batch exactly as it is written, newline-terminated.
    pub fn render(&self, batch: &[LogEntry]) -> String {
        let mut out = String::with_capacity(batch.len() * 96);
        for line in batch {
            self.formatter.format_into(line, &mut out);
            out.push('\n');
        }
        out
    }
}

impl Writer<LogEntry> for TermWriter {
    async fn write(&self, batch: &[LogEntry]) -> Result<(), WriteError> {
        let out = self.render(batch);
        let mut stdout = tokio::io::stdout();
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "term"
    }
}
