use std::fmt;
use std::io::IsTerminal;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::types::LogFormat;

/// Custom tracing formatter that prepends colored [CAPTURE]/[DROP] prefixes
/// to log events based on message content, and colorizes known field names.
pub struct PrefixedFormatter<E> {
    inner: E,
    ansi: bool,
}

impl<E> PrefixedFormatter<E> {
    pub fn new(inner: E, ansi: bool) -> Self {
        Self { inner, ansi }
    }
}

impl<S, N, E> FormatEvent<S, N> for PrefixedFormatter<E>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    E: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        let msg_lower = visitor.message.to_lowercase();

        if is_capture_pattern(&msg_lower) {
            if self.ansi {
                write!(writer, "\x1b[33m[CAPTURE]\x1b[0m ")?;
            } else {
                write!(writer, "[CAPTURE] ")?;
            }
        } else if is_drop_pattern(&msg_lower) {
            if self.ansi {
                write!(writer, "\x1b[31m[DROP]\x1b[0m ")?;
            } else {
                write!(writer, "[DROP] ")?;
            }
        }

        if self.ansi {
            let mut buf = String::new();
            let buf_writer = Writer::new(&mut buf);
            self.inner.format_event(ctx, buf_writer, event)?;
            write!(writer, "{}", colorize_fields(&buf))
        } else {
            self.inner.format_event(ctx, writer, event)
        }
    }
}

/// Colorize known field names in a log line.
/// Only whole field names are colored: `source_ip=` is not touched by the `ip` rule.
fn colorize_fields(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 32);
    let mut rest = line;
    while let Some(eq) = rest.find('=') {
        let (before, after) = rest.split_at(eq);
        let start = before
            .char_indices()
            .rev()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let name = &before[start..];
        out.push_str(&before[..start]);
        match field_color(name) {
            Some(color) => {
                out.push_str(&format!("\x1b[{}m{}=\x1b[0m", color, name));
            }
            None => {
                out.push_str(name);
                out.push('=');
            }
        }
        rest = &after[1..];
    }
    out.push_str(rest);
    out
}

fn field_color(name: &str) -> Option<&'static str> {
    FIELD_COLORS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, color)| *color)
}

/// Field name → ANSI color code mapping.
const FIELD_COLORS: &[(&str, &str)] = &[
    // cyan (36): submitted credentials
    ("username", "36"),
    ("password", "36"),
    // magenta (35): network addresses
    ("peer", "35"),
    ("source_ip", "35"),
    // dim (2): correlation
    ("conn_id", "2"),
    // red (31): errors
    ("error", "31"),
];

/// Visitor that extracts the message field from a tracing event.
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn is_capture_pattern(msg: &str) -> bool {
    msg.contains("login attempt")
}

fn is_drop_pattern(msg: &str) -> bool {
    msg.contains("handshake failed")
        || msg.contains("connection error")
        || msg.contains("panicked")
        || msg.contains("refused")
        || msg.contains("denied")
}

/// Initialize the global tracing subscriber.
///
/// In Pretty mode, wraps the default formatter with `PrefixedFormatter`
/// to prepend colored [CAPTURE]/[DROP] tags and colorize field names.
/// JSON mode is unchanged.
pub fn setup_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            let ansi = std::io::stdout().is_terminal();
            let default_format = tracing_subscriber::fmt::format::Format::default();
            tracing_subscriber::fmt()
                .event_format(PrefixedFormatter::new(default_format, ansi))
                .with_env_filter(filter)
                .init();
        }
    }
}
