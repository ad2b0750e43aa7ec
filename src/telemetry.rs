use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::fmt::{self as stdfmt, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "lossless";
const DEFAULT_FILTER: &str = "lossless=info,info";

/// Fields that are promoted right after `msg` so instance identity is easy to scan.
const LEADING_FIELDS: [&str; 5] = ["event", "namespace", "service", "host", "port"];

/// Installs the process-wide subscriber: key=value lines, INFO to stdout, WARN and above to
/// stderr, filtered through `RUST_LOG`.
pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let writer = std::io::stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(std::io::stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new(SERVICE_NAME))
        .fmt_fields(DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

pub struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    pub const fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }

    /// `service` is left to the event fields, where it names the instance's service.
    fn line_header(&self, level: &Level, target: &str) -> KeyValueLine {
        let mut line = KeyValueLine::default();
        line.push("ts", &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        line.push("level", level.as_str());
        line.push("app", self.service_name);
        line.push("component", target);
        line
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let mut line = self.line_header(metadata.level(), metadata.target());

        if let Some(span) = ctx.lookup_current() {
            let path = span
                .scope()
                .from_root()
                .map(|span| span.name())
                .collect::<Vec<_>>()
                .join(".");
            line.push("span", &path);
        }

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        line.push("msg", &message);

        for (key, value) in visitor.ordered_fields() {
            line.push(&key, &value);
        }

        writer.write_str(&line.finish())?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldCollector {
    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            name => self.fields.push((name.to_string(), value)),
        }
    }

    fn ordered_fields(self) -> Vec<(String, String)> {
        let (mut leading, mut rest): (Vec<_>, Vec<_>) = self
            .fields
            .into_iter()
            .partition(|(key, _)| LEADING_FIELDS.contains(&key.as_str()));
        leading.sort_by_key(|(key, _)| {
            LEADING_FIELDS
                .iter()
                .position(|candidate| candidate == key)
                .unwrap_or(usize::MAX)
        });
        rest.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
        leading.extend(rest);
        leading
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_value(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }
}

#[derive(Default)]
struct KeyValueLine {
    buffer: String,
}

impl KeyValueLine {
    fn push(&mut self, key: &str, value: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(key);
        self.buffer.push('=');
        quote_into(&mut self.buffer, value);
    }

    fn finish(self) -> String {
        self.buffer
    }
}

fn quote_into(buffer: &mut String, value: &str) {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '=' | '{' | '}' | ','));

    if !needs_quotes {
        buffer.push_str(value);
        return;
    }

    buffer.push('"');
    for ch in value.chars() {
        match ch {
            '"' => buffer.push_str("\\\""),
            '\\' => buffer.push_str("\\\\"),
            '\n' => buffer.push_str("\\n"),
            '\r' => buffer.push_str("\\r"),
            '\t' => buffer.push_str("\\t"),
            _ => buffer.push(ch),
        }
    }
    buffer.push('"');
}
