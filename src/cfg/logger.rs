// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt::Debug, fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{Event, Subscriber};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        self, FmtContext, FormatEvent, FormatFields,
        format::{JsonFields, Writer},
        writer::BoxMakeWriter,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
};

/// Install the global JSON subscriber from a YAML logger config.
///
/// The returned guard owns the non-blocking writer thread; drop it last.
pub fn init_logger(config_path: &str) -> Result<WorkerGuard> {
    let raw = fs::read_to_string(config_path)
        .with_context(|| format!("read logger config {config_path}"))?;
    let config: LoggerConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse logger config {config_path}"))?;
    let logger = config.logger;

    let (sink, guard) = logger.sink()?;

    let level = match EnvFilter::try_new(&logger.level) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_from_default_env()
            .context("no usable log level in config or environment")?,
    };

    let format_layer = fmt::layer()
        .with_writer(sink)
        .with_ansi(false)
        .json()
        .event_format(JsonFormatter {
            show_target: logger.show_target,
        })
        .fmt_fields(JsonFields::default());

    tracing::subscriber::set_global_default(
        Registry::default().with(level).with(format_layer),
    )
    .context("a global subscriber is already installed")?;

    Ok(guard)
}

#[derive(Debug, Deserialize, Clone)]
struct LoggerConfig {
    logger: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
struct LogConfig {
    level: String,
    output: LogOutput,
    #[serde(default)]
    show_target: bool,
    file: Option<LogFile>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum LogOutput {
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Deserialize, Clone)]
struct LogFile {
    path: String,
    #[serde(default)]
    rotation_frequency: Option<RotationFreq>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum RotationFreq {
    Minutely,
    Hourly,
    Daily,
    Never,
}

impl RotationFreq {
    fn as_rotation(self) -> Rotation {
        match self {
            Self::Minutely => Rotation::MINUTELY,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily => Rotation::DAILY,
            Self::Never => Rotation::NEVER,
        }
    }
}

impl LogFile {
    fn appender(&self) -> RollingFileAppender {
        let target = PathBuf::from(&self.path);
        let rotation = self
            .rotation_frequency
            .unwrap_or(RotationFreq::Never)
            .as_rotation();
        RollingFileAppender::new(
            rotation,
            target.parent().unwrap_or_else(|| std::path::Path::new(".")),
            target.file_name().unwrap_or_default(),
        )
    }
}

impl LogConfig {
    fn sink(&self) -> Result<(BoxMakeWriter, WorkerGuard)> {
        let (sink, guard) = match (&self.output, &self.file) {
            (LogOutput::File, Some(file)) => {
                let (sink, guard) = tracing_appender::non_blocking(file.appender());
                (BoxMakeWriter::new(sink), guard)
            },
            (LogOutput::File, None) => bail!("output=file needs a file section"),
            (LogOutput::Stdout, _) => {
                let (sink, guard) = tracing_appender::non_blocking(std::io::stdout());
                (BoxMakeWriter::new(sink), guard)
            },
            (LogOutput::Stderr, _) => {
                let (sink, guard) = tracing_appender::non_blocking(std::io::stderr());
                (BoxMakeWriter::new(sink), guard)
            },
        };
        Ok((sink, guard))
    }
}

/// Event fields flattened into a JSON object, every value through one
/// conversion point.
#[derive(Default)]
struct FieldMap(serde_json::Map<String, serde_json::Value>);

impl FieldMap {
    fn put(&mut self, field: &tracing::field::Field, value: impl Into<serde_json::Value>) {
        self.0.insert(field.name().to_owned(), value.into());
    }
}

impl tracing::field::Visit for FieldMap {
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.put(field, value);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.put(field, value);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.put(field, value);
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn Debug) {
        self.put(field, format!("{value:?}"));
    }
}

struct JsonFormatter {
    show_target: bool,
}

/// One emitted line; what `serde_json` makes of this IS the log format.
#[derive(Serialize)]
struct JsonLine {
    timestamp: String,
    level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut fields = FieldMap::default();
        event.record(&mut fields);

        let meta = event.metadata();
        let line = JsonLine {
            timestamp: Utc::now().to_rfc3339(),
            level: meta.level().to_string(),
            target: self.show_target.then(|| meta.target().to_string()),
            fields: fields.0,
        };
        let rendered = serde_json::to_string(&line).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{rendered}")
    }
}
