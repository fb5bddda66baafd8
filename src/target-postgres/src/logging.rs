// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Log output of the target: one JSON object per line on stderr, with the
//! level names Singer targets use.

use serde::Serialize;
use tracing_core::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// A [`FormatEvent`] writing `{"level":..,"message":..,"target":..}` lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetLoggingFormat;

impl<S, N> FormatEvent<S, N> for TargetLoggingFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;

        let line = LogLine {
            level: LogLevel::from(*event.metadata().level()),
            message,
            target: event.metadata().target(),
        };
        let line = serde_json::to_string(&line).map_err(|_| std::fmt::Error)?;
        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

/// Installs [`TargetLoggingFormat`] on stderr, filtered by `RUST_LOG`
/// (`info` when unset).
pub fn init() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter)
        .event_format(TargetLoggingFormat)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    level: LogLevel,
    message: String,
    target: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warning,
            Level::ERROR => LogLevel::Error,
        }
    }
}
