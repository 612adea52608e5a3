use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use log::{LevelFilter, Log, Metadata, Record};
use serde_json::{json, Value};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::cli::LogFormat;
use crate::metadata::{NAME, VERSION};

/// Writes one JSON object per record to stdout. The level is stored under
/// `severity` so log collectors pick it up.
struct JsonLogger {
    level: LevelFilter,
}

fn to_json(record: &Record) -> Value {
    json!({
        "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "severity": record.level().to_string().to_lowercase(),
        "app": NAME,
        "version": VERSION,
        "target": record.target(),
        "message": record.args().to_string(),
    })
}

impl Log for JsonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", to_json(record));
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

pub fn init(format: LogFormat, level: LevelFilter) -> Result<()> {
    match format {
        LogFormat::Json => {
            log::set_boxed_logger(Box::new(JsonLogger { level }))
                .context("could not install json logger")?;
            log::set_max_level(level);
        }
        LogFormat::Text => {
            let config = ConfigBuilder::new()
                .set_time_level(LevelFilter::Error)
                .set_thread_level(LevelFilter::Off)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Off)
                .build();

            TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto)
                .context("could not install terminal logger")?;
        }
    }

    Ok(())
}
