//! Utilities for configuring logging
//!
//! Filters are configured via the `SRES_LOG` environment variable using the env_logger syntax,
//! e.g. `SRES_LOG=warn,sres_ppu::components::ppu=trace`.
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::Once;

use colored::*;
use env_logger::Logger;
use log::Level;
use log::Log;
use log::Record;

static ONCE_INIT: Once = Once::new();

const TRACE_CONTEXT_LINES: usize = 20;
const FILTER_ENV: &str = "SRES_LOG";

/// Logger using env_logger for filtering with a compact, colored output format.
///
/// Trace records are emitted per dot or per scanline and would flood the output. They are held in
/// a ring buffer instead and only printed as context when a record of a higher level is logged.
struct SresLogger {
    trace_context: Mutex<VecDeque<String>>,
    filter: Logger,
}

impl SresLogger {
    fn new(filter: Logger) -> Self {
        log::set_max_level(filter.filter());
        Self {
            trace_context: Mutex::new(VecDeque::with_capacity(TRACE_CONTEXT_LINES)),
            filter,
        }
    }

    fn format_record(record: &Record) -> String {
        let message = record.args().to_string();
        match record.level() {
            Level::Error => format!("{} {}", "E".red().bold(), message.red()),
            Level::Warn => format!("{} {}", "W".yellow().bold(), message.yellow()),
            Level::Info => format!("{} {}", "I".blue().bold(), message.normal()),
            Level::Debug => format!("{} {}", "D".blue(), message.normal()),
            Level::Trace => format!("{}", message.dimmed()),
        }
    }

    fn flush_context(context: &mut VecDeque<String>) {
        if context.len() == TRACE_CONTEXT_LINES {
            println!("{}", "...".dimmed());
        }
        for line in context.drain(..).rev() {
            println!("{}", line);
        }
    }
}

impl Log for SresLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.filter.matches(record) {
            return;
        }
        let line = Self::format_record(record);
        let Ok(mut context) = self.trace_context.lock() else {
            return;
        };
        if record.level() == Level::Trace {
            context.push_front(line);
            context.truncate(TRACE_CONTEXT_LINES);
        } else {
            Self::flush_context(&mut context);
            println!("{}", line);
        }
    }

    fn flush(&self) {}
}

fn install(default_filter: &str) {
    ONCE_INIT.call_once(|| {
        let filter_config = std::env::var(FILTER_ENV).unwrap_or(default_filter.to_string());
        let filter = env_logger::builder().parse_filters(&filter_config).build();
        // Another logger may have been installed by the host application.
        let _ = log::set_boxed_logger(Box::new(SresLogger::new(filter)));
    });
}

pub fn init() {
    install("error");
}

pub fn test_init(verbose: bool) {
    install(if verbose { "debug" } else { "warn" });
}
