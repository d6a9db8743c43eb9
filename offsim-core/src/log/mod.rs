//! Logger initialization.
//!
//! Thin wrapper around `log4rs` that gives every `offsim-*` binary the same
//! console + rolling-file setup, with per-module filter expressions parsed
//! from a single string (as passed on `--loglevel` or the `RUST_LOG` env var).
//! Elsewhere in the workspace, log statements are plain `log::info!` etc. —
//! this crate has no wasm target, so there is no need for the wrapper macros
//! the rest of this module's ancestry carries.

pub use log::{Level, LevelFilter};

use consts::*;

mod appender;
mod consts;
mod logger;

/// Initializes the global logger with a console appender and, if `log_dir`
/// is given, rolling file appenders for info-and-above and warn-and-above.
pub fn init_logger(log_dir: Option<&str>, filters: &str) {
    use crate::log::appender::AppenderSpec;
    use log4rs::{config::Root, Config};
    use std::iter::once;

    const CONSOLE_APPENDER: &str = "stdout";
    const LOG_FILE_APPENDER: &str = "log_file";
    const ERR_LOG_FILE_APPENDER: &str = "err_log_file";

    let level = LevelFilter::Info;
    let loggers = logger::Builder::new().root_level(level).parse_env(DEFAULT_LOGGER_ENV).parse_expression(filters).build();

    let mut stdout_appender = AppenderSpec::console(CONSOLE_APPENDER, None);
    let mut file_appender = log_dir.map(|x| AppenderSpec::roller(LOG_FILE_APPENDER, None, x, LOG_FILE_NAME));
    let mut err_file_appender =
        log_dir.map(|x| AppenderSpec::roller(ERR_LOG_FILE_APPENDER, Some(LevelFilter::Warn), x, ERR_LOG_FILE_NAME));
    let appenders = once(&mut stdout_appender).chain(&mut file_appender).chain(&mut err_file_appender).map(|x| x.appender());

    let config = Config::builder()
        .appenders(appenders)
        .loggers(loggers.items())
        .build(
            Root::builder()
                .appenders(once(&stdout_appender).chain(&file_appender).chain(&err_file_appender).map(|x| x.name))
                .build(loggers.root_level()),
        )
        .unwrap();

    let _ = log4rs::init_config(config).unwrap();
}

/// Tries to init the global logger, but does not panic if it was already setup.
/// Used by tests that may run more than one simulation in the same process.
pub fn try_init_logger(filters: &str) {
    use crate::log::appender::AppenderSpec;
    use log4rs::{config::Root, Config};

    const CONSOLE_APPENDER: &str = "stdout";

    let loggers = logger::Builder::new().root_level(LevelFilter::Info).parse_env(DEFAULT_LOGGER_ENV).parse_expression(filters).build();
    let mut stdout_appender = AppenderSpec::console(CONSOLE_APPENDER, None);
    let config = Config::builder()
        .appender(stdout_appender.appender())
        .loggers(loggers.items())
        .build(Root::builder().appender(CONSOLE_APPENDER).build(loggers.root_level()))
        .unwrap();
    let _ = log4rs::init_config(config);
}
