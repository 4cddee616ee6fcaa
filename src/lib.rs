/*!
School attendance service: role-scoped REST API over a Postgres store.
*/

pub mod auth;
pub mod config;
pub mod inter;
pub mod qr;
pub mod store;
pub mod user;

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

/// Wire format for calendar dates ("2024-09-03").
pub const DATE_FMT: &[FormatItem] = format_description!("[year]-[month]-[day]");

/// Format of the start time stored on a class ("08:30").
pub const START_TIME_FMT: &[FormatItem] = format_description!("[hour]:[minute]");

/// The current moment in server-local time.
///
/// Check-in day windows are calendar days in server-local time, so this is
/// what every handler should treat as "now". Falls back to UTC on platforms
/// where the local offset can't be determined.
pub fn local_now() -> OffsetDateTime {
    match OffsetDateTime::now_local() {
        Ok(t) => t,
        Err(_) => OffsetDateTime::now_utc(),
    }
}

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => { return LevelFilter::Warn; },
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn ensure_logging() {
        use simplelog::{ColorChoice, TermLogger, TerminalMode};
        let log_cfg = simplelog::ConfigBuilder::new()
            .add_filter_allow_str("rollcall")
            .build();
        let res = TermLogger::init(
            log_level_from_env(),
            log_cfg,
            TerminalMode::Stdout,
            ColorChoice::Auto,
        );

        match res {
            Ok(_) => { log::info!("Test logging started."); },
            Err(_) => { log::info!("Test logging already started."); },
        }
    }
}
