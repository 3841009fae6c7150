use clap::{App, Arg};
use log::LevelFilter;

/// Parsed command line: the program to run under the tracer, plus the
/// handful of flags that control logging verbosity and test determinism.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: String,
    pub args: Vec<String>,
    pub debug_level: u8,
    pub clock_base: Option<u64>,
    pub quiet: bool,
}

impl Config {
    /// Maps the `-d` level (0-4) onto a `log::LevelFilter`, mirroring the
    /// teacher's convention of treating 0 as "warnings only" and each
    /// further level as one notch more verbose.
    pub fn level_filter(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Off;
        }
        match self.debug_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

pub fn parse_config() -> Config {
    let matches = App::new("dettracer")
        .about("Runs a command under a deterministic ptrace-based execution sandbox.")
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("Verbosity level (0-4); overridden by RUST_LOG if set.")
                .takes_value(true)
                .default_value("0")
                .validator(debug_level_validator),
        )
        .arg(
            Arg::with_name("clock-base")
                .long("clock-base")
                .help("Overrides the logical clock's starting epoch, for reproducible tests.")
                .takes_value(true)
                .validator(clock_base_validator),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("Suppresses all logging regardless of debug level."),
        )
        .arg(
            Arg::with_name("command")
                .help("The command (and its arguments) to run under the tracer.")
                .required(true)
                .multiple(true),
        )
        .get_matches();

    let debug_level: u8 = matches
        .value_of("debug")
        .unwrap()
        .parse()
        .expect("validator already checked this parses");

    let clock_base = matches
        .value_of("clock-base")
        .map(|s| s.parse().expect("validator already checked this parses"));

    let quiet = matches.is_present("quiet");

    let mut command_parts = matches.values_of("command").unwrap();
    let command = command_parts.next().unwrap().to_string();
    let args = command_parts.map(str::to_string).collect();

    Config {
        command,
        args,
        debug_level,
        clock_base,
        quiet,
    }
}

fn debug_level_validator(value: String) -> Result<(), String> {
    match value.parse::<u8>() {
        Ok(level) if level <= 4 => Ok(()),
        Ok(_) => Err("debug level must be between 0 and 4".to_string()),
        Err(_) => Err("debug level must be an integer".to_string()),
    }
}

fn clock_base_validator(value: String) -> Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| "clock-base must be a non-negative integer".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_maps_to_increasing_verbosity() {
        let mut config = Config {
            command: "true".to_string(),
            args: vec![],
            debug_level: 0,
            clock_base: None,
            quiet: false,
        };
        assert_eq!(config.level_filter(), LevelFilter::Warn);
        config.debug_level = 4;
        assert_eq!(config.level_filter(), LevelFilter::Trace);
    }

    #[test]
    fn quiet_overrides_debug_level() {
        let config = Config {
            command: "true".to_string(),
            args: vec![],
            debug_level: 4,
            clock_base: None,
            quiet: true,
        };
        assert_eq!(config.level_filter(), LevelFilter::Off);
    }

    #[test]
    fn validator_rejects_out_of_range_debug_level() {
        assert!(debug_level_validator("5".to_string()).is_err());
        assert!(debug_level_validator("4".to_string()).is_ok());
    }
}
