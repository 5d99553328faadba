use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>()
            && parsed <= 5
        {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("AUTHGATE_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(level: &str) -> Result<u8, clap::Error> {
        Command::new("authgate")
            .arg(Arg::new("level").value_parser(validator_log_level()))
            .try_get_matches_from(["authgate", level])
            .map(|matches| matches.get_one::<u8>("level").copied().unwrap_or(u8::MAX))
    }

    #[test]
    fn names_map_to_counts() {
        assert_eq!(parse("ERROR").ok(), Some(0));
        assert_eq!(parse("Warn").ok(), Some(1));
        assert_eq!(parse("debug").ok(), Some(3));
        assert_eq!(parse("trace").ok(), Some(4));
    }

    #[test]
    fn numbers_up_to_five_are_accepted() {
        assert_eq!(parse("5").ok(), Some(5));
        assert!(parse("6").is_err());
        assert!(parse("loud").is_err());
    }
}
