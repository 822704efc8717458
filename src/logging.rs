use tracing::Level;

/// Level from the config file, raised by each `-v` on the command line
pub fn effective_level(configured: &str, verbosity: u8) -> Result<Level, String> {
    let configured: Level = configured
        .trim()
        .parse()
        .map_err(|_| format!("Unknown log level '{}'", configured))?;
    Ok(match verbosity {
        0 => configured,
        1 if configured < Level::DEBUG => Level::DEBUG,
        1 => configured,
        _ => Level::TRACE,
    })
}

/// Installs the fmt subscriber writing to stderr, so stdout only carries documents
pub fn init(configured: &str, verbosity: u8) -> Result<(), String> {
    let level = effective_level(configured, verbosity)?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| format!("Failed to initialise logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level("info", 0).unwrap(), Level::INFO);
        assert_eq!(effective_level("WARN", 1).unwrap(), Level::DEBUG);
        assert_eq!(effective_level("trace", 1).unwrap(), Level::TRACE);
        assert_eq!(effective_level("error", 2).unwrap(), Level::TRACE);
        assert!(effective_level("loud", 0).is_err());
    }
}
