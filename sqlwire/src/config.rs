//! Command pipeline configuration.
use std::{borrow::Cow, env::var, fmt};

const DEFAULT_FETCH_SIZE: u32 = 50;

/// Configuration shared by the commands of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) fetch_size: u32,
    pub(crate) cache_statements: bool,
    pub(crate) deprecate_eof: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            cache_statements: true,
            deprecate_eof: true,
        }
    }
}

impl Config {
    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `SQLWIRE_FETCH_SIZE`
    /// - `SQLWIRE_CACHE_STATEMENTS`
    /// - `SQLWIRE_DEPRECATE_EOF`
    ///
    /// Missing or invalid variables fallback to the default value.
    pub fn from_env() -> Config {
        let def = Config::default();

        macro_rules! env {
            ($name:literal, $parse:expr, $def:expr) => {
                match var($name) {
                    Ok(ok) => $parse(&ok).unwrap_or($def),
                    Err(_) => $def,
                }
            };
        }

        Self {
            fetch_size: env!("SQLWIRE_FETCH_SIZE", parse_fetch_size, def.fetch_size),
            cache_statements: env!("SQLWIRE_CACHE_STATEMENTS", parse_bool, def.cache_statements),
            deprecate_eof: env!("SQLWIRE_DEPRECATE_EOF", parse_bool, def.deprecate_eof),
        }
    }

    /// Parse config from `key=value` pairs separated by `&`.
    ///
    /// ```
    /// let config = sqlwire::Config::parse("fetch_size=2&cache_statements=false").unwrap();
    /// assert_eq!(config.fetch_size(), 2);
    /// assert!(!config.cache_statements());
    /// ```
    pub fn parse(input: &str) -> Result<Config, ParseError> {
        let mut me = Config::default();

        for pair in input.split('&').filter(|e| !e.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ParseError::new(format!("missing value for {pair:?}")));
            };
            match key.trim() {
                "fetch_size" => me.fetch_size = parse_fetch_size(value)?,
                "cache_statements" => me.cache_statements = parse_bool(value)?,
                "deprecate_eof" => me.deprecate_eof = parse_bool(value)?,
                key => return Err(ParseError::new(format!("unknown key {key:?}"))),
            }
        }

        Ok(me)
    }

    /// Number of rows requested per cursor page.
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Set the number of rows requested per cursor page.
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Returns `true` if prepared statements are cached per connection.
    pub fn cache_statements(&self) -> bool {
        self.cache_statements
    }

    /// Enable or disable prepared statement caching.
    pub fn with_cache_statements(mut self, cache: bool) -> Self {
        self.cache_statements = cache;
        self
    }

    /// Returns `true` if MySQL `CLIENT_DEPRECATE_EOF` was negotiated.
    pub fn deprecate_eof(&self) -> bool {
        self.deprecate_eof
    }

    pub fn with_deprecate_eof(mut self, deprecate_eof: bool) -> Self {
        self.deprecate_eof = deprecate_eof;
        self
    }
}

fn parse_fetch_size(value: &str) -> Result<u32, ParseError> {
    match value.trim().parse::<u32>() {
        Ok(0) | Err(_) => Err(ParseError::new("fetch size must be a positive integer")),
        Ok(ok) => Ok(ok),
    }
}

fn parse_bool(value: &str) -> Result<bool, ParseError> {
    match value.trim() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(ParseError::new(format!("invalid boolean {value:?}"))),
    }
}

impl std::str::FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error when parsing config.
pub struct ParseError {
    pub(crate) reason: Cow<'static,str>,
}

impl ParseError {
    fn new(reason: impl Into<Cow<'static,str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "failed to parse config: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_pairs() {
        let config = Config::parse("fetch_size=8&deprecate_eof=off").unwrap();
        assert_eq!(config.fetch_size(), 8);
        assert!(config.cache_statements());
        assert!(!config.deprecate_eof());
    }

    #[test]
    fn empty_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn reject_invalid() {
        assert!(Config::parse("fetch_size=0").is_err());
        assert!(Config::parse("fetch_size").is_err());
        assert!(Config::parse("color=blue").is_err());
        assert!("cache_statements=maybe".parse::<Config>().is_err());
    }
}
