use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Rides wait in `requested` until a driver accepts one from the listing.
    Pull,
    /// Rides are assigned to the nearest available driver at request time.
    Push,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(DispatchMode::Pull),
            "push" => Ok(DispatchMode::Push),
            other => Err(format!("unknown dispatch mode {other:?}, expected pull or push")),
        }
    }
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Pull => "pull",
            DispatchMode::Push => "push",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FareConfig {
    Random { min: Decimal, max: Decimal },
    Fixed(Decimal),
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub max_attempts: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Pull,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub event_buffer_size: usize,
    pub dispatch: DispatchConfig,
    pub fare: FareConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let dispatch = DispatchConfig {
            mode: parse_or_default("DISPATCH_MODE", DispatchMode::Pull)?,
            max_attempts: parse_or_default("MAX_DISPATCH_ATTEMPTS", 5)?,
        };
        if dispatch.max_attempts == 0 {
            return Err(AppError::Internal(
                "MAX_DISPATCH_ATTEMPTS must be > 0".to_string(),
            ));
        }

        let fare_mode = env::var("FARE_MODE").unwrap_or_else(|_| "random".to_string());
        let fare = match fare_mode.as_str() {
            "random" => {
                let min = parse_or_default("FARE_MIN", Decimal::new(50_000, 0))?;
                let max = parse_or_default("FARE_MAX", Decimal::new(200_000, 0))?;
                if min > max || min.is_sign_negative() {
                    return Err(AppError::Internal(format!(
                        "invalid fare range {min}..{max}"
                    )));
                }
                FareConfig::Random { min, max }
            }
            "fixed" => FareConfig::Fixed(parse_or_default("FARE_FIXED", Decimal::new(100_000, 0))?),
            other => {
                return Err(AppError::Internal(format!(
                    "invalid FARE_MODE {other:?}, expected random or fixed"
                )))
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch,
            fare,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::DispatchMode;

    #[test]
    fn dispatch_mode_parses_case_insensitively() {
        assert_eq!("Push".parse::<DispatchMode>(), Ok(DispatchMode::Push));
        assert_eq!(" pull ".parse::<DispatchMode>(), Ok(DispatchMode::Pull));
        assert!("broadcast".parse::<DispatchMode>().is_err());
    }
}
