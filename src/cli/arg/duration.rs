use std::time::Duration;

/// Parse a duration such as `30s`, `1m`, `1.5h` or `1h30m`
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }

    if let Ok(seconds) = input.parse::<f64>() {
        return seconds_to_duration(input, seconds);
    }

    let mut seconds = 0.0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after_number) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_len);
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(DurationError::MissingUnit(input.to_string())),
            unit => {
                return Err(DurationError::UnknownUnit {
                    input: input.to_string(),
                    unit: unit.to_string(),
                })
            },
        };

        seconds += value * scale;
        rest = after_unit;
    }

    seconds_to_duration(input, seconds)
}

fn seconds_to_duration(input: &str, seconds: f64) -> Result<Duration, DurationError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| DurationError::Invalid(input.to_string()))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("Empty duration")]
    Empty,
    #[error("Invalid duration `{0}`, expected something like `30s`, `1m` or `1.5h`")]
    Invalid(String),
    #[error("Missing unit in duration `{0}`, valid units are `ns`, `us`, `ms`, `s`, `m` and `h`")]
    MissingUnit(String),
    #[error("Unknown unit `{unit}` in duration `{input}`, valid units are `ns`, `us`, `ms`, `s`, `m` and `h`")]
    UnknownUnit { input: String, unit: String },
}
