use std::ascii;
use std::time::Duration;

/// Escapes non-printable bytes so payloads stay on one log line.
pub(crate) fn bytes_to_human_str(input: &[u8]) -> String {
    input
        .iter()
        .flat_map(|&c| ascii::escape_default(c))
        .map(char::from)
        .collect()
}

pub(crate) fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("not a number: {s:?}"))?;
    Duration::try_from_secs_f64(secs).map_err(|error| error.to_string())
}
