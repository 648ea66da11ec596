use async_trait::async_trait;
use std::time::Duration;

use super::{Executor, ExecutionContext};
use crate::error::ExecutionError;

/// Timers are capped for demo purposes — a misauthored multi-day duration
/// must not hang the process.
const MAX_DEMO_DELAY: Duration = Duration::from_secs(60);

pub struct TimerExecutor;

#[async_trait]
impl Executor for TimerExecutor {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), ExecutionError> {
        let spec = ctx.node.prop_str("timerDefinition").unwrap_or("PT0S");
        let delay = parse_timer(spec).unwrap_or(Duration::ZERO).min(MAX_DEMO_DELAY);

        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(ExecutionError::Cancelled(ctx.node.id.clone())),
        }
    }
}

/// Parses either an ISO-8601 duration (`PT5M`, `P1DT2H`) or an absolute
/// RFC-3339 instant, returning the delay from now.
pub fn parse_timer(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    if spec.starts_with('P') {
        return parse_iso8601_duration(spec);
    }
    let target = chrono::DateTime::parse_from_rfc3339(spec).ok()?;
    let now = chrono::Utc::now();
    let delta = target.with_timezone(&chrono::Utc) - now;
    Some(Duration::from_millis(delta.num_milliseconds().max(0) as u64))
}

/// Minimal `PnYnMnDTnHnMnS` parser covering the date/time designators used
/// by `timerIntermediateCatchEvent`. Years/months are treated as 365/30 days.
fn parse_iso8601_duration(spec: &str) -> Option<Duration> {
    let rest = spec.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut seconds: f64 = 0.0;
    seconds += sum_designators(date_part, &[('Y', 365.0 * 86400.0), ('M', 30.0 * 86400.0), ('D', 86400.0)])?;
    if let Some(t) = time_part {
        seconds += sum_designators(t, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    }
    Some(Duration::from_secs_f64(seconds.max(0.0)))
}

fn sum_designators(part: &str, designators: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }
        let value: f64 = if number.is_empty() { 0.0 } else { number.parse().ok()? };
        number.clear();
        let factor = designators.iter().find(|(d, _)| *d == ch)?.1;
        total += value * factor;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minutes_and_seconds() {
        assert_eq!(parse_iso8601_duration("PT5M"), Some(Duration::from_secs(300)));
        assert_eq!(parse_iso8601_duration("PT30S"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_combined_date_and_time() {
        assert_eq!(
            parse_iso8601_duration("P1DT2H"),
            Some(Duration::from_secs(86400 + 7200))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timer("not-a-timer").is_none());
    }
}
