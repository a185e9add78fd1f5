//! Cron schedule validation
//!
//! CronWorkflows carry a classic five-field cron expression
//! (minute, hour, day of month, month, day of week). Kubernetes accepts the
//! expression as an opaque string, so we validate it client-side to fail
//! fast on typos instead of producing a CronJob that never fires.

use crate::error::ConfigError;

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [Field; 5] = [
    Field { name: "minute", min: 0, max: 59 },
    Field { name: "hour", min: 0, max: 23 },
    Field { name: "day of month", min: 1, max: 31 },
    Field { name: "month", min: 1, max: 12 },
    Field { name: "day of week", min: 0, max: 6 },
];

/// Validate a five-field cron expression, returning it unchanged on success.
pub fn validate_schedule(schedule: &str) -> Result<&str, ConfigError> {
    let parts: Vec<&str> = schedule.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(ConfigError::Schedule(format!(
            "{schedule:?} must have exactly 5 fields (minute hour day month weekday)"
        )));
    }

    for (part, field) in parts.iter().zip(FIELDS.iter()) {
        validate_field(part, field).map_err(|reason| {
            ConfigError::Schedule(format!(
                "{schedule:?} has an invalid {} field {part:?}: {reason}",
                field.name
            ))
        })?;
    }

    Ok(schedule)
}

fn validate_field(part: &str, field: &Field) -> Result<(), String> {
    for item in part.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        if let Some(step) = step {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("step {step:?} is not a number"))?;
            if step == 0 {
                return Err("step must be greater than 0".to_string());
            }
            // Steps only make sense over a range or the full wildcard.
            if base != "*" && !base.contains('-') {
                return Err(format!("step on single value {base:?}"));
            }
        }

        match base {
            "*" => {}
            range if range.contains('-') => {
                let (lo, hi) = range
                    .split_once('-')
                    .ok_or_else(|| format!("malformed range {range:?}"))?;
                let lo = parse_bounded(lo, field)?;
                let hi = parse_bounded(hi, field)?;
                if lo > hi {
                    return Err(format!("range {range:?} is inverted"));
                }
            }
            value => {
                parse_bounded(value, field)?;
            }
        }
    }
    Ok(())
}

fn parse_bounded(value: &str, field: &Field) -> Result<u32, String> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| format!("{value:?} is not a number"))?;
    if parsed < field.min || parsed > field.max {
        return Err(format!(
            "{parsed} is outside {}..={}",
            field.min, field.max
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_schedules() {
        for s in ["0 12 * * *", "*/5 * * * *", "15,45 8-18 * * 1-5", "0 0 1 1 0"] {
            assert!(validate_schedule(s).is_ok(), "{s} should be valid");
        }
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(validate_schedule("0 12 * *").is_err());
        assert!(validate_schedule("0 12 * * * *").is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(validate_schedule("60 * * * *").is_err());
        assert!(validate_schedule("* 24 * * *").is_err());
        assert!(validate_schedule("* * 0 * *").is_err());
        assert!(validate_schedule("* * * 13 *").is_err());
        assert!(validate_schedule("* * * * 7").is_err());
    }

    #[test]
    fn test_rejects_malformed_items() {
        assert!(validate_schedule("5/2 * * * *").is_err());
        assert!(validate_schedule("*/0 * * * *").is_err());
        assert!(validate_schedule("10-5 * * * *").is_err());
        assert!(validate_schedule("a * * * *").is_err());
    }
}
