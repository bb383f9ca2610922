/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Time and duration arguments.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Parse a duration string like "90d", "24h", "1h30m" into a chrono::Duration.
///
/// Supported units: `d`, `h`, `m`, `s`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let mut total = Duration::zero();
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }
        if current_num.is_empty() {
            return Err(anyhow!(
                "Invalid duration format: expected number before '{}'",
                c
            ));
        }

        let num: i64 = current_num
            .parse()
            .with_context(|| format!("Invalid number in duration: {}", current_num))?;
        current_num.clear();

        total = total
            + match c {
                'd' => Duration::days(num),
                'h' => Duration::hours(num),
                'm' => Duration::minutes(num),
                's' => Duration::seconds(num),
                _ => return Err(anyhow!("Unknown duration unit: '{}'. Use d, h, m, or s", c)),
            };
    }

    if !current_num.is_empty() {
        return Err(anyhow!(
            "Duration '{}' is missing a unit. Use d (days), h (hours), m (minutes), or s (seconds)",
            s
        ));
    }

    if total == Duration::zero() {
        return Err(anyhow!("Duration must be greater than zero"));
    }

    Ok(total)
}

/// Parses a time argument into epoch milliseconds.
///
/// Accepts `now`, `now-<duration>`, `now+<duration>`, an integer number of
/// milliseconds, or an RFC 3339 timestamp.
pub fn parse_time_ms(s: &str, now_ms: i64) -> Result<i64> {
    let s = s.trim();

    if s.eq_ignore_ascii_case("now") {
        return Ok(now_ms);
    }
    if let Some(rest) = s.strip_prefix("now-") {
        return Ok(now_ms - parse_duration(rest)?.num_milliseconds());
    }
    if let Some(rest) = s.strip_prefix("now+") {
        return Ok(now_ms + parse_duration(rest)?.num_milliseconds());
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }

    DateTime::parse_from_rfc3339(s)
        .map(|t| t.timestamp_millis())
        .with_context(|| format!("Invalid time '{}': expected now, milliseconds or RFC 3339", s))
}

/// Formats epoch milliseconds as RFC 3339.
pub fn format_time_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
