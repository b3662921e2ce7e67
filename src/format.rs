//! Human-readable sizes, timestamps and markdown for rendered pages.

use chrono::{DateTime, Local, TimeZone, Utc};
use humansize::{format_size, BINARY};
use pulldown_cmark::{html, Options, Parser};

/// Formats a byte count as KiB, MiB, ... or `-` when unknown.
pub fn human_size(size: Option<u64>) -> String {
    match size {
        Some(bytes) => format_size(bytes, BINARY),
        None => "-".to_string(),
    }
}

/// Formats a millisecond timestamp with a strftime pattern, or as a relative
/// time ("3 hours ago") when `relative` is set. `-` when unknown.
pub fn human_time(millis: Option<i64>, pattern: &str, relative: bool) -> String {
    let Some(millis) = millis else {
        return "-".to_string();
    };
    let Some(utc) = Utc.timestamp_millis_opt(millis).single() else {
        return "-".to_string();
    };
    if relative {
        return relative_time(utc, Utc::now());
    }
    let local: DateTime<Local> = utc.into();
    local.format(pattern).to_string()
}

/// Full timestamp used in tooltips.
pub fn exact_time(millis: Option<i64>) -> String {
    human_time(millis, "%Y-%m-%d %H:%M:%S", false)
}

pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let (future, seconds) = if seconds < 0 {
        (true, -seconds)
    } else {
        (false, seconds)
    };

    let (amount, unit) = match seconds {
        0..=44 => return "a few seconds ago".to_string(),
        45..=3_599 => ((seconds + 30) / 60, "minute"),
        3_600..=86_399 => ((seconds + 1_800) / 3_600, "hour"),
        86_400..=2_591_999 => ((seconds + 43_200) / 86_400, "day"),
        2_592_000..=31_535_999 => ((seconds + 1_296_000) / 2_592_000, "month"),
        _ => ((seconds + 15_768_000) / 31_536_000, "year"),
    };
    let amount = amount.max(1);
    let plural = if amount == 1 { "" } else { "s" };
    if future {
        format!("in {amount} {unit}{plural}")
    } else {
        format!("{amount} {unit}{plural} ago")
    }
}

/// Converts markdown to HTML with dangerous markup removed.
pub fn markdown_to_safe_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);

    ammonia::clean(&html_output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(Some(0)), "0 B");
        assert_eq!(human_size(Some(2048)), "2 KiB");
        assert_eq!(human_size(None), "-");
    }

    #[test]
    fn unknown_times_render_as_dash() {
        assert_eq!(human_time(None, "%Y", false), "-");
    }

    #[test]
    fn relative_times_round_to_the_nearest_unit() {
        let now = Utc::now();
        assert_eq!(relative_time(now - Duration::seconds(10), now), "a few seconds ago");
        assert_eq!(relative_time(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(relative_time(now - Duration::hours(2), now), "2 hours ago");
        assert_eq!(relative_time(now - Duration::days(3), now), "3 days ago");
        assert_eq!(relative_time(now + Duration::days(1), now), "in 1 day");
    }

    #[test]
    fn markdown_is_sanitized() {
        let html = markdown_to_safe_html("# Title\n\n<script>alert(1)</script>\n\n**bold**");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(!html.contains("<script>"));
    }
}
