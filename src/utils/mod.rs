use chrono::{DateTime, Utc};

/// Formats a timestamp as `dd-mm-yyyy` (UTC date).
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Escapes the characters Telegram MarkdownV2 reserves, so user-entered
/// text is shown literally.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "_*[]()~`>#+-=|{}.!\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Whole days from `now` until `date`; negative once expired.
pub fn days_until(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (date.date_naive() - now.date_naive()).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_markdown("Vitamin C 1.5g (x2)!"), "Vitamin C 1\\.5g \\(x2\\)\\!");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[test]
    fn formats_day_month_year() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
        assert_eq!(format_date(date), "01-03-2024");
    }

    #[test]
    fn counts_calendar_days() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap();
        let soon = Utc.with_ymd_and_hms(2024, 1, 3, 6, 0, 0).unwrap();
        assert_eq!(days_until(soon, now), 2);
        assert_eq!(days_until(now, soon), -2);
    }
}
