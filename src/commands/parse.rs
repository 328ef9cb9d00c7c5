//! Free-form input contracts for the slash-command surface. All parsers are
//! pure; error messages are the user-visible reply text.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("対応していない形式です")]
    Time,

    #[error("interval は 1d2h3m の形式で指定してください (例: 1d / 2h / 30m / 1d2h3m)")]
    Interval,

    #[error("interval が大きすぎます")]
    IntervalTooLarge,

    #[error("amount は正の数か all で指定してください")]
    Amount,
}

/// Extract user ids from a free-form string: `<@id>` / `<@!id>` mentions
/// anywhere in the text, plus whitespace-separated bare decimal ids.
/// De-duplicated preserving insertion order.
pub fn parse_mention_ids(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' && i + 1 < bytes.len() && bytes[i + 1] == b'@' {
            let mut j = i + 2;
            if j < bytes.len() && bytes[j] == b'!' {
                j += 1;
            }
            let start = j;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > start && j < bytes.len() && bytes[j] == b'>' {
                ids.push(text[start..j].to_string());
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }

    for token in text.split_whitespace() {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            ids.push(token.to_string());
        }
    }

    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

/// Resolve a schedule time: `HH:MM` is the next such wall-clock time (today
/// or tomorrow), `YYYY-MM-DD HH:MM` is taken literally. `now` is the local
/// wall clock.
pub fn resolve_time(input: &str, now: NaiveDateTime) -> Result<NaiveDateTime, ParseError> {
    let input = input.trim();

    if let Ok(time) = NaiveTime::parse_from_str(input, "%H:%M") {
        let mut target = now.date().and_time(time);
        if target < now {
            target = target + Duration::hours(24);
        }
        return Ok(target);
    }

    if let Ok(datetime) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        return Ok(datetime);
    }

    Err(ParseError::Time)
}

/// Parse a reminder interval: a bare decimal is minutes, otherwise a strict
/// `[Nd][Nh][Nm]` concatenation with no intervening characters. Empty input
/// means one day.
pub fn parse_interval_minutes(input: &str) -> Result<i64, ParseError> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return Ok(1440);
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().map_err(|_| ParseError::IntervalTooLarge);
    }

    let bytes = s.as_bytes();
    let mut total: i64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start || i >= bytes.len() {
            return Err(ParseError::Interval);
        }
        let n: i64 = s[start..i].parse().map_err(|_| ParseError::IntervalTooLarge)?;
        let factor = match bytes[i] {
            b'd' => 24 * 60,
            b'h' => 60,
            b'm' => 1,
            _ => return Err(ParseError::Interval),
        };
        i += 1;
        total = n
            .checked_mul(factor)
            .and_then(|v| total.checked_add(v))
            .ok_or(ParseError::IntervalTooLarge)?;
    }
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeisanAmount {
    /// Repay the pair's full outstanding amount.
    All,
    Fixed(i64),
}

pub fn parse_seisan_amount(input: &str) -> Result<SeisanAmount, ParseError> {
    let s = input.trim();
    if s.eq_ignore_ascii_case("all") {
        return Ok(SeisanAmount::All);
    }
    match s.parse::<i64>() {
        Ok(v) if v > 0 => Ok(SeisanAmount::Fixed(v)),
        _ => Err(ParseError::Amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn mentions_and_bare_ids_mix_freely() {
        let ids = parse_mention_ids("<@111> <@!222>,333 hello 444");
        assert_eq!(ids, vec!["111", "222", "333", "444"]);
    }

    #[test]
    fn mention_ids_deduplicate_preserving_order() {
        let ids = parse_mention_ids("<@222> <@111> 222");
        assert_eq!(ids, vec!["222", "111"]);
    }

    #[test]
    fn adjacent_mentions_without_separators() {
        let ids = parse_mention_ids("<@1><@2><@3>");
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn non_numeric_tokens_are_ignored() {
        assert!(parse_mention_ids("hello there <@> 12a").is_empty());
    }

    fn noon(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn clock_time_later_today_stays_today() {
        let target = resolve_time("18:00", noon(10)).unwrap();
        assert_eq!(target, noon(10).date().and_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn clock_time_already_past_rolls_to_tomorrow() {
        let target = resolve_time("09:30", noon(10)).unwrap();
        assert_eq!(
            target,
            noon(10).date().succ_opt().unwrap().and_hms_opt(9, 30, 0).unwrap()
        );
    }

    #[test]
    fn full_datetime_is_taken_literally() {
        let target = resolve_time("2025-12-26 18:00", noon(10)).unwrap();
        assert_eq!(
            target,
            NaiveDate::from_ymd_opt(2025, 12, 26)
                .unwrap()
                .and_hms_opt(18, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn garbage_time_is_rejected() {
        assert_eq!(resolve_time("tomorrow", noon(10)), Err(ParseError::Time));
        assert_eq!(resolve_time("25:99", noon(10)), Err(ParseError::Time));
    }

    #[test]
    fn interval_accepts_bare_minutes() {
        assert_eq!(parse_interval_minutes("90"), Ok(90));
    }

    #[test]
    fn interval_accepts_dhm_concatenation() {
        assert_eq!(parse_interval_minutes("1d2h3m"), Ok(1563));
        assert_eq!(parse_interval_minutes("2h"), Ok(120));
        assert_eq!(parse_interval_minutes("1D"), Ok(1440));
    }

    #[test]
    fn empty_interval_defaults_to_one_day() {
        assert_eq!(parse_interval_minutes(""), Ok(1440));
    }

    #[test]
    fn interval_rejects_intervening_characters() {
        assert_eq!(parse_interval_minutes("1d 2h"), Err(ParseError::Interval));
        assert_eq!(parse_interval_minutes("2x"), Err(ParseError::Interval));
        assert_eq!(parse_interval_minutes("d2"), Err(ParseError::Interval));
    }

    #[test]
    fn huge_interval_overflows_cleanly() {
        assert_eq!(
            parse_interval_minutes("9999999999999999999d"),
            Err(ParseError::IntervalTooLarge)
        );
    }

    #[test]
    fn seisan_amount_contract() {
        assert_eq!(parse_seisan_amount("all"), Ok(SeisanAmount::All));
        assert_eq!(parse_seisan_amount("ALL"), Ok(SeisanAmount::All));
        assert_eq!(parse_seisan_amount("500"), Ok(SeisanAmount::Fixed(500)));
        assert_eq!(parse_seisan_amount("0"), Err(ParseError::Amount));
        assert_eq!(parse_seisan_amount("-5"), Err(ParseError::Amount));
        assert_eq!(parse_seisan_amount("abc"), Err(ParseError::Amount));
    }
}
