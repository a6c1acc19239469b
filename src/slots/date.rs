//! DATE_RANGE slot.
//!
//! Recognized forms, all resolved to inclusive calendar bounds:
//!
//! | Form | Example |
//! |------|---------|
//! | ISO / US day | `2024-03-15`, `03/15/2024` |
//! | Written day | `March 15, 2024`, `15 March 2024`, `January 1st 2024` |
//! | Month | `February 2024` |
//! | Year | `2024` |
//! | Quarter | `Q1 2023`, `first quarter of 2022`, `last quarter of 2021` |
//! | Season | `summer of 2021` |
//! | Relative | `today`, `yesterday`, `last month`, `this year`, `last 30 days`, `this quarter` |
//! | Open / range | `before X`, `after X`, `since X`, `on or after X`, `between X and Y`, `from X to Y` |

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{NlsqlError, NlsqlResult};
use crate::normalizer::Normalized;

const SLOT: &str = "date range";

/// Inclusive date bounds; at least one side is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::between(date, date)
    }

    pub fn is_single_day(&self) -> bool {
        self.start.is_some() && self.start == self.end
    }
}

/// Closed bounds of a point expression.
type Span = (NaiveDate, NaiveDate);

pub(super) fn detect(n: &Normalized, from: usize) -> bool {
    (from..n.len()).any(|i| {
        let t = n.tokens[i].text.as_str();
        is_iso(t)
            || is_us(t)
            || year(t).is_some() && !super::numeric::comparator_before(n, i)
            || quarter_token(t).is_some()
            || season(t).is_some()
            || matches!(t, "today" | "yesterday")
            || month(t).is_some() && (t != "may" || adjacent_number(n, i))
            || matches!(t, "last" | "past" | "previous" | "this")
                && n.text(i + 1).is_some_and(|u| {
                    unit(u).is_some() || u == "quarter" || t != "this" && u.parse::<u32>().is_ok()
                })
    })
}

pub(super) fn extract(
    n: &Normalized,
    from: usize,
    today: NaiveDate,
) -> NlsqlResult<Option<(DateRange, Range<usize>)>> {
    let parser = DateParser { n, today };
    for i in from..n.len() {
        if let Some((range, end)) = parser.expression(i)? {
            tracing::debug!("Date range {:?} from tokens {}..{}", range, i, end);
            return Ok(Some((range, i..end)));
        }
    }
    Ok(None)
}

struct DateParser<'a> {
    n: &'a Normalized,
    today: NaiveDate,
}

impl DateParser<'_> {
    fn text(&self, i: usize) -> Option<&str> {
        self.n.text(i)
    }

    fn fail(&self, span: Range<usize>, reason: &str) -> NlsqlError {
        let end = span.end.min(self.n.len());
        let text: Vec<&str> = self.n.tokens[span.start.min(end)..end]
            .iter()
            .map(|t| t.raw.as_str())
            .collect();
        NlsqlError::slot_parse(SLOT, text.join(" "), reason)
    }

    fn skip_article(&self, i: usize) -> usize {
        if self.text(i) == Some("the") { i + 1 } else { i }
    }

    /// Range expression starting at `i`, with its end index.
    fn expression(&self, i: usize) -> NlsqlResult<Option<(DateRange, usize)>> {
        let n = self.n;
        let (operand_at, kind) = if n.phrase_at(i, &["on", "or", "after"]) {
            (i + 3, Bound::From)
        } else if n.phrase_at(i, &["on", "or", "before"]) {
            (i + 3, Bound::Through)
        } else {
            match self.text(i) {
                Some("between") => (i + 1, Bound::Between),
                Some("before") => (i + 1, Bound::Before),
                Some("after") => (i + 1, Bound::After),
                Some("since") => (i + 1, Bound::From),
                Some("from") => (i + 1, Bound::FromTo),
                _ => {
                    return Ok(self
                        .point(i)?
                        .map(|((s, e), end)| (DateRange::between(s, e), end)))
                }
            }
        };

        let Some(((start, end), next)) = self.point(self.skip_article(operand_at))? else {
            return Ok(None);
        };

        let range = match kind {
            Bound::From => DateRange { start: Some(start), end: None },
            Bound::Through => DateRange { start: None, end: Some(end) },
            Bound::Before => DateRange { start: None, end: start.pred_opt() },
            Bound::After => DateRange { start: end.succ_opt(), end: None },
            Bound::Between | Bound::FromTo => {
                let joiner = self.text(next);
                let joined = match kind {
                    Bound::Between => joiner == Some("and"),
                    _ => matches!(joiner, Some("to" | "through" | "until")),
                };
                if !joined {
                    if kind == Bound::Between {
                        return Err(self.fail(i..next, "expected 'and' closing the range"));
                    }
                    return Ok(Some((DateRange { start: Some(start), end: None }, next)));
                }
                let Some(((_, last), after)) = self.point(self.skip_article(next + 1))? else {
                    return Err(self.fail(i..next + 2, "range has no end date"));
                };
                if last < start {
                    return Err(self.fail(i..after, "range ends before it starts"));
                }
                return Ok(Some((DateRange::between(start, last), after)));
            }
        };
        if range.start.is_none() && range.end.is_none() {
            return Err(self.fail(i..next, "date out of range"));
        }
        Ok(Some((range, next)))
    }

    /// A single calendar span starting at `i`.
    fn point(&self, i: usize) -> NlsqlResult<Option<(Span, usize)>> {
        let Some(t) = self.text(i) else {
            return Ok(None);
        };

        if is_iso(t) {
            let d = NaiveDate::parse_from_str(t, "%Y-%m-%d")
                .map_err(|_| self.fail(i..i + 1, "not a calendar date"))?;
            return Ok(Some(((d, d), i + 1)));
        }
        if is_us(t) {
            let d = NaiveDate::parse_from_str(t, "%m/%d/%Y")
                .map_err(|_| self.fail(i..i + 1, "not a calendar date"))?;
            return Ok(Some(((d, d), i + 1)));
        }

        match t {
            "today" => return Ok(Some(((self.today, self.today), i + 1))),
            "yesterday" => {
                let d = self
                    .today
                    .pred_opt()
                    .ok_or_else(|| self.fail(i..i + 1, "date out of range"))?;
                return Ok(Some(((d, d), i + 1)));
            }
            "last" | "past" | "previous" | "this" => return self.relative(i),
            _ => {}
        }

        if let Some(q) = ordinal_quarter(t) {
            if self.text(i + 1) == Some("quarter") {
                return self.with_year(i, i + 2, "quarter", |y| quarter_bounds(y, q));
            }
        }
        if let Some(q) = quarter_token(t) {
            return self.with_year(i, i + 1, "quarter", |y| quarter_bounds(y, q));
        }
        if let Some(s) = season(t) {
            return self.with_year(i, i + 1, "season", |y| season_bounds(y, s));
        }

        if let Some(m) = month(t) {
            return self.month_first(i, m);
        }
        if let Some(d) = self.text(i).and_then(day) {
            if let Some(m) = self.text(i + 1).and_then(month) {
                let Some(y) = self.text(i + 2).and_then(year) else {
                    return Err(self.fail(i..i + 2, "month without a year"));
                };
                let date = NaiveDate::from_ymd_opt(y, m, d)
                    .ok_or_else(|| self.fail(i..i + 3, "not a calendar date"))?;
                return Ok(Some(((date, date), i + 3)));
            }
            return Ok(None);
        }

        if let Some(y) = year(t) {
            if super::numeric::comparator_before(self.n, i) {
                return Ok(None);
            }
            return Ok(year_bounds(y).map(|b| (b, i + 1)));
        }
        Ok(None)
    }

    /// `March 15th, 2024` or `February 2024`.
    fn month_first(&self, i: usize, m: u32) -> NlsqlResult<Option<(Span, usize)>> {
        let mut j = i + 1;
        let d = self.text(j).and_then(day);
        if d.is_some() {
            j += 1;
        }
        let Some(y) = self.text(j).and_then(year) else {
            // "may" is only a month when a number sits next to it
            if self.text(i) == Some("may") && d.is_none() {
                return Ok(None);
            }
            return Err(self.fail(i..j, "month without a year"));
        };
        let span = match d {
            Some(d) => {
                let date = NaiveDate::from_ymd_opt(y, m, d)
                    .ok_or_else(|| self.fail(i..j + 1, "not a calendar date"))?;
                (date, date)
            }
            None => month_bounds(y, m).ok_or_else(|| self.fail(i..j + 1, "date out of range"))?,
        };
        Ok(Some((span, j + 1)))
    }

    /// Quarter or season followed by `[of] YEAR`.
    fn with_year(
        &self,
        i: usize,
        mut j: usize,
        what: &str,
        bounds: impl Fn(i32) -> Option<Span>,
    ) -> NlsqlResult<Option<(Span, usize)>> {
        if self.text(j) == Some("of") {
            j += 1;
        }
        let Some(y) = self.text(j).and_then(year) else {
            return Err(self.fail(i..j, &format!("{} without a year", what)));
        };
        let span = bounds(y).ok_or_else(|| self.fail(i..j + 1, "date out of range"))?;
        Ok(Some((span, j + 1)))
    }

    /// `last month`, `this year`, `last 30 days`, `last quarter of 2021`.
    fn relative(&self, i: usize) -> NlsqlResult<Option<(Span, usize)>> {
        let today = self.today;
        let current = self.text(i) == Some("this");
        let out_of_range = || self.fail(i..i + 2, "date out of range");

        match self.text(i + 1) {
            Some("quarter") => {
                if !current && self.text(i + 2) == Some("of") {
                    return self.with_year(i, i + 2, "quarter", |y| quarter_bounds(y, 4));
                }
                let q = (today.month0() / 3) + 1;
                let (y, q) = match (current, q) {
                    (true, q) => (today.year(), q),
                    (false, 1) => (today.year() - 1, 4),
                    (false, q) => (today.year(), q - 1),
                };
                let span = quarter_bounds(y, q).ok_or_else(out_of_range)?;
                Ok(Some((span, i + 2)))
            }
            Some(u) if unit(u).is_some() => {
                let span = match (unit(u), current) {
                    (Some(Unit::Day), _) => (today, today),
                    (Some(Unit::Week), true) => {
                        let back = u64::from(today.weekday().num_days_from_monday());
                        (today.checked_sub_days(Days::new(back)).ok_or_else(out_of_range)?, today)
                    }
                    (Some(Unit::Week), false) => {
                        (today.checked_sub_days(Days::new(7)).ok_or_else(out_of_range)?, today)
                    }
                    (Some(Unit::Month), true) => {
                        month_bounds(today.year(), today.month()).ok_or_else(out_of_range)?
                    }
                    (Some(Unit::Month), false) => {
                        let prev = today
                            .checked_sub_months(Months::new(1))
                            .ok_or_else(out_of_range)?;
                        month_bounds(prev.year(), prev.month()).ok_or_else(out_of_range)?
                    }
                    (Some(Unit::Year), true) => year_bounds(today.year()).ok_or_else(out_of_range)?,
                    (Some(Unit::Year), false) => {
                        year_bounds(today.year() - 1).ok_or_else(out_of_range)?
                    }
                    (None, _) => return Ok(None),
                };
                Ok(Some((span, i + 2)))
            }
            Some(num) if !current => {
                let Ok(count) = num.parse::<u32>() else {
                    return Ok(None);
                };
                let Some(u) = self.text(i + 2).and_then(unit) else {
                    return Err(self.fail(i..i + 3, "expected days, weeks, months or years"));
                };
                let start = match u {
                    Unit::Day => today.checked_sub_days(Days::new(u64::from(count))),
                    Unit::Week => today.checked_sub_days(Days::new(u64::from(count) * 7)),
                    Unit::Month => today.checked_sub_months(Months::new(count)),
                    Unit::Year => today.checked_sub_months(Months::new(count.saturating_mul(12))),
                };
                let start = start.ok_or_else(|| self.fail(i..i + 3, "date out of range"))?;
                Ok(Some(((start, today), i + 3)))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Between,
    FromTo,
    From,
    Through,
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Day,
    Week,
    Month,
    Year,
}

fn unit(t: &str) -> Option<Unit> {
    match t {
        "day" | "days" => Some(Unit::Day),
        "week" | "weeks" => Some(Unit::Week),
        "month" | "months" => Some(Unit::Month),
        "year" | "years" => Some(Unit::Year),
        _ => None,
    }
}

fn is_iso(t: &str) -> bool {
    let parts: Vec<&str> = t.split('-').collect();
    parts.len() == 3
        && parts[0].len() == 4
        && parts.iter().all(|p| !p.is_empty() && p.len() <= 4 && p.bytes().all(|b| b.is_ascii_digit()))
}

fn is_us(t: &str) -> bool {
    let parts: Vec<&str> = t.split('/').collect();
    parts.len() == 3
        && parts[2].len() == 4
        && parts.iter().all(|p| !p.is_empty() && p.len() <= 4 && p.bytes().all(|b| b.is_ascii_digit()))
}

fn year(t: &str) -> Option<i32> {
    if t.len() != 4 {
        return None;
    }
    t.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y))
}

/// `1`, `15th`, `2nd`.
fn day(t: &str) -> Option<u32> {
    let digits = t
        .strip_suffix("st")
        .or_else(|| t.strip_suffix("nd"))
        .or_else(|| t.strip_suffix("rd"))
        .or_else(|| t.strip_suffix("th"))
        .unwrap_or(t);
    if digits.is_empty() || digits.len() > 2 {
        return None;
    }
    digits.parse::<u32>().ok().filter(|d| (1..=31).contains(d))
}

fn month(t: &str) -> Option<u32> {
    Some(match t {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    })
}

/// `may 15`, `may 2024` or `15 may`.
fn adjacent_number(n: &Normalized, i: usize) -> bool {
    n.text(i + 1).is_some_and(|t| day(t).is_some() || year(t).is_some())
        || i > 0 && n.text(i - 1).is_some_and(|t| day(t).is_some())
}

fn quarter_token(t: &str) -> Option<u32> {
    match t {
        "q1" => Some(1),
        "q2" => Some(2),
        "q3" => Some(3),
        "q4" => Some(4),
        _ => None,
    }
}

fn ordinal_quarter(t: &str) -> Option<u32> {
    match t {
        "first" | "1st" => Some(1),
        "second" | "2nd" => Some(2),
        "third" | "3rd" => Some(3),
        "fourth" | "4th" | "final" => Some(4),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

fn season(t: &str) -> Option<Season> {
    match t {
        "spring" => Some(Season::Spring),
        "summer" => Some(Season::Summer),
        "fall" | "autumn" => Some(Season::Autumn),
        "winter" => Some(Season::Winter),
        _ => None,
    }
}

fn month_bounds(y: i32, m: u32) -> Option<Span> {
    let start = NaiveDate::from_ymd_opt(y, m, 1)?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

fn year_bounds(y: i32) -> Option<Span> {
    Some((NaiveDate::from_ymd_opt(y, 1, 1)?, NaiveDate::from_ymd_opt(y, 12, 31)?))
}

fn quarter_bounds(y: i32, q: u32) -> Option<Span> {
    let first = month_bounds(y, (q - 1) * 3 + 1)?;
    let last = month_bounds(y, (q - 1) * 3 + 3)?;
    Some((first.0, last.1))
}

/// Meteorological seasons; winter of Y runs December Y to February Y+1.
fn season_bounds(y: i32, s: Season) -> Option<Span> {
    let (from, to) = match s {
        Season::Spring => (month_bounds(y, 3)?, month_bounds(y, 5)?),
        Season::Summer => (month_bounds(y, 6)?, month_bounds(y, 8)?),
        Season::Autumn => (month_bounds(y, 9)?, month_bounds(y, 11)?),
        Season::Winter => (month_bounds(y, 12)?, month_bounds(y + 1, 2)?),
    };
    Some((from.0, to.1))
}
