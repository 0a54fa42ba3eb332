//! Timestamp layouts
//!
//! A layout is either a chrono strftime pattern (anything with a `%`
//! directive chrono recognises) or a reference-time layout written against `Mon Jan 2 15:04:05 MST 2006`,
//! e.g. `2006-01-02T15:04:05Z07:00`. Reference layouts are translated to
//! strftime once, when the layout is built.

use anyhow::{Context, Result, anyhow, bail};
use chrono::format::{Fixed, Item, ParseErrorKind, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use std::fmt::{Display, Write};
use std::str::FromStr;

pub const RFC3339_LAYOUT: &str = "2006-01-02T15:04:05Z07:00";
pub const DATETIME_LAYOUT: &str = "2006-01-02 15:04:05";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Pattern(&'static str),
    /// `Z` for UTC, a numeric offset otherwise.
    Zulu { colon: bool },
}

// Longest match first wherever two entries share a prefix.
const REFERENCE_TOKENS: &[(&str, Token)] = &[
    ("January", Token::Pattern("%B")),
    ("Jan", Token::Pattern("%b")),
    ("Monday", Token::Pattern("%A")),
    ("Mon", Token::Pattern("%a")),
    ("MST", Token::Pattern("%Z")),
    ("2006", Token::Pattern("%Y")),
    ("_2006", Token::Pattern("_%Y")),
    ("_2", Token::Pattern("%e")),
    ("002", Token::Pattern("%j")),
    ("01", Token::Pattern("%m")),
    ("02", Token::Pattern("%d")),
    ("03", Token::Pattern("%I")),
    ("04", Token::Pattern("%M")),
    ("05", Token::Pattern("%S")),
    ("06", Token::Pattern("%y")),
    ("15", Token::Pattern("%H")),
    ("PM", Token::Pattern("%p")),
    ("pm", Token::Pattern("%P")),
    ("Z07:00", Token::Zulu { colon: true }),
    ("Z0700", Token::Zulu { colon: false }),
    ("-07:00", Token::Pattern("%:z")),
    ("-0700", Token::Pattern("%z")),
    (".000000000", Token::Pattern("%.9f")),
    (".000000", Token::Pattern("%.6f")),
    (".000", Token::Pattern("%.3f")),
    (".999999999", Token::Pattern("%.f")),
    (".999999", Token::Pattern("%.f")),
    (".999", Token::Pattern("%.f")),
    ("1", Token::Pattern("%-m")),
    ("2", Token::Pattern("%-d")),
    ("3", Token::Pattern("%-I")),
    ("4", Token::Pattern("%-M")),
    ("5", Token::Pattern("%-S")),
];

#[derive(Debug, Clone, PartialEq)]
enum Chunk {
    Pattern(String),
    Zulu { colon: bool },
}

/// A parsed timestamp layout, usable for both parsing and formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    source: String,
    chunks: Vec<Chunk>,
    parse_pattern: String,
    has_offset: bool,
}

impl Layout {
    pub fn new(layout: &str) -> Result<Self> {
        if layout.trim().is_empty() {
            bail!("Timestamp layout is empty");
        }

        let strftime = has_directive(layout);
        let chunks = if strftime {
            vec![Chunk::Pattern(layout.to_string())]
        } else {
            translate_reference(layout)
        };

        let translated: String = chunks
            .iter()
            .map(|chunk| match chunk {
                Chunk::Pattern(p) => p.as_str(),
                Chunk::Zulu { .. } => "%#z",
            })
            .collect();
        // Reference layouts accept fractional seconds the layout doesn't spell out.
        let parse_pattern = if strftime {
            translated
        } else {
            optional_fraction(&translated)
        };

        let permissive_offset = StrftimeItems::new("%#z").next();
        let mut has_offset = false;
        for item in StrftimeItems::new(&parse_pattern) {
            match item {
                Item::Error => bail!("Invalid timestamp layout: {layout}"),
                Item::Fixed(ref fixed) if is_offset(fixed) => has_offset = true,
                ref other if Some(other) == permissive_offset.as_ref() => has_offset = true,
                _ => {}
            }
        }

        Ok(Self {
            source: layout.to_string(),
            chunks,
            parse_pattern,
            has_offset,
        })
    }

    /// Parses `value`; layouts without an offset are read as UTC and layouts
    /// without a time of day as midnight.
    pub fn parse(&self, value: &str) -> Result<DateTime<FixedOffset>> {
        let value = value.trim();
        let context = || format!("Failed to parse '{value}' with layout '{}'", self.source);

        if self.has_offset {
            return DateTime::parse_from_str(value, &self.parse_pattern).with_context(context);
        }

        match NaiveDateTime::parse_from_str(value, &self.parse_pattern) {
            Ok(naive) => Ok(naive.and_utc().fixed_offset()),
            Err(e) if e.kind() == ParseErrorKind::NotEnough => {
                let date = NaiveDate::parse_from_str(value, &self.parse_pattern)
                    .with_context(context)?;
                let midnight = date
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| anyhow!("No midnight for {date}"))?;
                Ok(midnight.and_utc().fixed_offset())
            }
            Err(e) => Err(e).with_context(context),
        }
    }

    pub fn format(&self, value: &DateTime<FixedOffset>) -> Result<String> {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Pattern(p) => write!(out, "{}", value.format(p))
                    .map_err(|_| anyhow!("Layout '{}' cannot format {value}", self.source))?,
                Chunk::Zulu { .. } if value.offset().local_minus_utc() == 0 => out.push('Z'),
                Chunk::Zulu { colon } => {
                    let pattern = if *colon { "%:z" } else { "%z" };
                    write!(out, "{}", value.format(pattern))?;
                }
            }
        }
        Ok(out)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::new(s)
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Parses `value` with `input` and renders it with `output`.
pub fn reformat(value: &str, input: &Layout, output: &Layout) -> Result<String> {
    let parsed = input.parse(value)?;
    output.format(&parsed)
}

/// True when `layout` holds at least one strftime field, such as `%Y`.
/// Lone `%` characters without one are literal text of a reference layout.
fn has_directive(layout: &str) -> bool {
    layout.contains('%')
        && StrftimeItems::new(layout).any(|item| matches!(item, Item::Numeric(..) | Item::Fixed(_)))
}

/// Follows every seconds field with an optional `%.f` unless a fraction is
/// already spelled out.
fn optional_fraction(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut rest = pattern;

    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];

        let spec_len = match rest.as_bytes().get(1) {
            Some(b'-' | b'_' | b'0') => 3,
            _ => 2,
        };
        let spec = rest.get(..spec_len).unwrap_or(rest);
        out.push_str(spec);
        rest = &rest[spec.len()..];

        if spec.ends_with('S') && !rest.starts_with("%.") {
            out.push_str("%.f");
        }
    }
    out.push_str(rest);
    out
}

fn is_offset(fixed: &Fixed) -> bool {
    matches!(
        fixed,
        Fixed::TimezoneOffset
            | Fixed::TimezoneOffsetColon
            | Fixed::TimezoneOffsetDoubleColon
            | Fixed::TimezoneOffsetTripleColon
            | Fixed::TimezoneOffsetColonZ
            | Fixed::TimezoneOffsetZ
            | Fixed::RFC2822
            | Fixed::RFC3339
    )
}

fn translate_reference(layout: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut pattern = String::new();
    let mut rest = layout;

    while let Some(c) = rest.chars().next() {
        let matched = REFERENCE_TOKENS
            .iter()
            .find(|(reference, _)| rest.starts_with(reference));

        match matched {
            Some((reference, Token::Pattern(p))) => {
                pattern.push_str(p);
                rest = &rest[reference.len()..];
            }
            Some((reference, Token::Zulu { colon })) => {
                if !pattern.is_empty() {
                    chunks.push(Chunk::Pattern(std::mem::take(&mut pattern)));
                }
                chunks.push(Chunk::Zulu { colon: *colon });
                rest = &rest[reference.len()..];
            }
            None => {
                if c == '%' {
                    pattern.push_str("%%");
                } else {
                    pattern.push(c);
                }
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    if !pattern.is_empty() {
        chunks.push(Chunk::Pattern(pattern));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(s: &str) -> Layout {
        Layout::new(s).unwrap()
    }

    #[test]
    fn test_translate_reference_layouts() {
        assert_eq!(layout(DATETIME_LAYOUT).parse_pattern, "%Y-%m-%d %H:%M:%S%.f");
        assert_eq!(layout(RFC3339_LAYOUT).parse_pattern, "%Y-%m-%dT%H:%M:%S%.f%#z");
        assert_eq!(layout("Jan 2, 2006 at 15:04 MST").parse_pattern, "%b %-d, %Y at %H:%M %Z");
        assert_eq!(layout("Monday 02/01/06 3:04PM").parse_pattern, "%A %d/%m/%y %-I:%M%p");
        assert_eq!(layout("15:04:05.000 -0700").parse_pattern, "%H:%M:%S%.3f %z");
        assert_eq!(layout("100% 2006").parse_pattern, "%-m00%% %Y");
        assert_eq!(layout("3:04:5 PM").parse_pattern, "%-I:%M:%-S%.f %p");
    }

    #[test]
    fn test_strftime_layouts_are_kept_verbatim() {
        assert_eq!(layout("%d/%m/%Y %H:%M:%S").parse_pattern, "%d/%m/%Y %H:%M:%S");
        assert_eq!(layout("%Y 100%%").parse_pattern, "%Y 100%%");
    }

    #[test]
    fn test_literal_percent_in_reference_layout() {
        let l = layout("pct% 2006-01-02");
        assert_eq!(l.parse_pattern, "pct%% %Y-%m-%d");
        let parsed = l.parse("pct% 2024-05-06").unwrap();
        assert_eq!(l.format(&parsed).unwrap(), "pct% 2024-05-06");
    }

    #[test]
    fn test_reference_layout_accepts_unlisted_fraction() {
        let rfc3339 = layout(RFC3339_LAYOUT);
        let datetime = layout(DATETIME_LAYOUT);

        let parsed = rfc3339.parse("2024-01-01T00:00:00.123Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 123);
        assert_eq!(datetime.format(&parsed).unwrap(), "2024-01-01 00:00:00");

        let parsed = datetime.parse("2024-01-01 00:00:00.5").unwrap();
        assert_eq!(datetime.format(&parsed).unwrap(), "2024-01-01 00:00:00");
        assert!(datetime.parse("2024-01-01 00:00:00").is_ok());
    }

    #[test]
    fn test_offset_detection() {
        assert!(layout(RFC3339_LAYOUT).has_offset);
        assert!(layout("2006-01-02 15:04:05 -07:00").has_offset);
        assert!(layout("%Y-%m-%dT%H:%M:%S%:z").has_offset);
        assert!(layout("%+").has_offset);
        assert!(!layout(DATETIME_LAYOUT).has_offset);
        assert!(!layout("%Y-%m-%d %H:%M:%S%.3f").has_offset);
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        assert!(Layout::new("").is_err());
        assert!(Layout::new("%Y-%Q").is_err());
        assert!("  ".parse::<Layout>().is_err());
    }

    #[test]
    fn test_iso_to_datetime() {
        let output = reformat(
            "2024-01-01T00:00:00+00:00",
            &layout(RFC3339_LAYOUT),
            &layout(DATETIME_LAYOUT),
        )
        .unwrap();
        assert_eq!(output, "2024-01-01 00:00:00");
    }

    #[test]
    fn test_offset_is_kept_not_converted() {
        let parsed = layout(RFC3339_LAYOUT)
            .parse("2024-03-10T08:15:30-05:00")
            .unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(
            layout(DATETIME_LAYOUT).format(&parsed).unwrap(),
            "2024-03-10 08:15:30"
        );
    }

    #[test]
    fn test_zulu_parse_and_format() {
        let rfc3339 = layout(RFC3339_LAYOUT);
        let parsed = rfc3339.parse("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(rfc3339.format(&parsed).unwrap(), "2024-01-01T12:00:00Z");

        let shifted = rfc3339.parse("2024-01-01T12:00:00+05:30").unwrap();
        assert_eq!(rfc3339.format(&shifted).unwrap(), "2024-01-01T12:00:00+05:30");

        let compact = layout("2006-01-02T15:04:05Z0700");
        let parsed = compact.parse("2024-01-01T12:00:00+0530").unwrap();
        assert_eq!(compact.format(&parsed).unwrap(), "2024-01-01T12:00:00+0530");
    }

    #[test]
    fn test_same_layout_reformat_is_idempotent() {
        let cases = [
            (RFC3339_LAYOUT, "2024-01-01T00:00:00+00:00"),
            (RFC3339_LAYOUT, "2023-07-14T23:59:59-07:00"),
            (DATETIME_LAYOUT, "2024-02-29 13:45:00"),
            ("Jan 2, 2006 15:04:05", "Feb 3, 2024 09:08:07"),
            ("%d/%m/%Y %H:%M", "31/12/1999 23:59"),
        ];

        for (raw, value) in cases {
            let l = layout(raw);
            let once = reformat(value, &l, &l).unwrap();
            let twice = reformat(&once, &l, &l).unwrap();
            assert_eq!(once, twice, "layout {raw}");
        }

        let l = layout(DATETIME_LAYOUT);
        assert_eq!(
            reformat("2024-02-29 13:45:00", &l, &l).unwrap(),
            "2024-02-29 13:45:00"
        );
    }

    #[test]
    fn test_date_only_layout_is_midnight_utc() {
        let parsed = layout("2006-01-02").parse("2024-05-06").unwrap();
        assert_eq!(
            layout(DATETIME_LAYOUT).format(&parsed).unwrap(),
            "2024-05-06 00:00:00"
        );
        assert_eq!(parsed.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_parse_failure_is_error() {
        let err = layout(RFC3339_LAYOUT)
            .parse("Jan 1, 2024 00:00:00 UTC")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        assert!(layout(DATETIME_LAYOUT).parse("").is_err());
    }
}
