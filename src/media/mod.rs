//! Accept-header parsing and media-range matching.
//!
//! Implements the slice of RFC 7231 §5.3.2 content negotiation the dispatcher
//! needs: parse an `Accept` header into an ordered preference list, then test
//! concrete media types against each range. Parameters other than `q`
//! (`;charset=...` and friends) are ignored for matching purposes.

use std::fmt;

/// A single parsed media range from an `Accept` header.
///
/// Stored lower-cased with parameters stripped, so `Text/HTML;level=1`
/// becomes `text/html`.
///
/// # Examples
///
/// ```
/// use understudy::media::MediaRange;
///
/// let range = MediaRange::parse("application/*;q=0.8").unwrap();
/// assert!(range.matches("application/json"));
/// assert!(range.matches("Application/XML; charset=utf-8"));
/// assert!(!range.matches("text/plain"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRange {
    kind: String,
    subtype: String,
}

impl MediaRange {
    /// Parses one media range, ignoring any parameters.
    ///
    /// Returns `None` for entries that are not `type/subtype` shaped. The
    /// bare `*` some clients send is accepted as `*/*`.
    pub fn parse(range: &str) -> Option<Self> {
        let bare = strip_parameters(range);
        if bare.is_empty() {
            return None;
        }
        if bare == "*" {
            return Some(Self {
                kind: "*".to_owned(),
                subtype: "*".to_owned(),
            });
        }
        let (kind, subtype) = bare.split_once('/')?;
        if kind.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return None;
        }
        Some(Self {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
        })
    }

    /// `true` if this range covers every media type.
    pub fn is_any(&self) -> bool {
        self.kind == "*" && self.subtype == "*"
    }

    /// Tests a concrete media type against this range.
    ///
    /// Matching is case-insensitive and ignores parameters on `media_type`.
    /// `*/*` matches everything, `type/*` matches the whole type family, and
    /// anything else requires exact type/subtype equality.
    pub fn matches(&self, media_type: &str) -> bool {
        if self.is_any() {
            return true;
        }
        let bare = strip_parameters(media_type);
        let Some((kind, subtype)) = bare.split_once('/') else {
            return false;
        };
        if !kind.eq_ignore_ascii_case(&self.kind) {
            return false;
        }
        self.subtype == "*" || subtype.eq_ignore_ascii_case(&self.subtype)
    }
}

impl fmt::Display for MediaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)
    }
}

/// Parses an `Accept` header into media ranges ordered by preference.
///
/// Ranges are sorted by quality weight descending; entries with equal weight
/// keep their declaration order. `q=0` entries ("not acceptable") and
/// malformed entries are dropped. A blank header is treated as `*/*`.
///
/// # Examples
///
/// ```
/// use understudy::media::preferred_media_types;
///
/// let prefs = preferred_media_types("text/html;q=0.5, application/json, */*;q=0.1");
/// let rendered: Vec<String> = prefs.iter().map(ToString::to_string).collect();
/// assert_eq!(rendered, vec!["application/json", "text/html", "*/*"]);
/// ```
pub fn preferred_media_types(accept: &str) -> Vec<MediaRange> {
    if accept.trim().is_empty() {
        return vec![MediaRange {
            kind: "*".to_owned(),
            subtype: "*".to_owned(),
        }];
    }

    let mut weighted: Vec<(f32, MediaRange)> = Vec::new();
    for entry in accept.split(',') {
        let Some(range) = MediaRange::parse(entry) else {
            continue;
        };
        let quality = parse_quality(entry);
        if quality <= 0.0 {
            continue;
        }
        weighted.push((quality, range));
    }

    // Stable sort keeps declaration order among equal weights.
    weighted.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    weighted.into_iter().map(|(_, range)| range).collect()
}

/// `true` if any range in the preference list covers `media_type`.
pub fn accept_allows(preferences: &[MediaRange], media_type: &str) -> bool {
    preferences.iter().any(|range| range.matches(media_type))
}

/// Extracts the `q` weight from one Accept entry, defaulting to 1.0.
///
/// Out-of-range or unparseable weights fall back to 1.0 rather than dropping
/// the entry; only an explicit `q=0` excludes a range.
fn parse_quality(entry: &str) -> f32 {
    for parameter in entry.split(';').skip(1) {
        let Some((name, value)) = parameter.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("q") {
            continue;
        }
        return match value.trim().parse::<f32>() {
            Ok(q) if (0.0..=1.0).contains(&q) => q,
            _ => 1.0,
        };
    }
    1.0
}

/// Drops parameters and normalizes whitespace: `text/html; level=1` → `text/html`.
fn strip_parameters(media_type: &str) -> &str {
    media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
}
