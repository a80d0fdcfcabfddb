use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::{errors::Error, Result};

/// Channel message id (numeric, unique within a channel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of media a message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    /// Any other attachment (voice, sticker, pdf, ...). Never mirrored.
    Other,
}

impl MediaKind {
    /// Classify a document by its MIME type.
    pub fn from_mime(mime: &str) -> Self {
        let lower = mime.trim().to_ascii_lowercase();
        if lower.starts_with("image/") {
            MediaKind::Photo
        } else if lower.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MediaKind::Other)
    }
}

/// A downloadable attachment as reported by the channel reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    /// Reader-specific opaque reference used by `ChannelReader::download`.
    pub file_ref: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// A channel message, read-only and scoped to one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub date: DateTime<Utc>,
    pub media: Option<MediaAttachment>,
}

/// Idempotency marker stored in the dedup store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub message_id: MessageId,
    pub processed_at: DateTime<Utc>,
}

/// Parsed form of the `--channel-username` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelHandle {
    /// Public username, stored without the leading `@`.
    Username(String),
    /// Private invite link, stored as the normalized `https://t.me/+HASH` form.
    InviteLink(String),
    /// Numeric chat id (e.g. `-1001234567890`).
    ChatId(i64),
}

impl ChannelHandle {
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(Error::Config("channel handle is empty".to_string()));
        }

        if let Ok(id) = s.parse::<i64>() {
            return Ok(ChannelHandle::ChatId(id));
        }

        let path = strip_tme_host(s);
        if let Some(path) = path {
            let path = path.trim_end_matches('/');
            if let Some(hash) = path.strip_prefix('+') {
                return invite_link(hash, raw);
            }
            if let Some(hash) = path.strip_prefix("joinchat/") {
                return invite_link(hash, raw);
            }
            // t.me/s/<name> is the public web preview of the same channel.
            let name = path.strip_prefix("s/").unwrap_or(path);
            return username(name, raw);
        }

        username(s.strip_prefix('@').unwrap_or(s), raw)
    }

    /// Human-readable form used in logs.
    pub fn display(&self) -> String {
        match self {
            ChannelHandle::Username(name) => format!("@{name}"),
            ChannelHandle::InviteLink(link) => link.clone(),
            ChannelHandle::ChatId(id) => id.to_string(),
        }
    }
}

fn strip_tme_host(s: &str) -> Option<&str> {
    let rest = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s);
    ["t.me/", "telegram.me/", "www.t.me/", "telegram.dog/"]
        .iter()
        .find_map(|host| rest.strip_prefix(host))
}

fn invite_link(hash: &str, raw: &str) -> Result<ChannelHandle> {
    let hash = hash.split(['?', '/']).next().unwrap_or_default();
    if hash.is_empty() {
        return Err(Error::Config(format!("invalid invite link: {raw}")));
    }
    Ok(ChannelHandle::InviteLink(format!("https://t.me/+{hash}")))
}

fn username(name: &str, raw: &str) -> Result<ChannelHandle> {
    let name = name.split(['?', '/']).next().unwrap_or_default();
    let valid = name.len() >= 4
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if !valid {
        return Err(Error::Config(format!("invalid channel username: {raw}")));
    }
    Ok(ChannelHandle::Username(name.to_string()))
}

/// A resolved channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub title: String,
}

/// Inclusive date range `[start, end]` evaluated in UTC.
///
/// A message is inside iff `start 00:00 <= date < (end + 1 day) 00:00`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(Error::Config(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_iso_date(start)?, parse_iso_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// First instant after the window.
    pub fn end_exclusive_utc(&self) -> DateTime<Utc> {
        let next = self.end.succ_opt().unwrap_or(NaiveDate::MAX);
        next.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start_utc() && date < self.end_exclusive_utc()
    }

    pub fn is_before(&self, date: DateTime<Utc>) -> bool {
        date < self.start_utc()
    }

    pub fn is_after(&self, date: DateTime<Utc>) -> bool {
        date >= self.end_exclusive_utc()
    }
}

pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::Config(format!("invalid date {s:?} (expected YYYY-MM-DD): {e}")))
}

/// Normalize an optional key prefix: trims slashes, empty means no prefix.
pub fn normalize_prefix(prefix: Option<&str>) -> Option<String> {
    let p = prefix?.trim().trim_matches('/');
    if p.is_empty() {
        None
    } else {
        Some(p.to_string())
    }
}

/// Deterministic object key: `{prefix}/{message_id}.{ext}` or `{message_id}.{ext}`.
pub fn object_key(prefix: Option<&str>, id: MessageId, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    match normalize_prefix(prefix) {
        Some(p) => format!("{p}/{id}.{ext}"),
        None => format!("{id}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_usernames_in_all_spellings() {
        for raw in [
            "mychannel",
            "@mychannel",
            "https://t.me/mychannel",
            "t.me/mychannel/",
            "https://t.me/s/mychannel",
        ] {
            assert_eq!(
                ChannelHandle::parse(raw).unwrap(),
                ChannelHandle::Username("mychannel".to_string()),
                "{raw}"
            );
        }
    }

    #[test]
    fn parses_invite_links() {
        let expected = ChannelHandle::InviteLink("https://t.me/+AbCdEf123".to_string());
        assert_eq!(ChannelHandle::parse("https://t.me/+AbCdEf123").unwrap(), expected);
        assert_eq!(
            ChannelHandle::parse("https://t.me/joinchat/AbCdEf123").unwrap(),
            expected
        );
        assert!(ChannelHandle::parse("https://t.me/+").is_err());
    }

    #[test]
    fn parses_numeric_ids_and_rejects_garbage() {
        assert_eq!(
            ChannelHandle::parse("-1001234567890").unwrap(),
            ChannelHandle::ChatId(-1001234567890)
        );
        assert!(ChannelHandle::parse("").is_err());
        assert!(ChannelHandle::parse("@a b").is_err());
        assert!(ChannelHandle::parse("1abc").is_err());
    }

    #[test]
    fn window_is_inclusive_of_whole_end_day() {
        let w = DateWindow::parse("2024-08-19", "2024-08-23").unwrap();
        assert!(w.contains(Utc.with_ymd_and_hms(2024, 8, 19, 0, 0, 0).unwrap()));
        assert!(w.contains(Utc.with_ymd_and_hms(2024, 8, 23, 23, 59, 59).unwrap()));
        assert!(!w.contains(Utc.with_ymd_and_hms(2024, 8, 24, 0, 0, 0).unwrap()));
        assert!(w.is_before(Utc.with_ymd_and_hms(2024, 8, 18, 23, 59, 59).unwrap()));
        assert!(w.is_after(Utc.with_ymd_and_hms(2024, 8, 25, 12, 0, 0).unwrap()));
    }

    #[test]
    fn window_rejects_reversed_range_and_bad_dates() {
        assert!(DateWindow::parse("2024-08-23", "2024-08-19").is_err());
        assert!(DateWindow::parse("2024/08/19", "2024-08-23").is_err());
        assert!(DateWindow::parse("2024-08-19", "2024-08-19").is_ok());
    }

    #[test]
    fn object_keys_use_prefix_when_present() {
        assert_eq!(object_key(Some("trip"), MessageId(1), "jpg"), "trip/1.jpg");
        assert_eq!(object_key(Some("/trip/"), MessageId(7), ".mp4"), "trip/7.mp4");
        assert_eq!(object_key(Some("  "), MessageId(7), "mp4"), "7.mp4");
        assert_eq!(object_key(None, MessageId(42), "jpg"), "42.jpg");
    }

    #[test]
    fn mime_classification() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Photo);
        assert_eq!(MediaKind::from_mime("VIDEO/quicktime"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Other);
    }
}
