//! Channel history cursor.
//!
//! Bots cannot page through channel history, so each message id is looked up by
//! forwarding it into a scratch chat, reading the copy and deleting it again.
//! Ids are dense per channel; a long run of missing ids means the end of history.

use async_trait::async_trait;
use teloxide::{prelude::*, types::MessageId as TgMessageId, ApiError, RequestError};
use tracing::{debug, warn};

use tmm_core::{
    domain::{DateWindow, MediaAttachment, MediaKind, Message as ChannelMessage, MessageId},
    ports::MessageCursor,
    Result,
};

use crate::{map_err, with_retry};

/// Counts consecutive missing ids.
#[derive(Clone, Copy, Debug)]
pub struct GapCounter {
    max: u32,
    current: u32,
}

impl GapCounter {
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            current: 0,
        }
    }

    pub fn hit(&mut self) {
        self.current = 0;
    }

    pub fn miss(&mut self) {
        self.current = self.current.saturating_add(1);
    }

    pub fn exhausted(&self) -> bool {
        self.current >= self.max
    }
}

/// Errors that mean "no forwardable message under this id".
pub fn is_missing_message(e: &RequestError) -> bool {
    match e {
        RequestError::Api(ApiError::MessageToForwardNotFound)
        | RequestError::Api(ApiError::MessageIdInvalid) => true,
        RequestError::Api(ApiError::Unknown(desc)) => {
            let d = desc.to_ascii_lowercase();
            d.contains("message to forward not found")
                || d.contains("can't be forwarded")
                || d.contains("message_id_invalid")
        }
        _ => false,
    }
}

/// Media carried by a (forwarded) message. Photos use the largest size.
pub fn attachment_of(msg: &Message) -> Option<MediaAttachment> {
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(MediaAttachment {
            kind: MediaKind::Photo,
            file_ref: best.file.id.clone(),
            file_name: None,
            mime_type: Some("image/jpeg".to_string()),
            size: Some(best.file.size as u64),
        });
    }
    if let Some(video) = msg.video() {
        return Some(MediaAttachment {
            kind: MediaKind::Video,
            file_ref: video.file.id.clone(),
            file_name: video.file_name.clone(),
            mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
            size: Some(video.file.size as u64),
        });
    }
    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string());
        return Some(MediaAttachment {
            kind: mime.as_deref().map(MediaKind::from_mime).unwrap_or(MediaKind::Other),
            file_ref: doc.file.id.clone(),
            file_name: doc.file_name.clone(),
            mime_type: mime,
            size: Some(doc.file.size as u64),
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(other(audio.file.id.clone()));
    }
    if let Some(voice) = msg.voice() {
        return Some(other(voice.file.id.clone()));
    }
    if let Some(anim) = msg.animation() {
        return Some(other(anim.file.id.clone()));
    }
    if let Some(sticker) = msg.sticker() {
        return Some(other(sticker.file.id.clone()));
    }
    None
}

fn other(file_ref: String) -> MediaAttachment {
    MediaAttachment {
        kind: MediaKind::Other,
        file_ref,
        file_name: None,
        mime_type: None,
        size: None,
    }
}

/// Convert a forwarded copy back into the original channel message.
pub fn channel_message(original_id: i32, copy: &Message) -> ChannelMessage {
    ChannelMessage {
        id: MessageId(i64::from(original_id)),
        date: copy.forward_date().unwrap_or(copy.date),
        media: attachment_of(copy),
    }
}

/// Looks up a single message id in channel history.
#[async_trait]
pub trait MessageLookup: Send + Sync {
    /// The message stored under `id`, or `None` when the id is free.
    async fn lookup(&self, id: i32) -> Result<Option<ChannelMessage>>;
}

/// Looks ids up by forwarding into the scratch chat and deleting the copy.
pub struct ForwardLookup {
    bot: Bot,
    channel: ChatId,
    scratch: ChatId,
    max_retries: usize,
}

impl ForwardLookup {
    pub fn new(bot: Bot, channel: ChatId, scratch: ChatId, max_retries: usize) -> Self {
        Self {
            bot,
            channel,
            scratch,
            max_retries,
        }
    }
}

#[async_trait]
impl MessageLookup for ForwardLookup {
    async fn lookup(&self, id: i32) -> Result<Option<ChannelMessage>> {
        let forwarded = with_retry(self.max_retries, || {
            self.bot
                .forward_message(self.scratch, self.channel, TgMessageId(id))
                .disable_notification(true)
        })
        .await;

        let copy = match forwarded {
            Ok(copy) => copy,
            Err(e) if is_missing_message(&e) => return Ok(None),
            Err(e) => return Err(map_err(e)),
        };

        let msg = channel_message(id, &copy);

        if let Err(e) =
            with_retry(self.max_retries, || self.bot.delete_message(self.scratch, copy.id)).await
        {
            warn!(message_id = id, error = %e, "failed to delete forwarded copy");
        }

        Ok(Some(msg))
    }
}

/// Below this span the seek hands over to the sequential scan.
const SEEK_LINEAR_SPAN: i64 = 16;

/// Ascending walk over message ids.
///
/// Channel ids grow with posting time, so the first call skips the history
/// older than the window: it gallops forward from the start id while the
/// messages found are older than the window, bisects the last step, then scans
/// sequentially. The scan ends after `max_gap` consecutive free ids or right
/// after yielding the first message past the window.
pub struct HistoryCursor<P> {
    source: P,
    start_id: i32,
    next_id: i32,
    max_gap: u32,
    gap: GapCounter,
    window: DateWindow,
    seeked: bool,
    done: bool,
}

impl<P: MessageLookup> HistoryCursor<P> {
    pub fn new(source: P, start_id: i32, max_gap: u32, window: DateWindow) -> Self {
        let start_id = start_id.max(1);
        Self {
            source,
            start_id,
            next_id: start_id,
            max_gap: max_gap.max(1),
            gap: GapCounter::new(max_gap),
            window,
            seeked: false,
            done: false,
        }
    }

    /// First id worth scanning: one past the newest message known to be
    /// older than the window.
    async fn seek(&self) -> Result<i32> {
        let max_id = i64::from(i32::MAX);
        let mut before = i64::from(self.start_id) - 1;
        let mut step: i64 = 1;

        let mut upper = loop {
            let candidate = before + step;
            if candidate > max_id {
                break max_id + 1;
            }
            match self.first_at_or_after(candidate, max_id + 1).await? {
                Some((id, msg)) if self.window.is_before(msg.date) => {
                    before = id;
                    step = step.saturating_mul(2);
                }
                _ => break candidate,
            }
        };

        while upper - before > SEEK_LINEAR_SPAN {
            let mid = before + (upper - before) / 2;
            match self.first_at_or_after(mid, upper).await? {
                Some((id, msg)) if self.window.is_before(msg.date) => before = id,
                _ => upper = mid,
            }
        }

        let first = (before + 1).min(max_id);
        debug!(start = self.start_id, first, "history seek finished");
        Ok(i32::try_from(first).unwrap_or(i32::MAX))
    }

    /// Nearest message in `[from, limit)`, looking at most `max_gap` ids ahead.
    async fn first_at_or_after(
        &self,
        from: i64,
        limit: i64,
    ) -> Result<Option<(i64, ChannelMessage)>> {
        let end = limit.min(from + i64::from(self.max_gap));
        let mut id = from;
        while id < end {
            let Ok(lookup_id) = i32::try_from(id) else {
                break;
            };
            if let Some(msg) = self.source.lookup(lookup_id).await? {
                return Ok(Some((id, msg)));
            }
            id += 1;
        }
        Ok(None)
    }
}

#[async_trait]
impl<P: MessageLookup> MessageCursor for HistoryCursor<P> {
    async fn next(&mut self) -> Result<Option<ChannelMessage>> {
        if !self.seeked {
            self.next_id = self.seek().await?;
            self.seeked = true;
        }

        loop {
            if self.done {
                return Ok(None);
            }
            if self.gap.exhausted() {
                debug!(last_checked = self.next_id - 1, "id gap limit reached, end of history");
                self.done = true;
                return Ok(None);
            }

            let id = self.next_id;
            self.next_id = match id.checked_add(1) {
                Some(n) => n,
                None => {
                    self.done = true;
                    id
                }
            };

            match self.source.lookup(id).await? {
                Some(msg) => {
                    self.gap.hit();
                    if self.window.is_after(msg.date) {
                        self.done = true;
                    }
                    return Ok(Some(msg));
                }
                None => self.gap.miss(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// History held in memory: one message per listed id, dated by `date_of`.
    struct ScriptedHistory {
        dates: HashMap<i32, DateTime<Utc>>,
        asked: Mutex<Vec<i32>>,
    }

    impl ScriptedHistory {
        fn new(ids: impl IntoIterator<Item = i32>) -> Self {
            Self {
                dates: ids.into_iter().map(|id| (id, date_of(id))).collect(),
                asked: Mutex::new(Vec::new()),
            }
        }

        fn asked(&self) -> Vec<i32> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'a> MessageLookup for &'a ScriptedHistory {
        async fn lookup(&self, id: i32) -> Result<Option<ChannelMessage>> {
            self.asked.lock().unwrap().push(id);
            Ok(self.dates.get(&id).map(|date| ChannelMessage {
                id: MessageId(id.into()),
                date: *date,
                media: None,
            }))
        }
    }

    /// Message `id` is posted at noon on day `id` after 2020-01-01.
    fn date_of(id: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).unwrap() + Duration::days(id.into())
    }

    /// Window covering the posting days of ids `first..=last`.
    fn window(first: i32, last: i32) -> DateWindow {
        DateWindow::new(date_of(first).date_naive(), date_of(last).date_naive()).unwrap()
    }

    async fn drain<P: MessageLookup>(cursor: &mut HistoryCursor<P>) -> Vec<i32> {
        let mut ids = Vec::new();
        while let Some(msg) = cursor.next().await.unwrap() {
            ids.push(i32::try_from(msg.id.0).unwrap());
        }
        ids
    }

    fn forwarded(extra: serde_json::Value) -> Message {
        let mut base = serde_json::json!({
            "message_id": 900,
            "date": 1_718_000_000,
            "chat": {"id": -1001, "type": "supergroup", "title": "scratch"},
            "from": {"id": 1, "is_bot": true, "first_name": "tmm"},
            "forward_from_chat": {"id": -1002, "type": "channel", "title": "source"},
            "forward_from_message_id": 42,
            "forward_date": 1_717_000_000
        });
        if let (Some(obj), Some(more)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                obj.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn gap_counter_resets_on_hit() {
        let mut gap = GapCounter::new(3);
        gap.miss();
        gap.miss();
        assert!(!gap.exhausted());
        gap.hit();
        gap.miss();
        gap.miss();
        assert!(!gap.exhausted());
        gap.miss();
        assert!(gap.exhausted());
    }

    #[test]
    fn missing_ids_are_recognized() {
        assert!(is_missing_message(&RequestError::Api(
            ApiError::MessageToForwardNotFound
        )));
        assert!(is_missing_message(&RequestError::Api(ApiError::Unknown(
            "Bad Request: message can't be forwarded".to_string()
        ))));
        assert!(!is_missing_message(&RequestError::Api(ApiError::ChatNotFound)));
        assert!(!is_missing_message(&RequestError::RetryAfter(
            std::time::Duration::from_secs(1)
        )));
    }

    #[test]
    fn photo_uses_largest_size_and_forward_date() {
        let msg = forwarded(serde_json::json!({
            "photo": [
                {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 1000},
                {"file_id": "big", "file_unique_id": "b", "width": 1280, "height": 1280, "file_size": 90000}
            ]
        }));
        let m = channel_message(42, &msg);
        assert_eq!(m.id, MessageId(42));
        assert_eq!(m.date, Utc.timestamp_opt(1_717_000_000, 0).unwrap());
        let media = m.media.unwrap();
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.file_ref, "big");
        assert_eq!(media.size, Some(90000));
    }

    #[test]
    fn documents_are_classified_by_mime() {
        let msg = forwarded(serde_json::json!({
            "document": {"file_id": "doc", "file_unique_id": "d", "file_name": "clip.mov",
                         "mime_type": "video/quicktime", "file_size": 5000}
        }));
        let media = attachment_of(&msg).unwrap();
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.file_name.as_deref(), Some("clip.mov"));

        let pdf = forwarded(serde_json::json!({
            "document": {"file_id": "p", "file_unique_id": "p", "mime_type": "application/pdf", "file_size": 10}
        }));
        assert_eq!(attachment_of(&pdf).unwrap().kind, MediaKind::Other);
    }

    #[test]
    fn text_only_message_has_no_media() {
        let msg = forwarded(serde_json::json!({"text": "hello"}));
        assert_eq!(attachment_of(&msg), None);
    }

    #[tokio::test]
    async fn history_ends_after_gap_limit() {
        let history = ScriptedHistory::new(1..=3);
        let mut cursor = HistoryCursor::new(&history, 1, 3, window(1, 100));

        assert_eq!(drain(&mut cursor).await, vec![1, 2, 3]);
        let asked = history.asked();
        assert_eq!(asked.iter().max(), Some(&6));
        assert!(asked.ends_with(&[4, 5, 6]));

        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(history.asked().len(), asked.len());
    }

    #[tokio::test]
    async fn missing_ids_inside_history_are_skipped() {
        let history = ScriptedHistory::new([1, 2, 4, 5, 7]);
        let mut cursor = HistoryCursor::new(&history, 1, 2, window(1, 100));
        assert_eq!(drain(&mut cursor).await, vec![1, 2, 4, 5, 7]);

        let sparse = ScriptedHistory::new([1, 4]);
        let mut cursor = HistoryCursor::new(&sparse, 1, 2, window(1, 100));
        assert_eq!(drain(&mut cursor).await, vec![1]);
    }

    #[tokio::test]
    async fn stops_right_after_first_message_past_window() {
        let history = ScriptedHistory::new(1..=10);
        let mut cursor = HistoryCursor::new(&history, 1, 3, window(1, 5));

        assert_eq!(drain(&mut cursor).await, vec![1, 2, 3, 4, 5, 6]);
        assert!(!history.asked().contains(&7));
    }

    #[tokio::test]
    async fn old_history_is_skipped_by_search() {
        let history = ScriptedHistory::new((1..=1000).filter(|id| id % 10 != 0));
        let mut cursor = HistoryCursor::new(&history, 1, 5, window(900, 950));

        let ids = drain(&mut cursor).await;
        let in_window: Vec<i32> = (900..=950).filter(|id| id % 10 != 0).collect();
        assert!(ids.ends_with(&[in_window.as_slice(), &[951]].concat()));
        assert!(ids[0] > 880, "scan started at {}", ids[0]);

        let asked = history.asked();
        assert!(asked.len() < 150, "{} lookups", asked.len());
        assert!(!asked.contains(&952));
    }

    #[tokio::test]
    async fn window_before_history_starts_at_first_id() {
        let history = ScriptedHistory::new(5..=8);
        let mut cursor = HistoryCursor::new(&history, 5, 3, window(1, 100));
        assert_eq!(drain(&mut cursor).await, vec![5, 6, 7, 8]);
        assert!(history.asked().iter().all(|id| *id >= 5));
    }

    #[tokio::test]
    async fn empty_history_yields_nothing() {
        let history = ScriptedHistory::new(std::iter::empty());
        let mut cursor = HistoryCursor::new(&history, 1, 4, window(1, 100));
        assert!(cursor.next().await.unwrap().is_none());
        assert!(history.asked().len() <= 8);
    }

    #[tokio::test]
    async fn window_after_all_history_reads_only_the_tail() {
        let history = ScriptedHistory::new(1..=200);
        let mut cursor = HistoryCursor::new(&history, 1, 3, window(500, 600));
        let ids = drain(&mut cursor).await;
        assert!(ids.iter().all(|id| (180..=200).contains(id)), "{ids:?}");
        assert_eq!(ids.last(), Some(&200));
        assert!(history.asked().len() < 60);
    }

    #[test]
    fn window_helpers_match_scripted_dates() {
        let w = window(10, 12);
        assert!(w.is_before(date_of(9)));
        assert!(w.contains(date_of(10)) && w.contains(date_of(12)));
        assert!(w.is_after(date_of(13)));
        assert_eq!(w.start(), NaiveDate::from_ymd_opt(2020, 1, 11).unwrap());
    }
}
