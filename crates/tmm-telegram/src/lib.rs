//! Telegram adapter (teloxide).
//!
//! This crate implements the `tmm-core` `ChannelReader` over the Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    types::{Chat, Recipient, Update},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::{debug, info};

pub mod cursor;

use tmm_core::{
    config::Config,
    domain::{Channel, ChannelHandle, DateWindow, MediaAttachment},
    errors::Error,
    ports::{ChannelReader, MessageCursor},
    Result,
};

use crate::cursor::{ForwardLookup, HistoryCursor};

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub bot_token: String,
    /// Chat the bot can post to; forwarded copies land here and are deleted again.
    pub scratch_chat_id: i64,
    pub start_message_id: i64,
    pub max_id_gap: u32,
    pub max_retries: usize,
}

impl TelegramSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self {
            bot_token: cfg.bot_token()?.to_string(),
            scratch_chat_id: cfg.scratch_chat_id()?,
            start_message_id: cfg.telegram_start_message_id,
            max_id_gap: cfg.telegram_max_id_gap,
            max_retries: cfg.telegram_max_retries,
        })
    }
}

#[derive(Clone)]
pub struct TelegramReader {
    bot: Bot,
    settings: TelegramSettings,
}

pub(crate) fn map_err(e: RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

/// Run a request, sleeping through `RetryAfter` flood waits up to `max_retries` times.
pub(crate) async fn with_retry<T, Fut>(
    max_retries: usize,
    mut op: impl FnMut() -> Fut,
) -> std::result::Result<T, RequestError>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
    Fut::IntoFuture: Send,
{
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(RequestError::RetryAfter(d)) if attempts < max_retries => {
                attempts += 1;
                debug!(wait_secs = d.as_secs(), attempt = attempts, "flood wait");
                sleep(d).await;
            }
            Err(other) => return Err(other),
        }
    }
}

fn is_auth_error(e: &RequestError) -> bool {
    match e {
        RequestError::Api(ApiError::NotFound) => true,
        RequestError::Api(ApiError::Unknown(desc)) => {
            desc.to_ascii_lowercase().contains("unauthorized")
        }
        _ => false,
    }
}

fn is_chat_missing(e: &RequestError) -> bool {
    match e {
        RequestError::Api(ApiError::ChatNotFound) => true,
        RequestError::Api(ApiError::Unknown(desc)) => {
            let d = desc.to_ascii_lowercase();
            d.contains("chat not found") || d.contains("username_invalid")
        }
        _ => false,
    }
}

/// Invite links compare by hash: `t.me/+H` and `t.me/joinchat/H` are the same link.
fn invite_hash(link: &str) -> Option<&str> {
    let rest = link
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let path = rest
        .strip_prefix("t.me/")
        .or_else(|| rest.strip_prefix("telegram.me/"))?;
    let hash = path
        .strip_prefix('+')
        .or_else(|| path.strip_prefix("joinchat/"))?;
    let hash = hash.trim_end_matches('/');
    (!hash.is_empty()).then_some(hash)
}

/// Distinct channel chats mentioned by `updates`, in first-seen order.
fn channel_ids(updates: &[Update]) -> Vec<ChatId> {
    let mut seen: Vec<ChatId> = Vec::new();
    for chat in updates.iter().filter_map(Update::chat) {
        if chat.is_channel() && !seen.contains(&chat.id) {
            seen.push(chat.id);
        }
    }
    seen
}

/// First chat among `ids` whose invite link carries `wanted`.
/// `fetch` returns `None` for chats that are no longer reachable.
async fn find_by_invite<F, Fut>(wanted: &str, ids: &[ChatId], mut fetch: F) -> Result<Option<Chat>>
where
    F: FnMut(ChatId) -> Fut,
    Fut: std::future::Future<Output = Result<Option<Chat>>>,
{
    for id in ids {
        let Some(chat) = fetch(*id).await? else {
            continue;
        };
        if chat.invite_link().and_then(invite_hash) == Some(wanted) {
            return Ok(Some(chat));
        }
    }
    Ok(None)
}

fn to_channel(chat: &Chat) -> Channel {
    Channel {
        id: chat.id.0,
        title: chat
            .title()
            .or_else(|| chat.username())
            .unwrap_or_default()
            .to_string(),
    }
}

impl TelegramReader {
    pub fn new(settings: TelegramSettings) -> Self {
        Self {
            bot: Bot::new(settings.bot_token.clone()),
            settings,
        }
    }

    async fn check_auth(&self) -> Result<()> {
        match with_retry(self.settings.max_retries, || self.bot.get_me()).await {
            Ok(me) => {
                debug!(bot = %me.username(), "bot token accepted");
                Ok(())
            }
            Err(e) if is_auth_error(&e) => Err(Error::Authentication(e.to_string())),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn get_chat(&self, recipient: Recipient, handle: &ChannelHandle) -> Result<Chat> {
        match with_retry(self.settings.max_retries, || self.bot.get_chat(recipient.clone())).await
        {
            Ok(chat) => Ok(chat),
            Err(e) if is_chat_missing(&e) => Err(Error::ChannelNotFound(handle.display())),
            Err(e) if is_auth_error(&e) => Err(Error::Authentication(e.to_string())),
            Err(e) => Err(map_err(e)),
        }
    }

    /// Bots cannot join by invite link; the channel is found among chats the
    /// bot has already seen in its pending updates.
    async fn resolve_invite(&self, link: &str, handle: &ChannelHandle) -> Result<Chat> {
        let wanted = invite_hash(link)
            .ok_or_else(|| Error::ChannelNotFound(handle.display()))?
            .to_string();

        let updates = with_retry(self.settings.max_retries, || self.bot.get_updates())
            .await
            .map_err(map_err)?;

        // Update payloads omit the invite link; the full chat carries it.
        let found = find_by_invite(&wanted, &channel_ids(&updates), move |id| async move {
            match self.get_chat(Recipient::Id(id), handle).await {
                Ok(full) => Ok(Some(full)),
                Err(Error::ChannelNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

        found.ok_or_else(|| Error::ChannelNotFound(handle.display()))
    }
}

#[async_trait]
impl ChannelReader for TelegramReader {
    async fn resolve(&self, handle: &ChannelHandle) -> Result<Channel> {
        self.check_auth().await?;

        let chat = match handle {
            ChannelHandle::Username(name) => {
                self.get_chat(Recipient::ChannelUsername(format!("@{name}")), handle)
                    .await?
            }
            ChannelHandle::ChatId(id) => self.get_chat(Recipient::Id(ChatId(*id)), handle).await?,
            ChannelHandle::InviteLink(link) => self.resolve_invite(link, handle).await?,
        };

        let channel = to_channel(&chat);
        info!(channel = %handle.display(), id = channel.id, title = %channel.title, "channel resolved");
        Ok(channel)
    }

    async fn open(&self, channel: &Channel, window: DateWindow) -> Result<Box<dyn MessageCursor>> {
        let start_id = i32::try_from(self.settings.start_message_id).map_err(|_| {
            Error::Config(format!(
                "TELEGRAM_START_MESSAGE_ID out of range: {}",
                self.settings.start_message_id
            ))
        })?;

        let source = ForwardLookup::new(
            self.bot.clone(),
            ChatId(channel.id),
            ChatId(self.settings.scratch_chat_id),
            self.settings.max_retries,
        );
        Ok(Box::new(HistoryCursor::new(
            source,
            start_id,
            self.settings.max_id_gap,
            window,
        )))
    }

    async fn download(&self, media: &MediaAttachment) -> Result<Vec<u8>> {
        let file = with_retry(self.settings.max_retries, || {
            self.bot.get_file(media.file_ref.clone())
        })
        .await
        .map_err(|e| Error::Download(format!("get_file: {e}")))?;

        let mut dst: Vec<u8> = Vec::with_capacity(file.meta.size as usize);
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::Download(e.to_string()))?;

        if dst.is_empty() {
            return Err(Error::Download(format!("empty file: {}", file.path)));
        }
        Ok(dst)
    }
}
