//! Hexagonal ports. Adapter crates implement these; the pipeline only sees traits.

use async_trait::async_trait;

use crate::{
    domain::{Channel, ChannelHandle, DateWindow, MediaAttachment, MediaKind, Message},
    Result,
};

/// Lazy, finite sequence of channel messages ordered by date (oldest first).
#[async_trait]
pub trait MessageCursor: Send {
    /// Next message, or `None` once the sequence is exhausted.
    async fn next(&mut self) -> Result<Option<Message>>;
}

/// Read side of a messaging channel.
#[async_trait]
pub trait ChannelReader: Send + Sync {
    /// Resolve a handle. Fails with `Error::Authentication` when credentials are
    /// rejected and `Error::ChannelNotFound` when the handle cannot be resolved.
    async fn resolve(&self, handle: &ChannelHandle) -> Result<Channel>;

    /// Open a message cursor over the channel. The window is a hint: a reader may
    /// stop early once it is past the end, but callers still filter every message.
    async fn open(&self, channel: &Channel, window: DateWindow) -> Result<Box<dyn MessageCursor>>;

    /// Fetch the raw bytes of an attachment.
    async fn download(&self, media: &MediaAttachment) -> Result<Vec<u8>>;
}

/// Output of a media conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Converted {
    pub bytes: Vec<u8>,
    /// File extension without the dot (`jpg`, `mp4`).
    pub extension: String,
    pub content_type: String,
}

/// Normalizes downloaded media into the stored delivery format.
#[async_trait]
pub trait MediaConverter: Send + Sync {
    /// Fails with `Error::Conversion` on unsupported or corrupt input.
    async fn convert(&self, raw: Vec<u8>, kind: MediaKind) -> Result<Converted>;
}

/// Builds small JPEG previews for the index pages.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(&self, raw: Vec<u8>, kind: MediaKind) -> Result<Vec<u8>>;
}

/// Remote key-addressed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, overwriting any existing object.
    /// Fails with `Error::Upload`.
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Top-level "folders" (common prefixes at the first `/`), without the slash.
    async fn list_folders(&self) -> Result<Vec<String>>;

    /// Keys stored at the bucket root, outside any folder.
    async fn list_root(&self) -> Result<Vec<String>>;
}
