use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use crate::{domain::normalize_prefix, errors::Error, Result};

/// Typed configuration shared by the `tmm` and `tmm-index` binaries.
///
/// Secrets arrive already decrypted through the environment (or a `.env` file).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_scratch_chat_id: Option<i64>,
    pub telegram_start_message_id: i64,
    pub telegram_max_id_gap: u32,
    pub telegram_max_retries: usize,

    // Object store
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint_url: Option<String>,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub site_base: Option<String>,

    // Dedup store
    pub dedup_db_path: Option<PathBuf>,

    // Media toolchain
    pub ffmpeg_path: PathBuf,
    pub video_bitrate: String,
    pub jpeg_quality: u8,
    pub thumbnail_size: u32,
    pub thumbnail_quality: u8,
    pub temp_dir: PathBuf,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

impl Config {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN");
        let telegram_scratch_chat_id = parse_opt::<i64>(&get, "TELEGRAM_SCRATCH_CHAT_ID")?;
        let telegram_start_message_id =
            parse_opt::<i64>(&get, "TELEGRAM_START_MESSAGE_ID")?.unwrap_or(1).max(1);
        let telegram_max_id_gap = parse_opt::<u32>(&get, "TELEGRAM_MAX_ID_GAP")?
            .unwrap_or(50)
            .max(1);
        let telegram_max_retries = parse_opt::<usize>(&get, "TELEGRAM_MAX_RETRIES")?.unwrap_or(3);

        let s3_bucket = require(&get, "S3_BUCKET")?;
        let s3_region = get("S3_REGION").unwrap_or_else(|| "us-east-1".to_string());
        let s3_endpoint_url = get("S3_ENDPOINT_URL");
        let aws_access_key_id = require(&get, "AWS_ACCESS_KEY_ID")?;
        let aws_secret_access_key = require(&get, "AWS_SECRET_ACCESS_KEY")?;
        let site_base = get("SITE_BASE").map(|s| s.trim_matches('/').to_string());

        let dedup_db_path = get("DEDUP_DB_PATH").map(PathBuf::from);

        let ffmpeg_path = get("FFMPEG_PATH")
            .map(PathBuf::from)
            .or_else(|| which_in_path("ffmpeg"))
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let video_bitrate = get("VIDEO_BITRATE").unwrap_or_else(|| "500k".to_string());
        let jpeg_quality = parse_opt::<u8>(&get, "JPEG_QUALITY")?.unwrap_or(75).clamp(1, 100);
        let thumbnail_size = parse_opt::<u32>(&get, "THUMBNAIL_SIZE")?.unwrap_or(150).max(1);
        let thumbnail_quality = parse_opt::<u8>(&get, "THUMBNAIL_QUALITY")?
            .unwrap_or(65)
            .clamp(1, 100);
        let temp_dir = get("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("tmm"));

        let audit_log_path = get("AUDIT_LOG_PATH").map(PathBuf::from);
        let audit_log_json = get("AUDIT_LOG_JSON").map(|s| is_truthy(&s)).unwrap_or(true);

        Ok(Self {
            telegram_bot_token,
            telegram_scratch_chat_id,
            telegram_start_message_id,
            telegram_max_id_gap,
            telegram_max_retries,
            s3_bucket,
            s3_region,
            s3_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            site_base,
            dedup_db_path,
            ffmpeg_path,
            video_bitrate,
            jpeg_quality,
            thumbnail_size,
            thumbnail_quality,
            temp_dir,
            audit_log_path,
            audit_log_json,
        })
    }

    /// Dedup database location: explicit override, else `{prefix}-processed_messages.db`.
    ///
    /// The prefix is percent-encoded so nested prefixes stay one file name and
    /// distinct prefixes (`a/b`, `a_b`) never share a database.
    pub fn dedup_path_for(&self, key_prefix: Option<&str>) -> PathBuf {
        if let Some(p) = &self.dedup_db_path {
            return p.clone();
        }
        match normalize_prefix(key_prefix) {
            Some(prefix) => {
                let flat = urlencoding::encode(&prefix);
                PathBuf::from(format!("{flat}-processed_messages.db"))
            }
            None => PathBuf::from("processed_messages.db"),
        }
    }

    /// Public base URL for objects: `https://{bucket}.{site_base}`.
    pub fn public_base_url(&self) -> Result<String> {
        let Some(site_base) = &self.site_base else {
            return Err(Error::Config(
                "SITE_BASE environment variable is required".to_string(),
            ));
        };
        Ok(format!("https://{}.{}", self.s3_bucket, site_base))
    }

    /// Only the mirror needs Telegram access; the index generator runs without it.
    pub fn bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })
    }

    pub fn scratch_chat_id(&self) -> Result<i64> {
        self.telegram_scratch_chat_id.ok_or_else(|| {
            Error::Config("TELEGRAM_SCRATCH_CHAT_ID environment variable is required".to_string())
        })
    }
}

fn require(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key).ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse_opt<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn is_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(v: &str) -> &str {
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
