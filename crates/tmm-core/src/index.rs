//! Static gallery generator over the object store listing.
//!
//! Stateless: every invocation re-reads the bucket, creates missing thumbnails
//! and re-renders all pages.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    formatting::{encode_key_path, render_folder_index, render_folder_page, GalleryItem},
    object_store::{
        content_type_for_extension, is_thumbnail_key, media_kind_of_key, thumbnail_key,
        THUMBNAIL_FOLDER,
    },
    ports::{ObjectStore, Thumbnailer},
    Result,
};

#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// `https://{bucket}.{site_base}`, without a trailing slash.
    pub public_base_url: String,
    pub out_dir: PathBuf,
    /// Upload rendered pages back to the bucket root.
    pub upload: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub folders: usize,
    /// Media keys stored at the bucket root, outside any folder.
    pub root_media: usize,
    pub media: usize,
    pub thumbnails_created: usize,
    pub thumbnails_failed: usize,
    pub page_upload_failures: usize,
    pub pages: Vec<PathBuf>,
}

/// Media keys of a folder listing, thumbnails excluded, ordered by message id.
pub fn media_keys(keys: &[String]) -> Vec<String> {
    let mut out: Vec<String> = keys
        .iter()
        .filter(|k| !is_thumbnail_key(k))
        .filter(|k| media_kind_of_key(k).is_some())
        .cloned()
        .collect();
    out.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    out
}

fn sort_key(key: &str) -> (u8, i64, String) {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = name.split('.').next().unwrap_or(name);
    // Numeric stems first, in numeric order; anything else after, by name.
    match stem.parse::<i64>() {
        Ok(n) => (0, n, key.to_string()),
        Err(_) => (1, 0, key.to_string()),
    }
}

pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode_key_path(key))
}

pub struct IndexGenerator<'a> {
    store: &'a dyn ObjectStore,
    thumbnailer: &'a dyn Thumbnailer,
}

impl<'a> IndexGenerator<'a> {
    pub fn new(store: &'a dyn ObjectStore, thumbnailer: &'a dyn Thumbnailer) -> Self {
        Self { store, thumbnailer }
    }

    pub async fn run(&self, opts: &IndexOptions) -> Result<IndexReport> {
        std::fs::create_dir_all(&opts.out_dir)?;
        let mut report = IndexReport::default();

        let folders: Vec<String> = self
            .store
            .list_folders()
            .await?
            .into_iter()
            .filter(|f| f != THUMBNAIL_FOLDER)
            .collect();
        report.folders = folders.len();
        info!(folders = folders.len(), "building gallery index");

        // Uploads made without a key prefix live at the root.
        let root_keys = media_keys(&self.store.list_root().await?);
        report.root_media = root_keys.len();
        report.media += root_keys.len();
        let root_items = self.gallery_items(opts, &root_keys, &mut report).await;

        let index_html = render_folder_index(&folders, &root_items);
        self.publish(opts, "index.html", index_html, &mut report)
            .await?;

        for folder in &folders {
            let listing = self.store.list(&format!("{folder}/")).await?;
            let keys = media_keys(&listing);
            report.media += keys.len();

            let items = self.gallery_items(opts, &keys, &mut report).await;
            let page = render_folder_page(folder, &items);
            self.publish(opts, &format!("{folder}.html"), page, &mut report)
                .await?;
            info!(folder = %folder, media = keys.len(), "folder page generated");
        }

        Ok(report)
    }

    async fn gallery_items(
        &self,
        opts: &IndexOptions,
        keys: &[String],
        report: &mut IndexReport,
    ) -> Vec<GalleryItem> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let thumb = thumbnail_key(key);
            self.ensure_thumbnail(key, &thumb, report).await;
            items.push(GalleryItem {
                media_url: public_url(&opts.public_base_url, key),
                thumbnail_url: public_url(&opts.public_base_url, &thumb),
                label: key.rsplit('/').next().unwrap_or(key).to_string(),
            });
        }
        items
    }

    async fn ensure_thumbnail(&self, key: &str, thumb: &str, report: &mut IndexReport) {
        match self.store.exists(thumb).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                warn!(key = %thumb, error = %e, "could not check thumbnail, skipping");
                return;
            }
        }

        let Some(kind) = media_kind_of_key(key) else {
            return;
        };

        let result: Result<()> = async {
            let raw = self.store.get(key).await?;
            let jpeg = self.thumbnailer.thumbnail(raw, kind).await?;
            self.store
                .upload(thumb, jpeg, content_type_for_extension("jpg"))
                .await
        }
        .await;

        match result {
            Ok(()) => report.thumbnails_created += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "thumbnail generation failed");
                report.thumbnails_failed += 1;
            }
        }
    }

    async fn publish(
        &self,
        opts: &IndexOptions,
        name: &str,
        html: String,
        report: &mut IndexReport,
    ) -> Result<()> {
        let path = write_page(&opts.out_dir, name, &html)?;
        report.pages.push(path);

        if opts.upload {
            if let Err(e) = self
                .store
                .upload(name, html.into_bytes(), content_type_for_extension("html"))
                .await
            {
                warn!(page = %name, error = %e, "failed to upload page");
                report.page_upload_failures += 1;
            }
        }
        Ok(())
    }
}

fn write_page(dir: &Path, name: &str, html: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, html)?;
    Ok(path)
}
