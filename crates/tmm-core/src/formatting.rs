//! Formatting utilities for the static gallery pages.

/// Escape HTML special characters for text and attribute values.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Percent-encode each path segment of an object key, keeping the `/` separators.
pub fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// One tile on a folder page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GalleryItem {
    pub media_url: String,
    pub thumbnail_url: String,
    pub label: String,
}

/// Top-level `index.html`: one link per folder, then any media stored at the
/// bucket root as tiles.
pub fn render_folder_index(folders: &[String], root_items: &[GalleryItem]) -> String {
    let mut html = String::from(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Media Gallery - Subfolders</title>
    <style>
        body { font-family: Arial, sans-serif; }
        .folder { margin: 20px; }
        .media { margin: 20px; display: inline-block; }
        img { max-width: 150px; height: auto; }
        a { text-decoration: none; color: #000; }
        a:hover { text-decoration: underline; }
    </style>
</head>
<body>
<h1>Media Gallery</h1>
<ul>
"#,
    );

    for folder in folders {
        html.push_str(&format!(
            "    <li class=\"folder\"><a href=\"{}.html\">{}</a></li>\n",
            escape_html(&urlencoding::encode(folder)),
            escape_html(folder)
        ));
    }

    html.push_str("</ul>\n");

    if !root_items.is_empty() {
        html.push_str("<h2>Unsorted</h2>\n");
        push_tiles(&mut html, root_items);
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// `{folder}.html`: a back link plus one linked thumbnail per media object.
pub fn render_folder_page(folder: &str, items: &[GalleryItem]) -> String {
    let title = escape_html(folder);
    let mut html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title} - Media Gallery</title>
    <style>
        body {{ font-family: Arial, sans-serif; }}
        .media {{ margin: 20px; display: inline-block; }}
        img {{ max-width: 150px; height: auto; }}
        a {{ text-decoration: none; color: #000; }}
        a:hover {{ text-decoration: underline; }}
    </style>
</head>
<body>
<h1>{title}</h1>
<a href="index.html">Back to Main Index</a>
<hr>
"#
    );

    push_tiles(&mut html, items);

    html.push_str("</body>\n</html>\n");
    html
}

fn push_tiles(html: &mut String, items: &[GalleryItem]) {
    for item in items {
        html.push_str(&format!(
            r#"<div class="media">
    <a href="{}" target="_blank">
        <img src="{}" alt="{}" loading="lazy">
    </a>
</div>
"#,
            escape_html(&item.media_url),
            escape_html(&item.thumbnail_url),
            escape_html(&item.label),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_quotes_and_angles() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn key_paths_keep_slashes() {
        assert_eq!(encode_key_path("my trip/1.jpg"), "my%20trip/1.jpg");
        assert_eq!(encode_key_path("a&b/2.mp4"), "a%26b/2.mp4");
    }

    #[test]
    fn folder_index_links_encoded_pages() {
        let html = render_folder_index(&["summer 2024".to_string(), "<x>".to_string()], &[]);
        assert!(html.contains(r#"<a href="summer%202024.html">summer 2024</a>"#));
        assert!(html.contains("&lt;x&gt;</a>"));
        assert!(!html.contains("<x>"));
        assert!(!html.contains("Unsorted"));
    }

    #[test]
    fn folder_index_shows_root_media_as_tiles() {
        let items = vec![GalleryItem {
            media_url: "https://b.site/1.jpg".to_string(),
            thumbnail_url: "https://b.site/thumbnails/1.jpg".to_string(),
            label: "1.jpg".to_string(),
        }];
        let html = render_folder_index(&[], &items);
        assert!(html.contains("<h2>Unsorted</h2>"));
        assert!(html.contains(r#"<a href="https://b.site/1.jpg" target="_blank">"#));
        assert!(html.contains(r#"src="https://b.site/thumbnails/1.jpg""#));
    }

    #[test]
    fn folder_page_renders_one_tile_per_item() {
        let items = vec![
            GalleryItem {
                media_url: "https://b.site/trip/1.jpg".to_string(),
                thumbnail_url: "https://b.site/thumbnails/trip/1.jpg".to_string(),
                label: "1.jpg".to_string(),
            },
            GalleryItem {
                media_url: "https://b.site/trip/2.mp4".to_string(),
                thumbnail_url: "https://b.site/thumbnails/trip/2.jpg".to_string(),
                label: "2.mp4".to_string(),
            },
        ];
        let html = render_folder_page("trip", &items);
        assert_eq!(html.matches(r#"<div class="media">"#).count(), 2);
        assert!(html.contains(r#"<a href="https://b.site/trip/2.mp4" target="_blank">"#));
        assert!(html.contains(r#"src="https://b.site/thumbnails/trip/1.jpg""#));
        assert!(html.contains("<title>trip - Media Gallery</title>"));
        assert!(html.contains(r#"<a href="index.html">Back to Main Index</a>"#));
    }
}
