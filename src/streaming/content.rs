//! Final content convention
//!
//! The final content delta of a generation carries exactly one markdown
//! image link pointing at the produced media. Clients that need the URL can
//! parse it back with [`extract_media_url`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::flow::MediaItem;
use crate::store::Capability;

/// Bumped whenever the shape of the final content changes
pub const CONTENT_CONVENTION_VERSION: u32 = 1;

static MEDIA_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[Generated (?:Image|Video)\]\(([^()\s]+)\)").unwrap());

/// Markdown link for one media item
pub fn media_markdown(item: &MediaItem) -> String {
    let label = match item.kind {
        Capability::Image => "Generated Image",
        Capability::Video => "Generated Video",
    };
    format!("![{}]({})", label, item.url)
}

/// The media URL embedded in final content, if any
pub fn extract_media_url(content: &str) -> Option<String> {
    MEDIA_LINK
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
