//! Recognizers for embeddable third-party URLs.

use std::sync::LazyLock;

use regex::Regex;

static YOUTUBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{6,})")
        .expect("valid regex")
});

static VIMEO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"vimeo\.com/(?:video/)?(\d+)").expect("valid regex"));

static TWEET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:twitter\.com|x\.com)/([A-Za-z0-9_]+)/status/(\d+)").expect("valid regex")
});

pub fn youtube_id(url: &str) -> Option<&str> {
    YOUTUBE_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn vimeo_id(url: &str) -> Option<&str> {
    VIMEO_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `(user, id)` of a tweet URL.
pub fn tweet(url: &str) -> Option<(&str, &str)> {
    let caps = TWEET_RE.captures(url)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

pub fn is_gist(url: &str) -> bool {
    url.contains("gist.github.com/")
}

/// Site-generator shortcode for a video URL, when the host is recognized.
pub fn video_shortcode(url: &str) -> Option<String> {
    if let Some(id) = youtube_id(url) {
        return Some(format!("{{{{< youtube \"{id}\" >}}}}"));
    }
    vimeo_id(url).map(|id| format!("{{{{< vimeo \"{id}\" >}}}}"))
}
