//! YouTube link recognition and canonicalization.
//!
//! Every recognized shape normalizes to
//! `https://www.youtube.com/watch?v={id}[&list={pid}]` (or the playlist
//! form for playlist-only URLs), with tracking parameters stripped. A URL
//! whose video id is not exactly 11 chars of `[A-Za-z0-9_-]` is discarded.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static CANDIDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:https?://)?(?:www\.)?(?:youtube\.com|youtu\.be)/[^\s<>"'()\[\]]+"#)
        .expect("candidate regex")
});

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id regex"));

static PLAYLIST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("playlist id regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Video,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLink {
    pub canonical_url: String,
    pub video_id: Option<String>,
    pub playlist_id: Option<String>,
    pub kind: LinkKind,
}

impl CanonicalLink {
    fn video(video_id: String, playlist_id: Option<String>) -> Self {
        let canonical_url = match &playlist_id {
            Some(pid) => format!("https://www.youtube.com/watch?v={}&list={}", video_id, pid),
            None => format!("https://www.youtube.com/watch?v={}", video_id),
        };
        Self {
            canonical_url,
            video_id: Some(video_id),
            playlist_id,
            kind: LinkKind::Video,
        }
    }

    fn playlist(playlist_id: String) -> Self {
        Self {
            canonical_url: format!("https://www.youtube.com/playlist?list={}", playlist_id),
            video_id: None,
            playlist_id: Some(playlist_id),
            kind: LinkKind::Playlist,
        }
    }
}

/// Canonicalizes a single URL, or discards it.
pub fn canonicalize(raw: &str) -> Option<CanonicalLink> {
    let trimmed = raw.trim().trim_end_matches(['.', ',', ';']);
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    match host {
        "youtu.be" => {
            let id = url.path_segments()?.next()?.to_string();
            let list = valid_playlist_param(&url);
            valid_video_id(&id).then(|| CanonicalLink::video(id, list))
        }
        "youtube.com" => {
            let segments: Vec<&str> = url.path_segments()?.collect();
            match segments.as_slice() {
                ["watch"] => {
                    let id = query_param(&url, "v")?;
                    let list = valid_playlist_param(&url);
                    valid_video_id(&id).then(|| CanonicalLink::video(id, list))
                }
                ["embed", id] | ["v", id] => {
                    let id = id.to_string();
                    let list = valid_playlist_param(&url);
                    valid_video_id(&id).then(|| CanonicalLink::video(id, list))
                }
                ["playlist"] => {
                    let pid = query_param(&url, "list")?;
                    PLAYLIST_ID_RE
                        .is_match(&pid)
                        .then(|| CanonicalLink::playlist(pid))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Finds all recognizable references in free text. Within one text, links
/// collapsing to the same video id (or, for playlist-only links, the same
/// playlist id) collapse to one entry, first occurrence wins.
pub fn extract_and_canonicalize(text: &str) -> Vec<CanonicalLink> {
    let mut seen_videos = HashSet::new();
    let mut seen_playlists = HashSet::new();
    let mut links = Vec::new();

    for candidate in CANDIDATE_RE.find_iter(text) {
        let Some(link) = canonicalize(candidate.as_str()) else {
            continue;
        };
        let fresh = match (&link.video_id, &link.playlist_id) {
            (Some(video_id), _) => seen_videos.insert(video_id.clone()),
            (None, Some(playlist_id)) => seen_playlists.insert(playlist_id.clone()),
            (None, None) => false,
        };
        if fresh {
            links.push(link);
        }
    }
    links
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn valid_playlist_param(url: &Url) -> Option<String> {
    query_param(url, "list").filter(|pid| PLAYLIST_ID_RE.is_match(pid))
}

fn valid_video_id(id: &str) -> bool {
    VIDEO_ID_RE.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "dQw4w9WgXcQ";

    // ── Recognized shapes ──

    #[test]
    fn test_watch_url_with_tracking_params() {
        let link =
            canonicalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ&utm_source=x&feature=youtu.be")
                .unwrap();
        assert_eq!(link.canonical_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(link.video_id.as_deref(), Some(ID));
        assert_eq!(link.kind, LinkKind::Video);
    }

    #[test]
    fn test_short_form() {
        let link = canonicalize("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(link.canonical_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_embed_and_v_paths() {
        for raw in [
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "youtube.com/embed/dQw4w9WgXcQ",
        ] {
            let link = canonicalize(raw).unwrap();
            assert_eq!(
                link.canonical_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "failed for {}",
                raw
            );
        }
    }

    #[test]
    fn test_playlist_only() {
        let link = canonicalize("https://www.youtube.com/playlist?list=PLxxx").unwrap();
        assert_eq!(link.kind, LinkKind::Playlist);
        assert_eq!(link.playlist_id.as_deref(), Some("PLxxx"));
        assert!(link.video_id.is_none());
        assert_eq!(link.canonical_url, "https://www.youtube.com/playlist?list=PLxxx");
    }

    #[test]
    fn test_watch_with_list_keeps_list() {
        let link =
            canonicalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc&index=3").unwrap();
        assert_eq!(
            link.canonical_url,
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc"
        );
        assert_eq!(link.playlist_id.as_deref(), Some("PLabc"));
    }

    #[test]
    fn test_schemeless_and_http() {
        assert!(canonicalize("www.youtube.com/watch?v=dQw4w9WgXcQ").is_some());
        assert!(canonicalize("youtube.com/watch?v=dQw4w9WgXcQ").is_some());
        assert!(canonicalize("http://youtu.be/dQw4w9WgXcQ").is_some());
    }

    // ── Rejections ──

    #[test]
    fn test_rejects_short_id() {
        assert!(canonicalize("https://www.youtube.com/watch?v=short").is_none());
    }

    #[test]
    fn test_rejects_bad_charset_id() {
        assert!(canonicalize("https://www.youtube.com/watch?v=dQw4w9WgXc!").is_none());
        assert!(canonicalize("https://www.youtube.com/watch?v=dQw4w9WgXcQQ").is_none());
    }

    #[test]
    fn test_rejects_unrelated_hosts_and_paths() {
        assert!(canonicalize("https://vimeo.com/12345").is_none());
        assert!(canonicalize("https://www.youtube.com/channel/UC123").is_none());
        assert!(canonicalize("https://www.youtube.com/watch").is_none());
        assert!(canonicalize("https://www.youtube.com/playlist").is_none());
    }

    // ── Properties ──

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&utm_campaign=news&t=42",
            "youtu.be/abcdefghijk?list=PLxyz",
            "https://www.youtube.com/embed/A1b2C3d4E5_",
            "https://www.youtube.com/playlist?list=PL-under_score",
        ];
        for input in inputs {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(&once.canonical_url).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_tracking_params_always_stripped() {
        // A canonical form may contain exactly `v` and optionally `list`.
        let junk_params = [
            "utm_source=mail",
            "utm_medium=social",
            "feature=share",
            "si=AbCdEf",
            "t=123s",
            "index=7",
            "pp=ygUEcnVzdA",
        ];
        // Deterministic mix of junk parameter subsets.
        for mask in 0u32..128 {
            let mut url = format!("https://www.youtube.com/watch?v={}", ID);
            for (i, param) in junk_params.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    url.push('&');
                    url.push_str(param);
                }
            }
            let link = canonicalize(&url).unwrap();
            let parsed = Url::parse(&link.canonical_url).unwrap();
            let keys: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
            assert_eq!(keys, vec!["v"], "leftover params for mask {}", mask);
        }
    }

    #[test]
    fn test_extract_dedups_by_video_id() {
        let text = format!(
            "first https://www.youtube.com/watch?v={id} then short youtu.be/{id} \
             then embed https://www.youtube.com/embed/{id} and a second video \
             https://youtu.be/abcdefghijk done",
            id = ID
        );
        let links = extract_and_canonicalize(&text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].video_id.as_deref(), Some(ID));
        assert_eq!(links[1].video_id.as_deref(), Some("abcdefghijk"));
    }

    #[test]
    fn test_extract_from_noisy_text() {
        let text = "Hey! Check this: <https://youtu.be/dQw4w9WgXcQ>, it's great.\n\
                    Broken: youtube.com/watch?v=nope and https://example.com/watch?v=dQw4w9WgXcQ";
        let links = extract_and_canonicalize(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].video_id.as_deref(), Some(ID));
    }

    #[test]
    fn test_extract_mixed_videos_and_playlists() {
        let text = "playlist https://www.youtube.com/playlist?list=PLxxx \
                    video https://youtu.be/dQw4w9WgXcQ \
                    same playlist again youtube.com/playlist?list=PLxxx";
        let links = extract_and_canonicalize(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].kind, LinkKind::Playlist);
        assert_eq!(links[1].kind, LinkKind::Video);
    }

    #[test]
    fn test_extract_empty_text() {
        assert!(extract_and_canonicalize("no links here").is_empty());
        assert!(extract_and_canonicalize("").is_empty());
    }
}
