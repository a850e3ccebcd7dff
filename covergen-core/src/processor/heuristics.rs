//! Guesses for thumbnails a CDN may already host next to a video.

use url::Url;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "webp", "png"];
const SIBLING_NAMES: [&str; 3] = ["cover.jpg", "poster.jpg", "thumb.jpg"];

/// Candidate image URLs derived from a video URL, most likely first.
///
/// `https://cdn.example/v/123/index.mp4` yields `.../index.jpg`,
/// `.../index.webp`, `.../index.png`, then the `cover`/`poster`/`thumb`
/// siblings in the same directory. Non-http sources yield nothing.
pub fn thumbnail_candidates(source_url: &str) -> Vec<Url> {
    let Ok(mut base) = Url::parse(source_url.trim()) else {
        return Vec::new();
    };
    if !matches!(base.scheme(), "http" | "https") {
        return Vec::new();
    }
    base.set_query(None);
    base.set_fragment(None);

    let Some(file_name) = base
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
    else {
        return Vec::new();
    };

    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.clone(),
    };

    let mut names: Vec<String> = IMAGE_EXTENSIONS
        .iter()
        .map(|ext| format!("{stem}.{ext}"))
        .collect();
    names.extend(SIBLING_NAMES.iter().map(|name| name.to_string()));

    let mut candidates: Vec<Url> = Vec::with_capacity(names.len());
    for name in names {
        if name == file_name {
            continue;
        }
        if let Ok(candidate) = base.join(&name)
            && !candidates.contains(&candidate)
        {
            candidates.push(candidate);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(urls: Vec<Url>) -> Vec<String> {
        urls.into_iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn same_stem_then_siblings() {
        let candidates = strings(thumbnail_candidates(
            "https://cdn.example.vip/videos/42/ep01.mp4?token=abc#t=3",
        ));
        assert_eq!(
            candidates,
            vec![
                "https://cdn.example.vip/videos/42/ep01.jpg",
                "https://cdn.example.vip/videos/42/ep01.webp",
                "https://cdn.example.vip/videos/42/ep01.png",
                "https://cdn.example.vip/videos/42/cover.jpg",
                "https://cdn.example.vip/videos/42/poster.jpg",
                "https://cdn.example.vip/videos/42/thumb.jpg",
            ]
        );
    }

    #[test]
    fn non_http_sources_have_no_guesses() {
        assert!(thumbnail_candidates("/srv/media/ep01.mp4").is_empty());
        assert!(thumbnail_candidates("file:///srv/media/ep01.mp4").is_empty());
        assert!(thumbnail_candidates("https://cdn.example.vip/").is_empty());
    }
}
