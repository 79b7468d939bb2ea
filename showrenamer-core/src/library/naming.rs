//! Canonical episode file names.

use std::path::Path;

use crate::catalog::{EpisodeRecord, SeriesRecord};

/// Canonical file name for an episode:
/// `"{Show} - S{season:02}E{episode:02}[ - {Title}]{.ext}"`.
///
/// Localized names win over primary names. The title part is omitted when the
/// episode has no name. Returns `None` when the show name is empty.
pub fn compute_new_name(
    path: &Path,
    series: &SeriesRecord,
    episode: &EpisodeRecord,
) -> Option<String> {
    let show = sanitize_component(series.display_name());
    if show.is_empty() {
        return None;
    }

    let mut name = format!(
        "{show} - S{:02}E{:02}",
        episode.season_number, episode.episode_number
    );
    if let Some(title) = episode.display_name().map(sanitize_component)
        && !title.is_empty()
    {
        name.push_str(" - ");
        name.push_str(&title);
    }
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    Some(name)
}

/// Makes a catalog name safe to use as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if matches!(c, '/' | '\\') { '-' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
