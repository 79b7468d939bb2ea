//! Locating show and season folders inside the library roots.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ShowDirectories;
use crate::error::ExecutorError;

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const SPECIALS_FOLDER: &str = "Specials";

/// Spellings a show folder may plausibly use for `name`.
///
/// The literal name, the name with filesystem-illegal characters stripped,
/// hyphens spaced as `" - "`, and hyphens removed. Each variant is
/// whitespace-collapsed; duplicates are dropped, order is preserved.
pub fn name_variants(name: &str) -> Vec<String> {
    let stripped: String = name.chars().filter(|c| !ILLEGAL_CHARS.contains(c)).collect();
    let candidates = [
        name.to_string(),
        stripped.clone(),
        stripped.replace('-', " - "),
        stripped.replace('-', ""),
    ];

    let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let collapsed = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() && !variants.contains(&collapsed) {
            variants.push(collapsed);
        }
    }
    variants
}

fn variant_keys(name: &str) -> HashSet<String> {
    name_variants(name)
        .into_iter()
        .map(|variant| variant.to_lowercase())
        .collect()
}

fn season_folder(season: u32, padded: bool) -> String {
    if padded {
        format!("Season {season:02}")
    } else {
        format!("Season {season}")
    }
}

/// Maps show names to folders under the configured base directories.
#[derive(Debug, Clone, Default)]
pub struct ShowDirectoryResolver {
    base_directories: Vec<PathBuf>,
}

impl ShowDirectoryResolver {
    /// Resolver over the configured base directories.
    pub fn new(config: &ShowDirectories) -> Self {
        Self {
            base_directories: config.base_directories.clone(),
        }
    }

    /// Configured base directories, in priority order.
    pub fn base_directories(&self) -> &[PathBuf] {
        &self.base_directories
    }

    /// Finds the folder for `show`.
    ///
    /// A folder named exactly like one of the variants wins, checking base
    /// directories in order. Otherwise every base directory's listing is
    /// scanned in lexicographic order and the first folder sharing a
    /// case-insensitive variant with the show is returned.
    pub fn find_show_directory(&self, show: &str) -> Option<PathBuf> {
        let variants = name_variants(show);
        if variants.is_empty() {
            return None;
        }

        for base in &self.base_directories {
            for variant in &variants {
                let candidate = base.join(variant);
                if candidate.is_dir() {
                    return Some(candidate);
                }
            }
        }

        let wanted = variant_keys(show);
        for base in &self.base_directories {
            let Ok(listing) = std::fs::read_dir(base) else {
                debug!(base = %base.display(), "library base directory is not readable");
                continue;
            };
            let mut folders: Vec<(String, PathBuf)> = listing
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
                .filter_map(|entry| {
                    let name = entry.file_name().into_string().ok()?;
                    Some((name, entry.path()))
                })
                .collect();
            folders.sort_by(|a, b| a.0.cmp(&b.0));

            if let Some((_, path)) = folders
                .into_iter()
                .find(|(name, _)| !variant_keys(name).is_disjoint(&wanted))
            {
                return Some(path);
            }
        }

        None
    }

    /// Folder a season's episodes belong in, without touching the disk
    /// beyond probing existing siblings.
    ///
    /// Season 0 is `Specials`. An existing folder for the season is used as
    /// is; otherwise the show's zero-padding convention is inferred from its
    /// first season folder, defaulting to unpadded.
    pub fn season_directory(&self, show_dir: &Path, season: u32) -> PathBuf {
        if season == 0 {
            return show_dir.join(SPECIALS_FOLDER);
        }

        for padded in [false, true] {
            let existing = show_dir.join(season_folder(season, padded));
            if existing.is_dir() {
                return existing;
            }
        }

        let padded = !show_dir.join(season_folder(1, false)).is_dir()
            && show_dir.join(season_folder(1, true)).is_dir();
        show_dir.join(season_folder(season, padded))
    }

    /// Show folder plus season folder for an episode.
    ///
    /// `Ok(None)` when the show has no folder. The season folder is created
    /// when missing and `create` is set.
    pub fn target_directory(
        &self,
        show: &str,
        season: u32,
        create: bool,
    ) -> Result<Option<PathBuf>, ExecutorError> {
        let Some(show_dir) = self.find_show_directory(show) else {
            debug!(show, "no library folder for show");
            return Ok(None);
        };

        let season_dir = self.season_directory(&show_dir, season);
        if create && !season_dir.is_dir() {
            std::fs::create_dir_all(&season_dir).map_err(|source| ExecutorError::ParentUnavailable {
                path: season_dir.clone(),
                source,
            })?;
            debug!(path = %season_dir.display(), "created season folder");
        }
        Ok(Some(season_dir))
    }
}
