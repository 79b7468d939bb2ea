//! Show, season and episode extraction from file names.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::{NamePatternConfig, Replacements, SeriesNameMapping};

/// Show name, season and episode extracted from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEpisode {
    /// Show name after cleanup and mapping.
    pub show: String,
    /// Season number.
    pub season: u32,
    /// Episode number.
    pub episode: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureLayout {
    /// `(show)(season)(episode)`
    ShowSeasonEpisode,
    /// `(season)(episode)`, show is the text before the match.
    SeasonEpisode,
}

#[derive(Debug)]
struct CompiledPattern {
    regex: Regex,
    layout: CaptureLayout,
}

/// Compiled form of a [`NamePatternConfig`] plus the series name mapping.
///
/// Built once per config version and swapped wholesale on reload.
#[derive(Debug)]
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    removals: Vec<Regex>,
    replacements: Replacements,
    mapping: Arc<SeriesNameMapping>,
}

impl PatternEngine {
    /// Compiles `config`; invalid patterns are logged and skipped.
    pub fn new(config: &NamePatternConfig, mapping: Arc<SeriesNameMapping>) -> Self {
        let patterns = config
            .patterns
            .iter()
            .filter_map(|source| compile_pattern(source))
            .collect();

        let mut rules: Vec<&str> = config
            .removal_rules()
            .filter(|rule| !rule.is_empty())
            .collect();
        // Longest first so a broad rule cannot eat part of a more specific one.
        rules.sort_by(|a, b| b.len().cmp(&a.len()));
        let removals = rules.into_iter().filter_map(compile_removal).collect();

        Self {
            patterns,
            removals,
            replacements: config.replacements,
            mapping,
        }
    }

    /// Number of usable patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Parses a file name (extension optional) against the configured patterns.
    ///
    /// Matching is done on the lowercased stem; the first pattern that matches
    /// and yields numeric season/episode captures wins.
    pub fn parse(&self, file_name: &str) -> Option<ParsedEpisode> {
        let stem = Path::new(file_name).file_stem()?.to_str()?;
        let lowered = stem.to_lowercase();

        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(&lowered) else {
                continue;
            };

            let (raw_show, season, episode) = match pattern.layout {
                CaptureLayout::ShowSeasonEpisode => (
                    caps.get(1).map_or("", |m| m.as_str()),
                    caps.get(2),
                    caps.get(3),
                ),
                CaptureLayout::SeasonEpisode => {
                    let start = caps.get(0).map_or(0, |m| m.start());
                    (&lowered[..start], caps.get(1), caps.get(2))
                }
            };

            let (Some(season), Some(episode)) = (
                season.and_then(|m| m.as_str().parse::<u32>().ok()),
                episode.and_then(|m| m.as_str().parse::<u32>().ok()),
            ) else {
                continue;
            };

            let show = self.clean_show_name(raw_show);
            debug!(
                file = file_name,
                pattern = pattern.regex.as_str(),
                show = %show,
                season,
                episode,
                "file name parsed"
            );
            return Some(ParsedEpisode {
                show,
                season,
                episode,
            });
        }

        None
    }

    /// Applies removal rules, separator replacement, whitespace collapse and
    /// the series name mapping to a raw extracted name.
    pub fn clean_show_name(&self, raw: &str) -> String {
        let mut name = raw.to_string();
        for rule in &self.removals {
            name = rule.replace_all(&name, "").into_owned();
        }

        if self.replacements.dots_to_spaces {
            name = name.replace('.', " ");
        }
        if self.replacements.underscores_to_spaces {
            name = name.replace('_', " ");
        }
        if self.replacements.dashes_to_spaces {
            name = name.replace('-', " ");
        }

        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        match self.mapping.lookup(&name) {
            Some(mapped) => mapped.to_string(),
            None => name,
        }
    }
}

fn compile_pattern(source: &str) -> Option<CompiledPattern> {
    let regex = match RegexBuilder::new(source).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(err) => {
            warn!(pattern = source, error = %err, "skipping invalid file name pattern");
            return None;
        }
    };

    let layout = match regex.captures_len() - 1 {
        3 => CaptureLayout::ShowSeasonEpisode,
        2 => CaptureLayout::SeasonEpisode,
        groups => {
            warn!(pattern = source, groups, "skipping pattern: expected 2 or 3 capture groups");
            return None;
        }
    };

    Some(CompiledPattern { regex, layout })
}

fn compile_removal(rule: &str) -> Option<Regex> {
    RegexBuilder::new(rule)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(rule))
                .case_insensitive(true)
                .build()
        })
        .map_err(|err| warn!(rule, error = %err, "skipping removal rule"))
        .ok()
}

static CANONICAL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<show>.+?) - S(?P<season>\d{2,})E(?P<episode>\d{2,})(?: - .*)?$")
        .expect("canonical name regex is valid")
});

/// Recognizes names already in `"{Show} - SxxEyy[ - Title].ext"` form.
pub fn parse_canonical(file_name: &str) -> Option<ParsedEpisode> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    let caps = CANONICAL_NAME.captures(stem)?;
    Some(ParsedEpisode {
        show: caps.name("show")?.as_str().trim().to_string(),
        season: caps.name("season")?.as_str().parse().ok()?,
        episode: caps.name("episode")?.as_str().parse().ok()?,
    })
}

/// True for names already in `Show - SxxEyy` form.
pub fn is_canonical_name(file_name: &str) -> bool {
    parse_canonical(file_name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatternEngine {
        PatternEngine::new(
            &NamePatternConfig::default(),
            Arc::new(SeriesNameMapping::default()),
        )
    }

    fn parsed(show: &str, season: u32, episode: u32) -> Option<ParsedEpisode> {
        Some(ParsedEpisode {
            show: show.to_string(),
            season,
            episode,
        })
    }

    #[test]
    fn dotted_release_name() {
        assert_eq!(engine().parse("show.name.s01e01.mkv"), parsed("show name", 1, 1));
    }

    #[test]
    fn matching_ignores_case() {
        let engine = engine();
        assert_eq!(
            engine.parse("Show.Name.S01E01.mkv"),
            engine.parse("show.name.s01e01.mkv")
        );
        assert_eq!(engine.parse("SHOW.NAME.S01E01.MKV"), parsed("show name", 1, 1));
    }

    #[test]
    fn canonical_name_parses_back() {
        let engine = engine();
        assert_eq!(
            engine.parse("Show Name - S01E02 - Title.mkv"),
            parsed("show name", 1, 2)
        );
        assert_eq!(engine.parse("Show Name - S03E10.mkv"), parsed("show name", 3, 10));
    }

    #[test]
    fn release_tags_and_group_prefix_are_stripped() {
        assert_eq!(
            engine().parse("12abc-the.expanse.720p.s02e05.x264.mkv"),
            parsed("the expanse", 2, 5)
        );
    }

    #[test]
    fn mapping_is_applied_after_cleaning() {
        assert_eq!(engine().parse("NCIS.S20E01.mkv"), parsed("Navy CIS", 20, 1));
    }

    #[test]
    fn no_match_is_none() {
        assert_eq!(engine().parse("holiday-video.mkv"), None);
    }

    #[test]
    fn empty_show_name_is_kept() {
        assert_eq!(engine().parse("-s01e01.mkv"), parsed("", 1, 1));
    }

    #[test]
    fn invalid_and_wrong_arity_patterns_are_skipped() {
        let config = NamePatternConfig {
            patterns: vec![
                "(unclosed".to_string(),
                r"(\d+)".to_string(),
                r"ep(\d+)x(\d+)".to_string(),
            ],
            ..NamePatternConfig::default()
        };
        let engine = PatternEngine::new(&config, Arc::new(SeriesNameMapping::default()));
        assert_eq!(engine.pattern_count(), 1);
        assert_eq!(engine.parse("Show_ep2x3.avi"), parsed("show", 2, 3));
    }

    #[test]
    fn non_numeric_capture_falls_through_to_next_pattern() {
        let config = NamePatternConfig {
            patterns: vec![
                r"^(.*?)\.s(\w+)e(\d+)".to_string(),
                r"[._-]s(\d{1,2})e(\d{1,2})".to_string(),
            ],
            ..NamePatternConfig::default()
        };
        let engine = PatternEngine::new(&config, Arc::new(SeriesNameMapping::default()));
        assert_eq!(engine.parse("lost.sxe1.s01e04.mkv"), parsed("lost sxe1", 1, 4));
    }

    #[test]
    fn literal_removal_rule_when_regex_is_invalid() {
        let config = NamePatternConfig {
            strings_to_remove: vec!["[dub".to_string()],
            ..NamePatternConfig::default()
        };
        let engine = PatternEngine::new(&config, Arc::new(SeriesNameMapping::default()));
        assert_eq!(engine.clean_show_name("my.show[DUB"), "my show");
    }

    #[test]
    fn canonical_names_are_recognized() {
        assert_eq!(
            parse_canonical("Dexter - S01E02 - Crocodile.mkv"),
            parsed("Dexter", 1, 2)
        );
        assert!(is_canonical_name("Navy CIS - S20E01.mkv"));
        assert!(!is_canonical_name("navy.cis.s20e01.mkv"));
    }
}
