use anyhow::Context;
use async_trait::async_trait;
use dialoguer::Confirm;
use dialoguer::console::Term;
use showrenamer_core::{MatchConfirmer, SeriesRecord};
use tracing::warn;

/// Asks on the terminal before a fuzzy series match is accepted.
#[derive(Debug, Default)]
pub struct TerminalConfirmer;

fn prompt_for(candidate: &str, series: &SeriesRecord) -> String {
    let year = series
        .year
        .as_deref()
        .map(|year| format!(" ({year})"))
        .unwrap_or_default();
    format!("Use \"{}\"{year} for \"{candidate}\"?", series.display_name())
}

#[async_trait]
impl MatchConfirmer for TerminalConfirmer {
    async fn confirm(&self, candidate: &str, series: &SeriesRecord) -> bool {
        let prompt = prompt_for(candidate, series);
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(true)
                .interact_on(&Term::stderr())
        })
        .await;

        match answer {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(err)) => {
                warn!(candidate, error = %err, "confirmation prompt failed; rejecting match");
                false
            }
            Err(err) => {
                warn!(candidate, error = %err, "confirmation prompt aborted");
                false
            }
        }
    }
}

/// Asks before previously logged operations are reverted. Defaults to no.
pub fn confirm_undo(count: usize) -> anyhow::Result<bool> {
    Confirm::new()
        .with_prompt(format!("Move {count} file(s) back?"))
        .default(false)
        .interact_on(&Term::stderr())
        .context("undo confirmation failed")
}
