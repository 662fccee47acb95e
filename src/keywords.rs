//! Keyword dictionary for search normalization.
//!
//! The dictionary is a newline-formatted text asset loaded once, in the
//! background, when the directory is constructed. Callers await
//! [`KeywordDirectory::ready`] before extracting; extraction itself is a
//! case-insensitive scan that preserves first-occurrence order and reports
//! each keyword at most once.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::warn;

pub struct KeywordDirectory {
    loaded: watch::Receiver<Option<Arc<Vec<String>>>>,
}

impl KeywordDirectory {
    /// Start loading the dictionary from `path` in a background task.
    ///
    /// A missing or unreadable file is logged and treated as an empty
    /// dictionary so the rest of the system stays usable.
    pub fn load(path: PathBuf) -> Self {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let words = match tokio::fs::read_to_string(&path).await {
                Ok(content) => parse_dictionary(&content),
                Err(err) => {
                    warn!(path = %path.display(), %err, "keyword dictionary not loaded");
                    Vec::new()
                }
            };
            let _ = tx.send(Some(Arc::new(words)));
        });
        Self { loaded: rx }
    }

    /// Build a directory directly from a word list, immediately ready.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = parse_dictionary(
            &words
                .into_iter()
                .map(|w| w.as_ref().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let (_tx, rx) = watch::channel(Some(Arc::new(parsed)));
        Self { loaded: rx }
    }

    /// Wait until the dictionary has finished loading.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.loaded.clone();
        rx.wait_for(|loaded| loaded.is_some())
            .await
            .map_err(|_| anyhow::anyhow!("keyword loader stopped before completing"))?;
        Ok(())
    }

    fn snapshot(&self) -> Option<Arc<Vec<String>>> {
        self.loaded.borrow().clone()
    }

    /// Dictionary keywords occurring in `text`, case-insensitively, in
    /// order of first occurrence, each at most once.
    pub fn contained_keywords(&self, text: &str) -> Vec<String> {
        let Some(words) = self.snapshot() else {
            return Vec::new();
        };
        let haystack = text.to_lowercase();
        let mut found: Vec<(usize, &String)> = words
            .iter()
            .filter_map(|kw| haystack.find(kw.as_str()).map(|pos| (pos, kw)))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);
        found.into_iter().map(|(_, kw)| kw.clone()).collect()
    }

    /// Join `keywords` with `separator`, never exceeding `max_len`
    /// characters and never splitting a keyword; whole trailing keywords
    /// are dropped until the bound holds.
    pub fn join_bounded(keywords: &[String], separator: &str, max_len: usize) -> String {
        let mut out = String::new();
        for keyword in keywords {
            let needed = if out.is_empty() {
                keyword.len()
            } else {
                out.len() + separator.len() + keyword.len()
            };
            if needed > max_len {
                break;
            }
            if !out.is_empty() {
                out.push_str(separator);
            }
            out.push_str(keyword);
        }
        out
    }
}

/// Lowercase, trim, drop empties, and deduplicate while keeping the
/// dictionary's own order.
fn parse_dictionary(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    content
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.clone()))
        .collect()
}
