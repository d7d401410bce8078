use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::cache::SummaryCache;
use crate::extract::{extract_from_dialog, print_plates_dialogs, COPY_BUTTON_SEL, DIALOG_CONTENT_SEL};
use crate::handoff::{build_handoff_url, HandoffTarget};
use crate::models::PrintJobSummary;

const CONTROL_MARKUP: &str = concat!(
    r#"<div class="printwrap-control" style="margin: 15px 0; display: flex; justify-content: center; width: 100%">"#,
    r#"<button id="copy-to-3dprintwrap-btn" type="button" "#,
    r#"style="padding: 10px 20px; background-color: #4CAF50; color: white; border: none; border-radius: 4px; "#,
    r#"cursor: pointer; font-size: 16px; font-weight: bold; width: 80%">Copy print to 3dprintwrap</button>"#,
    r#"</div>"#,
);

static CONTROL_ROW_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse(".printwrap-control").unwrap());
static PAGE_URL_META_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:url"]"#).unwrap());
static CANONICAL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());

// ── Dialog detection ─────────────────────────────────────────────────────────

/// A Print Plates dialog that has content but no copy control yet.
pub struct PendingDialog<'a> {
    pub dialog: ElementRef<'a>,
    pub content: ElementRef<'a>,
}

pub fn pending_dialogs(document: &Html) -> Vec<PendingDialog<'_>> {
    print_plates_dialogs(document)
        .filter(|dialog| dialog.select(&COPY_BUTTON_SEL).next().is_none())
        .filter_map(|dialog| {
            let content = dialog.select(&DIALOG_CONTENT_SEL).next()?;
            Some(PendingDialog { dialog, content })
        })
        .collect()
}

/// Append the copy control to every pending dialog. Returns how many were
/// augmented; dialogs that already carry the control are left alone.
pub fn augment(document: &mut Html) -> usize {
    let targets: Vec<_> = pending_dialogs(document)
        .iter()
        .map(|pending| pending.content.id())
        .collect();
    if targets.is_empty() {
        return 0;
    }

    let fragment = Html::parse_fragment(CONTROL_MARKUP);
    let Some(row) = fragment.select(&CONTROL_ROW_SEL).next() else {
        return 0;
    };

    for target in &targets {
        // Copy the control subtree node by node; children are pushed in
        // reverse so they pop, and get appended, in document order.
        let mut pending = vec![(*target, *row)];
        while let Some((parent_id, source)) = pending.pop() {
            let Some(mut parent) = document.tree.get_mut(parent_id) else {
                continue;
            };
            let copied = parent.append(source.value().clone()).id();
            for child in source.children().rev() {
                pending.push((copied, child));
            }
        }
    }
    targets.len()
}

// ── Snapshot processing ──────────────────────────────────────────────────────

/// Result of one check that found at least one un-augmented dialog.
#[derive(Debug)]
pub struct WatchOutcome {
    pub html: String,
    pub augmented: usize,
    pub summary: PrintJobSummary,
}

/// Check a page snapshot once. `None` when there is nothing to augment.
pub fn process_snapshot(html: &str, fallback_url: &str) -> Option<WatchOutcome> {
    let mut document = Html::parse_document(html);

    let summary = {
        let pending = pending_dialogs(&document);
        let first = pending.first()?;
        let page_url = page_url(&document).unwrap_or_else(|| fallback_url.to_string());
        extract_from_dialog(&document, first.dialog, &page_url)
    };

    let augmented = augment(&mut document);
    Some(WatchOutcome { html: document.html(), augmented, summary })
}

/// The page's own URL as declared in its head, if any.
fn page_url(document: &Html) -> Option<String> {
    let og = document
        .select(&PAGE_URL_META_SEL)
        .next()
        .and_then(|el| el.value().attr("content"));
    let canonical = || {
        document
            .select(&CANONICAL_SEL)
            .next()
            .and_then(|el| el.value().attr("href"))
    };
    og.or_else(canonical)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ── Polling loop ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Interval,
    Changed,
}

/// Watches a page snapshot on disk for the Print Plates dialog. Checks run
/// whenever the file changes and on every interval tick regardless.
pub struct DialogWatcher {
    path: PathBuf,
    interval: Duration,
    cache: Arc<SummaryCache>,
    last_seen: Option<String>,
}

impl DialogWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, cache: Arc<SummaryCache>) -> Self {
        Self { path: path.into(), interval, cache, last_seen: None }
    }

    pub async fn run(self) {
        let (tx, rx) = mpsc::channel(1);
        // Dropping the notifier stops change events, so it lives as long as the loop.
        let _notifier = match self.watch_changes(tx) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "file notifications unavailable, polling only");
                None
            }
        };
        self.run_with(rx).await;
    }

    /// Forward filesystem events for the snapshot into `tx`. The snapshot's
    /// directory is watched so editors that replace the file are still seen.
    fn watch_changes(&self, tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let mut notifier = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if event.kind.is_access() {
                return;
            }
            if event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                // A full channel already has a check queued.
                let _ = tx.try_send(());
            }
        })?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        notifier.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(notifier)
    }

    /// Check on every message from `changes` and on every interval tick. When
    /// the sender goes away the interval keeps running alone.
    pub async fn run_with(mut self, mut changes: mpsc::Receiver<()>) {
        tracing::info!(path = %self.path.display(), interval_ms = self.interval.as_millis() as u64, "dialog watcher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut notified = true;
        loop {
            let trigger = tokio::select! {
                _ = ticker.tick() => Some(Trigger::Interval),
                change = changes.recv(), if notified => change.map(|()| Trigger::Changed),
            };
            let Some(trigger) = trigger else {
                notified = false;
                continue;
            };
            if let Err(e) = self.check(trigger).await {
                tracing::warn!(path = %self.path.display(), error = %e, "dialog watcher check failed");
            }
        }
    }

    /// One unconditional pass: read the snapshot, augment and import when a
    /// dialog is pending.
    pub async fn poll(&mut self) -> Result<Option<PrintJobSummary>, std::io::Error> {
        self.check(Trigger::Interval).await
    }

    async fn check(&mut self, trigger: Trigger) -> Result<Option<PrintJobSummary>, std::io::Error> {
        let html = tokio::fs::read_to_string(&self.path).await?;
        if self.last_seen.as_deref() == Some(html.as_str()) {
            // Change events for our own rewrite land here.
            if trigger == Trigger::Changed {
                return Ok(None);
            }
        } else {
            tracing::debug!(path = %self.path.display(), ?trigger, "snapshot changed");
        }

        let fallback_url = Url::from_file_path(&self.path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.path.display().to_string());

        let Some(outcome) = process_snapshot(&html, &fallback_url) else {
            self.last_seen = Some(html);
            return Ok(None);
        };

        tokio::fs::write(&self.path, &outcome.html).await?;
        self.last_seen = Some(outcome.html);
        tracing::info!(dialogs = outcome.augmented, "3DPrintWrap: Button injected successfully");

        if let Err(e) = self.cache.store(&outcome.summary).await {
            tracing::warn!(error = %e, "could not write print data to cache");
        }
        match build_handoff_url(&outcome.summary, HandoffTarget::Queue) {
            Ok(url) => tracing::info!(%url, "3DPrintWrap: Redirecting"),
            Err(e) => tracing::warn!(error = %e, "could not encode handoff URL"),
        }
        Ok(Some(outcome.summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::COPY_BUTTON_ID;

    const DIALOG_PAGE: &str = r#"<html><head><meta property="og:url" content="https://makerworld.com/en/models/99"></head><body>
        <h1 class="title-for-share">Cable Clip</h1>
        <div class="MuiDialog-paper">
          <div class="MuiDialogTitle-root"><p>Print Plates</p></div>
          <div class="MuiDialogContent-root">
            <div class="mw-css-8atqhb">
              <div class="config_info">
                <div class="mw-css-18oolko"><span>1 h 5 min</span></div>
                <div class="mw-css-18oolko"><span>14 g</span></div>
              </div>
            </div>
          </div>
        </div>
        </body></html>"#;

    fn button_count(html: &str) -> usize {
        Html::parse_document(html).select(&COPY_BUTTON_SEL).count()
    }

    #[test]
    fn augments_pending_dialog_once() {
        let mut document = Html::parse_document(DIALOG_PAGE);
        assert_eq!(augment(&mut document), 1);
        assert_eq!(augment(&mut document), 0);

        let html = document.html();
        assert_eq!(button_count(&html), 1);
        assert!(html.contains("Copy print to 3dprintwrap"));
    }

    #[test]
    fn control_lands_inside_dialog_content() {
        let mut document = Html::parse_document(DIALOG_PAGE);
        augment(&mut document);
        let sel = Selector::parse(".MuiDialogContent-root > .printwrap-control > button").unwrap();
        let button = document.select(&sel).next().unwrap();
        assert_eq!(button.value().id(), Some(COPY_BUTTON_ID));
    }

    #[test]
    fn already_augmented_snapshot_is_left_alone() {
        let first = process_snapshot(DIALOG_PAGE, "file:///page.html").unwrap();
        assert_eq!(first.augmented, 1);
        assert!(process_snapshot(&first.html, "file:///page.html").is_none());
    }

    #[test]
    fn other_dialogs_are_not_augmented() {
        let html = DIALOG_PAGE.replace("Print Plates", "Report model");
        let mut document = Html::parse_document(&html);
        assert_eq!(augment(&mut document), 0);
    }

    #[test]
    fn outcome_carries_summary_and_declared_page_url() {
        let outcome = process_snapshot(DIALOG_PAGE, "file:///page.html").unwrap();
        assert_eq!(outcome.summary.page_url, "https://makerworld.com/en/models/99");
        assert_eq!(outcome.summary.print_time, "1 h 5 min");
        assert_eq!(outcome.summary.total_weight, "14 g");
        assert_eq!(outcome.summary.title, "Cable Clip");
    }

    #[tokio::test]
    async fn poll_rewrites_snapshot_and_fills_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, DIALOG_PAGE).unwrap();

        let cache = Arc::new(SummaryCache::in_memory());
        let mut watcher = DialogWatcher::new(&path, Duration::from_millis(10), cache.clone());

        let summary = watcher.poll().await.unwrap().unwrap();
        assert_eq!(summary.plate_count, 1);
        assert_eq!(cache.latest().await, Some(summary));
        assert_eq!(button_count(&std::fs::read_to_string(&path).unwrap()), 1);

        assert!(watcher.poll().await.unwrap().is_none());
        assert_eq!(button_count(&std::fs::read_to_string(&path).unwrap()), 1);
    }

    #[tokio::test]
    async fn change_event_triggers_check_before_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, DIALOG_PAGE.replace("Print Plates", "Report model")).unwrap();

        let cache = Arc::new(SummaryCache::in_memory());
        let watcher = DialogWatcher::new(&path, Duration::from_secs(3600), cache.clone());
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(watcher.run_with(rx));

        // Let the immediate first tick see the dialog-free snapshot.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.latest().await.is_none());

        std::fs::write(&path, DIALOG_PAGE).unwrap();
        tx.send(()).await.unwrap();

        let mut imported = None;
        for _ in 0..100 {
            imported = cache.latest().await;
            if imported.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();

        assert_eq!(imported.unwrap().print_time, "1 h 5 min");
        assert_eq!(button_count(&std::fs::read_to_string(&path).unwrap()), 1);
    }

    #[tokio::test]
    async fn change_event_for_unchanged_snapshot_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, DIALOG_PAGE).unwrap();

        let cache = Arc::new(SummaryCache::in_memory());
        let mut watcher = DialogWatcher::new(&path, Duration::from_secs(3600), cache);
        assert!(watcher.poll().await.unwrap().is_some());

        // The rewrite above is what a change event would report.
        assert!(watcher.check(Trigger::Changed).await.unwrap().is_none());
        assert_eq!(button_count(&std::fs::read_to_string(&path).unwrap()), 1);
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SummaryCache::in_memory());
        let mut watcher = DialogWatcher::new(dir.path().join("absent.html"), Duration::from_millis(10), cache);
        assert!(watcher.poll().await.is_err());
    }
}
