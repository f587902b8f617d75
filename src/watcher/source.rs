//! Adapter from `notify` events to raw notifications.
//!
//! Resolves backend quirks (split renames, metadata-only changes, access
//! events) so that the dispatcher sees one notification per change.

use std::path::{Path, PathBuf};
use std::time::Instant;

use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

use crate::config::WatchConfig;

use super::error::{WatchError, WatchResult};
use super::event::{RawKind, RawNotification};
use super::rename::RenameTracker;

/// Translates native events for one watched directory.
#[derive(Debug)]
pub struct SourceAdapter {
    root: PathBuf,
    filter: Pattern,
    include_metadata: bool,
    renames: RenameTracker,
}

impl SourceAdapter {
    /// Create an adapter for `root` using the watch settings.
    pub fn new(root: PathBuf, config: &WatchConfig) -> WatchResult<Self> {
        let filter = Pattern::new(&config.filter).map_err(|e| WatchError::InvalidFilter {
            pattern: config.filter.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            root,
            filter,
            include_metadata: config.include_metadata,
            renames: RenameTracker::new(config.rename_timeout_ms),
        })
    }

    /// Translate one native event.
    ///
    /// Returns a source error when the event shows that the watched
    /// directory itself was removed or moved away.
    pub fn process(&mut self, event: Event, now: Instant) -> WatchResult<Vec<RawNotification>> {
        if self.affects_root(&event) {
            return Err(WatchError::Source {
                path: self.root.clone(),
                reason: "watched directory was removed or moved".to_string(),
            });
        }

        let tracker = event.tracker();

        // Halves are reported back to back, so any other event means the
        // pending old paths were moved out of the directory
        let mut out = if completes_rename(&event.kind) {
            Vec::new()
        } else {
            self.flush_pending()
        };

        match event.kind {
            EventKind::Create(_) => {
                out.extend(event.paths.into_iter().map(RawNotification::created));
            }
            EventKind::Remove(_) => {
                out.extend(event.paths.into_iter().map(RawNotification::deleted));
            }
            EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Other) => {
                out.extend(event.paths.into_iter().map(RawNotification::modified));
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                if self.include_metadata {
                    out.extend(event.paths.into_iter().map(RawNotification::modified));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => {
                self.process_rename(mode, event.paths, tracker, now, &mut out);
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {
                tracing::trace!("[source] ignoring {:?}", event.kind);
            }
        }

        out.retain(|raw| self.passes_filter(raw));
        Ok(out)
    }

    fn process_rename(
        &mut self,
        mode: RenameMode,
        paths: Vec<PathBuf>,
        tracker: Option<usize>,
        now: Instant,
        out: &mut Vec<RawNotification>,
    ) {
        match mode {
            RenameMode::Both => {
                let mut paths = paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    tracing::trace!("[source] rename without both paths");
                    return;
                };
                if self.renames.is_echo(&from, &to) {
                    crate::debug_event!("source", "duplicate rename", "{}", to.display());
                    return;
                }
                out.push(RawNotification::renamed(from, to));
            }
            RenameMode::From => {
                for path in paths {
                    self.renames.record_from(path, tracker, now);
                }
            }
            RenameMode::To => {
                for to in paths {
                    out.push(self.pair_or_create(to, tracker));
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in paths {
                    if path.exists() {
                        out.push(self.pair_or_create(path, None));
                    } else {
                        self.renames.record_from(path, None, now);
                    }
                }
            }
        }
    }

    /// Pair a new-path half with a pending old path. A half with no
    /// partner is an entry moved in from outside the directory.
    fn pair_or_create(&mut self, to: PathBuf, tracker: Option<usize>) -> RawNotification {
        match self.renames.take_match(tracker) {
            Some(from) => {
                self.renames.record_pair(from.clone(), to.clone());
                RawNotification::renamed(from, to)
            }
            None => RawNotification::created(to),
        }
    }

    /// Flush old-path halves whose partner never arrived. Those entries
    /// were moved out of the directory and are reported as deleted.
    pub fn expire(&mut self, now: Instant) -> Vec<RawNotification> {
        let mut out: Vec<RawNotification> = self
            .renames
            .take_expired(now)
            .into_iter()
            .map(RawNotification::deleted)
            .collect();
        out.retain(|raw| self.passes_filter(raw));
        out
    }

    fn flush_pending(&mut self) -> Vec<RawNotification> {
        self.renames
            .take_all()
            .into_iter()
            .map(RawNotification::deleted)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.renames.has_pending()
    }

    /// Forget rename state, e.g. when delivery is stopped.
    pub fn reset(&mut self) {
        self.renames.clear();
    }

    fn affects_root(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        ) && event.paths.iter().any(|p| p == &self.root)
    }

    fn passes_filter(&self, raw: &RawNotification) -> bool {
        match &raw.kind {
            RawKind::Renamed { from } => self.name_matches(from) || self.name_matches(&raw.path),
            _ => self.name_matches(&raw.path),
        }
    }

    fn name_matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.filter.matches(&name.to_string_lossy()))
            .unwrap_or(false)
    }
}

/// Events that may carry the new-path half of a pending rename.
fn completes_rename(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Name(
            RenameMode::To | RenameMode::Both | RenameMode::Any | RenameMode::Other
        ))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn adapter(config: WatchConfig) -> SourceAdapter {
        SourceAdapter::new(PathBuf::from("/w"), &config).unwrap()
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_basic_kinds() {
        let mut source = adapter(WatchConfig::default());
        let now = Instant::now();

        let created = source
            .process(event(EventKind::Create(CreateKind::File), &["/w/a"]), now)
            .unwrap();
        let modified = source
            .process(
                event(
                    EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                    &["/w/a"],
                ),
                now,
            )
            .unwrap();
        let deleted = source
            .process(event(EventKind::Remove(RemoveKind::File), &["/w/a"]), now)
            .unwrap();

        assert_eq!(created, vec![RawNotification::created("/w/a")]);
        assert_eq!(modified, vec![RawNotification::modified("/w/a")]);
        assert_eq!(deleted, vec![RawNotification::deleted("/w/a")]);
    }

    #[test]
    fn test_access_events_are_ignored() {
        let mut source = adapter(WatchConfig::default());
        let out = source
            .process(
                event(EventKind::Access(notify::event::AccessKind::Any), &["/w/a"]),
                Instant::now(),
            )
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_metadata_policy() {
        let kind = EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions));

        let mut quiet = adapter(WatchConfig::default());
        assert!(
            quiet
                .process(event(kind, &["/w/a"]), Instant::now())
                .unwrap()
                .is_empty()
        );

        let mut loud = adapter(WatchConfig {
            include_metadata: true,
            ..WatchConfig::default()
        });
        assert_eq!(
            loud.process(event(kind, &["/w/a"]), Instant::now()).unwrap(),
            vec![RawNotification::modified("/w/a")]
        );
    }

    #[test]
    fn test_split_rename_and_echo_yield_one_rename() {
        let mut source = adapter(WatchConfig::default());
        let now = Instant::now();

        let from = source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/a"])
                    .set_tracker(7),
                now,
            )
            .unwrap();
        let to = source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/b"])
                    .set_tracker(7),
                now,
            )
            .unwrap();
        let both = source
            .process(
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                    &["/w/a", "/w/b"],
                )
                .set_tracker(7),
                now,
            )
            .unwrap();

        assert!(from.is_empty());
        assert_eq!(to, vec![RawNotification::renamed("/w/a", "/w/b")]);
        assert!(both.is_empty());
        assert!(!source.has_pending());
    }

    #[test]
    fn test_both_alone_is_a_rename() {
        let mut source = adapter(WatchConfig::default());
        let out = source
            .process(
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                    &["/w/a", "/w/b"],
                ),
                Instant::now(),
            )
            .unwrap();
        assert_eq!(out, vec![RawNotification::renamed("/w/a", "/w/b")]);
    }

    #[test]
    fn test_unpaired_halves() {
        let config = WatchConfig {
            rename_timeout_ms: 50,
            ..WatchConfig::default()
        };
        let mut source = adapter(config);
        let now = Instant::now();

        // Moved in from elsewhere
        let moved_in = source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/in"]),
                now,
            )
            .unwrap();
        assert_eq!(moved_in, vec![RawNotification::created("/w/in")]);

        // Moved out, partner never arrives
        source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/out"]),
                now,
            )
            .unwrap();
        assert!(source.expire(now).is_empty());
        assert_eq!(
            source.expire(now + Duration::from_millis(60)),
            vec![RawNotification::deleted("/w/out")]
        );
    }

    #[test]
    fn test_moved_out_half_is_flushed_before_later_events() {
        let mut source = adapter(WatchConfig::default());
        let start = Instant::now();

        let from = source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/out.txt"])
                    .set_tracker(1),
                start,
            )
            .unwrap();
        assert!(from.is_empty());
        assert!(source.expire(start + Duration::from_millis(10)).is_empty());

        let out = source
            .process(
                event(EventKind::Create(CreateKind::File), &["/w/new.txt"]),
                start + Duration::from_millis(20),
            )
            .unwrap();
        assert_eq!(
            out,
            vec![
                RawNotification::deleted("/w/out.txt"),
                RawNotification::created("/w/new.txt"),
            ]
        );

        assert!(!source.has_pending());
        assert!(source.expire(start + Duration::from_millis(600)).is_empty());
    }

    #[test]
    fn test_second_old_half_flushes_the_first() {
        let mut source = adapter(WatchConfig::default());
        let now = Instant::now();
        let from = EventKind::Modify(ModifyKind::Name(RenameMode::From));

        source
            .process(event(from, &["/w/a"]).set_tracker(1), now)
            .unwrap();
        let second = source
            .process(event(from, &["/w/b"]).set_tracker(2), now)
            .unwrap();
        assert_eq!(second, vec![RawNotification::deleted("/w/a")]);

        let to = source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/c"])
                    .set_tracker(2),
                now,
            )
            .unwrap();
        assert_eq!(to, vec![RawNotification::renamed("/w/b", "/w/c")]);
    }

    #[test]
    fn test_ambiguous_rename_uses_existence() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let old = root.join("old.txt");
        let new = root.join("new.txt");
        std::fs::write(&new, b"x").unwrap();

        let mut source = SourceAdapter::new(root, &WatchConfig::default()).unwrap();
        let kind = EventKind::Modify(ModifyKind::Name(RenameMode::Any));
        let now = Instant::now();

        let first = source
            .process(Event::new(kind).add_path(old.clone()), now)
            .unwrap();
        let second = source
            .process(Event::new(kind).add_path(new.clone()), now)
            .unwrap();

        assert!(first.is_empty());
        assert_eq!(second, vec![RawNotification::renamed(old, new)]);
    }

    #[test]
    fn test_name_filter() {
        let mut source = adapter(WatchConfig {
            filter: "*.txt".to_string(),
            ..WatchConfig::default()
        });
        let now = Instant::now();

        let out = source
            .process(
                event(EventKind::Create(CreateKind::File), &["/w/a.txt", "/w/a.log"]),
                now,
            )
            .unwrap();
        assert_eq!(out, vec![RawNotification::created("/w/a.txt")]);

        // A rename passes when either side matches
        let out = source
            .process(
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                    &["/w/a.txt", "/w/a.bak"],
                ),
                now,
            )
            .unwrap();
        assert_eq!(out, vec![RawNotification::renamed("/w/a.txt", "/w/a.bak")]);
    }

    #[test]
    fn test_invalid_filter() {
        let result = SourceAdapter::new(
            PathBuf::from("/w"),
            &WatchConfig {
                filter: "[".to_string(),
                ..WatchConfig::default()
            },
        );
        assert!(matches!(result, Err(WatchError::InvalidFilter { .. })));
    }

    #[test]
    fn test_root_removal_is_a_source_failure() {
        let mut source = adapter(WatchConfig::default());
        let result = source.process(
            event(EventKind::Remove(RemoveKind::Folder), &["/w"]),
            Instant::now(),
        );
        assert!(matches!(result, Err(WatchError::Source { .. })));
    }

    #[test]
    fn test_reset_drops_pending_halves() {
        let mut source = adapter(WatchConfig::default());
        source
            .process(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/a"]),
                Instant::now(),
            )
            .unwrap();
        assert!(source.has_pending());

        source.reset();
        assert!(!source.has_pending());
    }
}
