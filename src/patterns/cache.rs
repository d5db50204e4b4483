use std::collections::{HashSet, VecDeque};

use crate::patterns::{select_best, PatternKind, PatternMatch};

type MatchKey = (PatternKind, i64, i64, String);

fn match_key(m: &PatternMatch) -> MatchKey {
    let (kind, start, end) = m.key();
    (kind, start, end, m.symbol.clone())
}

/// Patterns already reported for one chart.
///
/// Rescans see the same formation again and again; the cache keys matches on
/// (kind, start, end, symbol) so each is announced once.  A rescan that
/// rescored a known match updates it in place.
///
/// The history is capped, but the set of announced keys is not tied to it:
/// a key is only forgotten once its match ends before the scan horizon, the
/// earliest bar a scan can still look at.
#[derive(Debug, Clone)]
pub struct PatternCache {
    max_history: usize,
    history: VecDeque<PatternMatch>,
    announced: HashSet<MatchKey>,
}

impl PatternCache {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            history: VecDeque::new(),
            announced: HashSet::new(),
        }
    }

    /// Merge a scan result.  Returns the matches not announced before.
    ///
    /// `horizon` is the start time of the oldest bar the scan covered; keys
    /// of matches ending before it cannot come back and are dropped.
    pub fn record(&mut self, matches: Vec<PatternMatch>, horizon: i64) -> Vec<PatternMatch> {
        let mut fresh = Vec::new();
        for m in matches {
            let key = match_key(&m);
            if self.announced.contains(&key) {
                if let Some(existing) = self.history.iter_mut().find(|h| match_key(h) == key) {
                    *existing = m;
                }
                continue;
            }
            self.announced.insert(key);
            self.history.push_back(m.clone());
            fresh.push(m);
        }
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.announced.retain(|(_, _, end, _)| *end >= horizon);
        fresh
    }

    /// Every remembered match, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PatternMatch> {
        self.history.iter()
    }

    /// Matches still inside their validity window at `now`, overlaps
    /// resolved to the strongest.
    pub fn active(&self, now: i64) -> Vec<PatternMatch> {
        let live: Vec<PatternMatch> = self
            .history
            .iter()
            .filter(|m| m.is_active_at(now))
            .cloned()
            .collect();
        select_best(live)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Keys still remembered as announced.
    pub fn announced_len(&self) -> usize {
        self.announced.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.announced.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(kind: PatternKind, confidence: f64, start: i64, end: i64) -> PatternMatch {
        PatternMatch::new(kind, "BTCUSDT", true, confidence, start, end)
    }

    #[test]
    fn rescans_report_only_new_matches() {
        let mut cache = PatternCache::new(100);
        let first = cache.record(vec![m(PatternKind::Doji, 0.5, 0, 10)], 0);
        assert_eq!(first.len(), 1);

        let second = cache.record(vec![
            m(PatternKind::Doji, 0.6, 0, 10),
            m(PatternKind::Hammer, 0.7, 20, 30),
        ], 0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, PatternKind::Hammer);
        assert_eq!(cache.len(), 2);

        // The rescored doji replaced the earlier one.
        let doji = cache.history().find(|h| h.kind == PatternKind::Doji).unwrap();
        assert!((doji.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn history_is_capped_oldest_first() {
        let mut cache = PatternCache::new(2);
        for i in 0..3 {
            cache.record(vec![m(PatternKind::Doji, 0.5, i * 100, i * 100 + 10)], 0);
        }
        let starts: Vec<i64> = cache.history().map(|h| h.start_time).collect();
        assert_eq!(starts, vec![100, 200]);
    }

    #[test]
    fn active_drops_expired_matches() {
        let mut cache = PatternCache::new(10);
        let mut short = m(PatternKind::Doji, 0.5, 0, 10);
        short.validity_window_ms = 100;
        let long = m(PatternKind::Hammer, 0.5, 0, 10);
        cache.record(vec![short, long], 0);

        assert_eq!(cache.active(50).len(), 2);
        let later = cache.active(500);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].kind, PatternKind::Hammer);
    }

    #[test]
    fn evicted_matches_are_not_announced_again() {
        // One scan with more matches than the history holds.
        let kinds = [PatternKind::Doji, PatternKind::Hammer, PatternKind::ShootingStar];
        let scan: Vec<PatternMatch> = (0..200)
            .flat_map(|i| kinds.iter().map(move |&k| m(k, 0.5, i * 60, i * 60 + 60)))
            .collect();

        let mut cache = PatternCache::new(500);
        assert_eq!(cache.record(scan.clone(), 0).len(), 600);
        assert_eq!(cache.len(), 500);

        // Same window scanned again: nothing new.
        assert!(cache.record(scan, 0).is_empty());
        assert_eq!(cache.announced_len(), 600);
    }

    #[test]
    fn keys_behind_the_horizon_are_forgotten() {
        let mut cache = PatternCache::new(10);
        cache.record(vec![m(PatternKind::Doji, 0.5, 0, 10), m(PatternKind::Hammer, 0.5, 50, 60)], 0);

        // The scan window moved past the doji.
        cache.record(Vec::new(), 40);
        assert_eq!(cache.announced_len(), 1);

        let again = cache.record(vec![m(PatternKind::Hammer, 0.9, 50, 60)], 40);
        assert!(again.is_empty());
        let hammer = cache.history().find(|h| h.kind == PatternKind::Hammer).unwrap();
        assert!((hammer.confidence - 0.9).abs() < 1e-12);
    }
}
