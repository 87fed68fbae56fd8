use std::collections::BTreeMap;

/// A pending delta for one object: its state at the last checkout and now.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub previous: Option<T>,
    pub current: Option<T>,
}

/// Records object deltas between checkouts.
///
/// Several updates of the same key collapse into one change spanning the
/// first `previous` and the last `current`; a change that ends where it
/// started is dropped.
#[derive(Debug)]
pub struct ChangeTracker<K, T> {
    pending: BTreeMap<K, Change<T>>,
}

impl<K, T> Default for ChangeTracker<K, T> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone, T: PartialEq + Clone> ChangeTracker<K, T> {
    /// Returns true when the update is a real change.
    pub fn update(&mut self, key: &K, previous: Option<&T>, current: Option<&T>) -> bool {
        if previous == current {
            return false;
        }
        match self.pending.get_mut(key) {
            Some(change) => {
                change.current = current.cloned();
                if change.previous == change.current {
                    self.pending.remove(key);
                }
            }
            None => {
                self.pending.insert(
                    key.clone(),
                    Change {
                        previous: previous.cloned(),
                        current: current.cloned(),
                    },
                );
            }
        }
        true
    }

    /// Drain all pending changes.
    pub fn checkout(&mut self) -> BTreeMap<K, Change<T>> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_update_is_ignored() {
        let mut tracker: ChangeTracker<&str, i32> = ChangeTracker::default();
        assert!(!tracker.update(&"a", Some(&1), Some(&1)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn updates_collapse_between_checkouts() {
        let mut tracker: ChangeTracker<&str, i32> = ChangeTracker::default();
        assert!(tracker.update(&"a", None, Some(&1)));
        assert!(tracker.update(&"a", Some(&1), Some(&2)));
        let changes = tracker.checkout();
        assert_eq!(
            changes.get("a"),
            Some(&Change {
                previous: None,
                current: Some(2)
            })
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn round_trip_cancels_out() {
        let mut tracker: ChangeTracker<&str, i32> = ChangeTracker::default();
        tracker.update(&"a", Some(&1), Some(&2));
        tracker.update(&"a", Some(&2), Some(&1));
        assert!(tracker.checkout().is_empty());
    }
}
