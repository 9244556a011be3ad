//! Bounded search for the newest entry matching a predicate.
//!
//! Used for retention-style cut-offs: given a predicate that is true for
//! a prefix of the log ("expired") and false afterwards, locate the last
//! entry for which it still holds.
//!
//! The search is an explicit three-state machine rather than a plain
//! binary search: the first entry decides whether anything matches at
//! all, the last entry short-circuits the common "everything matches"
//! case, and only then does the bisection run. Over `n` entries in
//! scope it performs at most `ceil(log2(n)) + 2` entry reads.

use std::sync::Arc;

use crate::error::Result;
use crate::ledger::LedgerCore;
use crate::model::Entry;
use crate::position::{Position, PositionBound};

enum SearchState {
    /// Probe the start position; no match there means no match at all.
    CheckFirst,
    /// Probe the end of the range; a match there is the answer.
    CheckLast,
    /// Bisect between the last known match and the first known miss.
    Searching,
}

pub(crate) struct FindNewestSearch<F> {
    ledger: Arc<LedgerCore>,
    start: Position,
    predicate: F,
    min: u64,
    max: u64,
    last_match: Option<Position>,
    search_pos: Position,
    state: SearchState,
}

impl<F> FindNewestSearch<F>
where
    F: Fn(&Entry) -> bool + Send + Sync,
{
    /// `start` must be a live entry position; `total` is the number of
    /// live entries at or after it.
    pub(crate) fn new(ledger: Arc<LedgerCore>, start: Position, total: u64, predicate: F) -> Self {
        Self {
            ledger,
            start,
            predicate,
            min: 0,
            max: total,
            last_match: None,
            search_pos: start,
            state: SearchState::CheckFirst,
        }
    }

    fn mid(&self) -> u64 {
        self.min + ((self.max - self.min) / 2).max(1)
    }

    pub(crate) async fn run(mut self) -> Result<Option<Position>> {
        loop {
            if !self.ledger.has_more_after(self.search_pos).await {
                return Ok(self.last_match);
            }
            let entry = self.ledger.read_entry(self.search_pos).await?;
            let matched = (self.predicate)(&entry);

            match self.state {
                SearchState::CheckFirst => {
                    if !matched {
                        return Ok(None);
                    }
                    self.last_match = Some(entry.position);
                    self.state = SearchState::CheckLast;
                    self.search_pos = self
                        .ledger
                        .position_after_n(self.start, self.max, PositionBound::StartExcluded)
                        .await;
                }
                SearchState::CheckLast => {
                    if matched {
                        return Ok(Some(entry.position));
                    }
                    self.state = SearchState::Searching;
                    self.search_pos = self
                        .ledger
                        .position_after_n(self.start, self.mid(), PositionBound::StartExcluded)
                        .await;
                }
                SearchState::Searching => {
                    let mid = self.mid();
                    if matched {
                        self.last_match = Some(entry.position);
                        self.min = mid;
                    } else {
                        self.max = mid - 1;
                    }
                    if self.max <= self.min {
                        return Ok(self.last_match);
                    }
                    self.search_pos = self
                        .ledger
                        .position_after_n(self.start, self.mid(), PositionBound::StartExcluded)
                        .await;
                }
            }
        }
    }
}
