//! Per-bar trading signals.

use serde::Serialize;

/// The four signals for one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BarSignals {
    pub long_entry: bool,
    pub long_exit: bool,
    pub short_entry: bool,
    pub short_exit: bool,
}

impl BarSignals {
    pub fn any(&self) -> bool {
        self.long_entry || self.long_exit || self.short_entry || self.short_exit
    }
}

/// Four boolean sequences aligned 1:1 with an OHLCV series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignalSeries {
    pub long_entry: Vec<bool>,
    pub long_exit: Vec<bool>,
    pub short_entry: Vec<bool>,
    pub short_exit: Vec<bool>,
}

/// Number of bars carrying each signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalCounts {
    pub long_entries: usize,
    pub long_exits: usize,
    pub short_entries: usize,
    pub short_exits: usize,
}

impl SignalSeries {
    pub fn with_len(len: usize) -> Self {
        SignalSeries {
            long_entry: vec![false; len],
            long_exit: vec![false; len],
            short_entry: vec![false; len],
            short_exit: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.long_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.long_entry.is_empty()
    }

    pub fn get(&self, index: usize) -> BarSignals {
        BarSignals {
            long_entry: self.long_entry[index],
            long_exit: self.long_exit[index],
            short_entry: self.short_entry[index],
            short_exit: self.short_exit[index],
        }
    }

    pub fn set(&mut self, index: usize, signals: BarSignals) {
        self.long_entry[index] = signals.long_entry;
        self.long_exit[index] = signals.long_exit;
        self.short_entry[index] = signals.short_entry;
        self.short_exit[index] = signals.short_exit;
    }

    pub fn push(&mut self, signals: BarSignals) {
        self.long_entry.push(signals.long_entry);
        self.long_exit.push(signals.long_exit);
        self.short_entry.push(signals.short_entry);
        self.short_exit.push(signals.short_exit);
    }

    /// Reset every signal at an index below `bar`.
    pub fn clear_before(&mut self, bar: usize) {
        for index in 0..bar.min(self.len()) {
            self.set(index, BarSignals::default());
        }
    }

    pub fn counts(&self) -> SignalCounts {
        let count = |v: &[bool]| v.iter().filter(|&&b| b).count();
        SignalCounts {
            long_entries: count(&self.long_entry),
            long_exits: count(&self.long_exit),
            short_entries: count(&self.short_entry),
            short_exits: count(&self.short_exit),
        }
    }

    /// Indices of bars with any signal.
    pub fn active_bars(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.get(i).any()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_counts() {
        let mut s = SignalSeries::with_len(4);
        s.set(
            1,
            BarSignals {
                long_entry: true,
                ..Default::default()
            },
        );
        s.set(
            3,
            BarSignals {
                long_exit: true,
                short_entry: true,
                ..Default::default()
            },
        );
        assert!(s.get(1).long_entry);
        assert!(!s.get(2).any());
        let counts = s.counts();
        assert_eq!(counts.long_entries, 1);
        assert_eq!(counts.long_exits, 1);
        assert_eq!(counts.short_entries, 1);
        assert_eq!(s.active_bars(), vec![1, 3]);
    }

    #[test]
    fn clear_before_warmup() {
        let mut s = SignalSeries::with_len(3);
        for i in 0..3 {
            s.set(
                i,
                BarSignals {
                    short_exit: true,
                    ..Default::default()
                },
            );
        }
        s.clear_before(2);
        assert_eq!(s.short_exit, vec![false, false, true]);
        s.clear_before(10);
        assert_eq!(s.counts().short_exits, 0);
    }
}
