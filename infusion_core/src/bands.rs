//! Ordered interval tables for protocol dispatch.
//!
//! Every protocol threshold table is a list of bands looked up first-match.
//! Whole-number table boundaries such as "51–69" are encoded half-open as
//! `[51, 70)`, so integer inputs land exactly where the printed protocol puts
//! them and fractional inputs have no gap to fall into. Tables written in
//! terms of "≤ 50" / "> 100" use closed-right bands instead.

/// An interval carrying a table row
#[derive(Clone, Debug)]
pub struct Band<T> {
    pub lower: f64,
    pub upper: f64,
    pub lower_closed: bool,
    pub upper_closed: bool,
    pub value: T,
}

impl<T> Band<T> {
    pub fn contains(&self, x: f64) -> bool {
        let above = x > self.lower || (self.lower_closed && x == self.lower);
        let below = x < self.upper || (self.upper_closed && x == self.upper);
        above && below
    }
}

/// Ordered list of bands, looked up first-match
#[derive(Clone, Debug)]
pub struct BandTable<T> {
    bands: Vec<Band<T>>,
}

impl<T> Default for BandTable<T> {
    fn default() -> Self {
        Self { bands: Vec::new() }
    }
}

impl<T> BandTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, lower: f64, upper: f64, lower_closed: bool, upper_closed: bool, value: T) -> Self {
        self.bands.push(Band {
            lower,
            upper,
            lower_closed,
            upper_closed,
            value,
        });
        self
    }

    /// `(-inf, upper)`
    pub fn below(self, upper: f64, value: T) -> Self {
        self.push(f64::NEG_INFINITY, upper, true, false, value)
    }

    /// `[lower, upper)`
    pub fn range(self, lower: f64, upper: f64, value: T) -> Self {
        self.push(lower, upper, true, false, value)
    }

    /// `[lower, inf)`
    pub fn at_least(self, lower: f64, value: T) -> Self {
        self.push(lower, f64::INFINITY, true, false, value)
    }

    /// `(-inf, upper]`
    pub fn at_most(self, upper: f64, value: T) -> Self {
        self.push(f64::NEG_INFINITY, upper, true, true, value)
    }

    /// `(lower, upper]`
    pub fn above_to(self, lower: f64, upper: f64, value: T) -> Self {
        self.push(lower, upper, false, true, value)
    }

    /// `(lower, inf)`
    pub fn above(self, lower: f64, value: T) -> Self {
        self.push(lower, f64::INFINITY, false, false, value)
    }

    pub fn lookup(&self, x: f64) -> Option<&T> {
        if x.is_nan() {
            return None;
        }
        self.bands.iter().find(|b| b.contains(x)).map(|b| &b.value)
    }

    pub fn bands(&self) -> &[Band<T>] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    fn sorted(&self) -> Vec<&Band<T>> {
        let mut sorted: Vec<&Band<T>> = self.bands.iter().collect();
        sorted.sort_by(|a, b| {
            a.lower
                .total_cmp(&b.lower)
                .then(b.lower_closed.cmp(&a.lower_closed))
        });
        sorted
    }

    /// Parts of `[lo, hi)` that no band covers. A single uncovered
    /// boundary point is reported as `(x, x)`.
    pub fn gaps(&self, lo: f64, hi: f64) -> Vec<(f64, f64)> {
        let mut gaps = Vec::new();
        let mut cursor = lo;
        let mut covered = false;

        for band in self.sorted() {
            if cursor >= hi {
                break;
            }
            if band.upper < cursor {
                continue;
            }
            if band.upper == cursor {
                covered |= band.contains(cursor);
                continue;
            }
            if band.lower > cursor {
                gaps.push((cursor, band.lower.min(hi)));
            } else if band.lower == cursor && !band.lower_closed && !covered {
                gaps.push((cursor, cursor));
            }
            cursor = band.upper;
            covered = band.upper_closed;
        }
        if cursor < hi {
            gaps.push((cursor, hi));
        }
        gaps
    }

    /// Whether any two bands claim the same value
    pub fn has_overlap(&self) -> bool {
        self.sorted().windows(2).any(|w| {
            w[1].lower < w[0].upper
                || (w[1].lower == w[0].upper && w[0].upper_closed && w[1].lower_closed)
        })
    }
}
