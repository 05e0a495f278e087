//! Circular longitude indexing.
//!
//! Every longitude computation in the pipeline goes through [`LonRing`] so
//! that wraparound from the last longitude back to index 0 is handled in one
//! place instead of at each call site.

use ndarray::{Array1, ArrayView1};

/// Modular accessor over a longitude axis of `len` points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LonRing {
    len: usize,
}

impl LonRing {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Folds any signed index onto the ring.
    #[inline]
    pub fn wrap(&self, index: isize) -> usize {
        index.rem_euclid(self.len as isize) as usize
    }

    /// Index `k` steps east (positive) or west (negative) of `i`.
    #[inline]
    pub fn neighbor(&self, i: usize, k: isize) -> usize {
        self.wrap(i as isize + k)
    }

    /// Steps needed to walk east from `from` to `to`.
    #[inline]
    pub fn forward(&self, from: usize, to: usize) -> usize {
        (to % self.len + self.len - from % self.len) % self.len
    }

    /// Shortest unsigned separation between two indices.
    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> usize {
        self.forward(i, j).min(self.forward(j, i))
    }

    /// Shortest signed displacement from `from` to `to`, east positive.
    ///
    /// Exactly opposite points resolve to the positive half-turn.
    pub fn signed_offset(&self, from: usize, to: usize) -> isize {
        let east = self.forward(from, to);
        if east * 2 <= self.len {
            east as isize
        } else {
            east as isize - self.len as isize
        }
    }

    /// Position (1-based) of each flagged longitude within its circular run.
    ///
    /// Unflagged longitudes get 0. A run crossing the end of the axis keeps
    /// counting past index 0. When every longitude is flagged the count
    /// starts at index 0.
    pub fn run_counts(&self, row: ArrayView1<u8>) -> Array1<u32> {
        let mut counts = Array1::<u32>::zeros(self.len);
        let Some(gap) = row.iter().position(|v| *v == 0) else {
            for (i, c) in counts.iter_mut().enumerate() {
                *c = (i + 1) as u32;
            }
            return counts;
        };
        let mut count = 0u32;
        for step in 1..=self.len {
            let i = self.neighbor(gap, step as isize);
            if row[i] != 0 {
                count += 1;
                counts[i] = count;
            } else {
                count = 0;
            }
        }
        counts
    }

    /// Maximal circular runs of flagged longitudes, ordered by start index.
    pub fn runs(&self, row: ArrayView1<u8>) -> Vec<LonBand> {
        let Some(gap) = row.iter().position(|v| *v == 0) else {
            return vec![LonBand::new(0, self.len)];
        };
        let mut bands = Vec::new();
        let mut current: Option<LonBand> = None;
        for step in 1..=self.len {
            let i = self.neighbor(gap, step as isize);
            if row[i] != 0 {
                match current.as_mut() {
                    Some(band) => band.len += 1,
                    None => current = Some(LonBand::new(i, 1)),
                }
            } else if let Some(band) = current.take() {
                bands.push(band);
            }
        }
        if let Some(band) = current {
            bands.push(band);
        }
        bands.sort_by_key(|b| b.start);
        bands
    }
}

/// Contiguous longitude band `start, start+1, ..` of `len` points on a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LonBand {
    pub start: usize,
    pub len: usize,
}

impl LonBand {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn indices(self, ring: LonRing) -> impl Iterator<Item = usize> {
        (0..self.len).map(move |k| ring.neighbor(self.start, k as isize))
    }

    pub fn contains(&self, ring: &LonRing, i: usize) -> bool {
        ring.forward(self.start, i) < self.len
    }

    /// Number of longitudes shared with `other`.
    pub fn overlap(&self, other: &LonBand, ring: &LonRing) -> usize {
        self.indices(*ring).filter(|i| other.contains(ring, *i)).count()
    }

    /// Median longitude of the band.
    ///
    /// Even-width bands take the western of the two middle longitudes, which
    /// is what a median over the band plus a zero pivot yields.
    pub fn centroid(&self, ring: &LonRing) -> usize {
        let offset = if self.len % 2 == 0 {
            self.len / 2 - 1
        } else {
            self.len / 2
        };
        ring.neighbor(self.start, offset as isize)
    }
}
