//! Dirty-range bookkeeping.
//!
//! Tracks the `[min_modified, max_modified]` span of a host array, or a
//! "full rewrite" flag. Partial uploads send only that span.

/// Modified span of a host array since the last upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyRange {
    /// Nothing changed.
    #[default]
    Clean,
    /// Elements `min..=max` may have changed.
    Partial {
        /// Lowest modified index.
        min: usize,
        /// Highest modified index (inclusive).
        max: usize,
    },
    /// The whole array must be rewritten.
    Full,
}

impl DirtyRange {
    /// Marks one element.
    #[inline]
    pub fn mark(&mut self, index: usize) {
        self.mark_range(index, index);
    }

    /// Marks `start..=end` (inclusive).
    pub fn mark_range(&mut self, start: usize, end: usize) {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        *self = match *self {
            Self::Clean => Self::Partial { min: start, max: end },
            Self::Partial { min, max } => Self::Partial {
                min: min.min(start),
                max: max.max(end),
            },
            Self::Full => Self::Full,
        };
    }

    /// Forces a full rewrite.
    #[inline]
    pub fn mark_full(&mut self) {
        *self = Self::Full;
    }

    /// Merges another range into this one.
    pub fn union(&mut self, other: Self) {
        match other {
            Self::Clean => {}
            Self::Partial { min, max } => self.mark_range(min, max),
            Self::Full => self.mark_full(),
        }
    }

    /// Resets to clean and returns the previous value.
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Returns true if nothing changed.
    #[inline]
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Returns true if a full rewrite is required.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Resolves the range against an array of `len` live elements.
    ///
    /// Returns `(start, count, is_full_write)`; `None` when nothing in
    /// `0..len` needs uploading. A partial range spanning the whole array
    /// collapses to a full write.
    #[must_use]
    pub fn resolve(&self, len: usize) -> Option<(usize, usize, bool)> {
        if len == 0 {
            return None;
        }
        match *self {
            Self::Clean => None,
            Self::Full => Some((0, len, true)),
            Self::Partial { min, .. } if min >= len => None,
            Self::Partial { min, max } => {
                let max = max.min(len - 1);
                let full = min == 0 && max == len - 1;
                Some((min, max - min + 1, full))
            }
        }
    }
}
