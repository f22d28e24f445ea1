use thiserror::Error;

/// Upper bound on simultaneously highlighted listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightQuota {
    max: u32,
}

impl HighlightQuota {
    pub fn new(max: u32) -> Self {
        Self { max }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Decides whether a property may switch to `requested`.
    ///
    /// `currently_highlighted` is the number of highlighted listings, which
    /// includes the target when `already_highlighted` is set.
    pub fn check(
        &self,
        requested: bool,
        already_highlighted: bool,
        currently_highlighted: u32,
    ) -> Result<HighlightChange, HighlightError> {
        match (requested, already_highlighted) {
            (true, true) | (false, false) => Ok(HighlightChange::Unchanged),
            (false, true) => Ok(HighlightChange::Cleared),
            (true, false) if currently_highlighted >= self.max => {
                Err(HighlightError::QuotaExceeded { max: self.max })
            }
            (true, false) => Ok(HighlightChange::Set),
        }
    }
}

impl Default for HighlightQuota {
    fn default() -> Self {
        Self { max: 6 }
    }
}

/// Outcome of a permitted highlight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightChange {
    Set,
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HighlightError {
    #[error("highlight quota of {max} properties reached")]
    QuotaExceeded { max: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_until_quota_is_reached() {
        let quota = HighlightQuota::new(2);
        assert_eq!(quota.check(true, false, 0), Ok(HighlightChange::Set));
        assert_eq!(quota.check(true, false, 1), Ok(HighlightChange::Set));
        assert_eq!(
            quota.check(true, false, 2),
            Err(HighlightError::QuotaExceeded { max: 2 })
        );
    }

    #[test]
    fn rehighlighting_and_clearing_ignore_quota() {
        let quota = HighlightQuota::new(1);
        assert_eq!(quota.check(true, true, 1), Ok(HighlightChange::Unchanged));
        assert_eq!(quota.check(false, true, 5), Ok(HighlightChange::Cleared));
        assert_eq!(quota.check(false, false, 5), Ok(HighlightChange::Unchanged));
    }

    #[test]
    fn zero_quota_disables_highlighting() {
        let quota = HighlightQuota::new(0);
        assert!(quota.check(true, false, 0).is_err());
    }
}
