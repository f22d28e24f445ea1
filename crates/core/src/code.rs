use std::{fmt, future::Future};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CODE_WIDTH: u32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Widest code whose candidate space still fits in a `u32`.
pub const MAX_CODE_WIDTH: u32 = 9;

/// Business entity kind that owns a reference code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Property,
    Lead,
}

impl Category {
    /// Single-letter prefix used when formatting codes.
    pub fn prefix(self) -> char {
        match self {
            Self::Property => 'P',
            Self::Lead => 'L',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'P' => Some(Self::Property),
            'L' => Some(Self::Lead),
            _ => None,
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Lead => "lead",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing reference code such as `P-04821`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

impl Code {
    /// Formats `value` zero-padded to `width` digits behind the category prefix.
    pub fn format(category: Category, value: u32, width: u32) -> Self {
        Self(format!(
            "{}-{:0width$}",
            category.prefix(),
            value,
            width = width as usize
        ))
    }

    /// Parses a stored code, checking the prefix and the digit run.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let malformed = || CodeError::Malformed(raw.to_string());
        let mut chars = raw.chars();
        let prefix = chars.next().ok_or_else(malformed)?;
        Category::from_prefix(prefix).ok_or_else(malformed)?;
        if chars.next() != Some('-') {
            return Err(malformed());
        }
        let digits = chars.as_str();
        if digits.is_empty()
            || digits.len() > MAX_CODE_WIDTH as usize
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        Ok(Self(raw.to_string()))
    }

    pub fn category(&self) -> Category {
        // Construction guarantees a known prefix.
        match self.0.as_bytes()[0] {
            b'L' => Category::Lead,
            _ => Category::Property,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Code {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("malformed reference code: {0}")]
    Malformed(String),
}

/// Width and retry budget for code allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorPolicy {
    width: u32,
    max_attempts: u32,
}

impl AllocatorPolicy {
    pub fn new(width: u32, max_attempts: u32) -> Result<Self, PolicyError> {
        if width == 0 || width > MAX_CODE_WIDTH {
            return Err(PolicyError::Width(width));
        }
        if max_attempts == 0 {
            return Err(PolicyError::Attempts);
        }
        Ok(Self {
            width,
            max_attempts,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Number of distinct candidates, `10^width`.
    pub fn candidate_space(&self) -> u32 {
        10u32.pow(self.width)
    }
}

impl Default for AllocatorPolicy {
    fn default() -> Self {
        Self {
            width: DEFAULT_CODE_WIDTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("code width must be between 1 and {MAX_CODE_WIDTH} (got {0})")]
    Width(u32),
    #[error("at least one allocation attempt is required")]
    Attempts,
}

/// Existence check against the authoritative store.
///
/// Implementations answer "is there an entity of `category` whose code equals
/// `code`", reading at most one row.
pub trait CodeRegistry {
    type Error: std::error::Error + Send + Sync + 'static;

    fn code_exists(
        &self,
        category: Category,
        code: &Code,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Source of uniformly distributed candidate numbers.
pub trait DrawSource {
    /// Returns a value in `[0, bound)`.
    fn draw_below(&mut self, bound: u32) -> u32;
}

/// [`DrawSource`] backed by any `rand` generator.
#[derive(Debug, Clone)]
pub struct RngDraws<R>(R);

impl<R: Rng> RngDraws<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl RngDraws<StdRng> {
    /// Seeds a `Send` generator from the OS, suitable for use inside request tasks.
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl<R: Rng> DrawSource for RngDraws<R> {
    fn draw_below(&mut self, bound: u32) -> u32 {
        self.0.gen_range(0..bound)
    }
}

/// Result of a successful allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedCode {
    pub code: Code,
    /// Number of existence checks performed, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum AllocationError<E> {
    #[error("no free {category} code after {attempts} attempts")]
    Exhausted { category: Category, attempts: u32 },
    #[error("store query failed during code allocation: {0}")]
    Store(#[source] E),
}

/// Random-retry allocator shared by every category.
///
/// Candidates are checked one at a time; the first one the registry does not
/// know is returned. The check and the caller's insert are separate steps, so
/// callers must still handle a uniqueness conflict on insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeAllocator {
    policy: AllocatorPolicy,
}

impl CodeAllocator {
    pub fn new(policy: AllocatorPolicy) -> Self {
        Self { policy }
    }

    /// Draws candidates until one is free or the attempt budget runs out.
    ///
    /// A registry failure aborts immediately and is not counted as a collision.
    pub async fn allocate<R, D>(
        &self,
        category: Category,
        registry: &R,
        draws: &mut D,
    ) -> Result<AllocatedCode, AllocationError<R::Error>>
    where
        R: CodeRegistry,
        D: DrawSource + ?Sized,
    {
        let space = self.policy.candidate_space();
        for attempt in 1..=self.policy.max_attempts {
            let candidate = Code::format(category, draws.draw_below(space), self.policy.width);
            let taken = registry
                .code_exists(category, &candidate)
                .await
                .map_err(AllocationError::Store)?;
            if !taken {
                return Ok(AllocatedCode {
                    code: candidate,
                    attempts: attempt,
                });
            }
        }

        Err(AllocationError::Exhausted {
            category,
            attempts: self.policy.max_attempts,
        })
    }
}
