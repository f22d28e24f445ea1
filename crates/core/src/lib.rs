//! Domain types and rules for the estate back office.
//!
//! Storage and HTTP layers depend on this crate; it has no I/O of its own
//! beyond the [`code::CodeRegistry`] seam used by the code allocator.

pub mod code;
pub mod followup;
pub mod highlight;
pub mod types;

pub use code::{
    AllocatedCode, AllocationError, AllocatorPolicy, Category, Code, CodeAllocator, CodeRegistry,
    DrawSource, RngDraws,
};
pub use followup::{FollowUpSchedule, ScheduleError};
pub use highlight::{HighlightChange, HighlightError, HighlightQuota};
