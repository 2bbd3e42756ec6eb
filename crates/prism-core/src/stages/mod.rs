//! The long-running pipeline stages.
//!
//! ```text
//! Scanner ──request──▶ Compute ──result──▶ Sorter
//!                         ▲          └───▶ Correlator waiter (by id)
//! Correlator ──request────┘
//! ```

pub mod compute;
pub mod scanner;
pub mod sorter;

pub use compute::ComputeStage;
pub use scanner::{CycleReport, FileIdentity, Scanner};
pub use sorter::Sorter;

/// Why a consume session ended.
pub(crate) enum SessionEnd {
    Shutdown,
    StreamClosed,
}
