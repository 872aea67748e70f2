//! Idle detection over an injected host environment.

mod detector;

pub use detector::IdleDetector;

/// User activity status.
///
/// Doubles as the tag under which detector callbacks are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// User is currently active.
    Active,
    /// No qualifying activity within the idle duration, or the page is
    /// hidden.
    Idle,
}
