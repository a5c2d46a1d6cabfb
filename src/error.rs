use thiserror::Error;

/// A weak handle could not be upgraded: its lifetime lock has started or
/// finished destruction, or the handle was never attached to anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("handle expired: the protected object is no longer available")]
pub struct Expired;
