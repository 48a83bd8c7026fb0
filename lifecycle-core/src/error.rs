//! Errors raised by the class lifecycle layer.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;

/// The kind of a class member as seen by the wrapping functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// An ordinary method.
    Method,
    /// A read-only computed accessor.
    Accessor,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberKind::Method => f.write_str("method"),
            MemberKind::Accessor => f.write_str("accessor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A wrapped member was used on an instance that never went through
    /// [`construct`](crate::class::construct).
    #[error("`{member}` used on an instance that was not constructed with `construct()`")]
    NotInitialized { member: &'static str },

    /// An accessor memo was applied to something that is not an accessor.
    #[error("`{member}` is a {found}, but accessor memos require an {expected}")]
    InvalidMemberKind {
        member: &'static str,
        expected: MemberKind,
        found: MemberKind,
    },

    /// A live computation was requested after the instance was destroyed.
    #[error("`{member}` cannot start a live computation on a destroyed instance")]
    Destroyed { member: &'static str },

    /// A computation ran after its owning instance was dropped.
    #[error("`{member}` outlived the instance that owned it")]
    InstanceDropped { member: &'static str },
}

impl LifecycleError {
    /// The member the error is about.
    pub fn member(&self) -> &'static str {
        match self {
            LifecycleError::NotInitialized { member }
            | LifecycleError::InvalidMemberKind { member, .. }
            | LifecycleError::Destroyed { member }
            | LifecycleError::InstanceDropped { member } => member,
        }
    }
}
