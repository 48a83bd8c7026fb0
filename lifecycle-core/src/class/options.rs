//! Memo member configuration.

use serde::{Deserialize, Serialize};

/// Options accepted by [`MemoMethod`](super::MemoMethod) and
/// [`MemoGetter`](super::MemoGetter).
///
/// Serialized with camelCase keys; missing keys fall back to the defaults,
/// so `{}` is an eager memo and `{"isLazy": true}` a lazy one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoOptions {
    /// Defer recomputation after a dependency change until the next read.
    pub is_lazy: bool,
}

impl MemoOptions {
    /// Recompute as soon as a dependency changes.
    pub const EAGER: MemoOptions = MemoOptions { is_lazy: false };

    /// Recompute on the next read after a dependency changes.
    pub const LAZY: MemoOptions = MemoOptions { is_lazy: true };
}
