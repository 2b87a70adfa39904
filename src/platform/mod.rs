//! Target-specific plumbing shared by the bridge modules.

pub mod runtime;
