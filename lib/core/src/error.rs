//! Error handling foundation for the portcullis gateway.
//!
//! Only the `Result` alias lives here. Every crate keeps its own error enum
//! (`SourceError`, `AccessError`, `OidcError`, ...) and returns it wrapped in
//! a rootcause [`Report`], so callers can attach their own context with
//! `.context()` while the enum stays matchable at the boundary that cares.

use rootcause::Report;

/// Result carrying a rootcause report over the crate-specific context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
