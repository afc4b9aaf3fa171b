//! User authorization for the portcullis gateway.
//!
//! Who may pass the gateway is decided by a static allow-list of user names,
//! group names and email addresses. The list is read from a
//! [`ConfigSource`](portcullis_config_source::ConfigSource) and replaced
//! wholesale whenever the source changes.
//!
//! # Decision order
//!
//! Checks short-circuit on the first match:
//! 1. the user name is allowed
//! 2. any group is allowed
//! 3. the email is allowed **and** the provider marked it verified
//!
//! Anything else is denied.
//!
//! # Example
//!
//! ```
//! use portcullis_access::{AllowList, Grant};
//! use portcullis_core::Claims;
//!
//! let list = AllowList::parse("allowedGroups: [ops]").unwrap();
//! let claims = Claims::default().with_name("alice").with_groups(["ops"]);
//!
//! assert_eq!(list.authorize(&claims), Some(Grant::Group("ops".to_string())));
//! ```

pub mod allow_list;
pub mod error;
pub mod filter;

pub use allow_list::{AllowList, Grant};
pub use error::AccessError;
pub use filter::UserFilter;
