//! Membership Type Definitions

mod member;
pub(crate) mod table;

pub use member::{Member, MemberStatus};
pub use table::MemberTable;
