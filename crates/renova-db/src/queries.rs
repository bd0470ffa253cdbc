//! Query functions, grouped per table.

pub mod approvals;
pub mod cursor;
pub mod events;
pub mod locks;
pub mod subscriptions;
