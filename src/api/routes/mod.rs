//! API route modules.

pub mod live;
