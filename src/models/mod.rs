//! Domain model module declarations.

pub mod message;
pub mod name;
pub mod session;
