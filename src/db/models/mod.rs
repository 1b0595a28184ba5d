#![allow(unused_imports)]

//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work across the crate.

pub mod appointment;
pub mod brand;
pub mod customer;
pub mod job;
pub mod stats;

pub use self::appointment::*;
pub use self::brand::*;
pub use self::customer::*;
pub use self::job::*;
pub use self::stats::*;
