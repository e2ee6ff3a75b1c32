#![allow(non_camel_case_types)]

pub mod ioctls;
mod structs;

pub use ioctls::*;
pub use structs::*;
