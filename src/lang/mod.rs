//! # eso language core
//!
//! Shared data model for the compiler and the VM: runtime values and the
//! value-kind vocabulary that procedure signatures are written in.
//!
//! ## Documentation conventions
//!
//! - Stack effects are written as `( before -- after )`.
//! - `|...|` denotes an eso capture (a fixed-length argument aggregate).

pub mod value;
