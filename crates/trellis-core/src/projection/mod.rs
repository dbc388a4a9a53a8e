//! Turning generated tokens into results.
//!
//! [`collect`] drains a session into a [`GenerateResult`] that can be parsed
//! into a typed value. [`PartialProjection`] and [`project_partial`] follow a
//! session as it streams, yielding partially-filled values.

mod batch;
mod partial;

pub use batch::{collect, parse, GenerateResult};
pub use partial::{project_partial, repair_json, PartialProjection};
