//! openeye-brief: reading the clarifying-question briefs that gate work on
//! the face-management feature.

pub mod questions;

pub use questions::{parse, render, Brief, BriefError, Question};
