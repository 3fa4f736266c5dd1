//! Numeric helpers shared by segmentation and feature extraction.

pub mod statistics;
