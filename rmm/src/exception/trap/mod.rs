pub mod syndrome;
