pub mod compress;
pub mod correlate;
pub mod pipeline;
