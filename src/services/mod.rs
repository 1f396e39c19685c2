//! Services that keep filesystem concerns out of the refinement core

pub mod io;

pub use io::ImageIOService;
