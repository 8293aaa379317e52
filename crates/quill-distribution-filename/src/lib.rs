pub use source_dist::SourceDistFilename;
pub use wheel::WheelFilename;

mod source_dist;
mod wheel;
