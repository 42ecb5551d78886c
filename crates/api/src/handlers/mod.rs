pub mod jobs;
pub mod research;
