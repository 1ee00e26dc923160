pub mod jobs;
pub mod requests;
