pub mod file;
pub mod moodle;

pub use file::FileDiscussionSource;
pub use moodle::{decode_posts_response, MoodleRestSource};
