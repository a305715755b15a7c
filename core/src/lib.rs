pub mod challenges;
pub mod conversation;
pub mod error;
pub mod grading;
pub mod intent;
pub mod mastery;
pub mod profile;
pub mod recovery;
pub mod summary;
pub mod topics;
pub mod validation;
