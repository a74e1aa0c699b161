//! Story studio engine: image composition, the Replicate client, prediction
//! polling and the generate / analyze / apply / save operations.

pub mod compose;
pub mod config;
pub mod error;
pub mod poll;
pub mod replicate;
pub mod studio;

pub use compose::{check_image_file, stitch, write_stitched};
pub use config::StudioConfig;
pub use error::StudioError;
pub use poll::{wait_for_prediction, PollOutcome, PollPolicy};
pub use replicate::{Prediction, PredictionApi, PredictionStatus, ReplicateClient};
pub use studio::{
    resolve_edit_prompt, AppliedEdit, ApplyRequest, EditSource, ModelChoice, StoryImage,
    StoryStudio,
};
