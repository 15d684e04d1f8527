mod fakes;
mod temp;

pub use fakes::{RecordingFeedback, ScriptedChild, ScriptedLauncher};
pub use temp::TestContext;
