pub mod icons;
pub mod progress;
pub mod status;

pub use progress::{RunUI, UiMode};
pub use status::render_status;
