pub mod icons;
pub mod progress;

pub use progress::{
    EngineUI, describe, print_blackboard, print_history, print_pending_review, print_report,
    print_separator, stage_icon,
};
