//! Interactive approval at the interrupt point.

use anyhow::Result;
use dialoguer::{Input, Select, theme::ColorfulTheme};

use crate::engine::{Decision, PendingReview};
use crate::ui;

/// Asks a human what to do with a paused thread.
pub struct ApprovalGate {
    /// Approve every remaining pause without asking
    pub skip_all: bool,
}

impl ApprovalGate {
    pub fn new(skip_all: bool) -> Self {
        Self { skip_all }
    }

    pub fn check(&mut self, review: &PendingReview) -> Result<Decision> {
        ui::print_pending_review(review);

        if self.skip_all {
            println!("  {} (--yes flag)", console::style("Auto-approved").dim());
            return Ok(Decision::Approve);
        }

        self.prompt_user(review)
    }

    fn prompt_user(&mut self, review: &PendingReview) -> Result<Decision> {
        let options = &[
            "Yes, execute this candidate",
            "Yes, and auto-approve remaining pauses (--yes)",
            "No, reject with feedback",
            "Skip execution and go to documentation",
            "Abort this thread",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Execute the candidate for {}?", review.file_path))
            .items(options)
            .default(0)
            .interact()?;

        match selection {
            0 => Ok(Decision::Approve),
            1 => {
                self.skip_all = true;
                Ok(Decision::Approve)
            }
            2 => {
                let feedback: String = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt("Feedback for the refactor")
                    .interact_text()?;
                Ok(Decision::Reject(feedback))
            }
            3 => Ok(Decision::Skip("execution skipped at approval".to_string())),
            4 => Ok(Decision::Abort("aborted at approval".to_string())),
            _ => unreachable!(),
        }
    }
}
