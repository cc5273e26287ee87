use std::io::Write;

use super::render::render;
use super::state::{ConsoleEvent, Session};
use crate::recorder::RecorderState;

/// Handle a published event: print it and run any follow-up work.
pub fn handle_console_event(session: &Session, event: &ConsoleEvent) {
    if let Some(text) = render(event) {
        if matches!(event, ConsoleEvent::RecordingTick { .. }) {
            print!("{text}");
            let _ = std::io::stdout().flush();
        } else {
            if matches!(
                event,
                ConsoleEvent::RecorderStateChanged(RecorderState::Stopping)
            ) {
                // finish the tick line
                println!();
            }
            println!("{text}");
        }
    }

    if let ConsoleEvent::RecordingUploaded { project, .. } = event {
        // a new sample changes the project's sample list
        let training = session.training.clone();
        if training.project().is_some_and(|current| current != *project) {
            return;
        }
        let project = project.clone();
        tokio::task::spawn_local(async move {
            training.resync(&project).await;
        });
    }
}
