//! # Control command dispatch.
//!
//! One command arrives per connection as a short plaintext line. The first
//! whitespace field is the verb; the rest are arguments. Responses are plain
//! text rendered from the [`Coordinator`]. Anything unrecognized, including
//! an empty payload, answers with the help banner, and no command other than
//! a valid `update-job` mutates tunables.

use std::time::Duration;

use tokio::time;

use crate::core::Coordinator;

/// Help banner returned for empty or unknown commands.
pub const HELP: &str = "Commands available:\nstatus | status-of <job name> | pause <job name> | pause-group <group name> | pause-all | unpause <job name> | unpause-group <group name> | unpause-all | kill-all | update-job <job name> <property> <value> | version\n";

/// Grace given to runners so unpause responses show the post-pause status.
const UNPAUSE_SETTLE: Duration = Duration::from_secs(1);

/// Dispatches one control command and renders its response.
pub async fn respond(coordinator: &Coordinator, input: &str) -> String {
    let fields: Vec<&str> = input.split_whitespace().collect();
    let Some((&verb, rest)) = fields.split_first() else {
        return HELP.to_string();
    };
    let argument = rest.join(" ");

    match verb {
        "status" => coordinator.status(),
        "status-of" => coordinator.status_of(&argument),
        "pause" => {
            coordinator.pause(&argument);
            format!(
                "Job will be paused after getting out of sleep cycle or after execution. Current status: \n{}",
                coordinator.status_of(&argument)
            )
        }
        "pause-group" => {
            coordinator.pause_group(&argument);
            format!(
                "Jobs will be paused after getting out of sleep cycle or after execution. Current status: \n{}",
                coordinator.status()
            )
        }
        "pause-all" => {
            coordinator.pause_all();
            format!(
                "Jobs will be paused after getting out of sleep cycle or after execution. Current status: \n{}",
                coordinator.status()
            )
        }
        "unpause" => {
            coordinator.unpause(&argument);
            time::sleep(UNPAUSE_SETTLE).await;
            coordinator.status_of(&argument)
        }
        "unpause-group" => {
            coordinator.unpause_group(&argument);
            time::sleep(UNPAUSE_SETTLE).await;
            coordinator.status()
        }
        "unpause-all" => {
            coordinator.unpause_all();
            time::sleep(UNPAUSE_SETTLE).await;
            coordinator.status()
        }
        "kill-all" => {
            coordinator.kill_all();
            coordinator.status()
        }
        "version" => format!("v{}", crate::VERSION),
        "update-job" => {
            if fields.len() < 4 {
                return "In order to update the job property you need to pass the job name, the property that you need to update and the new value, all separated by space.".to_string();
            }
            let (name, key, value) = (fields[1], fields[2], fields[3]);
            match coordinator.update_property(name, key, value) {
                Ok(()) => format!(
                    "Job updated successfully. Current status: \n{}",
                    coordinator.status_of(name)
                ),
                Err(err) => err.to_string(),
            }
        }
        _ => HELP.to_string(),
    }
}
