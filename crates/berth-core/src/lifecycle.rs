use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of a one-shot launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchState {
    Created,
    ContainerInitialized,
    ModulesInstalled,
    Started,
    Running,
    Failed,
    CleanedUp,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::Created => write!(f, "created"),
            LaunchState::ContainerInitialized => write!(f, "container-initialized"),
            LaunchState::ModulesInstalled => write!(f, "modules-installed"),
            LaunchState::Started => write!(f, "started"),
            LaunchState::Running => write!(f, "running"),
            LaunchState::Failed => write!(f, "failed"),
            LaunchState::CleanedUp => write!(f, "cleaned-up"),
        }
    }
}

pub fn validate_transition(from: LaunchState, to: LaunchState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (LaunchState::Created, LaunchState::ContainerInitialized)
            | (LaunchState::ContainerInitialized, LaunchState::ModulesInstalled)
            | (LaunchState::ModulesInstalled, LaunchState::Started)
            | (LaunchState::Started, LaunchState::Running)
            | (
                LaunchState::Created
                    | LaunchState::ContainerInitialized
                    | LaunchState::ModulesInstalled
                    | LaunchState::Started,
                LaunchState::Failed
            )
            | (LaunchState::Failed, LaunchState::CleanedUp)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
