//! Launcher double that records descriptors instead of spawning processes.

use std::sync::Mutex;

use crate::evaluator::LaunchDescriptor;
use crate::launcher::{LaunchError, Launcher};

/// Records every launch request.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchDescriptor>>,
}

impl RecordingLauncher {
    /// Captures a copy of the recorded launches.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchDescriptor> {
        self.launches
            .lock()
            .expect("launcher mutex poisoned")
            .clone()
    }

    /// Targets of the recorded launches, in order.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.launches()
            .into_iter()
            .map(|descriptor| descriptor.target)
            .collect()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, descriptor: &LaunchDescriptor) -> Result<(), LaunchError> {
        self.launches
            .lock()
            .expect("launcher mutex poisoned")
            .push(descriptor.clone());
        Ok(())
    }
}
