//! Exit codes for the CLI

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error, unknown task or cyclic task graph
pub const CONFIG_ERROR: i32 = 2;

/// A task failed
pub const TASK_FAILED: i32 = 3;

/// Exit code for an error that aborted a command
pub fn for_error(error: &anyhow::Error) -> i32 {
    let is_config = error.chain().any(|cause| {
        cause.is::<kiln_core::KilnError>()
            || cause.is::<kiln_core::ConfigError>()
            || cause.is::<kiln_tasks::BuildError>()
            || cause.is::<kiln_tasks::RegistryError>()
    });
    if is_config {
        CONFIG_ERROR
    } else {
        ERROR
    }
}
