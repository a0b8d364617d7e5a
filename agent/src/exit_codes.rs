//! Stable exit codes for agent CLI commands.

/// Command succeeded; for `agent run`, the model submitted.
pub const OK: i32 = 0;
/// Invalid config or arguments, or a run aborted by an unrecoverable error.
pub const INVALID: i32 = 1;
/// `agent run` stopped on its step or cost limit.
pub const LIMITS_EXCEEDED: i32 = 2;

/// Exit code for a run that ended with `exit_status`.
pub fn for_exit_status(exit_status: &str) -> i32 {
    match exit_status {
        "Submitted" => OK,
        "LimitsExceeded" => LIMITS_EXCEEDED,
        _ => INVALID,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_terminal_statuses() {
        assert_eq!(for_exit_status("Submitted"), OK);
        assert_eq!(for_exit_status("LimitsExceeded"), LIMITS_EXCEEDED);
        assert_eq!(for_exit_status("Something"), INVALID);
    }
}
