use std::fmt::Display;

use tracing::warn;

/// Run `attempt` until it succeeds or `max_attempts` calls have failed.
///
/// The closure receives the 1-based attempt number. Attempts follow each other
/// immediately; the last error is returned unchanged. `max_attempts` of 0 is
/// treated as 1.
pub fn retry<T, E, F>(max_attempts: u32, operation: &str, mut attempt: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut current = 1;
    loop {
        match attempt(current) {
            Ok(value) => return Ok(value),
            Err(err) if current < max_attempts => {
                warn!("{operation} failed on attempt {current}/{max_attempts}: {err}; retrying");
                current += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_success_is_returned_without_retrying() {
        let mut calls = 0;
        let result: Result<u32, String> = retry(3, "op", |_| {
            calls += 1;
            Ok(7)
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn succeeds_on_last_allowed_attempt() {
        let mut seen = Vec::new();
        let result: Result<&str, String> = retry(3, "op", |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(format!("transient {attempt}"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = retry(3, "op", |attempt| {
            calls += 1;
            Err(format!("failure {attempt}"))
        });
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), String> = retry(0, "op", |_| {
            calls += 1;
            Err("nope".to_string())
        });
        assert_eq!(calls, 1);
    }
}
