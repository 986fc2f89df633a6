//! Integration Test: Source Rules
//!
//! **Policy**: Production code in the widget core and host must
//! - never sleep (wait on I/O or cancellation instead),
//! - read the wall clock (including the local time zone) only through
//!   `clock.rs`, so rate limiting, timestamps and the fingerprint stay
//!   testable with a manual clock,
//! - never `unwrap()` (propagate errors with `?`).
//!
//! Test code (`#[cfg(test)]` modules, `tests/` directories) is exempt.

use architectural_enforcement::find_violations;

fn report(rule: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule} violated in production code:\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }

    panic!(
        "\nFound {} violation(s) of \"{rule}\".\nFix these before merging!",
        violations.len()
    );
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_violations(
        |code| code.contains("::sleep(") || code.contains(".sleep("),
        &[],
    );
    report("No sleep", &violations);
}

/// Test that the wall clock is only read by the clock module
#[test]
fn test_wall_clock_only_in_clock_module() {
    let violations = find_violations(
        |code| {
            code.contains("SystemTime::now(")
                || code.contains("Instant::now(")
                || code.contains("Utc::now(")
                || code.contains("Local::now(")
        },
        &["clock.rs"],
    );
    report("Wall clock through Clock only", &violations);
}

/// Test that production code propagates errors instead of unwrapping
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_violations(|code| code.contains(".unwrap()"), &[]);
    report("No unwrap", &violations);
}

/// Test that blocking HTTP is never used
#[test]
fn test_no_blocking_http_client() {
    let violations = find_violations(|code| code.contains("reqwest::blocking"), &[]);
    report("Async HTTP only", &violations);
}
