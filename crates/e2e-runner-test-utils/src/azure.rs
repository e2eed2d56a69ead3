//! Azure test utilities

/// Get the Azure location for tests.
///
/// Checks `LOCATION` and falls back to westus2.
///
/// # Example
///
/// ```
/// use e2e_runner_test_utils::azure::get_test_location;
///
/// let location = get_test_location();
/// assert!(!location.is_empty());
/// ```
pub fn get_test_location() -> String {
    std::env::var("LOCATION")
        .ok()
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "westus2".to_string())
}
