//! Environment-backed settings
//!
//! Assistline reads everything from process environment variables, optionally
//! seeded from a `.env` file: `OPENAI_API_KEY`, `ASSISTANT_ID`,
//! `RUN_INSTRUCTIONS` and the `ASSISTLINE_*` polling and logging knobs.

use crate::{AssistlineError, Result};
use std::env;
use std::path::Path;

/// Seed the environment from the nearest `.env` file
///
/// Variables already set in the process win over the file. A missing file
/// is fine; a file that does not parse is a [`AssistlineError::Config`].
///
/// ```no_run
/// assistline_core::load_env().ok();
/// let assistant = std::env::var("ASSISTANT_ID").unwrap_or_default();
/// ```
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!("Read settings from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => {
            tracing::debug!("No .env file, using the process environment");
            Ok(())
        }
        Err(e) => Err(dotenv_error(".env", e)),
    }
}

/// Seed the environment from an explicit file, which must exist
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    dotenvy::from_path(path).map_err(|e| dotenv_error(&path.display().to_string(), e))?;
    tracing::debug!("Read settings from {}", path.display());
    Ok(())
}

fn dotenv_error(source: &str, e: dotenvy::Error) -> AssistlineError {
    match e {
        dotenvy::Error::LineParse(line, pos) => AssistlineError::config(format!(
            "{source}: cannot parse `{line}` (column {pos})"
        )),
        other => AssistlineError::config(format!("{source}: {other}")),
    }
}

/// A variable that must be set to something other than whitespace
pub fn get_required_env(key: &str) -> Result<String> {
    get_optional_env(key).ok_or_else(|| {
        AssistlineError::config(format!(
            "{key} is not set; export it or add it to .env"
        ))
    })
}

/// A trimmed variable, or `None` when unset or blank
pub fn get_optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A whole number of seconds, or `default` when unset
///
/// A value that is not a non-negative integer is a configuration error
/// rather than being silently replaced by the default.
pub fn get_env_secs(key: &str, default: u64) -> Result<u64> {
    match get_optional_env(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            AssistlineError::config(format!("{key} must be a whole number of seconds, got '{raw}'"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_get_env_secs() {
        env::set_var("ASSISTLINE_TEST_SECS", " 42 ");
        env::set_var("ASSISTLINE_TEST_SECS_BAD", "soon");
        assert_eq!(get_env_secs("ASSISTLINE_TEST_SECS", 3).unwrap(), 42);
        assert_eq!(get_env_secs("ASSISTLINE_TEST_SECS_UNSET", 3).unwrap(), 3);

        let err = get_env_secs("ASSISTLINE_TEST_SECS_BAD", 3).unwrap_err();
        assert!(err.to_string().contains("ASSISTLINE_TEST_SECS_BAD"));
        env::remove_var("ASSISTLINE_TEST_SECS");
        env::remove_var("ASSISTLINE_TEST_SECS_BAD");
    }

    #[test]
    fn test_optional_env_ignores_blank_values() {
        env::set_var("ASSISTLINE_TEST_OPTIONAL", "  be brief ");
        env::set_var("ASSISTLINE_TEST_OPTIONAL_BLANK", "   ");
        assert_eq!(
            get_optional_env("ASSISTLINE_TEST_OPTIONAL").as_deref(),
            Some("be brief")
        );
        assert_eq!(get_optional_env("ASSISTLINE_TEST_OPTIONAL_BLANK"), None);
        env::remove_var("ASSISTLINE_TEST_OPTIONAL");
        env::remove_var("ASSISTLINE_TEST_OPTIONAL_BLANK");
    }

    #[test]
    fn test_get_required_env() {
        env::set_var("ASSISTLINE_TEST_REQUIRED", "sk-test");
        env::set_var("ASSISTLINE_TEST_REQUIRED_EMPTY", "  ");
        assert_eq!(get_required_env("ASSISTLINE_TEST_REQUIRED").unwrap(), "sk-test");

        let err = get_required_env("ASSISTLINE_TEST_REQUIRED_EMPTY").unwrap_err();
        assert!(matches!(err, AssistlineError::Config(_)));
        assert!(get_required_env("ASSISTLINE_TEST_REQUIRED_UNSET").is_err());
        env::remove_var("ASSISTLINE_TEST_REQUIRED");
        env::remove_var("ASSISTLINE_TEST_REQUIRED_EMPTY");
    }

    #[test]
    fn test_load_env_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "ASSISTLINE_TEST_FROM_FILE=asst_file").unwrap();

        load_env_from_path(&path).unwrap();
        assert_eq!(
            get_optional_env("ASSISTLINE_TEST_FROM_FILE").as_deref(),
            Some("asst_file")
        );
        assert!(load_env_from_path(dir.path().join("missing.env")).is_err());
        env::remove_var("ASSISTLINE_TEST_FROM_FILE");
    }
}
