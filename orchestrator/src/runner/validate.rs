use serde_json::Value;

/// Check that `config` is a usable test configuration for `language`.
///
/// Every configuration must be a non-empty JSON object. Python
/// configurations additionally need a `version` and either `test_file` or
/// `test_files`.
pub fn validate_test_config(config: &Value, language: &str) -> bool {
    let obj = match config.as_object() {
        Some(obj) if !obj.is_empty() => obj,
        _ => {
            tracing::error!("Invalid test config: not a non-empty object");
            return false;
        }
    };

    if language == "python" {
        if !obj.contains_key("version") {
            tracing::error!("Missing 'version' in Python test config");
            return false;
        }
        if !obj.contains_key("test_file") && !obj.contains_key("test_files") {
            tracing::error!("Missing 'test_file' or 'test_files' in Python test config");
            return false;
        }
    }

    true
}
