use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable holding a configuration key,
/// e.g. `model.name` is read from `LIQUID_MODEL__NAME`
pub fn to_env_var(field_path: &str) -> String {
    let var = field_path.replace('.', "__").to_uppercase();
    format!("LIQUID_{}", var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("model.name"), "LIQUID_MODEL__NAME");
        assert_eq!(to_env_var("providers.openai.api_key"), "LIQUID_PROVIDERS__OPENAI__API_KEY");
        assert_eq!(to_env_var("suggestions"), "LIQUID_SUGGESTIONS");
    }

    #[test]
    fn test_missing_env_var_message() {
        let err = ConfigError::MissingEnvVar {
            env_var: to_env_var("model.name"),
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: LIQUID_MODEL__NAME"
        );
    }
}
