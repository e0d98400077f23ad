use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REFERENCE_PATH: &str = "assets/reference.png";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GOOGLE_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("PORT is not a valid port number: {0}")]
    InvalidPort(String),
    #[error("could not read reference image at {path}: {source}")]
    ReferenceImageUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("reference image at {0} is not a supported image format")]
    ReferenceImageFormat(PathBuf),
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Process-wide configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub port: u16,
    /// When set, error responses include the underlying failure detail.
    pub debug: bool,
    pub model: String,
    pub api_base: String,
    pub reference_image_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            Err(_) => DEFAULT_PORT,
        };

        let debug = matches!(std::env::var("DEBUG").as_deref(), Ok("1") | Ok("true"));

        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let api_base = std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let reference_image_path = std::env::var("REFERENCE_IMAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_REFERENCE_PATH));

        Ok(Config {
            api_key,
            port,
            debug,
            model,
            api_base,
            reference_image_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the process-global environment is only touched from
    // one place.
    #[test]
    fn from_env_requires_api_key_and_applies_defaults() {
        std::env::remove_var("GOOGLE_API_KEY");
        std::env::remove_var("PORT");
        std::env::remove_var("DEBUG");
        std::env::remove_var("GEMINI_MODEL");
        std::env::remove_var("GEMINI_API_BASE");
        std::env::remove_var("REFERENCE_IMAGE_PATH");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingApiKey)
        ));

        std::env::set_var("GOOGLE_API_KEY", "test-key");
        let config = Config::from_env().expect("config should load with key set");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.debug);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(
            config.reference_image_path,
            PathBuf::from(DEFAULT_REFERENCE_PATH)
        );

        std::env::set_var("PORT", "not-a-port");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidPort(_))
        ));

        std::env::set_var("PORT", "8080");
        std::env::set_var("DEBUG", "1");
        std::env::set_var("GEMINI_API_BASE", "http://localhost:9000/v1beta/");
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.port, 8080);
        assert!(config.debug);
        // Trailing slash is stripped so URL building stays predictable.
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");

        std::env::remove_var("GOOGLE_API_KEY");
        std::env::remove_var("PORT");
        std::env::remove_var("DEBUG");
        std::env::remove_var("GEMINI_API_BASE");
    }
}
