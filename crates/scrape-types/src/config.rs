use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (1920, 1080);

/// Per-job scrape configuration. Every field is optional on the wire and
/// defaulted here; ranges are validated in `ScrapeConfig::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub timeout_secs: u32,
    pub max_retries: u32,
    pub delay_between_retries_secs: u32,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
    pub proxy: Option<String>,
    pub bypass_cloudflare: bool,
    pub extract_text: bool,
    pub extract_links: bool,
    pub extract_images: bool,
    pub wait_for_selector: Option<String>,
    pub execute_script: Option<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            timeout_secs: 30,
            max_retries: 3,
            delay_between_retries_secs: 1,
            headless: true,
            user_agent: None,
            window_size: DEFAULT_WINDOW_SIZE,
            proxy: None,
            bypass_cloudflare: true,
            extract_text: false,
            extract_links: false,
            extract_images: false,
            wait_for_selector: None,
            execute_script: None,
        }
    }
}

impl ScrapeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=300).contains(&self.timeout_secs) {
            return Err(format!("timeout must be 1-300s, got {}", self.timeout_secs));
        }
        if self.max_retries > 10 {
            return Err(format!("max_retries must be 0-10, got {}", self.max_retries));
        }
        if self.delay_between_retries_secs > 60 {
            return Err(format!(
                "delay_between_retries must be 0-60s, got {}",
                self.delay_between_retries_secs
            ));
        }
        let (w, h) = self.window_size;
        if !(100..=4000).contains(&w) || !(100..=4000).contains(&h) {
            return Err(format!("window_size out of range: {w},{h}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ScrapeConfig::default().validate().expect("default must be valid");
    }

    #[test]
    fn rejects_timeout_out_of_range() {
        let mut config = ScrapeConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.timeout_secs = 301;
        assert!(config.validate().is_err());
        config.timeout_secs = 300;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_max_retries_above_ten() {
        let mut config = ScrapeConfig::default();
        config.max_retries = 11;
        assert!(config.validate().is_err());
        config.max_retries = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_window_size_out_of_range() {
        let mut config = ScrapeConfig::default();
        config.window_size = (99, 1080);
        assert!(config.validate().is_err());
        config.window_size = (1920, 4001);
        assert!(config.validate().is_err());
    }
}
