use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Bytes;

/// The normalized outcome of one successful fetch, uniform across scraper
/// variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status_code: u16,
    pub response_time_ms: u64,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    pub content: Bytes,
    pub text: Option<String>,
    pub links: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub final_url: Option<String>,
}
