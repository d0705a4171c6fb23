//! Expert directories.

use serde::{Deserialize, Serialize};

use crate::config::ExpertConfig;
use crate::error::Result;

/// Expertise tag that matches any request.
pub const GENERAL_EXPERTISE: &str = "general";

/// A human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expert {
    pub id: String,
    pub name: String,
    pub expertise: Vec<String>,
    pub response_time_minutes: u32,
}

impl Expert {
    /// Whether the expert covers the tag exactly.
    pub fn covers(&self, expertise: &str) -> bool {
        self.expertise.iter().any(|e| e.eq_ignore_ascii_case(expertise))
    }

    /// Whether the expert takes general requests.
    pub fn is_generalist(&self) -> bool {
        self.covers(GENERAL_EXPERTISE)
    }
}

impl From<&ExpertConfig> for Expert {
    fn from(config: &ExpertConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            expertise: config.expertise.clone(),
            response_time_minutes: config.response_time_minutes,
        }
    }
}

/// Source of available human experts. Called under a timeout.
pub trait ExpertDirectory: Send + Sync {
    /// Experts currently available for the expertise tag, generalists
    /// included.
    fn available_experts(&self, expertise: &str) -> Result<Vec<Expert>>;
}

/// Directory backed by the configured roster.
#[derive(Debug, Clone, Default)]
pub struct StaticExpertDirectory {
    experts: Vec<Expert>,
}

impl StaticExpertDirectory {
    pub fn new(roster: &[ExpertConfig]) -> Self {
        Self {
            experts: roster
                .iter()
                .filter(|e| e.available)
                .map(Expert::from)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }
}

impl ExpertDirectory for StaticExpertDirectory {
    fn available_experts(&self, expertise: &str) -> Result<Vec<Expert>> {
        Ok(self
            .experts
            .iter()
            .filter(|e| e.covers(expertise) || e.is_generalist())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<ExpertConfig> {
        vec![
            ExpertConfig {
                id: "fair-1".to_string(),
                name: "Fairness Desk".to_string(),
                expertise: vec!["fairness".to_string()],
                response_time_minutes: 30,
                available: true,
            },
            ExpertConfig {
                id: "gen-1".to_string(),
                name: String::new(),
                expertise: vec!["general".to_string()],
                response_time_minutes: 120,
                available: true,
            },
            ExpertConfig {
                id: "away".to_string(),
                name: "On leave".to_string(),
                expertise: vec!["fairness".to_string()],
                response_time_minutes: 5,
                available: false,
            },
        ]
    }

    #[test]
    fn test_static_directory_filters() {
        let dir = StaticExpertDirectory::new(&roster());
        assert_eq!(dir.len(), 2);

        let fairness = dir.available_experts("Fairness").unwrap();
        let ids: Vec<&str> = fairness.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["fair-1", "gen-1"]);

        let privacy = dir.available_experts("privacy").unwrap();
        assert_eq!(privacy.len(), 1);
        assert_eq!(privacy[0].name, "gen-1");
    }
}
