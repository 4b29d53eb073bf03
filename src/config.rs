//! Vault configuration.
//!
//! One frozen [`VaultConfig`] value is loaded at vault open (TOML file at the
//! vault root) and passed down through construction. Nothing in the engine
//! reads configuration ambiently; per-invocation flags (`no_reweave`,
//! `sync`) ride on the call, not here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};

/// Name of the configuration file at the vault root.
pub const CONFIG_FILE: &str = "verdant.toml";
/// Name of the derived-state directory under the vault root.
pub const STATE_DIR: &str = ".verdant";
/// Name of the index database file inside the state directory.
pub const INDEX_DB: &str = "index.db";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct VaultSection {
    /// Display name; embedded in generated self-documents.
    pub name: String,
    /// Integration flavor; selects optional side artifacts.
    pub client: String,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            name: "vault".to_string(),
            client: "generic".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ContextSection {
    /// Default token budget for context assembly.
    pub default_budget: usize,
    /// Cap for topic-layer (Layer 2) items.
    pub layer_2_max_notes: usize,
    /// Graph traversal depth for Layer 3.
    pub layer_3_max_hops: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            default_budget: 8000,
            layer_2_max_notes: 10,
            layer_3_max_hops: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AgentSection {
    /// Selects the self-document template variant.
    pub tone: Tone,
    pub context: ContextSection,
}

/// Self-document template variant.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Neutral,
    Warm,
    Terse,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReweaveSection {
    /// Vault-wide gate for automatic reweaving.
    pub enabled: bool,
    /// Composite-score cutoff for applying a suggested link.
    pub min_score_threshold: f64,
    /// Per-node outgoing-link cap.
    pub max_links_per_note: usize,
    pub lexical_weight: f64,
    pub tag_weight: f64,
    pub graph_weight: f64,
    pub topic_weight: f64,
}

impl Default for ReweaveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_score_threshold: 0.6,
            max_links_per_note: 8,
            lexical_weight: 0.35,
            tag_weight: 0.25,
            graph_weight: 0.25,
            topic_weight: 0.15,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GardenSection {
    /// Advisory: seeds older than this many days are flagged by check.
    pub seed_age_warning_days: i64,
    /// Advisory: evergreen notes should carry at least this many key points.
    pub evergreen_min_key_points: usize,
    /// Advisory: evergreen notes should have this many bidirectional links.
    pub evergreen_min_bidirectional_links: usize,
}

impl Default for GardenSection {
    fn default() -> Self {
        Self {
            seed_age_warning_days: 30,
            evergreen_min_key_points: 3,
            evergreen_min_bidirectional_links: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchSection {
    /// Recency-decay half-life in days.
    pub half_life_days: f64,
    pub semantic_enabled: bool,
    pub embedding_model: String,
    pub embedding_dim: usize,
    /// Weight of the semantic score in hybrid ranking.
    pub semantic_weight: f64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            semantic_enabled: false,
            embedding_model: String::new(),
            embedding_dim: 384,
            semantic_weight: 0.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionSection {
    /// Run cross-session reweave during close.
    pub close_reweave: bool,
    /// Run the orphan sweep during close.
    pub close_orphan_sweep: bool,
    /// Run the read-only integrity scan during close.
    pub close_integrity_check: bool,
    /// Lowered composite threshold used by the orphan sweep.
    pub orphan_reweave_threshold: f64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            close_reweave: true,
            close_orphan_sweep: true,
            close_integrity_check: true,
            orphan_reweave_threshold: 0.4,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CheckSection {
    /// Backups older than this many days are pruned.
    pub backup_retention_days: i64,
    /// At most this many backups are kept.
    pub backup_max_count: usize,
}

impl Default for CheckSection {
    fn default() -> Self {
        Self {
            backup_retention_days: 14,
            backup_max_count: 10,
        }
    }
}

/// The complete, frozen vault configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub vault: VaultSection,
    pub agent: AgentSection,
    pub reweave: ReweaveSection,
    pub garden: GardenSection,
    pub search: SearchSection,
    pub session: SessionSection,
    pub check: CheckSection,
}

impl VaultConfig {
    /// Load configuration from the vault root, failing with `NoConfig` when
    /// the file is absent and `InvalidFormat` when it does not parse.
    pub fn load(vault_root: &Path) -> Result<Self> {
        let path = vault_root.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(VaultError::NoConfig(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: VaultConfig = toml::from_str(&raw)
            .map_err(|e| VaultError::InvalidFormat(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        let sum = self.reweave.lexical_weight
            + self.reweave.tag_weight
            + self.reweave.graph_weight
            + self.reweave.topic_weight;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(VaultError::ValidationFailed {
                message: format!("reweave signal weights must sum to 1.0, got {sum}"),
                fields: vec![
                    "reweave.lexical_weight".into(),
                    "reweave.tag_weight".into(),
                    "reweave.graph_weight".into(),
                    "reweave.topic_weight".into(),
                ],
            });
        }
        if !(0.0..=1.0).contains(&self.reweave.min_score_threshold) {
            return Err(VaultError::ValidationFailed {
                message: "reweave.min_score_threshold must lie in [0, 1]".into(),
                fields: vec!["reweave.min_score_threshold".into()],
            });
        }
        if self.search.half_life_days <= 0.0 {
            return Err(VaultError::ValidationFailed {
                message: "search.half_life_days must be positive".into(),
                fields: vec!["search.half_life_days".into()],
            });
        }
        Ok(())
    }

    /// Serialize the starter configuration written by `Vault::init`.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).expect("config serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = VaultConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reweave.min_score_threshold, 0.6);
        assert_eq!(config.agent.context.default_budget, 8000);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = "[vault]\nname = \"research\"\n\n[reweave]\nmin_score_threshold = 0.7\n";
        let config: VaultConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.vault.name, "research");
        assert_eq!(config.reweave.min_score_threshold, 0.7);
        // Untouched sections keep their defaults.
        assert_eq!(config.search.half_life_days, 30.0);
        assert!(config.session.close_reweave);
    }

    #[test]
    fn test_weight_sum_enforced() {
        let mut config = VaultConfig::default();
        config.reweave.lexical_weight = 0.9;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "ValidationFailed");
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = VaultConfig::default();
        let raw = config.to_toml();
        let parsed: VaultConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.reweave.max_links_per_note, config.reweave.max_links_per_note);
        assert_eq!(parsed.agent.tone, Tone::Neutral);
    }
}
