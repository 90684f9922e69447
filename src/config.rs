use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub policy_dir: PathBuf,
    pub extra_keys: Vec<String>,
    pub strict: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let policy_dir = env::var("OBSMAP_POLICY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./policy"));

        // Comma-separated substitution keys beyond the built-in set
        let extra_keys_str = env::var("OBSMAP_EXTRA_KEYS").unwrap_or_default();
        let extra_keys = extra_keys_str
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect();

        let strict = env::var("OBSMAP_STRICT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Config {
            policy_dir,
            extra_keys,
            strict,
        })
    }

    /// Path of a named policy file inside the policy directory.
    pub fn policy_path(&self, name: &str) -> PathBuf {
        self.policy_dir.join(format!("{}.yaml", name))
    }
}
