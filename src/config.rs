use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use json_comments::StripComments;
use serde::{Deserialize, Serialize};
use serde_json::{Serializer, ser::PrettyFormatter};

fn default_false() -> bool {
    false
}

fn default_protected_prefixes() -> Vec<String> {
    vec!["/backend-api/codex".to_owned(), "/v1".to_owned()]
}

#[derive(Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// When enabled, the firewall trusts the first entry of X-Forwarded-For
    /// as the client address. Only turn this on behind a reverse proxy.
    #[serde(default = "default_false")]
    pub trust_proxy_headers: bool,
    /// Path prefixes gated by the IP allowlist. A path is protected when it
    /// equals a prefix or continues it with a '/'.
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,
}

impl ServerConfig {
    pub fn load(source: &Path) -> anyhow::Result<Self> {
        let file = File::open(source)?;
        let stripped = StripComments::new(file);

        Ok(serde_json::from_reader(stripped)?)
    }

    pub fn save(&self, dest: &Path) -> anyhow::Result<()> {
        let writer = OpenOptions::new().write(true).create(true).truncate(true).open(dest)?;

        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = Serializer::with_formatter(writer, formatter);
        self.serialize(&mut serializer)?;

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}
