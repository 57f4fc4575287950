//! Desktop entry manifest parsing
//!
//! Manifests are INI-style documents. Only the `[Desktop Entry]` section is
//! read; its `Icon` key names a PNG file that sits next to the manifest.

use crate::error::{ExtractError, Result};
use crate::types::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Section every manifest must carry
pub const DESKTOP_ENTRY_SECTION: &str = "Desktop Entry";

/// String fields of a `[Desktop Entry]` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    /// `Name`
    pub name: String,
    /// `Type`
    pub kind: String,
    /// `Comment`
    pub comment: String,
    /// `Categories`, split on `;` with empty items dropped
    pub categories: Vec<String>,
    /// `Icon`, a base filename without extension
    pub icon: String,
}

impl DesktopEntry {
    /// Parse manifest text; `manifest` is only used in error messages
    ///
    /// `Icon` must be a bare file name: separators, `..` and absolute paths are
    /// rejected since the manifest comes from a downloaded archive.
    pub fn parse(content: &str, manifest: &Path) -> Result<Self> {
        let sections = parse_sections(content, manifest)?;
        let section = sections
            .get(DESKTOP_ENTRY_SECTION)
            .ok_or_else(|| ExtractError::MissingSection {
                manifest: manifest.to_path_buf(),
                section: DESKTOP_ENTRY_SECTION.to_string(),
            })?;

        let value = |key: &str| {
            section
                .get(key)
                .map(|(value, _)| value.clone())
                .unwrap_or_default()
        };

        let icon = value("Icon");
        if let Some((_, line)) = section.get("Icon") {
            if !is_bare_file_name(&icon) {
                return Err(ExtractError::MalformedManifest {
                    manifest: manifest.to_path_buf(),
                    line: *line,
                    reason: format!("icon '{}' is not a plain file name", icon),
                }
                .into());
            }
        }

        Ok(Self {
            name: value("Name"),
            kind: value("Type"),
            comment: value("Comment"),
            categories: value("Categories")
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            icon,
        })
    }

    /// Location of the icon image for a manifest in `dir`
    pub fn icon_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.png", self.icon))
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.contains(['/', '\\'])
        && !name.contains("..")
        && !Path::new(name).is_absolute()
}

type Section = HashMap<String, (String, usize)>;

/// Section name to key/(value, line) map; later duplicate keys overwrite earlier ones
fn parse_sections(content: &str, manifest: &Path) -> Result<HashMap<String, Section>> {
    let mut sections: HashMap<String, Section> = HashMap::new();
    let mut current: Option<String> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        let malformed = |reason: &str| ExtractError::MalformedManifest {
            manifest: manifest.to_path_buf(),
            line: index + 1,
            reason: reason.to_string(),
        };

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| malformed("unterminated section header"))?
                .trim();
            if name.is_empty() {
                return Err(malformed("empty section name").into());
            }
            sections.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| malformed("expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed("empty key").into());
        }

        // Keys before the first header belong to no section and are ignored
        if let Some(section) = &current {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), (value.trim().to_string(), index + 1));
        }
    }

    Ok(sections)
}

/// Read a manifest file and its icon into an [`Entry`]
pub async fn read_entry(manifest: &Path) -> Result<Entry> {
    let content = tokio::fs::read_to_string(manifest).await?;
    let desktop = DesktopEntry::parse(&content, manifest)?;

    let dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    let icon_path = desktop.icon_path(dir);
    let resolved = match tokio::fs::canonicalize(&icon_path).await {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractError::MissingIcon { path: icon_path }.into());
        }
        Err(e) => return Err(e.into()),
    };
    // A symlinked icon must stay inside the unpacked tree
    if !resolved.starts_with(tokio::fs::canonicalize(dir).await?) {
        return Err(ExtractError::MissingIcon { path: icon_path }.into());
    }
    let icon = tokio::fs::read(&resolved).await?;

    Ok(Entry {
        name: desktop.name,
        kind: desktop.kind,
        description: desktop.comment,
        categories: desktop.categories,
        icon,
    })
}
