//! C4 — loader script generation and mod-copy reconciliation (§4.4).
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::constant::{LOADER_FILE_NAME, LOADER_MODS_SUBDIR, MOD_FILE_EXTENSION, TOOL_VERSION};
use crate::error::Error;
use crate::fileutil::write_atomic;
use crate::hash::{derive_fingerprint, hash_bytes, hash_file};
use crate::manifest::ModEntry;

/// The generated loader artifact: its script content, content hash, and the
/// fingerprint derived from it (§4.1, §4.4).
#[derive(Debug, Clone)]
pub struct GeneratedLoader {
    pub content: String,
    pub content_hash: String,
    pub fingerprint: String,
}

/// Outcome of reconciling the per-installation mod copy directory against
/// the currently enabled set (§4.4 "stale copies are pruned").
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub copied: Vec<String>,
    pub pruned: Vec<String>,
}

/// Builds the loader script body: for each enabled mod, in order, a dynamic
/// `import()` of its copied source (§6 "Loader format" — "dynamically
/// imports `./mods/<filename>` for each enabled mod id, in order"). The body
/// excludes the fingerprint header line, since the fingerprint is derived
/// from this body's hash (see [`generate_loader`]) and embedding it here
/// would be circular.
fn render_loader_body(enabled_mods: &[&ModEntry], target_browser_version: Option<&str>) -> String {
    let mut script = String::new();
    if let Some(version) = target_browser_version {
        script.push_str(&format!("// target-vivaldi={version}\n"));
    }
    script.push_str("(async () => {\n");
    for entry in enabled_mods {
        script.push_str(&format!(
            "  await import(/* {} */ \"./mods/{}\");\n",
            entry.id, entry.filename
        ));
    }
    script.push_str("})();\n");
    script
}

/// Generates the loader script for the given enabled mods, deterministically
/// ordered (§3 `enabled_mods_in_order`), as a pure function of `(enabled
/// mods, tool version, target browser version)` (§4.4). The fingerprint is
/// derived from the body's content hash and the ordered mod ids (§4.1), then
/// prepended as the literal first-line comment the stub/loader contract
/// requires (§6): `// vmm-loader fingerprint=<64-hex> tool=<semver>`.
#[instrument(skip(enabled_mods))]
pub fn generate_loader(enabled_mods: &[&ModEntry], target_browser_version: Option<&str>) -> GeneratedLoader {
    let body = render_loader_body(enabled_mods, target_browser_version);
    let content_hash = hash_bytes(body.as_bytes());
    let ordered_ids: Vec<String> = enabled_mods.iter().map(|m| m.id.clone()).collect();
    let fingerprint = derive_fingerprint(&content_hash, &ordered_ids);

    let content = format!("// vmm-loader fingerprint={fingerprint} tool={TOOL_VERSION}\n{body}");

    GeneratedLoader {
        content,
        content_hash,
        fingerprint,
    }
}

/// Writes the generated loader script to `loader_dir/loader.js` atomically.
pub fn write_loader(loader_dir: &Path, generated: &GeneratedLoader) -> Result<(), Error> {
    let path = loader_dir.join(LOADER_FILE_NAME);
    write_atomic(&path, generated.content.as_bytes())
}

/// Reconciles `loader_dir/mods/` against the enabled set: copies any
/// enabled mod whose source is missing or whose content hash differs from
/// the copy, and removes any copy whose id is no longer enabled (§4.4).
#[instrument(skip(enabled_mods))]
pub fn reconcile_mod_copies(
    mods_root: &Path,
    loader_dir: &Path,
    enabled_mods: &[&ModEntry],
) -> Result<ReconcileReport, Error> {
    let copies_dir = loader_dir.join(LOADER_MODS_SUBDIR);
    std::fs::create_dir_all(&copies_dir)?;

    let mut report = ReconcileReport::default();
    let mut wanted_filenames: HashSet<String> = HashSet::new();

    for entry in enabled_mods {
        wanted_filenames.insert(entry.filename.clone());
        let source = mods_root.join(&entry.filename);
        let dest = copies_dir.join(&entry.filename);

        if !source.exists() {
            warn!(mod_id = %entry.id, "enabled mod source is missing, skipping copy");
            continue;
        }

        if needs_copy(&source, &dest)? {
            let contents = std::fs::read(&source)?;
            write_atomic(&dest, &contents)?;
            report.copied.push(entry.filename.clone());
        }
    }

    for existing in existing_copy_filenames(&copies_dir)? {
        if !wanted_filenames.contains(&existing) {
            let stale = copies_dir.join(&existing);
            std::fs::remove_file(&stale)?;
            report.pruned.push(existing);
        }
    }

    debug!(
        copied = report.copied.len(),
        pruned = report.pruned.len(),
        "reconciled mod copies"
    );
    Ok(report)
}

fn needs_copy(source: &Path, dest: &Path) -> Result<bool, Error> {
    if !dest.exists() {
        return Ok(true);
    }
    Ok(hash_file(source)? != hash_file(dest)?)
}

fn existing_copy_filenames(copies_dir: &Path) -> Result<Vec<String>, Error> {
    if !copies_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(copies_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MOD_FILE_EXTENSION))
        {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn mod_entry(id: &str, order: u32) -> ModEntry {
        let now = Utc::now();
        ModEntry {
            id: id.to_string(),
            filename: format!("{id}.js"),
            enabled: true,
            order,
            notes: None,
            checksum: "x".to_string(),
            last_modified: now,
            version: None,
            url_scopes: Vec::new(),
            last_known_compatible_vivaldi: None,
            created_at: now,
            updated_at: now,
            file_size: 0,
            is_validated: false,
        }
    }

    #[test]
    fn test_generate_loader_is_deterministic_for_same_input() {
        let a = mod_entry("a", 0);
        let b = mod_entry("b", 1);
        let enabled = vec![&a, &b];

        let first = generate_loader(&enabled, Some("6.5.0"));
        let second = generate_loader(&enabled, Some("6.5.0"));

        assert_eq!(first.content, second.content);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_generate_loader_changes_fingerprint_when_set_changes() {
        let a = mod_entry("a", 0);
        let b = mod_entry("b", 1);

        let only_a = generate_loader(&[&a], None);
        let both = generate_loader(&[&a, &b], None);

        assert_ne!(only_a.fingerprint, both.fingerprint);
    }

    #[test]
    fn test_generate_loader_first_line_is_fingerprint_header() {
        let a = mod_entry("a", 0);
        let generated = generate_loader(&[&a], None);
        let first_line = generated.content.lines().next().unwrap();

        assert!(first_line.starts_with("// vmm-loader fingerprint="));
        assert!(first_line.contains(&generated.fingerprint));
        assert!(first_line.contains("tool="));
    }

    #[test]
    fn test_generate_loader_dynamically_imports_each_enabled_mod() {
        let a = mod_entry("a", 0);
        let b = mod_entry("b", 1);
        let generated = generate_loader(&[&a, &b], None);

        assert!(generated.content.contains("import(/* a */ \"./mods/a.js\")"));
        assert!(generated.content.contains("import(/* b */ \"./mods/b.js\")"));
    }

    #[test]
    fn test_reconcile_copies_enabled_mods_and_prunes_stale() {
        let mods_root = tempdir().unwrap();
        let loader_dir = tempdir().unwrap();

        std::fs::write(mods_root.path().join("a.js"), b"console.log('a')").unwrap();
        std::fs::write(mods_root.path().join("b.js"), b"console.log('b')").unwrap();

        let a = mod_entry("a", 0);
        let b = mod_entry("b", 1);

        let report = reconcile_mod_copies(mods_root.path(), loader_dir.path(), &[&a, &b]).unwrap();
        assert_eq!(report.copied.len(), 2);
        assert!(report.pruned.is_empty());

        // Disabling `b` (dropping it from the enabled slice) should prune its
        // copy on the next reconciliation pass.
        let report = reconcile_mod_copies(mods_root.path(), loader_dir.path(), &[&a]).unwrap();
        assert!(report.copied.is_empty());
        assert_eq!(report.pruned, vec!["b.js".to_string()]);

        let copies_dir = loader_dir.path().join(LOADER_MODS_SUBDIR);
        assert!(copies_dir.join("a.js").exists());
        assert!(!copies_dir.join("b.js").exists());
    }

    #[test]
    fn test_reconcile_skips_copy_when_hash_unchanged() {
        let mods_root = tempdir().unwrap();
        let loader_dir = tempdir().unwrap();
        std::fs::write(mods_root.path().join("a.js"), b"console.log('a')").unwrap();
        let a = mod_entry("a", 0);

        reconcile_mod_copies(mods_root.path(), loader_dir.path(), &[&a]).unwrap();
        let report = reconcile_mod_copies(mods_root.path(), loader_dir.path(), &[&a]).unwrap();

        assert!(report.copied.is_empty());
    }
}
