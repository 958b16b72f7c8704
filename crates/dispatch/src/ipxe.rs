//! The catalog of boot scripts available on disk, used by the iPXE menu
//! endpoint and the operator index page.

use std::path::Path;

use common::prelude::tracing;
use serde::Serialize;

/// One selectable boot script: its template name, the environment it comes
/// from (empty for default) and the URL prefix it renders under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub env: String,
    pub path: String,
}

/// Collects every available script: the main `ipxe` directory first, then
/// each overlay environment's `ipxe` directory.
pub fn script_list(
    data_dir: &Path,
    env_dir: &str,
    template_extension: &str,
    environments: &[String],
) -> Vec<CatalogEntry> {
    let mut scripts = Vec::new();
    append_scripts_from_dir(
        &mut scripts,
        template_extension,
        &data_dir.join("ipxe"),
        "",
        "/configs/",
    );

    for environment in environments {
        let dir = data_dir.join(env_dir).join(environment).join("ipxe");
        append_scripts_from_dir(
            &mut scripts,
            template_extension,
            &dir,
            environment,
            &format!("/env/{environment}/configs/"),
        );
    }
    scripts
}

fn append_scripts_from_dir(
    scripts: &mut Vec<CatalogEntry>,
    template_extension: &str,
    dir: &Path,
    env: &str,
    path: &str,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::info!(dir = %dir.display(), %err, "can't list script directory");
            return;
        }
    };

    let suffix = format!(".ipxe{template_extension}");
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(&suffix) {
                return None;
            }
            name.strip_suffix(template_extension).map(str::to_owned)
        })
        .collect();
    names.sort();

    for name in names {
        scripts.push(CatalogEntry {
            name,
            env: env.to_owned(),
            path: path.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{{define \"x\"}}\n{{end}}\n").unwrap();
    }

    #[test]
    fn test_catalog_covers_default_and_environments() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "ipxe/ubuntu.ipxe.slc");
        touch(dir.path(), "ipxe/coreos.ipxe.slc");
        touch(dir.path(), "ipxe/notes.txt");
        touch(dir.path(), "env_overrides/prod/ipxe/ubuntu.ipxe.slc");

        let scripts = script_list(
            dir.path(),
            "env_overrides",
            ".slc",
            &["prod".to_owned()],
        );

        assert_eq!(
            scripts,
            vec![
                CatalogEntry {
                    name: "coreos.ipxe".to_owned(),
                    env: String::new(),
                    path: "/configs/".to_owned(),
                },
                CatalogEntry {
                    name: "ubuntu.ipxe".to_owned(),
                    env: String::new(),
                    path: "/configs/".to_owned(),
                },
                CatalogEntry {
                    name: "ubuntu.ipxe".to_owned(),
                    env: "prod".to_owned(),
                    path: "/env/prod/configs/".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_missing_directories_yield_an_empty_catalog() {
        let dir = TempDir::new().unwrap();
        assert!(script_list(dir.path(), "env_overrides", ".slc", &[]).is_empty());
    }
}
