//! Loading of the operator-UI page templates. The five section templates
//! are mandatory; a missing one is a startup failure.

use std::path::{Path, PathBuf};

use tera::Tera;

const PAGE_TEMPLATES: &[&str] = &[
    "header.html",
    "index.html",
    "events.html",
    "mappings.html",
    "footer.html",
];

#[derive(Debug, thiserror::Error)]
pub enum PagesError {
    #[error("page template does not exist: {}", .path.display())]
    Missing { path: PathBuf },

    #[error("couldn't parse page templates: {0}")]
    Engine(#[from] tera::Error),
}

pub fn load(static_dir: &Path) -> Result<Tera, PagesError> {
    let html_dir = static_dir.join("templates").join("html");
    for name in PAGE_TEMPLATES {
        let path = html_dir.join(name);
        if !path.is_file() {
            return Err(PagesError::Missing { path });
        }
    }
    Ok(Tera::new(&format!("{}/*.html", html_dir.display()))?)
}
