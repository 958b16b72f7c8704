//! Static config files served from two layered directories: the base
//! `static` tree under the data directory, and (when an environment is
//! selected) that environment's `static` tree on top. Files resolve to the
//! upper layer first; directory listings merge both layers.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use axum::{
    http::header,
    response::{Html, IntoResponse, Response},
};
use tokio::fs;

use crate::error::WebError;

pub async fn serve(relative: &str, environment: &str) -> Result<Response, WebError> {
    let settings = config::settings();
    let relative = sanitize(relative).ok_or(WebError::NotFound)?;

    let lower = settings.data_dir.join("static").join(&relative);
    let upper = (!environment.is_empty()).then(|| {
        settings
            .data_dir
            .join(&settings.env_dir)
            .join(environment)
            .join("static")
            .join(&relative)
    });

    let lower_meta = fs::metadata(&lower).await.ok();
    let upper_meta = match &upper {
        Some(path) => fs::metadata(path).await.ok(),
        None => None,
    };

    if lower_meta.is_none() && upper_meta.is_none() {
        return Err(WebError::NotFound);
    }

    let lower_is_dir = lower_meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
    let upper_is_dir = upper_meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);

    if lower_is_dir || upper_is_dir {
        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        if let (true, Some(path)) = (upper_is_dir, &upper) {
            collect_entries(path, &mut entries).await;
        }
        if lower_is_dir {
            collect_entries(&lower, &mut entries).await;
        }
        return Ok(Html(listing(&entries)).into_response());
    }

    // a file: the upper layer wins when it exists
    let file = match (&upper_meta, upper) {
        (Some(_), Some(path)) => path,
        _ => lower,
    };
    let bytes = fs::read(&file)
        .await
        .map_err(|err| WebError::internal(format!("couldn't read {}: {err}", file.display())))?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.as_ref())], bytes).into_response())
}

/// Normalizes the request path, refusing anything that would climb out of
/// the served tree.
fn sanitize(relative: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}

/// Merges directory entries from one layer into the listing; names already
/// present (from the upper layer) win.
async fn collect_entries(dir: &Path, entries: &mut BTreeMap<String, bool>) {
    let Ok(mut reader) = fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .await
            .map(|kind| kind.is_dir())
            .unwrap_or(false);
        entries.entry(name).or_insert(is_dir);
    }
}

fn listing(entries: &BTreeMap<String, bool>) -> String {
    let mut page = String::from("<pre>\n");
    for (name, is_dir) in entries {
        let display = if *is_dir {
            format!("{name}/")
        } else {
            name.clone()
        };
        page.push_str(&format!("<a href=\"{display}\">{display}</a>\n"));
    }
    page.push_str("</pre>\n");
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize("a/b.txt"), Some(PathBuf::from("a/b.txt")));
        assert_eq!(sanitize("./a"), Some(PathBuf::from("a")));
        assert!(sanitize("../secrets").is_none());
        assert!(sanitize("a/../../b").is_none());
    }

    #[test]
    fn test_listing_marks_directories() {
        let mut entries = BTreeMap::new();
        entries.insert("kernels".to_owned(), true);
        entries.insert("boot.cfg".to_owned(), false);
        assert_eq!(
            listing(&entries),
            "<pre>\n<a href=\"boot.cfg\">boot.cfg</a>\n<a href=\"kernels/\">kernels/</a>\n</pre>\n"
        );
    }
}
