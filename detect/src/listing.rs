//! Directory enumeration.

use crate::common::*;

/// The entries of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The directory does not exist.
    NotFound(PathBuf),
    /// Full paths of all entries in unspecified order.
    Entries(Vec<PathBuf>),
}

impl Listing {
    /// The entry paths. A missing directory has no entries.
    pub fn into_paths(self) -> Vec<PathBuf> {
        match self {
            Self::NotFound(_) => vec![],
            Self::Entries(paths) => paths,
        }
    }
}

/// List all entries of a directory, including subdirectories.
pub async fn list_dir<P>(dir: P) -> Result<Listing>
where
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(Listing::NotFound(dir.to_owned()))
        }
        Err(err) => {
            return Err(Error::from(err))
                .with_context(|| format!("unable to list directory '{}'", dir.display()))
        }
    };

    let mut paths = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("unable to list directory '{}'", dir.display()))?
    {
        paths.push(entry.path());
    }

    Ok(Listing::Entries(paths))
}
