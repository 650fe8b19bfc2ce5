use std::borrow::Cow;
use std::path::Path;

use anyhow::{Context, Result};

/// Class index to display name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Reads one label per line; blank lines are ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        Ok(Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Name for `index`, or `class<index>` when the map does not cover it.
    pub fn name(&self, index: usize) -> Cow<'_, str> {
        match self.names.get(index) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(format!("class{}", index)),
        }
    }

    /// Case-insensitive comparison against the configured target class.
    pub fn is_class(&self, index: usize, target: &str) -> bool {
        self.name(index).eq_ignore_ascii_case(target.trim())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_indices_get_a_placeholder() {
        let labels = LabelMap::new(vec!["bear".into(), "deer".into()]);
        assert_eq!(labels.name(1), "deer");
        assert_eq!(labels.name(5), "class5");
    }

    #[test]
    fn target_match_ignores_case() {
        let labels = LabelMap::new(vec!["Bear".into()]);
        assert!(labels.is_class(0, "bear"));
        assert!(labels.is_class(0, " BEAR "));
        assert!(!labels.is_class(1, "bear"));
    }

    #[test]
    fn loads_labels_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, b"bear\n\n wolf \nboar\n")?;
        let labels = LabelMap::from_file(file.path())?;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), "wolf");
        Ok(())
    }
}
