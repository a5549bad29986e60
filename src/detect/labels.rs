use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::SizeTable;

/// Class index to label, as shipped next to a detection model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    /// One label per line; surrounding whitespace is trimmed, line order is the
    /// class index.
    pub fn parse(text: &str) -> Self {
        Self {
            labels: text.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read label map {}: {}", path.display(), e))?;
        let map = Self::parse(&text);
        if map.labels.iter().all(|label| label.is_empty()) {
            return Err(anyhow!("label map {} is empty", path.display()));
        }
        Ok(map)
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|label| label.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels the model can emit that have no known width.
    pub fn unmapped<'a>(&'a self, sizes: &SizeTable) -> Vec<&'a str> {
        self.labels
            .iter()
            .map(|label| label.as_str())
            .filter(|label| !label.is_empty() && !sizes.contains(label))
            .collect()
    }
}
