use crate::utils::error::RetinaError;
use crate::Result;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Ordered disease label list taken from the training reference file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseLabels {
    labels: Vec<String>,
}

impl DiseaseLabels {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(RetinaError::LabelFile("no disease labels declared".to_string()));
        }

        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if label.is_empty() {
                return Err(RetinaError::LabelFile("empty label name".to_string()));
            }
            if !seen.insert(label.as_str()) {
                return Err(RetinaError::LabelFile(format!("duplicate label '{}'", label)));
            }
        }

        Ok(Self { labels })
    }

    /// Read only the header row of a CSV file; every column but `id_column` is a label.
    pub fn from_reference_file(path: &Path, id_column: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            RetinaError::LabelFile(format!("cannot open {}: {}", path.display(), e))
        })?;

        let mut header = String::new();
        BufReader::new(file).read_line(&mut header)?;
        if header.trim().is_empty() {
            return Err(RetinaError::LabelFile(format!("{} has no header row", path.display())));
        }

        let labels = Self::from_header(&header, id_column)?;
        tracing::info!(
            "Loaded {} disease labels from {}",
            labels.len(),
            path.display()
        );
        Ok(labels)
    }

    pub fn from_header(header: &str, id_column: &str) -> Result<Self> {
        let header = header.trim_start_matches('\u{feff}').trim_end_matches(['\r', '\n']);
        let labels = split_csv_row(header)
            .into_iter()
            .filter(|column| column != id_column)
            .collect();
        Self::new(labels)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Split one CSV row, honouring double-quoted fields and `""` escapes.
fn split_csv_row(row: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = row.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}
