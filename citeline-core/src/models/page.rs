//! Page-level extraction output.

use serde::{Deserialize, Serialize};

use super::chunk::TABLE_MARKER;

/// Text and tables extracted from a single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub page_number: u32,
    pub text: String,
    /// Tables as rows of cells.
    #[serde(default)]
    pub tables: Vec<Vec<Vec<String>>>,
}

impl ExtractedPage {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, rows: Vec<Vec<String>>) -> Self {
        self.tables.push(rows);
        self
    }

    pub fn has_tables(&self) -> bool {
        self.tables.iter().any(|t| !t.is_empty())
    }

    /// Page text followed by each table rendered between table markers.
    pub fn combined_content(&self) -> String {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        for table in &self.tables {
            let rendered = format_table(table);
            if !rendered.is_empty() {
                parts.push(format!("\n{TABLE_MARKER}\n{rendered}\n[/Table]"));
            }
        }
        parts.join("\n")
    }
}

fn format_table(table: &[Vec<String>]) -> String {
    table
        .iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_content_text_only() {
        let page = ExtractedPage::new(1, "Plain text");
        assert_eq!(page.combined_content(), "Plain text");
        assert!(!page.has_tables());
    }

    #[test]
    fn test_combined_content_with_table() {
        let page = ExtractedPage::new(2, "Intro").with_table(vec![
            vec!["Name".into(), "Role".into()],
            vec!["Ada".into(), "Manager".into()],
        ]);
        assert_eq!(
            page.combined_content(),
            "Intro\n\n[Table]\nName | Role\nAda | Manager\n[/Table]"
        );
        assert!(page.has_tables());
    }

    #[test]
    fn test_empty_table_skipped() {
        let page = ExtractedPage::new(3, "").with_table(Vec::new());
        assert_eq!(page.combined_content(), "");
    }
}
