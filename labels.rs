use crate::error::InitError;
use std::path::Path;
use std::sync::Arc;

/// Class names in output-tensor order. Index `i` names score `i`.
#[derive(Debug, Clone)]
pub struct LabelTable {
    labels: Arc<[String]>,
}

impl LabelTable {
    pub fn load(path: &Path) -> Result<Self, InitError> {
        if !path.exists() {
            return Err(InitError::MissingAsset(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            InitError::MalformedLabels(format!("{}: {e}", path.display()))
        })?;
        let table = Self::parse(&contents)?;
        log::info!("Loaded {} labels from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InitError> {
        let contents = std::str::from_utf8(bytes)
            .map_err(|e| InitError::MalformedLabels(format!("not UTF-8: {e}")))?;
        Self::parse(contents)
    }

    /// One label per line. Trailing blank lines are ignored, blank lines in
    /// between would shift every later index and are rejected.
    pub fn parse(contents: &str) -> Result<Self, InitError> {
        let lines: Vec<&str> = contents.lines().collect();
        let used = lines
            .iter()
            .rposition(|line| !line.trim().is_empty())
            .map_or(0, |last| last + 1);
        let mut labels = Vec::with_capacity(used);
        for (idx, line) in lines[..used].iter().enumerate() {
            match normalize_label(line) {
                Some(label) => labels.push(label),
                None => {
                    return Err(InitError::MalformedLabels(format!(
                        "empty label on line {}",
                        idx + 1
                    )))
                }
            }
        }
        if labels.is_empty() {
            return Err(InitError::MalformedLabels("no labels found".into()));
        }
        Ok(Self {
            labels: labels.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().map(Into::into).collect(),
        }
    }
}

fn normalize_label(line: &str) -> Option<String> {
    let mut label = line.trim();
    if let Some((prefix, rest)) = label.split_once(':') {
        if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
            label = rest.trim();
        }
    }
    label = label.trim_matches('"').trim_matches('\'').trim();
    if label.is_empty() {
        return None;
    }
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_bytes_parse_like_a_file() {
        let table = LabelTable::from_bytes(b"0: tench\n1: goldfish\n\n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1), Some("goldfish"));
    }

    #[test]
    fn embedded_bytes_must_be_utf8() {
        let err = LabelTable::from_bytes(&[b't', b'e', 0xff, 0xfe, b'\n']).unwrap_err();
        assert!(matches!(err, InitError::MalformedLabels(msg) if msg.contains("UTF-8")));
    }

    #[test]
    fn keeps_line_order() {
        let table = LabelTable::parse("tench\ngoldfish\ngreat white shark\n").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("tench"));
        assert_eq!(table.get(2), Some("great white shark"));
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn strips_index_prefix_and_quotes() {
        let table = LabelTable::parse("0: \"tabby, tabby cat\"\r\n1: 'tiger cat'\n").unwrap();
        assert_eq!(table.get(0), Some("tabby, tabby cat"));
        assert_eq!(table.get(1), Some("tiger cat"));
    }

    #[test]
    fn trailing_blank_lines_are_ignored() {
        let table = LabelTable::parse("a\nb\n\n   \n").unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn interior_blank_line_is_rejected() {
        let err = LabelTable::parse("a\n\nb\n").unwrap_err();
        assert!(matches!(err, InitError::MalformedLabels(msg) if msg.contains("line 2")));
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(matches!(
            LabelTable::parse("\n\n"),
            Err(InitError::MalformedLabels(_))
        ));
    }

    #[test]
    fn missing_file_is_reported_as_missing_asset() {
        let path = std::env::temp_dir().join(format!("{}.labels.txt", uuid::Uuid::new_v4()));
        assert!(matches!(
            LabelTable::load(&path),
            Err(InitError::MissingAsset(p)) if p == path
        ));
    }
}
