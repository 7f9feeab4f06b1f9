use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Immutable class id → display name mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: BTreeMap<u32, String>,
}

impl LabelMap {
    /// Read and parse a label file. Any malformed line rejects the whole file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(path, &raw)
    }

    /// Parse label text; `origin` only feeds error messages.
    ///
    /// Each line must look like `<id><whitespace><label>`. Later duplicates
    /// replace earlier ones.
    pub fn parse(origin: &Path, raw: &str) -> Result<Self> {
        static LABEL_LINE_RE: OnceLock<regex::Regex> = OnceLock::new();
        let re = LABEL_LINE_RE.get_or_init(|| {
            regex::Regex::new(r"^\s*(\d+)\s+(\S.*)$").expect("label line pattern is valid")
        });

        let mut labels = BTreeMap::new();
        for (idx, line) in raw.lines().enumerate() {
            let malformed = || Error::LabelParse {
                path: origin.to_path_buf(),
                line: idx + 1,
                content: line.to_string(),
            };
            let caps = re.captures(line).ok_or_else(malformed)?;
            let id: u32 = caps[1].parse().map_err(|_| malformed())?;
            labels.insert(id, caps[2].trim().to_string());
        }
        Ok(Self { labels })
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Like `get`, but a missing id is an error.
    pub fn lookup(&self, id: u32) -> Result<&str> {
        self.get(id).ok_or(Error::UnknownLabel(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.labels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(u32, String)> for LabelMap {
    fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<LabelMap> {
        LabelMap::parse(Path::new("labels.txt"), raw)
    }

    #[test]
    fn parses_ids_and_trims_labels() -> Result<()> {
        let labels = parse("0 person\n15   cat  \n  7\ttraffic light\n")?;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("person"));
        assert_eq!(labels.get(15), Some("cat"));
        assert_eq!(labels.get(7), Some("traffic light"));
        assert_eq!(labels.ids().collect::<Vec<_>>(), vec![0, 7, 15]);
        Ok(())
    }

    #[test]
    fn later_duplicate_wins() -> Result<()> {
        let labels = parse("1 bicycle\n1 bike\n")?;
        assert_eq!(labels.get(1), Some("bike"));
        Ok(())
    }

    #[test]
    fn rejects_malformed_line_anywhere() {
        for raw in [
            "person\n1 car\n2 bus\n",
            "0 person\ncar\n2 bus\n",
            "0 person\n1 car\nbus\n",
        ] {
            match parse(raw) {
                Err(Error::LabelParse { line, .. }) => assert!((1..=3).contains(&line)),
                other => panic!("expected LabelParse, got {:?}", other),
            }
        }
    }

    #[test]
    fn rejects_id_without_label_and_blank_lines() {
        assert!(matches!(parse("3\n"), Err(Error::LabelParse { .. })));
        assert!(matches!(parse("3   \n"), Err(Error::LabelParse { .. })));
        assert!(matches!(
            parse("0 person\n\n1 car\n"),
            Err(Error::LabelParse { line: 2, .. })
        ));
    }

    #[test]
    fn lookup_of_unknown_id_fails() -> Result<()> {
        let labels = parse("0 person\n")?;
        assert!(matches!(labels.lookup(4), Err(Error::UnknownLabel(4))));
        Ok(())
    }
}
