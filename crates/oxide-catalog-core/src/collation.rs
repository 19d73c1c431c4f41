//! Collation-aware string comparison.
//!
//! Object keys are compared with the collation of the nearest ancestor that
//! declares one, falling back to the server default. Both SQL Server style
//! names (`Latin1_General_CI_AS`, `..._BIN2`) and SQLite names (`BINARY`,
//! `NOCASE`, `RTRIM`) are understood.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A string comparison rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation {
    /// Collation name as reported by the server.
    pub name: String,
    /// Whether `a` and `A` are distinct.
    pub case_sensitive: bool,
    /// Whether `e` and `é` are distinct.
    pub accent_sensitive: bool,
    /// Whether trailing spaces are ignored.
    pub trim_trailing: bool,
    /// Whether case folding only applies to ASCII letters.
    pub ascii_fold: bool,
}

impl Default for Collation {
    fn default() -> Self {
        Self::binary()
    }
}

impl Collation {
    /// Byte-wise comparison.
    #[must_use]
    pub fn binary() -> Self {
        Self {
            name: "BINARY".to_string(),
            case_sensitive: true,
            accent_sensitive: true,
            trim_trailing: false,
            ascii_fold: false,
        }
    }

    /// Parses a collation name.
    ///
    /// Unknown names fall back to case-insensitive, accent-sensitive
    /// comparison, the most common server default.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        let mut collation = Self {
            name: name.trim().to_string(),
            case_sensitive: false,
            accent_sensitive: true,
            trim_trailing: false,
            ascii_fold: false,
        };
        match upper.as_str() {
            "BINARY" => {
                collation.case_sensitive = true;
                return collation;
            }
            "NOCASE" => {
                collation.ascii_fold = true;
                return collation;
            }
            "RTRIM" => {
                collation.case_sensitive = true;
                collation.trim_trailing = true;
                return collation;
            }
            _ => {}
        }
        for part in upper.split('_') {
            match part {
                "CS" | "BIN" | "BIN2" => collation.case_sensitive = true,
                "CI" => collation.case_sensitive = false,
                "AS" => collation.accent_sensitive = true,
                "AI" => collation.accent_sensitive = false,
                _ => {}
            }
        }
        collation
    }

    /// Compares two strings under this collation.
    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let (a, b) = if self.trim_trailing {
            (a.trim_end_matches(' '), b.trim_end_matches(' '))
        } else {
            (a, b)
        };
        if self.case_sensitive && self.accent_sensitive {
            return a.cmp(b);
        }
        let left = a.chars().flat_map(|c| self.fold(c));
        let right = b.chars().flat_map(|c| self.fold(c));
        left.cmp(right)
    }

    /// Returns true if both strings are equal under this collation.
    #[must_use]
    pub fn equals(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    fn fold(&self, c: char) -> impl Iterator<Item = char> {
        let c = if self.accent_sensitive {
            c
        } else {
            strip_accent(c)
        };
        let folded: Vec<char> = if self.case_sensitive {
            vec![c]
        } else if self.ascii_fold {
            vec![c.to_ascii_lowercase()]
        } else {
            c.to_lowercase().collect()
        };
        folded.into_iter()
    }
}

fn strip_accent(c: char) -> char {
    match c {
        'À'..='Å' => 'A',
        'à'..='å' => 'a',
        'Ç' => 'C',
        'ç' => 'c',
        'È'..='Ë' => 'E',
        'è'..='ë' => 'e',
        'Ì'..='Ï' => 'I',
        'ì'..='ï' => 'i',
        'Ñ' => 'N',
        'ñ' => 'n',
        'Ò'..='Ö' | 'Ø' => 'O',
        'ò'..='ö' | 'ø' => 'o',
        'Ù'..='Ü' => 'U',
        'ù'..='ü' => 'u',
        'Ý' => 'Y',
        'ý' | 'ÿ' => 'y',
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sql_server_names() {
        let ci = Collation::parse("SQL_Latin1_General_CP1_CI_AS");
        assert!(!ci.case_sensitive);
        assert!(ci.accent_sensitive);

        let cs = Collation::parse("Latin1_General_CS_AI");
        assert!(cs.case_sensitive);
        assert!(!cs.accent_sensitive);

        let bin = Collation::parse("Latin1_General_BIN2");
        assert!(bin.case_sensitive);
    }

    #[test]
    fn test_case_insensitive_compare() {
        let ci = Collation::parse("SQL_Latin1_General_CP1_CI_AS");
        assert!(ci.equals("Orders", "ORDERS"));
        assert_eq!(ci.compare("apple", "Banana"), Ordering::Less);
        assert!(!ci.equals("cafe", "café"));
    }

    #[test]
    fn test_accent_insensitive_compare() {
        let ai = Collation::parse("Latin1_General_CI_AI");
        assert!(ai.equals("cafe", "CAFÉ"));
    }

    #[test]
    fn test_binary_is_ordinal() {
        let bin = Collation::binary();
        assert_eq!(bin.compare("B", "a"), Ordering::Less);
        assert!(!bin.equals("a", "A"));
    }

    #[test]
    fn test_sqlite_names() {
        let nocase = Collation::parse("NOCASE");
        assert!(nocase.equals("Users", "USERS"));
        assert!(!nocase.equals("Ä", "ä"));

        let rtrim = Collation::parse("rtrim");
        assert!(rtrim.equals("name  ", "name"));
        assert!(!rtrim.equals("Name", "name"));
    }
}
