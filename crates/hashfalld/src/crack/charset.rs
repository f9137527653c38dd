//! Char-set subsets used to crack hints.

/// A char set with one character left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharSubset {
    pub chars: Vec<char>,
    pub excluded: char,
}

pub struct CharSetManager {
    chars: Vec<char>,
}

impl CharSetManager {
    /// Duplicates are dropped; order is kept.
    pub fn new(chars: &[char]) -> Self {
        let mut unique = Vec::with_capacity(chars.len());
        for &c in chars {
            if !unique.contains(&c) {
                unique.push(c);
            }
        }
        Self { chars: unique }
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// One subset per character, each missing exactly that character.
    pub fn subsets(&self) -> Vec<CharSubset> {
        self.chars
            .iter()
            .map(|&excluded| CharSubset {
                chars: self.chars.iter().copied().filter(|&c| c != excluded).collect(),
                excluded,
            })
            .collect()
    }
}
