//! Version model
//!
//! A lenient PEP 440 version: `[v][N!]X.Y.Z[{a|b|rc}N][.postN][.devN][+local]`.
//! Release segments compare with implicit zero padding, so `3.8 == 3.8.0`.
//! Local labels are accepted and ignored for ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{PlanError, Result};

/// Pre-release phase, ordered alpha < beta < release candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Candidate,
}

/// A parsed package or interpreter version
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreRelease, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || PlanError::InvalidVersion {
            version: input.to_string(),
        };

        let text = input.trim();
        let lowered = text.to_ascii_lowercase();
        let mut rest = lowered.strip_prefix('v').unwrap_or(&lowered);

        // Local version labels do not participate in ordering.
        if let Some((public, local)) = rest.split_once('+') {
            if local.is_empty() {
                return Err(invalid());
            }
            rest = public;
        }

        let mut epoch = 0;
        if let Some((e, tail)) = rest.split_once('!') {
            epoch = e.parse().map_err(|_| invalid())?;
            rest = tail;
        }

        let mut cursor = Cursor::new(rest);
        let mut release = vec![cursor.number().ok_or_else(invalid)?];
        while cursor.peek() == Some('.') && cursor.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            cursor.bump();
            release.push(cursor.number().ok_or_else(invalid)?);
        }

        let mut pre = None;
        let mut post = None;
        let mut dev = None;

        let checkpoint = cursor.pos;
        cursor.separator();
        if let Some(phase) = cursor.pre_label() {
            cursor.separator();
            pre = Some((phase, cursor.number().unwrap_or(0)));
        } else {
            cursor.pos = checkpoint;
        }

        let checkpoint = cursor.pos;
        if cursor.peek() == Some('-') && cursor.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            cursor.bump();
            post = cursor.number();
        } else {
            cursor.separator();
            if cursor.keyword(&["post", "rev", "r"]) {
                cursor.separator();
                post = Some(cursor.number().unwrap_or(0));
            } else {
                cursor.pos = checkpoint;
            }
        }

        let checkpoint = cursor.pos;
        cursor.separator();
        if cursor.keyword(&["dev"]) {
            dev = Some(cursor.number().unwrap_or(0));
        } else {
            cursor.pos = checkpoint;
        }

        if !cursor.is_done() {
            return Err(invalid());
        }

        Ok(Self {
            text: text.to_string(),
            epoch,
            release,
            pre,
            post,
            dev,
        })
    }

    /// Release segments, e.g. `[3, 11, 4]`
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// True for alpha, beta, candidate and dev releases
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// True when the version carries any pre, post or dev suffix
    pub fn has_suffix(&self) -> bool {
        self.pre.is_some() || self.post.is_some() || self.dev.is_some()
    }

    /// True when this version's release starts with every segment of `prefix`
    ///
    /// Missing segments on either side count as zero.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        self.epoch == prefix.epoch
            && prefix
                .release
                .iter()
                .enumerate()
                .all(|(i, p)| self.release.get(i).copied().unwrap_or(0) == *p)
    }

    /// The smallest final release above every version sharing the first
    /// `len` release segments, e.g. `bump(2)` of `1.4.2` is `1.5`
    ///
    /// `None` when the segment to increment is already `u64::MAX`.
    pub fn bump(&self, len: usize) -> Option<Version> {
        let len = len.max(1);
        let mut release: Vec<u64> = (0..len)
            .map(|i| self.release.get(i).copied().unwrap_or(0))
            .collect();
        let last = release.last_mut()?;
        *last = last.checked_add(1)?;
        Some(Self::from_release(self.epoch, release))
    }

    fn from_release(epoch: u64, release: Vec<u64>) -> Self {
        let mut text = release
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        if epoch != 0 {
            text = format!("{}!{}", epoch, text);
        }
        Self {
            text,
            epoch,
            release,
            pre: None,
            post: None,
            dev: None,
        }
    }

    // dev-only releases sort below every pre-release of the same release.
    fn suffix_key(&self) -> (u8, Option<(PreRelease, u64)>, Option<u64>, (bool, u64)) {
        let phase = match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => 0,
            (Some(_), _, _) => 1,
            _ => 2,
        };
        let dev = (self.dev.is_none(), self.dev.unwrap_or(0));
        (phase, self.pre, self.post, dev)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| {
                let len = self.release.len().max(other.release.len());
                (0..len)
                    .map(|i| {
                        let a = self.release.get(i).copied().unwrap_or(0);
                        let b = other.release.get(i).copied().unwrap_or(0);
                        a.cmp(&b)
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.suffix_key().cmp(&other.suffix_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Byte cursor over an ASCII-lowered version string
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn number(&mut self) -> Option<u64> {
        let digits = self.rest().chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value = self.rest()[..digits].parse().ok()?;
        self.pos += digits;
        Some(value)
    }

    fn separator(&mut self) {
        if matches!(self.peek(), Some('.' | '-' | '_')) {
            self.bump();
        }
    }

    fn keyword(&mut self, words: &[&str]) -> bool {
        match words.iter().find(|w| self.rest().starts_with(*w)) {
            Some(word) => {
                self.pos += word.len();
                true
            }
            None => false,
        }
    }

    fn pre_label(&mut self) -> Option<PreRelease> {
        // Longest spellings first so `alpha` is not read as `a` + garbage.
        const LABELS: &[(&str, PreRelease)] = &[
            ("preview", PreRelease::Candidate),
            ("alpha", PreRelease::Alpha),
            ("beta", PreRelease::Beta),
            ("pre", PreRelease::Candidate),
            ("rc", PreRelease::Candidate),
            ("a", PreRelease::Alpha),
            ("b", PreRelease::Beta),
            ("c", PreRelease::Candidate),
        ];
        let (word, phase) = LABELS.iter().find(|(w, _)| self.rest().starts_with(w))?;
        self.pos += word.len();
        Some(*phase)
    }
}
