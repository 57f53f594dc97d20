//! Link extraction from free-form chat messages
//!
//! Finds drive-hosted file links in a message and infers, for each link, the
//! release title, part index and declared total from the surrounding text,
//! the message header, or file name conventions.
//!
//! Numbering is recognised in these forms:
//! - `"GameX part 2 of 5"`, `"GameX parte 2 de 5"`, `"GameX pt 2/5"`
//! - `"GameX [2/5]"` and `"GameX (2/5)"`
//! - `"Juego: GameX, Parte: 2"` (index only)
//! - file names such as `GameX.part02.rar` or `GameX.7z.002` (index only)
//! - a bare `"part 2"` (index only)
//!
//! When no numbering can be found, the link is treated as a complete
//! single-part release (index 1 of 1).

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::{Locator, Message, PartLink, ReleaseKey};
use regex::Regex;
use tracing::{debug, trace};

/// Numbering recovered from a piece of text
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedHints {
    /// The text carries a part marker
    Matched {
        /// Title found next to the marker, if any
        title: Option<String>,
        /// 1-based part index
        index: u32,
        /// Declared total, if the marker states one
        total: Option<u32>,
    },
    /// No usable part marker
    Unrecognized,
}

/// Extracts [`PartLink`]s from messages
pub struct LinkExtractor {
    drive_hosts: Vec<String>,
    url: Regex,
    original_format: Regex,
    part_of: Regex,
    bracketed: Regex,
    file_part: Regex,
    split_archive: Regex,
    bare_part: Regex,
    file_name: Regex,
    title_label: Regex,
}

impl LinkExtractor {
    /// Build an extractor for the configured drive hosts
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            drive_hosts: config
                .drive_hosts
                .iter()
                .map(|h| h.trim().to_lowercase())
                .collect(),
            url: compile(r#"https?://[^\s<>"'\]\)]+"#)?,
            original_format: compile(
                r"(?i)juego:\s*(?P<title>.*?),\s*parte:\s*(?P<index>\d{1,4})\b",
            )?,
            part_of: compile(
                r"(?i)\b(?:part|parte|pt|disc|disk|cd)\.?\s*[:#]?\s*(?P<index>\d{1,4})\s*(?:of|de|/)\s*(?P<total>\d{1,4})\b",
            )?,
            bracketed: compile(r"[\[(]\s*(?P<index>\d{1,4})\s*/\s*(?P<total>\d{1,4})\s*[\])]")?,
            file_part: compile(
                r"(?i)(?P<stem>[\w\-.]+?)[._\-]part(?P<index>\d{1,4})\.(?:rar|zip|7z)\b",
            )?,
            split_archive: compile(
                r"(?i)(?P<stem>[\w\-.]+?)\.(?:7z|zip|rar|bin|iso)\.(?P<index>\d{3})\b",
            )?,
            bare_part: compile(r"(?i)\b(?:part|parte|pt)\.?\s*[:#]?\s*(?P<index>\d{1,4})\b")?,
            file_name: compile(r"(?i)[\w\-.]+\.(?:rar|zip|7z|iso|bin|exe|\d{3})\b")?,
            title_label: compile(r"(?i)^(?:juego|game|title|t[ií]tulo)\s*:\s*")?,
        })
    }

    /// Extract every drive-hosted part link carried by a message
    ///
    /// Returns an empty vector when the message has no recognisable drive link.
    pub fn extract(&self, message: &Message) -> Vec<PartLink> {
        let links = self.drive_links(&message.text);
        if links.is_empty() {
            trace!(message = %message.id, "No drive link in message");
            return Vec::new();
        }

        let full_text = self.strip_urls(&message.text);
        let header = self.message_title(&full_text);
        let media_name = message.media.as_ref().and_then(|m| m.file_name.as_deref());
        let single = links.len() == 1;

        links
            .into_iter()
            .map(|(locator, context)| {
                let mut hints = self.parse_hints(&context);
                if single && hints == ParsedHints::Unrecognized {
                    hints = self.parse_hints(&full_text);
                }
                if single
                    && hints == ParsedHints::Unrecognized
                    && let Some(name) = media_name
                {
                    hints = self.parse_hints(name);
                }

                let (title, index, total) = match hints {
                    ParsedHints::Matched {
                        title,
                        index,
                        total,
                    } => {
                        let title = title
                            .or_else(|| header.clone())
                            .or_else(|| self.file_name_stem(&context))
                            .or_else(|| media_name.map(strip_extensions))
                            .unwrap_or_else(|| locator.file_id.clone());
                        (title, index, total)
                    }
                    ParsedHints::Unrecognized => {
                        // Without numbering each link stands alone; with several links
                        // the shared header would merge unrelated files into one release.
                        let title = if single {
                            header
                                .clone()
                                .or_else(|| media_name.map(strip_extensions))
                                .or_else(|| self.file_name_stem(&context))
                        } else {
                            self.file_name_stem(&context)
                        }
                        .unwrap_or_else(|| locator.file_id.clone());
                        (title, 1, Some(1))
                    }
                };

                debug!(
                    message = %message.id,
                    release = %title,
                    part_index = index,
                    total = ?total,
                    file_id = %locator.file_id,
                    "Extracted part link"
                );

                PartLink {
                    release: ReleaseKey::from_title(&title),
                    title,
                    index,
                    total,
                    locator,
                    source_message: message.id,
                    posted_at: message.timestamp,
                }
            })
            .collect()
    }

    /// Recover part numbering from a piece of text
    ///
    /// This is a pure function of `text`. An index of zero or an index beyond
    /// the stated total is rejected as unrecognized.
    pub fn parse_hints(&self, text: &str) -> ParsedHints {
        let text = text.trim();
        if text.is_empty() {
            return ParsedHints::Unrecognized;
        }

        if let Some(caps) = self.original_format.captures(text) {
            let title = caps.name("title").map(|m| self.clean_title(m.as_str()));
            return validated(title.filter(|t| !t.is_empty()), number(&caps, "index"), None);
        }

        for pattern in [&self.part_of, &self.bracketed] {
            if let Some(caps) = pattern.captures(text) {
                let Some(whole) = caps.get(0) else { continue };
                let title = self.title_around(text, whole.start(), whole.end());
                let Some(total) = number(&caps, "total") else {
                    continue;
                };
                return validated(title, number(&caps, "index"), Some(total));
            }
        }

        for pattern in [&self.file_part, &self.split_archive] {
            if let Some(caps) = pattern.captures(text) {
                let title = caps
                    .name("stem")
                    .map(|m| self.clean_title(m.as_str()))
                    .filter(|t| !t.is_empty());
                return validated(title, number(&caps, "index"), None);
            }
        }

        if let Some(caps) = self.bare_part.captures(text)
            && let Some(whole) = caps.get(0)
        {
            let title = self.title_around(text, whole.start(), whole.end());
            return validated(title, number(&caps, "index"), None);
        }

        ParsedHints::Unrecognized
    }

    /// Find drive links in `text`, each paired with the text that describes it
    ///
    /// A link alone on its line is described by the whole line. With several
    /// links on one line, each gets the stretch of text between it and its
    /// neighbour: the stretch after it when the markers trail the links (the
    /// line ends, but does not start, with a part marker), otherwise the
    /// stretch before it. Links to the same file id collapse to
    /// the first occurrence.
    fn drive_links(&self, text: &str) -> Vec<(Locator, String)> {
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();

        for line in text.lines() {
            let found: Vec<(Locator, usize, usize)> = self
                .url
                .find_iter(line)
                .filter_map(|m| {
                    let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
                    let file_id = self.drive_file_id(raw)?;
                    let locator = Locator {
                        file_id,
                        url: raw.to_string(),
                    };
                    Some((locator, m.start(), m.start() + raw.len()))
                })
                .collect();

            let contexts: Vec<String> = if found.len() == 1 {
                vec![self.strip_urls(line)]
            } else {
                // gaps[i] is the text just before link i; the last gap trails the line
                let mut gaps = Vec::with_capacity(found.len() + 1);
                let mut cursor = 0;
                for (_, start, end) in &found {
                    gaps.push(self.strip_urls(&line[cursor..*start]));
                    cursor = *end;
                }
                gaps.push(self.strip_urls(&line[cursor..]));

                let numbered = |gap: Option<&String>| {
                    gap.is_some_and(|g| self.parse_hints(g) != ParsedHints::Unrecognized)
                };
                let markers_trail = !numbered(gaps.first()) && numbered(gaps.last());
                let offset = usize::from(markers_trail);
                (0..found.len()).map(|i| gaps[i + offset].clone()).collect()
            };

            for ((locator, _, _), context) in found.into_iter().zip(contexts) {
                if seen.insert(locator.file_id.clone()) {
                    links.push((locator, context));
                }
            }
        }

        links
    }

    /// File id of a drive file link, or `None` for other hosts, folders and malformed links
    fn drive_file_id(&self, raw: &str) -> Option<String> {
        let parsed = url::Url::parse(raw).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        let hosted = self
            .drive_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")));
        if !hosted {
            return None;
        }

        let segments: Vec<&str> = parsed.path_segments()?.collect();
        if segments.contains(&"folders") {
            return None;
        }

        let from_path = segments
            .windows(2)
            .find(|pair| pair[0] == "d")
            .map(|pair| pair[1].to_string());
        let id = from_path.or_else(|| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == "id")
                .map(|(_, v)| v.into_owned())
        })?;

        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(id)
    }

    fn strip_urls(&self, text: &str) -> String {
        self.url.replace_all(text, " ").into_owned()
    }

    /// Title for the whole message: the first line that names something
    fn message_title(&self, text: &str) -> Option<String> {
        for line in text.lines() {
            if self.clean_title(line).is_empty() {
                continue;
            }
            match self.parse_hints(line) {
                ParsedHints::Matched { title: Some(t), .. } => return Some(t),
                ParsedHints::Matched { title: None, .. } => continue,
                ParsedHints::Unrecognized => return Some(self.clean_title(line)),
            }
        }
        None
    }

    /// Title next to a part marker: the text before it, else the text after it
    fn title_around(&self, text: &str, start: usize, end: usize) -> Option<String> {
        let before = text[..start]
            .lines()
            .rev()
            .map(|l| self.clean_title(l))
            .find(|l| !l.is_empty());
        before.or_else(|| {
            text[end..]
                .lines()
                .map(|l| self.clean_title(l))
                .find(|l| !l.is_empty())
        })
    }

    fn file_name_stem(&self, text: &str) -> Option<String> {
        self.file_name
            .find(text)
            .map(|m| strip_extensions(m.as_str()))
            .filter(|s| !s.is_empty())
    }

    fn clean_title(&self, raw: &str) -> String {
        let trimmed = raw.trim_matches(is_title_noise);
        let unlabeled = self.title_label.replace(trimmed, "");
        unlabeled.trim_matches(is_title_noise).to_string()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Other(format!("invalid extraction pattern: {}", e)))
}

fn number(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn validated(title: Option<String>, index: Option<u32>, total: Option<u32>) -> ParsedHints {
    match (index, total) {
        (Some(index), Some(total)) if index >= 1 && index <= total => ParsedHints::Matched {
            title,
            index,
            total: Some(total),
        },
        (Some(index), None) if index >= 1 => ParsedHints::Matched {
            title,
            index,
            total: None,
        },
        _ => ParsedHints::Unrecognized,
    }
}

fn is_title_noise(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '-' | '–' | '—' | ':' | ',' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '#' | '~'
                | '•' | '.' | '_'
        )
}

/// Strip archive extensions, including split suffixes such as `.7z.001`
fn strip_extensions(name: &str) -> String {
    let mut stem = name.trim();
    loop {
        let Some((head, ext)) = stem.rsplit_once('.') else {
            break;
        };
        let known = (ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit()))
            || ["rar", "zip", "7z", "iso", "bin", "exe"]
                .iter()
                .any(|e| ext.eq_ignore_ascii_case(e));
        if head.is_empty() || !known {
            break;
        }
        stem = head;
    }
    stem.to_string()
}
