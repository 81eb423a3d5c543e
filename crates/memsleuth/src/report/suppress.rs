//! Suppression patterns: loading, wildcard matching, and generation of
//! paste-ready stanzas for unmatched errors.
//!
//! The file format is line oriented: an uppercase error-kind header starts a
//! stanza, and each following non-blank, non-comment line is one frame,
//! either `<module+0xHEX>` (offset form) or `module!symbol` (symbolic form).
//! A stanza matches a stack when its frames are a prefix of the rendered
//! stack, each frame matching as a `*`-wildcard expression.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use super::ErrorKind;

/// Malformed suppression input is a configuration error: fatal, with the
/// offending location.
#[derive(Debug, Error)]
pub enum SuppressError {
    #[error("suppression line {line}: frame before any error-kind header: {text:?}")]
    MissingHeader { line: usize, text: String },
    #[error("suppression line {line}: stanza mixes symbolic and offset frames: {text:?}")]
    MixedForms { line: usize, text: String },
    #[error("reading suppression file")]
    Io(#[from] io::Error),
}

/// One frame pattern, pre-split on `*` so matching is linear in the total
/// characters.
#[derive(Debug, Clone)]
struct FramePattern {
    segments: Vec<String>,
    leading_wild: bool,
}

impl FramePattern {
    fn parse(text: &str) -> Self {
        FramePattern {
            segments: text
                .split('*')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            leading_wild: text.starts_with('*'),
        }
    }

    /// Searches each segment forward in `hay`; the first segment is pinned
    /// to the start unless the pattern opened with `*`. In offset form no
    /// segment may begin past the `>` closing the module+offset triplet.
    fn matches(&self, hay: &str, offset_form: bool) -> bool {
        let mut pos = 0usize;
        for (i, seg) in self.segments.iter().enumerate() {
            let Some(at) = hay[pos..].find(seg.as_str()).map(|p| p + pos) else {
                return false;
            };
            if i == 0 && !self.leading_wild && at != 0 {
                return false;
            }
            if offset_form {
                if let Some(gt) = hay[pos..].find('>').map(|p| p + pos) {
                    if gt < at {
                        return false;
                    }
                }
            }
            pos = at + seg.len();
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SuppressSpec {
    symbolic: bool,
    frames: Vec<FramePattern>,
}

impl SuppressSpec {
    /// Prefix match: every spec frame must match its rendered counterpart.
    fn matches_stack(&self, rendered: &str) -> bool {
        let mut lines = rendered.lines();
        for pattern in &self.frames {
            let Some(line) = lines.next() else {
                // Pattern longer than the error's stack.
                return false;
            };
            let Some((hay, offset_form)) = frame_body(line, self.symbolic) else {
                return false;
            };
            if !pattern.matches(hay, offset_form) {
                return false;
            }
        }
        true
    }
}

/// The portion of a rendered frame a pattern of the given form compares
/// against, plus whether the `>`-boundary rule applies.
fn frame_body(line: &str, symbolic: bool) -> Option<(&str, bool)> {
    if let Some(p) = line.find("system call") {
        return Some((&line[p..], false));
    }
    if symbolic {
        line.find("> ").map(|p| (&line[p + 2..], false))
    } else {
        line.find('<').map(|p| (&line[p..], true))
    }
}

/// All loaded suppressions, stored per error kind.
#[derive(Debug, Default)]
pub struct SuppressionSet {
    specs: [Vec<SuppressSpec>; ErrorKind::COUNT],
    loaded: u32,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.loaded
    }

    pub fn load_file(&mut self, path: &Path, max_frames: usize) -> Result<u32, SuppressError> {
        self.load_reader(BufReader::new(File::open(path)?), max_frames)
    }

    pub fn load_str(&mut self, text: &str, max_frames: usize) -> Result<u32, SuppressError> {
        self.load_reader(text.as_bytes(), max_frames)
    }

    pub fn load_reader(
        &mut self,
        reader: impl BufRead,
        max_frames: usize,
    ) -> Result<u32, SuppressError> {
        let before = self.loaded;
        let mut current: Option<(ErrorKind, bool, bool, Vec<FramePattern>)> = None;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(kind) = ErrorKind::from_header(line) {
                if let Some((k, symbolic, _, frames)) = current.take() {
                    self.add(k, symbolic, frames);
                }
                current = Some((kind, false, false, Vec::new()));
                continue;
            }
            let Some((_, symbolic, modoffs, frames)) = current.as_mut() else {
                return Err(SuppressError::MissingHeader {
                    line: index + 1,
                    text: line.to_owned(),
                });
            };
            // "system call" frames are form-neutral.
            let is_offset_frame = line.starts_with('<');
            if !line.contains("system call") {
                if (*symbolic && is_offset_frame) || (*modoffs && !is_offset_frame) {
                    return Err(SuppressError::MixedForms {
                        line: index + 1,
                        text: line.to_owned(),
                    });
                }
                if is_offset_frame {
                    *modoffs = true;
                } else {
                    *symbolic = true;
                }
            }
            if frames.len() >= max_frames {
                warn!(line = index + 1, "suppression callstack truncated to max frames");
                continue;
            }
            let text = if !is_offset_frame {
                // `?` is a single-character wildcard in symbolic frames.
                line.replace('?', "*")
            } else {
                line.to_owned()
            };
            frames.push(FramePattern::parse(&text));
        }
        if let Some((kind, symbolic, _, frames)) = current {
            self.add(kind, symbolic, frames);
        }
        Ok(self.loaded - before)
    }

    fn add(&mut self, kind: ErrorKind, symbolic: bool, frames: Vec<FramePattern>) {
        self.specs[kind.index()].push(SuppressSpec { symbolic, frames });
        self.loaded += 1;
    }

    pub fn matches(&self, kind: ErrorKind, rendered: &str) -> bool {
        self.specs[kind.index()]
            .iter()
            .any(|spec| spec.matches_stack(rendered))
    }
}

/// Appends a machine-generated pair of stanzas (symbolic and offset form)
/// for an unsuppressed error, ready to paste back into a suppression file.
pub fn write_suggested(
    out: &mut dyn Write,
    kind: ErrorKind,
    rendered: &str,
) -> io::Result<()> {
    write_stanza(out, kind, rendered, true)?;
    writeln!(out)?;
    writeln!(out, "# the mod+offs form of the above callstack:")?;
    write_stanza(out, kind, rendered, false)?;
    writeln!(out)
}

fn write_stanza(
    out: &mut dyn Write,
    kind: ErrorKind,
    rendered: &str,
    symbolic: bool,
) -> io::Result<()> {
    writeln!(out, "{}", kind.header())?;
    for line in rendered.lines() {
        if let Some(p) = line.find("system call") {
            writeln!(out, "{}", &line[p..])?;
        } else if symbolic {
            match line.find("> ") {
                Some(p) => writeln!(out, "{}", line[p + 2..].replace('?', "*"))?,
                None => writeln!(out, "<not in a module>")?,
            }
        } else {
            match (line.find('<'), line.find('>')) {
                (Some(lo), Some(hi)) if lo < hi => writeln!(out, "{}", &line[lo..=hi])?,
                _ => writeln!(out, "<not in a module>")?,
            }
        }
    }
    Ok(())
}
