//! Takes host-edited `CONFIG.TXT` bytes apart, line by line, and runs each
//! registered entry's validate/update pair over what it finds.
//!
//! Hosts hand us whatever their filesystem drivers felt like writing, so
//! nothing in here trusts the input: lines are length-capped into fixed
//! slots, values are copied out before any callback sees them, and every
//! miss falls back to the entry's default.

use super::registry::{Registry, MAX_ENTRIES};

use log::debug;

/// Parse slot capacity. Lines keep their first `LINE_CAP - 1` bytes; the
/// 2048th byte of a line is the first one dropped.
pub const LINE_CAP: usize = 2048;

/// Parse slots; one per registrable entry.
pub const MAX_LINES: usize = MAX_ENTRIES;

/// Fixed line slots the splitter copies into.
pub struct LineSlots {
    bufs: [[u8; LINE_CAP]; MAX_LINES],
    lens: [u16; MAX_LINES],
    count: u8,
}

impl LineSlots {
    pub fn new() -> Self {
        Self {
            bufs: [[0; LINE_CAP]; MAX_LINES],
            lens: [0; MAX_LINES],
            count: 0,
        }
    }

    /// Splits `region` into lines on CRLF or LF (a bare CR is content, not
    /// a terminator). A NUL byte or the region's end is EOF; an empty line
    /// or EOF stops the scan. At most [`MAX_LINES`] lines are kept, each
    /// truncated to `LINE_CAP - 1` bytes.
    pub fn split(&mut self, region: &[u8]) -> usize {
        self.count = 0;

        let mut pos = 0;
        while (self.count as usize) < MAX_LINES {
            // Find the next terminator (or EOF).
            let mut end = pos;
            let mut terminated = false;
            while end < region.len() {
                match region[end] {
                    0 => break,
                    b'\n' => {
                        terminated = true;
                        break;
                    }
                    _ => end += 1,
                }
            }

            // Strip the CR of a CRLF pair; a CR at EOF stays.
            let mut line_end = end;
            if terminated && line_end > pos && region[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let len = (line_end - pos).min(LINE_CAP - 1);
            if len == 0 {
                break;
            }

            let k = self.count as usize;
            self.bufs[k][..len].copy_from_slice(&region[pos..pos + len]);
            self.lens[k] = len as u16;
            self.count += 1;

            if !terminated {
                break;
            }
            pos = end + 1;
        }

        self.count as usize
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn line(&self, i: usize) -> &[u8] {
        &self.bufs[i][..self.lens[i] as usize]
    }

    /// First line reading `name=`…, if any.
    pub fn find(&self, name: &[u8]) -> Option<&[u8]> {
        (0..self.len())
            .map(|i| self.line(i))
            .find(|line| {
                line.len() > name.len() && &line[..name.len()] == name && line[name.len()] == b'='
            })
    }

    /// Scratch space for assembling render lines once parsing is done.
    pub fn scratch(&mut self) -> &mut [u8] {
        self.count = 0;
        &mut self.bufs[0]
    }
}

/// The value portion of a matched line: everything between the `=` and the
/// first `\t#` pair (which opens an in-band comment) or the end of line.
pub fn value_of<'l>(line: &'l [u8], name_len: usize) -> &'l [u8] {
    let v = &line[name_len + 1..];

    let mut i = 0;
    while i + 1 < v.len() {
        if v[i] == b'\t' && v[i + 1] == b'#' {
            return &v[..i];
        }
        i += 1;
    }

    v
}

/// What one pass of per-entry processing decided.
pub struct Outcome {
    /// Some entry was missing or failed validation; the canonical rewrite
    /// is not just a reformatting of what the host sent.
    pub illegal: bool,

    /// Slots whose canonical line must come from the default rather than
    /// the printer.
    pub force_defaults: u8,
}

/// Runs every registered entry, in registration order, against the parsed
/// lines:
///
/// * line found and the value validates (or there is no validator): the
///   updater is applied and the slot later renders from its printer;
/// * line found but the value is rejected: the updater is *not* called,
///   the slot renders its default, `illegal` is set;
/// * no line at all: the updater is applied to the default and the slot
///   renders it, `illegal` is set.
///
/// Values are copied into `cleaned` (null-padded) before any callback
/// runs, so callbacks never see the raw slot storage.
pub fn apply_entries(
    registry: &Registry,
    slots: &LineSlots,
    cleaned: &mut [u8; LINE_CAP],
) -> Outcome {
    let mut outcome = Outcome {
        illegal: false,
        force_defaults: 0,
    };

    for (k, entry) in registry.iter() {
        match slots.find(entry.name()) {
            Some(line) => {
                let value = value_of(line, entry.name().len());

                for b in cleaned.iter_mut() {
                    *b = 0;
                }
                cleaned[..value.len()].copy_from_slice(value);
                let value = &cleaned[..value.len()];

                let accepted = entry.validate.map(|v| v(value)).unwrap_or(true);
                if accepted {
                    if let Some(update) = entry.update {
                        update(value);
                    }
                } else {
                    debug!("{:?}: value rejected, reverting to default", entry.name());
                    outcome.force_defaults |= 1 << k;
                    outcome.illegal = true;
                }
            }

            None => {
                debug!("{:?}: no line submitted, using default", entry.name());
                if let Some(update) = entry.update {
                    update(entry.default_value());
                }
                outcome.force_defaults |= 1 << k;
                outcome.illegal = true;
            }
        }
    }

    outcome
}
